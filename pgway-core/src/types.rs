//! Classification of PostgreSQL types into the flag set that drives parsing
//! and JSON emission throughout the gateway.

use std::ops::BitOr;

/// Bit set of type classification flags.
///
/// A descriptor usually carries more than one flag — `text` is
/// `TEXT | NEEDS_ESCAPE`, `timestamp` is `DATE_TIME`, an enum or domain over
/// text is `TEXT | NEEDS_ESCAPE | CAST_TO_TEXT`.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeCategory(u16);

impl TypeCategory {
    pub const NONE: TypeCategory = TypeCategory(0);
    /// Emitted as a bare JSON token (integers, floats, numeric).
    pub const NUMERIC: TypeCategory = TypeCategory(1);
    /// Wire text `t`/`f`, emitted as `true`/`false`.
    pub const BOOLEAN: TypeCategory = TypeCategory(1 << 1);
    /// `json`/`jsonb` — wire text is already JSON and is inlined verbatim.
    pub const JSON: TypeCategory = TypeCategory(1 << 2);
    /// Emitted as a JSON string.
    pub const TEXT: TypeCategory = TypeCategory(1 << 3);
    /// Timestamp kinds; wire text has its date/time separator space replaced
    /// by `T` before quoting.
    pub const DATE_TIME: TypeCategory = TypeCategory(1 << 4);
    pub const DATE: TypeCategory = TypeCategory(1 << 5);
    pub const TIME: TypeCategory = TypeCategory(1 << 6);
    /// `bytea` — streamed as raw bytes, never JSON-shaped.
    pub const BINARY: TypeCategory = TypeCategory(1 << 7);
    /// Content may contain quotes/backslashes and must be JSON-escaped.
    pub const NEEDS_ESCAPE: TypeCategory = TypeCategory(1 << 8);
    /// The gateway cannot bind this type natively; parameters and results
    /// are coerced through `::text`.
    pub const CAST_TO_TEXT: TypeCategory = TypeCategory(1 << 9);

    pub fn contains(self, other: TypeCategory) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: TypeCategory) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for TypeCategory {
    type Output = TypeCategory;

    fn bitor(self, rhs: TypeCategory) -> TypeCategory {
        TypeCategory(self.0 | rhs.0)
    }
}

impl std::fmt::Debug for TypeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (Self::NUMERIC, "NUMERIC"),
            (Self::BOOLEAN, "BOOLEAN"),
            (Self::JSON, "JSON"),
            (Self::TEXT, "TEXT"),
            (Self::DATE_TIME, "DATE_TIME"),
            (Self::DATE, "DATE"),
            (Self::TIME, "TIME"),
            (Self::BINARY, "BINARY"),
            (Self::NEEDS_ESCAPE, "NEEDS_ESCAPE"),
            (Self::CAST_TO_TEXT, "CAST_TO_TEXT"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        write!(f, "TypeCategory({})", names.join("|"))
    }
}

/// Classify a base type name (no modifiers, no array suffix) into its flags.
///
/// Unknown names are assumed to be user-defined types (enums, domains,
/// composites) and classify as escaped text coerced through `::text`.
pub fn categorize(base_type: &str) -> TypeCategory {
    match base_type {
        "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" | "numeric" | "decimal"
        | "real" | "double precision" | "float4" | "float8" | "oid" | "smallserial" | "serial"
        | "bigserial" => TypeCategory::NUMERIC,
        "boolean" | "bool" => TypeCategory::BOOLEAN,
        "json" | "jsonb" => TypeCategory::JSON,
        "text" | "character varying" | "varchar" | "character" | "char" | "bpchar" | "name"
        | "citext" => TypeCategory::TEXT | TypeCategory::NEEDS_ESCAPE,
        "uuid" => TypeCategory::TEXT,
        "timestamp" | "timestamp without time zone" | "timestamp with time zone"
        | "timestamptz" => TypeCategory::DATE_TIME,
        "date" => TypeCategory::DATE,
        "time" | "time without time zone" | "time with time zone" | "timetz" => {
            TypeCategory::TIME
        }
        "interval" => TypeCategory::TEXT | TypeCategory::CAST_TO_TEXT,
        "bytea" => TypeCategory::BINARY,
        "inet" | "cidr" | "macaddr" | "macaddr8" => TypeCategory::TEXT,
        "xml" | "tsvector" | "tsquery" | "money" | "bit" | "bit varying" | "varbit" => {
            TypeCategory::TEXT | TypeCategory::NEEDS_ESCAPE | TypeCategory::CAST_TO_TEXT
        }
        "record" => TypeCategory::TEXT | TypeCategory::NEEDS_ESCAPE | TypeCategory::CAST_TO_TEXT,
        "void" => TypeCategory::NONE,
        _ => TypeCategory::TEXT | TypeCategory::NEEDS_ESCAPE | TypeCategory::CAST_TO_TEXT,
    }
}

/// Field metadata for a resolved composite type.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeFields {
    pub names: Vec<String>,
    pub fields: Vec<TypeDescriptor>,
}

/// Everything the gateway knows about one PostgreSQL type, as reported by
/// the introspection query.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeDescriptor {
    /// Type name exactly as reported, e.g. `character varying(32)[]`.
    pub original_type: String,
    /// Name with modifiers and array suffix stripped, e.g. `character varying`.
    pub base_db_type: String,
    /// The type used in parameter casts. Equals `base_db_type` unless the
    /// type is coerced through text (`CAST_TO_TEXT`), in which case it is
    /// `text`.
    pub actual_db_type: String,
    pub is_array: bool,
    pub category: TypeCategory,
    pub has_default: bool,
    /// Name of the user-defined type this descriptor was resolved from,
    /// when the introspection query linked one.
    pub custom_type: Option<String>,
    /// Resolved composite field metadata, for composite and
    /// array-of-composite types.
    pub composite: Option<CompositeFields>,
}

impl TypeDescriptor {
    /// Build a descriptor from a reported type name.
    ///
    /// Handles the `type(modifiers)` and trailing `[]` forms that
    /// `format_type` produces.
    pub fn new(original_type: &str, has_default: bool) -> Self {
        let trimmed = original_type.trim();
        let (no_array, is_array) = match trimmed.strip_suffix("[]") {
            Some(inner) => (inner.trim_end(), true),
            None => (trimmed, false),
        };
        let base = match no_array.find('(') {
            // `timestamp(3) with time zone` keeps its suffix
            Some(open) => {
                let close = no_array.rfind(')').unwrap_or(no_array.len() - 1);
                let mut base = no_array[..open].trim_end().to_string();
                let tail = no_array[close + 1..].trim();
                if !tail.is_empty() {
                    base.push(' ');
                    base.push_str(tail);
                }
                base
            }
            None => no_array.to_string(),
        };
        let category = categorize(&base);
        let actual = if category.contains(TypeCategory::CAST_TO_TEXT) {
            "text".to_string()
        } else {
            base.clone()
        };
        TypeDescriptor {
            original_type: trimmed.to_string(),
            base_db_type: base,
            actual_db_type: actual,
            is_array,
            category,
            has_default,
            custom_type: None,
            composite: None,
        }
    }

    pub fn is(&self, category: TypeCategory) -> bool {
        self.category.contains(category)
    }

    /// True when the wire text is emitted without surrounding quotes.
    pub fn emits_bare(&self) -> bool {
        self.category
            .intersects(TypeCategory::NUMERIC | TypeCategory::BOOLEAN | TypeCategory::JSON)
    }

    /// True for the timestamp kinds whose wire text needs the space → `T`
    /// substitution before quoting.
    pub fn is_date_time(&self) -> bool {
        self.category.contains(TypeCategory::DATE_TIME)
    }

    /// The cast to apply in parameter position, including the array suffix.
    pub fn param_cast(&self) -> String {
        if self.is_array {
            format!("{}[]", self.actual_db_type)
        } else {
            self.actual_db_type.clone()
        }
    }

    /// Element descriptor for an array type.
    pub fn element(&self) -> TypeDescriptor {
        let mut elem = self.clone();
        elem.is_array = false;
        elem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_scalars() {
        assert!(categorize("integer").contains(TypeCategory::NUMERIC));
        assert!(categorize("boolean").contains(TypeCategory::BOOLEAN));
        assert!(categorize("jsonb").contains(TypeCategory::JSON));
        assert!(categorize("text").contains(TypeCategory::TEXT));
        assert!(categorize("text").contains(TypeCategory::NEEDS_ESCAPE));
        assert!(categorize("bytea").contains(TypeCategory::BINARY));
        assert!(categorize("timestamp with time zone").contains(TypeCategory::DATE_TIME));
    }

    #[test]
    fn unknown_types_coerce_through_text() {
        let cat = categorize("my_enum");
        assert!(cat.contains(TypeCategory::TEXT));
        assert!(cat.contains(TypeCategory::CAST_TO_TEXT));
    }

    #[test]
    fn descriptor_strips_modifiers_and_array_suffix() {
        let td = TypeDescriptor::new("character varying(32)", false);
        assert_eq!(td.base_db_type, "character varying");
        assert!(!td.is_array);

        let td = TypeDescriptor::new("integer[]", false);
        assert_eq!(td.base_db_type, "integer");
        assert!(td.is_array);
        assert_eq!(td.param_cast(), "integer[]");

        let td = TypeDescriptor::new("numeric(10,2)[]", true);
        assert_eq!(td.base_db_type, "numeric");
        assert!(td.is_array);
        assert!(td.has_default);
    }

    #[test]
    fn descriptor_keeps_modifier_suffix_words() {
        let td = TypeDescriptor::new("timestamp(3) with time zone", false);
        assert_eq!(td.base_db_type, "timestamp with time zone");
        assert!(td.is_date_time());
    }

    #[test]
    fn cast_to_text_rewrites_actual_type() {
        let td = TypeDescriptor::new("my_enum", false);
        assert_eq!(td.actual_db_type, "text");
        let td = TypeDescriptor::new("integer", false);
        assert_eq!(td.actual_db_type, "integer");
    }
}
