//! Immutable descriptors of discovered database routines and their
//! per-request parameter instances.

use std::collections::BTreeMap;

use crate::naming;
use crate::types::TypeDescriptor;

/// Kind of database object behind an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutineType {
    Function,
    Procedure,
    Table,
    View,
    Other,
}

impl RoutineType {
    pub fn parse(tag: &str) -> RoutineType {
        match tag {
            "function" => RoutineType::Function,
            "procedure" => RoutineType::Procedure,
            "table" => RoutineType::Table,
            "view" => RoutineType::View,
            _ => RoutineType::Other,
        }
    }
}

/// Routine volatility as reported by `pg_proc.provolatile`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Volatility {
    Volatile,
    Stable,
    Immutable,
    Other,
}

impl Volatility {
    pub fn parse(tag: &str) -> Volatility {
        match tag {
            "v" => Volatility::Volatile,
            "s" => Volatility::Stable,
            "i" => Volatility::Immutable,
            _ => Volatility::Other,
        }
    }
}

/// CRUD classification used for default HTTP method selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrudType {
    Select,
    Insert,
    Update,
    Delete,
}

/// Derive the CRUD kind of a routine from its name prefix and volatility.
///
/// Read-only naming always classifies as `Select`, as do all non-volatile
/// routines regardless of name.
pub fn crud_type(name: &str, volatility: Volatility) -> CrudType {
    let lower = name.to_ascii_lowercase();
    let lower = lower.trim_start_matches('_');
    for prefix in ["get", "select", "read", "find", "list", "search", "fetch"] {
        if lower == prefix || lower.starts_with(&format!("{prefix}_")) {
            return CrudType::Select;
        }
    }
    if volatility != Volatility::Volatile {
        return CrudType::Select;
    }
    for prefix in ["insert", "create", "add", "register", "new"] {
        if lower == prefix || lower.starts_with(&format!("{prefix}_")) {
            return CrudType::Insert;
        }
    }
    for prefix in ["update", "upsert", "merge", "set", "change"] {
        if lower == prefix || lower.starts_with(&format!("{prefix}_")) {
            return CrudType::Update;
        }
    }
    for prefix in ["delete", "remove", "drop"] {
        if lower == prefix || lower.starts_with(&format!("{prefix}_")) {
            return CrudType::Delete;
        }
    }
    CrudType::Insert
}

/// Where a bound parameter value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamSource {
    QueryString,
    BodyJson,
    BodyParam,
    HeaderParam,
    PathParam,
}

/// A per-request parameter value, always carried to PostgreSQL as text.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ParamValue {
    /// Not yet bound (template state).
    #[default]
    Unbound,
    /// SQL NULL.
    Null,
    /// Wire-text value; arrays serialized as `{…}` literals.
    Text(String),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self, ParamValue::Unbound)
    }

    /// The text to send over the wire, `None` for SQL NULL.
    pub fn as_wire(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One routine input parameter.
///
/// The metadata builder produces a template vector (value unbound); the
/// binder clones it per request and fills in `value`,
/// `original_string_value` and `source`.
#[derive(Clone, Debug)]
pub struct Parameter {
    pub ordinal: usize,
    /// Name as declared in the database, e.g. `_user_id`.
    pub actual_name: String,
    /// Name exposed to clients, e.g. `userId`.
    pub converted_name: String,
    pub type_descriptor: TypeDescriptor,

    // Classification flags set at build time.
    pub is_ip_address: bool,
    pub is_user_claims: bool,
    /// Claim name mapped to this parameter, when configured.
    pub user_claim: Option<String>,
    pub is_upload_metadata: bool,
    /// Primary-source key whose raw value this parameter receives hashed,
    /// e.g. `password` for a `_password_hash` parameter.
    pub hash_of: Option<String>,

    // Per-request binding state.
    pub value: ParamValue,
    /// Canonical string form used for cache keys, stable across
    /// representations of the same value.
    pub original_string_value: Option<String>,
    pub source: Option<ParamSource>,
}

impl Parameter {
    pub fn new(ordinal: usize, actual_name: &str, type_descriptor: TypeDescriptor) -> Self {
        Parameter {
            ordinal,
            actual_name: actual_name.to_string(),
            converted_name: naming::to_camel_case(actual_name),
            type_descriptor,
            is_ip_address: false,
            is_user_claims: false,
            user_claim: None,
            is_upload_metadata: false,
            hash_of: None,
            value: ParamValue::Unbound,
            original_string_value: None,
            source: None,
        }
    }

    pub fn bind(&mut self, value: ParamValue, original: Option<String>, source: ParamSource) {
        self.value = value;
        self.original_string_value = original;
        self.source = Some(source);
    }
}

/// Composite column metadata: a composite-returning column that the
/// metadata builder expanded into sibling columns, to be re-grouped into a
/// nested JSON object at emit time.
#[derive(Clone, Debug)]
pub struct CompositeColumn {
    pub field_names: Vec<String>,
    pub fields: Vec<TypeDescriptor>,
    /// Client-facing name of the nested object.
    pub converted_name: String,
    /// Indices of the sibling columns holding the expanded fields. Always
    /// consecutive and disjoint from other composites.
    pub expanded: Vec<usize>,
}

/// Immutable description of one discovered database object.
#[derive(Clone, Debug)]
pub struct Routine {
    pub routine_type: RoutineType,
    pub schema: String,
    pub name: String,
    pub comment: Option<String>,
    pub is_strict: bool,
    pub volatility: Volatility,

    pub returns_set: bool,
    pub is_void: bool,
    pub returns_unnamed_set: bool,
    pub returns_record_type: bool,
    pub column_count: usize,
    pub original_column_names: Vec<String>,
    pub converted_column_names: Vec<String>,
    pub column_types: Vec<TypeDescriptor>,

    pub parameters: Vec<Parameter>,
    pub has_variadic: bool,

    /// SQL invocation prefix, e.g.
    /// `select "a"::text,"b"::text from "public"."fn"(`.
    pub expression: String,
    /// Full signature for documentation output.
    pub full_definition: String,
    pub simple_definition: String,

    /// Composite columns expanded into siblings, keyed by the column index
    /// the composite occupied.
    pub composite_columns: BTreeMap<usize, CompositeColumn>,
    /// Array-of-composite columns, keyed by column index.
    pub composite_array_columns: BTreeMap<usize, CompositeColumn>,
}

impl Routine {
    /// `schema.name(param_count)` — used in logs and the routes listing.
    pub fn display_name(&self) -> String {
        format!("{}.{}({})", self.schema, self.name, self.parameters.len())
    }

    /// Fresh per-request parameter vector.
    pub fn clone_parameters(&self) -> Vec<Parameter> {
        self.parameters.clone()
    }

    /// Check the structural invariants the builder must guarantee.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.converted_column_names.len() != self.original_column_names.len()
            || self.original_column_names.len() != self.column_count
        {
            return Err(format!(
                "{}: column name vectors disagree with column count",
                self.display_name()
            ));
        }
        if self.is_void && self.column_count != 0 {
            return Err(format!("{}: void routine with columns", self.display_name()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for info in self
            .composite_columns
            .values()
            .chain(self.composite_array_columns.values())
        {
            for window in info.expanded.windows(2) {
                if window[1] != window[0] + 1 {
                    return Err(format!(
                        "{}: composite expansion indices not consecutive",
                        self.display_name()
                    ));
                }
            }
            for idx in &info.expanded {
                if !seen.insert(*idx) {
                    return Err(format!(
                        "{}: composite expansion indices overlap",
                        self.display_name()
                    ));
                }
            }
        }
        Ok(())
    }
}
