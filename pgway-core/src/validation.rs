//! Per-parameter validation rule chains.
//!
//! Endpoints carry `parameter name → [rule]` maps populated from the
//! `validate … using …` comment annotation or from configuration. Rules are
//! evaluated in order against the bound parameter and short-circuit on the
//! first failure with a configured status code and message.

use crate::model::{ParamValue, Parameter};

/// Built-in e-mail shape: something, `@`, something.
const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+$";

/// One validation rule kind.
#[derive(Clone, Debug, PartialEq)]
pub enum ValidationRule {
    NotNull,
    NotEmpty,
    Required,
    Regex(String),
    MinLength(usize),
    MaxLength(usize),
}

impl ValidationRule {
    /// Rule name as used in messages and annotations.
    pub fn name(&self) -> &'static str {
        match self {
            ValidationRule::NotNull => "not-null",
            ValidationRule::NotEmpty => "not-empty",
            ValidationRule::Required => "required",
            ValidationRule::Regex(_) => "regex",
            ValidationRule::MinLength(_) => "min-length",
            ValidationRule::MaxLength(_) => "max-length",
        }
    }

    /// Default failure message template. `{0}` is the database parameter
    /// name, `{1}` the client-facing name, `{2}` the rule name.
    pub fn default_message(&self) -> String {
        match self {
            ValidationRule::NotNull => "{1} must not be null".to_string(),
            ValidationRule::NotEmpty => "{1} must not be empty".to_string(),
            ValidationRule::Required => "{1} is required".to_string(),
            ValidationRule::Regex(_) => "{1} is not in a valid format".to_string(),
            ValidationRule::MinLength(n) => format!("{{1}} must be at least {n} characters"),
            ValidationRule::MaxLength(n) => format!("{{1}} must be at most {n} characters"),
        }
    }

    /// Parse an annotation rule expression, e.g. `required`, `regex ^a+$`,
    /// `minlength 3`. `email` is an alias for the built-in e-mail regex.
    pub fn parse(expr: &str) -> Option<ValidationRule> {
        let expr = expr.trim();
        let (name, arg) = match expr.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (expr, ""),
        };
        match name.to_ascii_lowercase().as_str() {
            "notnull" | "not-null" => Some(ValidationRule::NotNull),
            "notempty" | "not-empty" => Some(ValidationRule::NotEmpty),
            "required" => Some(ValidationRule::Required),
            "email" => Some(ValidationRule::Regex(EMAIL_PATTERN.to_string())),
            "regex" if !arg.is_empty() => Some(ValidationRule::Regex(arg.to_string())),
            "minlength" | "min-length" => arg.parse().ok().map(ValidationRule::MinLength),
            "maxlength" | "max-length" => arg.parse().ok().map(ValidationRule::MaxLength),
            _ => None,
        }
    }
}

/// A rule plus its configured failure response.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamValidation {
    pub rule: ValidationRule,
    pub status: u16,
    /// Message template; `None` uses the rule default.
    pub message: Option<String>,
}

impl ParamValidation {
    pub fn new(rule: ValidationRule) -> Self {
        ParamValidation {
            rule,
            status: 400,
            message: None,
        }
    }

    /// Render the failure message for a parameter.
    pub fn format_message(&self, parameter: &Parameter) -> String {
        let template = self
            .message
            .clone()
            .unwrap_or_else(|| self.rule.default_message());
        template
            .replace("{0}", &parameter.actual_name)
            .replace("{1}", &parameter.converted_name)
            .replace("{2}", self.rule.name())
    }
}

/// Evaluate one rule against a bound parameter. Returns `true` on pass.
pub fn evaluate(rule: &ValidationRule, parameter: &Parameter) -> bool {
    let original = parameter.original_string_value.as_deref();
    let is_null = matches!(parameter.value, ParamValue::Null | ParamValue::Unbound);
    match rule {
        ValidationRule::NotNull => !is_null,
        ValidationRule::NotEmpty => original.map(str::len).unwrap_or(0) != 0,
        ValidationRule::Required => !is_null && original.map(str::len).unwrap_or(0) != 0,
        ValidationRule::Regex(pattern) => match original {
            None | Some("") => false,
            Some(value) => regex::Regex::new(pattern)
                .map(|re| re.is_match(value))
                .unwrap_or(false),
        },
        ValidationRule::MinLength(min) => {
            original.map(|s| s.chars().count()).unwrap_or(0) >= *min
        }
        ValidationRule::MaxLength(max) => {
            original.map(|s| s.chars().count()).unwrap_or(0) <= *max
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ParamSource, Parameter};
    use crate::types::TypeDescriptor;

    fn bound(value: Option<&str>) -> Parameter {
        let mut p = Parameter::new(0, "_email", TypeDescriptor::new("text", false));
        match value {
            Some(s) => p.bind(
                ParamValue::Text(s.to_string()),
                Some(s.to_string()),
                ParamSource::BodyJson,
            ),
            None => p.bind(ParamValue::Null, None, ParamSource::BodyJson),
        }
        p
    }

    #[test]
    fn rule_table() {
        assert!(!evaluate(&ValidationRule::NotNull, &bound(None)));
        assert!(evaluate(&ValidationRule::NotNull, &bound(Some(""))));

        assert!(!evaluate(&ValidationRule::NotEmpty, &bound(Some(""))));
        assert!(evaluate(&ValidationRule::NotEmpty, &bound(Some("x"))));

        assert!(!evaluate(&ValidationRule::Required, &bound(None)));
        assert!(!evaluate(&ValidationRule::Required, &bound(Some(""))));
        assert!(evaluate(&ValidationRule::Required, &bound(Some("x"))));

        let re = ValidationRule::Regex("^[0-9]+$".to_string());
        assert!(!evaluate(&re, &bound(None)));
        assert!(!evaluate(&re, &bound(Some(""))));
        assert!(!evaluate(&re, &bound(Some("12a"))));
        assert!(evaluate(&re, &bound(Some("123"))));

        assert!(!evaluate(&ValidationRule::MinLength(3), &bound(Some("ab"))));
        assert!(evaluate(&ValidationRule::MinLength(3), &bound(Some("abc"))));
        assert!(!evaluate(&ValidationRule::MaxLength(3), &bound(Some("abcd"))));
        assert!(evaluate(&ValidationRule::MaxLength(3), &bound(Some("abc"))));
    }

    #[test]
    fn email_alias() {
        let rule = ValidationRule::parse("email").unwrap();
        assert!(evaluate(&rule, &bound(Some("x@y"))));
        assert!(!evaluate(&rule, &bound(Some("nope"))));
    }

    #[test]
    fn parse_rules() {
        assert_eq!(ValidationRule::parse("required"), Some(ValidationRule::Required));
        assert_eq!(
            ValidationRule::parse("minlength 3"),
            Some(ValidationRule::MinLength(3))
        );
        assert_eq!(
            ValidationRule::parse("regex ^a+$"),
            Some(ValidationRule::Regex("^a+$".to_string()))
        );
        assert_eq!(ValidationRule::parse("bogus"), None);
    }

    #[test]
    fn message_placeholders() {
        let validation = ParamValidation::new(ValidationRule::Required);
        assert_eq!(validation.format_message(&bound(None)), "email is required");

        let custom = ParamValidation {
            rule: ValidationRule::Required,
            status: 422,
            message: Some("{0}/{1} failed {2}".to_string()),
        };
        assert_eq!(custom.format_message(&bound(None)), "_email/email failed required");
    }
}
