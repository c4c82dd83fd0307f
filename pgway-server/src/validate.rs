//! Applies endpoint validation rule chains to bound parameters.

use pgway_core::endpoint::RoutineEndpoint;
use pgway_core::model::Parameter;
use pgway_core::validation::evaluate;

use crate::error::GatewayError;

/// Evaluate every rule chain against its matching bound parameters,
/// short-circuiting on the first failure with the rule's configured status
/// and message.
pub fn apply(endpoint: &RoutineEndpoint, parameters: &[Parameter]) -> Result<(), GatewayError> {
    for (name, validations) in &endpoint.parameter_validations {
        for parameter in parameters
            .iter()
            .filter(|p| p.converted_name == *name || p.actual_name == *name)
        {
            for validation in validations {
                if !evaluate(&validation.rule, parameter) {
                    return Err(GatewayError::Validation {
                        status: validation.status,
                        message: validation.format_message(parameter),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgway_core::model::{ParamSource, ParamValue, Routine, RoutineType, Volatility};
    use pgway_core::types::TypeDescriptor;
    use pgway_core::validation::{ParamValidation, ValidationRule};

    fn endpoint_with_rules(rules: Vec<ParamValidation>) -> RoutineEndpoint {
        let routine = Routine {
            routine_type: RoutineType::Function,
            schema: "public".to_string(),
            name: "login".to_string(),
            comment: None,
            is_strict: false,
            volatility: Volatility::Volatile,
            returns_set: false,
            is_void: true,
            returns_unnamed_set: false,
            returns_record_type: false,
            column_count: 0,
            original_column_names: Vec::new(),
            converted_column_names: Vec::new(),
            column_types: Vec::new(),
            parameters: Vec::new(),
            has_variadic: false,
            expression: String::new(),
            full_definition: String::new(),
            simple_definition: String::new(),
            composite_columns: Default::default(),
            composite_array_columns: Default::default(),
        };
        let mut endpoint = RoutineEndpoint::for_routine(&routine, "/api");
        endpoint
            .parameter_validations
            .insert("email".to_string(), rules);
        endpoint
    }

    fn email_param(value: Option<&str>) -> Parameter {
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
    fn empty_email_fails_required_with_default_message() {
        let endpoint = endpoint_with_rules(vec![
            ParamValidation::new(ValidationRule::Required),
            ParamValidation::new(ValidationRule::parse("email").unwrap()),
        ]);
        let err = apply(&endpoint, &[email_param(Some(""))]).unwrap_err();
        let GatewayError::Validation { status, message } = err else {
            panic!("expected validation error");
        };
        assert_eq!(status, 400);
        assert_eq!(message, "email is required");
    }

    #[test]
    fn valid_email_passes_chain() {
        let endpoint = endpoint_with_rules(vec![
            ParamValidation::new(ValidationRule::Required),
            ParamValidation::new(ValidationRule::parse("email").unwrap()),
        ]);
        assert!(apply(&endpoint, &[email_param(Some("x@y"))]).is_ok());
    }

    #[test]
    fn rules_evaluate_in_order() {
        // Required fails before the regex gets a chance.
        let endpoint = endpoint_with_rules(vec![
            ParamValidation::new(ValidationRule::Required),
            ParamValidation::new(ValidationRule::Regex("^never$".to_string())),
        ]);
        let err = apply(&endpoint, &[email_param(None)]).unwrap_err();
        let GatewayError::Validation { message, .. } = err else {
            panic!();
        };
        assert_eq!(message, "email is required");
    }

    #[test]
    fn unmatched_rule_names_are_ignored() {
        let mut endpoint = endpoint_with_rules(vec![ParamValidation::new(ValidationRule::Required)]);
        endpoint.parameter_validations.insert(
            "other".to_string(),
            vec![ParamValidation::new(ValidationRule::Required)],
        );
        assert!(apply(&endpoint, &[email_param(Some("x@y"))]).is_ok());
    }
}
