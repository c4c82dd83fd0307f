//! RFC-7807 problem documents, the JSON shape of every gateway error
//! response except plain-text validation failures.

use serde::Serialize;

pub const CONTENT_TYPE: &str = "application/problem+json";

/// An `application/problem+json` body.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProblemDetails {
    pub fn new(status: u16, title: impl Into<String>) -> Self {
        ProblemDetails {
            problem_type: "about:blank".to_string(),
            title: title.into(),
            status,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_type(mut self, problem_type: impl Into<String>) -> Self {
        self.problem_type = problem_type.into();
        self
    }

    pub fn unauthorized() -> Self {
        ProblemDetails::new(401, "Unauthorized")
    }

    pub fn forbidden() -> Self {
        ProblemDetails::new(403, "Forbidden")
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        ProblemDetails::new(500, "Internal Server Error").with_detail(detail)
    }

    pub fn bad_gateway(detail: impl Into<String>) -> Self {
        ProblemDetails::new(502, "Bad Gateway").with_detail(detail)
    }

    pub fn gateway_timeout() -> Self {
        ProblemDetails::new(504, "Gateway Timeout")
    }

    /// Build a problem from an endpoint error-code mapping for a SQL state.
    pub fn from_mapping(mapping: &crate::retry::ErrorCodeMapping, sql_state: &str) -> Self {
        ProblemDetails {
            problem_type: mapping
                .problem_type
                .clone()
                .unwrap_or_else(|| "about:blank".to_string()),
            title: mapping.title.clone(),
            status: mapping.status,
            detail: mapping.details.clone().or_else(|| Some(sql_state.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_without_empty_detail() {
        let json = serde_json::to_string(&ProblemDetails::unauthorized()).unwrap();
        assert_eq!(
            json,
            r#"{"type":"about:blank","title":"Unauthorized","status":401}"#
        );
    }

    #[test]
    fn mapping_falls_back_to_sql_state_detail() {
        let mapping = crate::retry::ErrorCodeMapping {
            status: 409,
            title: "Conflict".to_string(),
            problem_type: None,
            details: None,
        };
        let problem = ProblemDetails::from_mapping(&mapping, "23505");
        assert_eq!(problem.status, 409);
        assert_eq!(problem.detail.as_deref(), Some("23505"));
    }
}
