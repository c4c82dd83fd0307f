//! Claims construction from credential rows and claim → value lookup.

use serde_json::{Map, Value};

/// An authenticated principal: claims plus the extracted roles.
#[derive(Clone, Debug, Default)]
pub struct UserIdentity {
    /// User identifier (the configured name claim).
    pub name: Option<String>,
    pub roles: Vec<String>,
    /// All claims as a JSON object.
    pub claims: Map<String, Value>,
}

impl UserIdentity {
    /// Build an identity from a claims object, extracting roles from the
    /// configured role claim (scalar or list valued).
    pub fn from_claims(claims: Map<String, Value>, role_claim: &str, name_claim: &str) -> Self {
        let roles = match claims.get(role_claim) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(Value::String(role)) => vec![role.clone()],
            _ => Vec::new(),
        };
        let name = claims
            .get(name_claim)
            .and_then(|v| v.as_str())
            .map(String::from);
        UserIdentity {
            name,
            roles,
            claims,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|role| self.has_role(role))
    }

    /// Claim value as wire text for parameter binding. List claims become a
    /// PostgreSQL array literal; objects serialize to JSON.
    pub fn claim_as_text(&self, claim: &str) -> Option<String> {
        match self.claims.get(claim)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            list @ Value::Array(_) => pgway_core::convert::json_to_pg_text(list),
            other => Some(other.to_string()),
        }
    }

    /// All claims as a JSON object string.
    pub fn claims_json(&self) -> String {
        Value::Object(self.claims.clone()).to_string()
    }
}

/// Build a claims object from `(claim type, value)` pairs.
///
/// A claim type appearing once keeps its scalar value; repeated values
/// collapse into a list, which is how multiple role rows become one role
/// array.
pub fn build_claims(pairs: &[(String, Value)]) -> Map<String, Value> {
    let mut claims = Map::new();
    for (claim_type, value) in pairs {
        match claims.get_mut(claim_type) {
            None => {
                claims.insert(claim_type.clone(), value.clone());
            }
            Some(Value::Array(existing)) => existing.push(value.clone()),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value.clone()]);
            }
        }
    }
    claims
}
