//! Request authentication and endpoint authorization.
//!
//! Requests authenticate with a bearer token, the auth cookie, or — when
//! enabled — HTTP Basic credentials verified against the configured
//! challenge query. Endpoint authorization checks the extracted roles.

use http::HeaderMap;
use pgway_auth::{build_claims, parse_basic, AuthError, UserIdentity};
use pgway_pg::execute;
use serde_json::Value;
use tracing::debug;

use crate::error::GatewayError;
use crate::state::GatewayState;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn cookie_token<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    let cookies = headers.get(http::header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == cookie_name).then_some(value)
    })
}

/// Resolve the request's identity, if any. Invalid presented credentials
/// are an error; absent credentials are `None`.
pub async fn authenticate(
    state: &GatewayState,
    headers: &HeaderMap,
) -> Result<Option<UserIdentity>, GatewayError> {
    let auth = &state.config.auth;

    if let Some(token) = bearer_token(headers) {
        let claims = state.issuer.verify(token)?;
        return Ok(Some(UserIdentity::from_claims(
            claims,
            &auth.role_claim,
            &auth.name_claim,
        )));
    }

    if let Some(token) = cookie_token(headers, &state.issuer.cookie_name) {
        let claims = state.issuer.verify(token)?;
        return Ok(Some(UserIdentity::from_claims(
            claims,
            &auth.role_claim,
            &auth.name_claim,
        )));
    }

    if auth.basic.enabled {
        if let Some(credentials) = parse_basic(headers) {
            return challenge(state, &credentials.username, &credentials.password)
                .await
                .map(Some);
        }
    }

    Ok(None)
}

/// Verify Basic credentials against the challenge query. The query takes
/// the username as `$1`; its first column is the stored password hash and
/// any further columns become claims.
async fn challenge(
    state: &GatewayState,
    username: &str,
    password: &str,
) -> Result<UserIdentity, GatewayError> {
    let Some(query) = state.config.auth.basic.challenge_query.as_deref() else {
        return Err(AuthError::Unauthenticated.into());
    };
    let client = state.sources.acquire(None).await?;
    let row = execute::query_opt(&client, query, &[Some(username.to_string())])
        .await
        .map_err(pgway_pg::DbError::Execute)?;
    let Some(row) = row else {
        debug!(username, "challenge query returned no row");
        return Err(AuthError::InvalidCredentials("unknown user".to_string()).into());
    };

    let stored_hash: Option<&str> = row
        .try_get(0)
        .map_err(|e| GatewayError::Internal(format!("challenge row: {e}")))?;
    let verified = stored_hash
        .map(|hash| state.hasher.verify(password, hash))
        .unwrap_or(false);
    if !verified {
        return Err(AuthError::InvalidCredentials("bad password".to_string()).into());
    }

    let mut pairs = vec![(
        state.config.auth.name_claim.clone(),
        Value::from(username.to_string()),
    )];
    for (idx, column) in row.columns().iter().enumerate().skip(1) {
        let value: Option<&str> = row
            .try_get(idx)
            .map_err(|e| GatewayError::Internal(format!("challenge row: {e}")))?;
        if let Some(value) = value {
            pairs.push((column.name().to_string(), Value::from(value.to_string())));
        }
    }
    let claims = build_claims(&pairs);
    Ok(UserIdentity::from_claims(
        claims,
        &state.config.auth.role_claim,
        &state.config.auth.name_claim,
    ))
}

/// Enforce the endpoint's authorization policy.
pub fn authorize(
    requires_authorization: bool,
    authorize_roles: &[String],
    identity: Option<&UserIdentity>,
    basic_challenge: Option<String>,
) -> Result<(), GatewayError> {
    if !requires_authorization {
        return Ok(());
    }
    let Some(identity) = identity else {
        return Err(match basic_challenge {
            Some(challenge) => GatewayError::BasicChallenge(challenge),
            None => AuthError::Unauthenticated.into(),
        });
    };
    if !authorize_roles.is_empty() && !identity.has_any_role(authorize_roles) {
        return Err(AuthError::Forbidden.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(roles: &[&str]) -> UserIdentity {
        let mut claims = serde_json::Map::new();
        claims.insert(
            "role".to_string(),
            json!(roles.iter().map(|r| r.to_string()).collect::<Vec<_>>()),
        );
        UserIdentity::from_claims(claims, "role", "sub")
    }

    #[test]
    fn anonymous_endpoint_allows_everyone() {
        assert!(authorize(false, &[], None, None).is_ok());
    }

    #[test]
    fn unauthenticated_is_401() {
        let err = authorize(true, &[], None, None).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn wrong_role_is_403() {
        let user = identity(&["support"]);
        let err = authorize(true, &["admin".to_string()], Some(&user), None).unwrap_err();
        assert_eq!(err.status(), http::StatusCode::FORBIDDEN);
    }

    #[test]
    fn matching_role_passes() {
        let user = identity(&["admin"]);
        assert!(authorize(true, &["admin".to_string()], Some(&user), None).is_ok());
    }

    #[test]
    fn any_authenticated_passes_without_role_list() {
        let user = identity(&[]);
        assert!(authorize(true, &[], Some(&user), None).is_ok());
    }

    #[test]
    fn basic_challenge_issued_when_configured() {
        let err = authorize(true, &[], None, Some("Basic realm=\"x\"".to_string())).unwrap_err();
        assert!(matches!(err, GatewayError::BasicChallenge(_)));
    }

    #[test]
    fn tokens_extract_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            "Bearer abc.def.ghi".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::COOKIE,
            "other=1; pgway-auth=tok; x=2".parse().unwrap(),
        );
        assert_eq!(cookie_token(&headers, "pgway-auth"), Some("tok"));
    }
}
