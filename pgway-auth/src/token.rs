//! Token issue/verify for login endpoints.
//!
//! Login endpoints return a signed token built from the claims the
//! credential row produced; later requests present it as a bearer header or
//! cookie.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use pgway_core::options::JwtOptions;
use serde_json::{Map, Value};

use crate::error::AuthError;

/// Signs and verifies gateway tokens with a shared HMAC secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    expires_in: u64,
    pub cookie_name: String,
}

impl TokenIssuer {
    pub fn new(options: &JwtOptions) -> Self {
        TokenIssuer {
            encoding: EncodingKey::from_secret(options.secret.as_bytes()),
            decoding: DecodingKey::from_secret(options.secret.as_bytes()),
            issuer: options.issuer.clone(),
            expires_in: options.expires_in.as_secs(),
            cookie_name: options.cookie_name.clone(),
        }
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Sign a token carrying `claims` plus `iss`, `iat` and `exp`.
    pub fn issue(&self, claims: &Map<String, Value>) -> Result<String, AuthError> {
        let mut payload = claims.clone();
        let now = Self::now();
        payload.insert("iss".to_string(), Value::from(self.issuer.clone()));
        payload.insert("iat".to_string(), Value::from(now));
        payload.insert("exp".to_string(), Value::from(now + self.expires_in));
        encode(&Header::new(Algorithm::HS256), &payload, &self.encoding)
            .map_err(|e| AuthError::Token(e.to_string()))
    }

    /// Verify signature, expiry and issuer; returns the claims object.
    pub fn verify(&self, token: &str) -> Result<Map<String, Value>, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        let data = decode::<Map<String, Value>>(token, &self.decoding, &validation)
            .map_err(|e| AuthError::InvalidCredentials(e.to_string()))?;
        Ok(data.claims)
    }
}
