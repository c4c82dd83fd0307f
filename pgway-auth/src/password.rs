//! Password hashing behind a trait so deployments can swap the algorithm.
//!
//! The configured algorithm name resolves through [`hasher_named`]; custom
//! implementations plug in by constructing the gateway state with their own
//! [`CredentialHasher`].

use std::sync::Arc;

use argon2::Argon2;
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};

use crate::error::AuthError;

/// Hashes and verifies passwords. The default implementation is Argon2id
/// with library-default parameters.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, AuthError>;
    fn verify(&self, password: &str, stored_hash: &str) -> bool;
}

/// Argon2id hasher in PHC string format.
#[derive(Clone, Default)]
pub struct Argon2Hasher;

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Hashing(e.to_string()))
    }

    fn verify(&self, password: &str, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

/// Resolve a configured algorithm name to a built-in hasher. Unknown names
/// are refused at configuration-load time.
pub fn hasher_named(name: &str) -> Option<Arc<dyn CredentialHasher>> {
    match name {
        "argon2id" | "argon2" => Some(Arc::new(Argon2Hasher)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hasher = Argon2Hasher;
        let hash = hasher.hash("s3cret").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(hasher.verify("s3cret", &hash));
        assert!(!hasher.verify("wrong", &hash));
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        assert!(!Argon2Hasher.verify("x", "not-a-phc-string"));
    }

    #[test]
    fn salts_differ() {
        let hasher = Argon2Hasher;
        assert_ne!(hasher.hash("x").unwrap(), hasher.hash("x").unwrap());
    }

    #[test]
    fn hasher_names_resolve() {
        assert!(hasher_named("argon2id").is_some());
        assert!(hasher_named("argon2").is_some());
        assert!(hasher_named("md5").is_none());
        assert!(hasher_named("").is_none());
    }
}
