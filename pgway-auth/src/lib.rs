//! # pgway-auth — authentication primitives for the pgway gateway
//!
//! Claims building and role extraction, password hashing behind
//! [`CredentialHasher`], HTTP Basic credential parsing for the
//! challenge-query flow, and token issue/verify for login endpoints.
//!
//! This crate never talks to the database; the server crate runs the
//! challenge query and login routines and feeds the rows in here.

pub mod basic;
pub mod claims;
pub mod error;
pub mod password;
pub mod token;

pub use basic::{challenge, parse_basic, BasicCredentials};
pub use claims::{build_claims, UserIdentity};
pub use error::AuthError;
pub use password::{hasher_named, Argon2Hasher, CredentialHasher};
pub use token::TokenIssuer;
