//! Credential hashing for participant logins.
//!
//! The engine only needs two operations from a credential backend, so it
//! talks to one through `Authenticator`. The default backend is Argon2id
//! with PHC-formatted hashes.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use amiga_core::error::AmigaError;

pub trait Authenticator: Send + Sync {
    /// Hash a password for storage.
    fn hash_password(&self, password: &str) -> Result<String, AmigaError>;

    /// Check a password against a stored hash.
    fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AmigaError>;
}

/// Argon2id with the crate's default parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Authenticator;

impl Authenticator for Argon2Authenticator {
    fn hash_password(&self, password: &str) -> Result<String, AmigaError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AmigaError::Serialization(format!("failed to hash password: {e}")))
    }

    fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AmigaError> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AmigaError::Serialization(format!("invalid password hash format: {e}")))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let auth = Argon2Authenticator;
        let hash = auth.hash_password("segredo-123").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(auth.verify_password("segredo-123", &hash).unwrap());
        assert!(!auth.verify_password("errado", &hash).unwrap());
    }

    #[test]
    fn salts_differ() {
        let auth = Argon2Authenticator;
        let h1 = auth.hash_password("same").unwrap();
        let h2 = auth.hash_password("same").unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn garbage_hash_is_an_error() {
        assert!(Argon2Authenticator.verify_password("x", "not-a-hash").is_err());
    }
}
