//! Password hashing.
//!
//! Hashes are argon2id PHC strings (`$argon2id$v=19$m=..,t=..,p=..$<salt>$<hash>`),
//! so the cost parameters travel with the hash and can be raised without
//! invalidating existing passwords.

use std::sync::Arc;

use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

const SALT_LENGTH: usize = 16;
const KEY_LENGTH: usize = 32;

#[cfg_attr(test, mockall::automock)]
pub trait PasswordHasher {
    fn hash_password(&self, password: &str) -> Result<String, CredentialError>;

    /// Checks `password` against a hash produced by [`hash_password`]. A hash
    /// that cannot be parsed is an error rather than a mismatch.
    ///
    /// [`hash_password`]: PasswordHasher::hash_password
    fn verify_password(&self, password: &str, hash: &str) -> Result<bool, CredentialError>;
}

pub type DynPasswordHasher = Arc<dyn PasswordHasher + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("malformed password hash: {0}")]
    MalformedHash(String),

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("openssl error: {0}")]
    Openssl(#[from] openssl::error::ErrorStack),
}

/// argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 1,
            parallelism: 2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Argon2Hasher {
    params: Argon2Params,
}

impl Argon2Hasher {
    pub fn with_params(params: Argon2Params) -> Self {
        Self { params }
    }

    fn argon2(&self) -> Result<Argon2<'static>, CredentialError> {
        let Argon2Params {
            memory_kib,
            iterations,
            parallelism,
        } = self.params;
        let params = Params::new(memory_kib, iterations, parallelism, Some(KEY_LENGTH))
            .map_err(|e| CredentialError::Hashing(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash_password(&self, password: &str) -> Result<String, CredentialError> {
        let mut salt = [0u8; SALT_LENGTH];
        openssl::rand::rand_bytes(&mut salt)?;
        let salt =
            SaltString::encode_b64(&salt).map_err(|e| CredentialError::Hashing(e.to_string()))?;

        let hash = self
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CredentialError::Hashing(e.to_string()))?;
        Ok(hash.to_string())
    }

    fn verify_password(&self, password: &str, hash: &str) -> Result<bool, CredentialError> {
        let hash =
            PasswordHash::new(hash).map_err(|e| CredentialError::MalformedHash(e.to_string()))?;
        if hash.salt.is_none() || hash.hash.is_none() {
            return Err(CredentialError::MalformedHash(
                "missing salt or hash".to_owned(),
            ));
        }

        // cost parameters are read from the stored hash
        match Argon2::default().verify_password(password.as_bytes(), &hash) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CredentialError::MalformedHash(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> Argon2Hasher {
        Argon2Hasher::with_params(Argon2Params {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = hasher();
        let hash = hasher.hash_password("Password1!").unwrap();
        assert!(hash.starts_with("$argon2id$v=19$m=8,t=1,p=1$"), "{hash}");
        assert!(hasher.verify_password("Password1!", &hash).unwrap());
        assert!(!hasher.verify_password("password1!", &hash).unwrap());
        assert!(!hasher.verify_password("", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let hasher = hasher();
        let first = hasher.hash_password("password").unwrap();
        let second = hasher.hash_password("password").unwrap();
        assert_ne!(first, second);
        assert!(hasher.verify_password("password", &second).unwrap());
    }

    #[test]
    fn test_parameters_come_from_the_hash() {
        let hash = hasher().hash_password("password").unwrap();
        let stronger = Argon2Hasher::with_params(Argon2Params {
            memory_kib: 16,
            iterations: 2,
            parallelism: 1,
        });
        assert!(stronger.verify_password("password", &hash).unwrap());
    }

    #[test]
    fn test_default_parameters() {
        let hash = Argon2Hasher::default().hash_password("password").unwrap();
        assert!(hash.starts_with("$argon2id$v=19$m=65536,t=1,p=2$"), "{hash}");
        assert!(hasher().verify_password("password", &hash).unwrap());
    }

    #[test]
    fn test_malformed_hashes() {
        let hasher = hasher();
        for hash in [
            "",
            "password",
            "$argon2id$v=19$m=65536,t=1,p=2",
            "$argon2id$v=19$m=x,t=1,p=1$c2FsdHNhbHRzYWx0$aGFzaGhhc2hoYXNoaGFzaA",
            "$scrypt$ln=4,r=8,p=1$c2FsdHNhbHRzYWx0$aGFzaGhhc2hoYXNoaGFzaA",
        ] {
            assert!(
                matches!(
                    hasher.verify_password("password", hash),
                    Err(CredentialError::MalformedHash(_))
                ),
                "{hash}"
            );
        }
    }

    #[test]
    fn test_invalid_cost_parameters() {
        let hasher = Argon2Hasher::with_params(Argon2Params {
            memory_kib: 1,
            iterations: 1,
            parallelism: 1,
        });
        assert!(matches!(
            hasher.hash_password("password"),
            Err(CredentialError::Hashing(_))
        ));
    }
}
