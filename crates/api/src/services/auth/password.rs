//! Argon2id credential hashing.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use super::AuthError;

/// Hashes and checks passwords.
#[derive(Clone, Default)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
}

impl CredentialHasher {
    /// Argon2id with explicit cost parameters.
    #[must_use]
    pub fn new(params: Params) -> Self {
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Argon2id at the smallest cost the algorithm allows.
    ///
    /// Only for tests and local demos.
    #[must_use]
    pub fn minimum_cost() -> Self {
        let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, Params::MIN_P_COST, None)
            .unwrap_or_default();
        Self::new(params)
    }

    /// Hash a password using Argon2id with a fresh salt.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::PasswordHash` if hashing fails.
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| AuthError::PasswordHash)
    }

    /// Whether `password` matches `hash`.
    ///
    /// An unparseable hash never matches.
    #[must_use]
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        PasswordHash::new(hash).is_ok_and(|parsed| {
            self.argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
    }

    /// Whether `password` matches any of `hashes`.
    #[must_use]
    pub fn matches_any<'a>(&self, password: &str, hashes: impl IntoIterator<Item = &'a String>) -> bool {
        hashes.into_iter().any(|hash| self.verify(password, hash))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = CredentialHasher::minimum_cost();
        let hash = hasher.hash("Strong1!").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("Strong1!", &hash));
        assert!(!hasher.verify("Strong2!", &hash));
        assert!(!hasher.verify("Strong1!", "not-a-hash"));
    }

    #[test]
    fn test_hashes_are_salted() {
        let hasher = CredentialHasher::minimum_cost();
        let a = hasher.hash("Strong1!").unwrap();
        let b = hasher.hash("Strong1!").unwrap();
        assert_ne!(a, b);
        assert!(hasher.matches_any("Strong1!", [&a, &b]));
        assert!(!hasher.matches_any("Other1!x", [&a, &b]));
    }

    #[test]
    fn test_hashes_verify_across_cost_settings() {
        let hash = CredentialHasher::minimum_cost().hash("Strong1!").unwrap();
        assert!(CredentialHasher::default().verify("Strong1!", &hash));
    }
}
