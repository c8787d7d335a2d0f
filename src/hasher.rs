//! Client secret hashing

use crate::constants::{BCRYPT_MAX_COST, BCRYPT_MIN_COST, DEFAULT_SECRET_HASH_COST};
use crate::{AuthGrantError, Result};

/// Hashes client secrets at rest
pub trait SecretHasher: Send + Sync {
    fn hash(&self, secret: &[u8]) -> Result<String>;

    fn verify(&self, secret: &[u8], hash: &str) -> Result<bool>;
}

/// bcrypt-backed hasher
#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Result<Self> {
        if !(BCRYPT_MIN_COST..=BCRYPT_MAX_COST).contains(&cost) {
            return Err(AuthGrantError::config(format!(
                "bcrypt cost must be between {} and {}, got {}",
                BCRYPT_MIN_COST,
                BCRYPT_MAX_COST,
                cost
            )));
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self {
            cost: DEFAULT_SECRET_HASH_COST,
        }
    }
}

impl SecretHasher for BcryptHasher {
    fn hash(&self, secret: &[u8]) -> Result<String> {
        bcrypt::hash(secret, self.cost).map_err(|e| AuthGrantError::crypto(e.to_string()))
    }

    fn verify(&self, secret: &[u8], hash: &str) -> Result<bool> {
        bcrypt::verify(secret, hash).map_err(|e| AuthGrantError::crypto(e.to_string()))
    }
}

#[cfg(test)]
mod hasher_test {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = BcryptHasher::new(BCRYPT_MIN_COST).expect("cost should be valid");
        let hash = hasher.hash(b"s3cret").expect("hash should succeed");
        assert_ne!(hash, "s3cret");
        assert!(hasher.verify(b"s3cret", &hash).expect("verify should succeed"));
        assert!(!hasher.verify(b"wrong", &hash).expect("verify should succeed"));
    }

    #[test]
    fn test_rejects_out_of_range_cost() {
        assert!(BcryptHasher::new(2).is_err());
        assert!(BcryptHasher::new(40).is_err());
    }

    #[test]
    fn test_cost_bounds_are_inclusive() {
        assert!(BcryptHasher::new(BCRYPT_MIN_COST).is_ok());
        assert!(BcryptHasher::new(BCRYPT_MAX_COST).is_ok());
        assert!(BcryptHasher::new(BCRYPT_MIN_COST - 1).is_err());
        assert!(BcryptHasher::new(BCRYPT_MAX_COST + 1).is_err());
    }

    #[test]
    fn test_garbage_hash_is_an_error() {
        let hasher = BcryptHasher::new(BCRYPT_MIN_COST).expect("cost should be valid");
        assert!(hasher.verify(b"s3cret", "not-a-hash").is_err());
    }
}
