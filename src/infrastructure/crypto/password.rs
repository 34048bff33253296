//! Basic-Auth password hashing
//!
//! Station passwords are stored as bcrypt hashes in the device model.
//! bcrypt is CPU bound, so the async variant runs on the blocking pool.

use bcrypt::{hash, verify, BcryptError, DEFAULT_COST};

pub fn hash_password(password: &str) -> Result<String, BcryptError> {
    hash(password, DEFAULT_COST)
}

pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, BcryptError> {
    hash(password, cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, BcryptError> {
    verify(password, hash)
}

/// [`verify_password`] off the async executor. A panicked worker counts as
/// a mismatch.
pub async fn verify_password_async(password: String, hash: String) -> Result<bool, BcryptError> {
    tokio::task::spawn_blocking(move || verify(password, &hash))
        .await
        .unwrap_or(Ok(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hashed = hash_password_with_cost("s3cret-passw0rd", 4).unwrap();
        assert!(verify_password("s3cret-passw0rd", &hashed).unwrap());
        assert!(!verify_password("wrong", &hashed).unwrap());
    }

    #[tokio::test]
    async fn async_verify_matches_sync() {
        let hashed = hash_password_with_cost("pw", 4).unwrap();
        assert!(verify_password_async("pw".into(), hashed.clone()).await.unwrap());
        assert!(!verify_password_async("nope".into(), hashed).await.unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("pw", "not-a-bcrypt-hash").is_err());
    }
}
