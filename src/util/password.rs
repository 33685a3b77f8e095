//! PBKDF2 password hashing for account registration.
//!
//! Stored format is `<iterations>$<hex salt>$<hex hash>` so the iteration count can be raised
//! later without invalidating existing rows.

use std::num::NonZeroU32;

use ring::digest;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

use crate::constants::{PASSWORD_HASH_ITERATIONS, PASSWORD_SALT_LEN};

static ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;
const CREDENTIAL_LEN: usize = digest::SHA256_OUTPUT_LEN;

pub type PasswordResult<T> = core::result::Result<T, PasswordErr>;

#[derive(Debug, Error)]
pub enum PasswordErr {
    #[error("ring::error::Unspecified error occurred")]
    UnspecifiedRingErr,

    #[error("stored password hash is malformed")]
    MalformedHash,
}

pub fn hash_password(password: &str) -> PasswordResult<String> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; PASSWORD_SALT_LEN];
    rng.fill(&mut salt)
        .map_err(|_| PasswordErr::UnspecifiedRingErr)?;

    let iterations =
        NonZeroU32::new(PASSWORD_HASH_ITERATIONS).ok_or(PasswordErr::UnspecifiedRingErr)?;

    let mut hash = [0u8; CREDENTIAL_LEN];
    pbkdf2::derive(ALGORITHM, iterations, &salt, password.as_bytes(), &mut hash);

    Ok(format!(
        "{}${}${}",
        iterations,
        hex::encode(salt),
        hex::encode(hash)
    ))
}

pub fn verify_password(password: &str, stored: &str) -> PasswordResult<bool> {
    let mut parts = stored.splitn(3, '$');
    let (Some(iterations), Some(salt), Some(hash)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(PasswordErr::MalformedHash);
    };

    let iterations = iterations
        .parse::<u32>()
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or(PasswordErr::MalformedHash)?;
    let salt = hex::decode(salt).map_err(|_| PasswordErr::MalformedHash)?;
    let hash = hex::decode(hash).map_err(|_| PasswordErr::MalformedHash)?;

    Ok(pbkdf2::verify(ALGORITHM, iterations, &salt, password.as_bytes(), &hash).is_ok())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hash_then_verify() {
        let stored = hash_password("hunter2").unwrap();

        assert!(verify_password("hunter2", &stored).unwrap());
        assert!(!verify_password("hunter3", &stored).unwrap());
    }

    #[test]
    fn test_salted_hashes_differ() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash() {
        assert!(matches!(
            verify_password("x", "not-a-hash"),
            Err(PasswordErr::MalformedHash)
        ));
    }
}
