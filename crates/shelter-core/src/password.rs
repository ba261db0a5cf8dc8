//! Account password rules and argon2 hashing, shared by the API server and
//! the `hash_password` tool.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::{CoreError, CoreResult};

/// Shortest password accepted for a new or reset account password.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Rejects passwords shorter than [`MIN_PASSWORD_LEN`] characters.
pub fn check_length(password: &str) -> CoreResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CoreError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}

pub fn verify_password(hash: &str, password: &str) -> CoreResult<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| CoreError::PasswordHash(format!("invalid password hash: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Hashes `password` into an argon2 PHC string after checking its length.
pub fn hash_password(password: &str) -> CoreResult<String> {
    check_length(password)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CoreError::PasswordHash(format!("failed to hash password: {e}")))?;

    Ok(hash.to_string())
}
