/// Password policy and Argon2id hashing
use crate::error::{LinkError, LinkResult};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;

const MIN_LEN: usize = 6;
const MAX_LEN: usize = 32;

/// Reject passwords outside 6..=32 characters or without both a letter and a digit
pub fn validate_password(password: &str) -> LinkResult<()> {
    let len = password.chars().count();
    if !(MIN_LEN..=MAX_LEN).contains(&len) {
        return Err(LinkError::InvalidInput(format!(
            "Password must be {} to {} characters",
            MIN_LEN, MAX_LEN
        )));
    }
    if password.chars().any(char::is_whitespace) {
        return Err(LinkError::InvalidInput(
            "Password must not contain whitespace".to_string(),
        ));
    }
    let has_letter = password.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(LinkError::InvalidInput(
            "Password must contain a letter and a digit".to_string(),
        ));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> LinkResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| LinkError::Internal(format!("Failed to hash password: {}", e)))
}

/// Check `password` against a stored PHC string
pub fn verify_password(password: &str, stored: &str) -> LinkResult<bool> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| LinkError::Internal(format!("Stored password hash is invalid: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
