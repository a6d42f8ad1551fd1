//! Small helpers for validation, opaque token handling, and password hashing.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng as SaltRng, PasswordHash, SaltString},
    Argon2, PasswordHasher, PasswordVerifier,
};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Raw opaque tokens are 128 URL-safe characters: 96 random bytes, base64url
/// without padding.
const TOKEN_BYTES: usize = 96;

pub(crate) const MIN_PASSWORD_LEN: usize = 8;
pub(crate) const MAX_EMAIL_LEN: usize = 254;
pub(crate) const MAX_NAME_LEN: usize = 64;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    email_normalized.len() <= MAX_EMAIL_LEN
        && Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
            .is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Create a new opaque bearer token.
///
/// The returned value is only ever handed to the caller; the database stores
/// its hash.
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate opaque token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash an opaque token so raw values never touch the database.
/// The hash is used for lookups when the token is presented.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Hash a password with argon2id and a fresh random salt.
pub(crate) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut SaltRng);
    let digest = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(digest.to_string())
}

/// Verify a password against a stored argon2id digest.
///
/// Returns `Ok(false)` on mismatch; errors only for malformed digests or a
/// failing primitive.
pub(crate) fn verify_password(password: &str, digest: &str) -> Result<bool> {
    let parsed = PasswordHash::new(digest).map_err(|err| anyhow!("invalid password hash: {err}"))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(anyhow!("failed to verify password: {err}")),
    }
}

/// Extract the bearer token from the Authorization header, if present.
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn valid_email_rejects_oversized_input() {
        let local = "a".repeat(MAX_EMAIL_LEN);
        assert!(!valid_email(&format!("{local}@example.com")));
    }

    #[test]
    fn generate_token_is_128_url_safe_chars() {
        let token = generate_token().expect("token");
        assert_eq!(token.len(), 128);
        let decoded = URL_SAFE_NO_PAD.decode(token.as_bytes()).expect("decode");
        assert_eq!(decoded.len(), TOKEN_BYTES);
    }

    #[test]
    fn generate_token_is_not_repeated() {
        let first = generate_token().expect("token");
        let second = generate_token().expect("token");
        assert_ne!(first, second);
    }

    #[test]
    fn hash_token_stable() {
        let first = hash_token("token");
        let second = hash_token("token");
        let different = hash_token("other");
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        assert_ne!(first, different);
    }

    #[test]
    fn password_round_trip() {
        let digest = hash_password("correct horse").expect("hash");
        assert!(verify_password("correct horse", &digest).expect("verify"));
        assert!(!verify_password("wrong horse", &digest).expect("verify"));
    }

    #[test]
    fn password_hashes_are_salted() {
        let first = hash_password("correct horse").expect("hash");
        let second = hash_password("correct horse").expect("hash");
        assert_ne!(first, second);
    }

    #[test]
    fn verify_password_rejects_malformed_digest() {
        assert!(verify_password("password", "not-a-phc-string").is_err());
    }

    #[test]
    fn extract_bearer_token_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_bearer_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn extract_bearer_token_none_when_missing_or_empty() {
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
