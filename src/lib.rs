//! # Konto (Account & Credential Service)
//!
//! `konto` issues and validates identity credentials for a web-facing account
//! service: password login, sliding-expiration bearer sessions, and one-time
//! tokens for email verification, password reset, and email change.
//!
//! ## Credentials
//!
//! Passwords are hashed with argon2id and never logged. Session and purpose
//! tokens are high-entropy opaque strings handed to the client exactly once;
//! the database only ever stores their SHA-256 digest, so a copy of the
//! database yields no usable credentials.
//!
//! ## Sessions
//!
//! A session stays valid as long as it keeps being used: every successful
//! validation slides the expiry window forward (7 days by default). Idle
//! sessions lapse; password changes and resets revoke every session for the
//! account.
//!
//! ## One-time tokens
//!
//! Each account holds at most one pending token per purpose. Requesting a new
//! one replaces the previous row, so only the most recently issued link is
//! honored. Consumption is a single atomic delete-and-return; two concurrent
//! redemptions can never both succeed. Re-issuance is throttled to one send
//! per hour per account per purpose.
//!
//! Endpoints that could reveal whether an account exists (password-reset
//! request, verification resend) return the same `204` for unknown accounts,
//! already-verified accounts, and active throttles.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
