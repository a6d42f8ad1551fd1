//! Auth configuration and shared request state.

use crate::api::email::Mailer;
use std::sync::Arc;

use super::tokens::TokenPurpose;

const DEFAULT_SESSION_IDLE_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_TOKEN_THROTTLE_SECONDS: i64 = 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_CHANGE_EMAIL_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;

/// Immutable configuration assembled once at startup and passed to every
/// component that needs it.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_idle_seconds: i64,
    token_throttle_seconds: i64,
    reset_token_ttl_seconds: Option<i64>,
    change_email_token_ttl_seconds: Option<i64>,
    verify_token_ttl_seconds: Option<i64>,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_idle_seconds: DEFAULT_SESSION_IDLE_SECONDS,
            token_throttle_seconds: DEFAULT_TOKEN_THROTTLE_SECONDS,
            reset_token_ttl_seconds: Some(DEFAULT_RESET_TOKEN_TTL_SECONDS),
            change_email_token_ttl_seconds: Some(DEFAULT_CHANGE_EMAIL_TOKEN_TTL_SECONDS),
            // Verification links stay usable until replaced unless configured.
            verify_token_ttl_seconds: None,
        }
    }

    #[must_use]
    pub fn with_session_idle_seconds(mut self, seconds: i64) -> Self {
        self.session_idle_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_token_throttle_seconds(mut self, seconds: i64) -> Self {
        self.token_throttle_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: Option<i64>) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_change_email_token_ttl_seconds(mut self, seconds: Option<i64>) -> Self {
        self.change_email_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verify_token_ttl_seconds(mut self, seconds: Option<i64>) -> Self {
        self.verify_token_ttl_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(crate) fn session_idle_seconds(&self) -> i64 {
        self.session_idle_seconds
    }

    pub(super) fn token_throttle_seconds(&self) -> i64 {
        self.token_throttle_seconds
    }

    /// Absolute validity window for a purpose token, `None` when unbounded.
    pub(super) fn token_ttl_seconds(&self, purpose: TokenPurpose) -> Option<i64> {
        match purpose {
            TokenPurpose::VerifyEmail => self.verify_token_ttl_seconds,
            TokenPurpose::ResetPassword => self.reset_token_ttl_seconds,
            TokenPurpose::ChangeEmail => self.change_email_token_ttl_seconds,
        }
    }
}

/// Request state shared by the auth handlers: configuration plus the outbound
/// mail collaborator.
pub struct AuthState {
    config: AuthConfig,
    mailer: Arc<dyn Mailer>,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, mailer: Arc<dyn Mailer>) -> Self {
        Self { config, mailer }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn mailer(&self) -> Arc<dyn Mailer> {
        Arc::clone(&self.mailer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::LogMailer;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://accounts.tld".to_string());

        assert_eq!(config.frontend_base_url(), "https://accounts.tld");
        assert_eq!(
            config.session_idle_seconds(),
            super::DEFAULT_SESSION_IDLE_SECONDS
        );
        assert_eq!(
            config.token_throttle_seconds(),
            super::DEFAULT_TOKEN_THROTTLE_SECONDS
        );
        assert_eq!(config.token_ttl_seconds(TokenPurpose::VerifyEmail), None);
        assert_eq!(
            config.token_ttl_seconds(TokenPurpose::ResetPassword),
            Some(super::DEFAULT_RESET_TOKEN_TTL_SECONDS)
        );
        assert_eq!(
            config.token_ttl_seconds(TokenPurpose::ChangeEmail),
            Some(super::DEFAULT_CHANGE_EMAIL_TOKEN_TTL_SECONDS)
        );

        let config = config
            .with_session_idle_seconds(120)
            .with_token_throttle_seconds(30)
            .with_reset_token_ttl_seconds(Some(60))
            .with_change_email_token_ttl_seconds(None)
            .with_verify_token_ttl_seconds(Some(90));

        assert_eq!(config.session_idle_seconds(), 120);
        assert_eq!(config.token_throttle_seconds(), 30);
        assert_eq!(
            config.token_ttl_seconds(TokenPurpose::ResetPassword),
            Some(60)
        );
        assert_eq!(config.token_ttl_seconds(TokenPurpose::ChangeEmail), None);
        assert_eq!(
            config.token_ttl_seconds(TokenPurpose::VerifyEmail),
            Some(90)
        );
    }

    #[test]
    fn auth_state_exposes_config_and_mailer() {
        let config = AuthConfig::new("https://accounts.tld".to_string());
        let state = AuthState::new(config, Arc::new(LogMailer));
        assert_eq!(state.config().frontend_base_url(), "https://accounts.tld");
        let _mailer = state.mailer();
    }
}
