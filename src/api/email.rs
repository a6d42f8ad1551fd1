//! Outbound mail: delivery links, the transport abstraction, and the
//! fire-and-forget dispatch task.
//!
//! Delivery is decoupled from the request path: handlers enqueue a send only
//! after the triggering state change has committed, and the response never
//! reflects delivery success. Failures go to the audit sink.

use crate::api::audit;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    message::Mailbox,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// The three delivery-link mails this service sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MailKind {
    Verification,
    PasswordReset,
    EmailChange,
}

impl MailKind {
    pub(crate) fn subject(self) -> &'static str {
        match self {
            Self::Verification => "Verify your email",
            Self::PasswordReset => "Reset Password",
            Self::EmailChange => "Change Email",
        }
    }

    /// Fixed frontend path per purpose; the raw token rides as a query
    /// parameter.
    pub(crate) fn link_path(self) -> &'static str {
        match self {
            Self::Verification => "/auth/verify",
            Self::PasswordReset => "/auth/reset",
            Self::EmailChange => "/auth/change-email",
        }
    }

    fn body(self, link: &str) -> String {
        match self {
            Self::Verification => format!(
                "Welcome!\n\nPlease open the following link to verify your email address:\n{link}\n\nIf you did not sign up, you can ignore this email.\n"
            ),
            Self::PasswordReset => format!(
                "We received a request to reset your password.\n\nOpen the following link to choose a new one:\n{link}\n\nIf you did not request this, you can ignore this email.\n"
            ),
            Self::EmailChange => format!(
                "We received a request to move your account to this address.\n\nOpen the following link to confirm the change:\n{link}\n\nIf you did not request this, you can ignore this email.\n"
            ),
        }
    }
}

/// Build the frontend link included in outbound emails. Raw tokens are
/// URL-safe by construction.
pub(crate) fn delivery_link(frontend_base_url: &str, kind: MailKind, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}{}?token={token}", kind.link_path())
}

/// Mail delivery abstraction. The service only ever hands over a kind, a
/// recipient, and a link; templating stays in here.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a message or return an error for the audit sink.
    async fn send(&self, kind: MailKind, to: &str, link: &str) -> Result<()>;
}

/// Local dev sender that logs instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, kind: MailKind, to: &str, _link: &str) -> Result<()> {
        info!(kind = ?kind, to_email = %to, "mail delivery stub");
        Ok(())
    }
}

/// SMTP relay parameters collected at startup.
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from: String,
    pub app_name: String,
}

/// Real sender over an async SMTP relay (STARTTLS).
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// # Errors
    /// Returns an error if the relay or the From address is invalid.
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let address = config
            .from
            .parse()
            .with_context(|| format!("invalid SMTP from address: {}", config.from))?;
        let from = Mailbox::new(Some(config.app_name.clone()), address);

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .context("failed to configure SMTP transport")?
            .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, kind: MailKind, to: &str, link: &str) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse().context("invalid recipient address")?)
            .subject(kind.subject())
            .body(kind.body(link))
            .context("failed to build message")?;

        self.transport
            .send(message)
            .await
            .context("failed to send mail")?;
        Ok(())
    }
}

/// Pick the configured transport, falling back to the log-only sender.
///
/// # Errors
/// Returns an error if SMTP is configured but invalid.
pub fn build_mailer(config: Option<SmtpConfig>) -> Result<Arc<dyn Mailer>> {
    match config {
        Some(config) => Ok(Arc::new(SmtpMailer::new(&config)?)),
        None => Ok(Arc::new(LogMailer)),
    }
}

/// Dispatch a delivery as a background task that outlives the request.
/// The caller has already committed its state change; a failed send is
/// audited, never reported back.
pub(crate) fn spawn_delivery(
    mailer: Arc<dyn Mailer>,
    kind: MailKind,
    to: String,
    link: String,
    user_id: Option<Uuid>,
) {
    tokio::spawn(async move {
        if let Err(err) = mailer.send(kind, &to, &link).await {
            // The link carries the raw token; keep it out of the audit record.
            audit::failure(
                "mail delivery",
                "failed to send mail",
                &err,
                json!({ "kind": format!("{kind:?}"), "to": to }),
                user_id,
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_link_trims_trailing_slash() {
        let link = delivery_link("https://accounts.tld/", MailKind::Verification, "token");
        assert_eq!(link, "https://accounts.tld/auth/verify?token=token");
    }

    #[test]
    fn delivery_link_per_kind_paths() {
        assert_eq!(
            delivery_link("https://a.tld", MailKind::PasswordReset, "t"),
            "https://a.tld/auth/reset?token=t"
        );
        assert_eq!(
            delivery_link("https://a.tld", MailKind::EmailChange, "t"),
            "https://a.tld/auth/change-email?token=t"
        );
    }

    #[test]
    fn bodies_embed_the_link() {
        for kind in [
            MailKind::Verification,
            MailKind::PasswordReset,
            MailKind::EmailChange,
        ] {
            assert!(kind.body("https://a.tld/x?token=t").contains("?token=t"));
        }
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let mailer = LogMailer;
        let sent = mailer
            .send(MailKind::Verification, "ada@example.com", "link")
            .await;
        assert!(sent.is_ok());
    }

    #[test]
    fn smtp_mailer_rejects_bad_from_address() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: None,
            password: None,
            from: "not an address".to_string(),
            app_name: "Konto".to_string(),
        };
        assert!(SmtpMailer::new(&config).is_err());
    }
}
