use crate::api::{
    self,
    email::{self, SmtpConfig},
    handlers::auth::AuthConfig,
};
use anyhow::Result;
use secrecy::SecretString;
use tracing::info;

#[derive(Debug)]
pub struct SmtpArgs {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from: String,
    pub app_name: String,
}

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub session_idle_seconds: i64,
    pub token_throttle_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub change_email_token_ttl_seconds: i64,
    pub verify_token_ttl_seconds: Option<i64>,
    pub smtp: SmtpArgs,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the mail transport cannot be configured or the server
/// fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = AuthConfig::new(args.frontend_base_url)
        .with_session_idle_seconds(args.session_idle_seconds)
        .with_token_throttle_seconds(args.token_throttle_seconds)
        .with_reset_token_ttl_seconds(Some(args.reset_token_ttl_seconds))
        .with_change_email_token_ttl_seconds(Some(args.change_email_token_ttl_seconds))
        .with_verify_token_ttl_seconds(args.verify_token_ttl_seconds);

    let smtp_config = args
        .smtp
        .host
        .as_deref()
        .filter(|host| !host.trim().is_empty())
        .map(|host| SmtpConfig {
            host: host.to_string(),
            port: args.smtp.port,
            username: args.smtp.username.clone(),
            password: args.smtp.password.clone(),
            from: args.smtp.from.clone(),
            app_name: args.smtp.app_name.clone(),
        });

    if smtp_config.is_none() {
        info!("SMTP host not configured, outbound mail will be logged only");
    }

    let mailer = email::build_mailer(smtp_config)?;

    api::serve(args.port, args.dsn, auth_config, mailer).await
}
