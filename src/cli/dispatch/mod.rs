//! Command-line argument dispatch and server initialization.
//!
//! This module maps validated CLI arguments to the appropriate action, such
//! as starting the API server with its full configuration state.

use crate::cli::actions::{
    server::{Args, SmtpArgs},
    Action,
};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let frontend_base_url = matches
        .get_one::<String>("frontend-base-url")
        .cloned()
        .context("missing required argument: --frontend-base-url")?;

    let smtp = SmtpArgs {
        host: matches.get_one::<String>("smtp-host").cloned(),
        port: matches.get_one::<u16>("smtp-port").copied().unwrap_or(587),
        username: matches.get_one::<String>("smtp-username").cloned(),
        password: matches
            .get_one::<String>("smtp-password")
            .map(|password| SecretString::from(password.clone())),
        from: matches
            .get_one::<String>("smtp-from")
            .cloned()
            .unwrap_or_else(|| "no-reply@localhost".to_string()),
        app_name: matches
            .get_one::<String>("app-name")
            .cloned()
            .unwrap_or_else(|| "Konto".to_string()),
    };

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url,
        session_idle_seconds: matches
            .get_one::<i64>("session-idle-seconds")
            .copied()
            .unwrap_or(604_800),
        token_throttle_seconds: matches
            .get_one::<i64>("token-throttle-seconds")
            .copied()
            .unwrap_or(3600),
        reset_token_ttl_seconds: matches
            .get_one::<i64>("reset-token-ttl-seconds")
            .copied()
            .unwrap_or(86_400),
        change_email_token_ttl_seconds: matches
            .get_one::<i64>("change-email-token-ttl-seconds")
            .copied()
            .unwrap_or(86_400),
        verify_token_ttl_seconds: matches.get_one::<i64>("verify-token-ttl-seconds").copied(),
        smtp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{actions::Action, commands};

    #[test]
    fn server_action_defaults() {
        temp_env::with_vars(
            [
                ("KONTO_DSN", Some("postgres://user@localhost:5432/konto")),
                ("KONTO_SMTP_HOST", None::<&str>),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["konto"]);
                let action = handler(&matches).expect("server action");
                let Action::Server(args) = action;
                assert_eq!(args.port, 8080);
                assert_eq!(args.dsn, "postgres://user@localhost:5432/konto");
                assert_eq!(args.frontend_base_url, "http://localhost:3000");
                assert_eq!(args.session_idle_seconds, 604_800);
                assert_eq!(args.token_throttle_seconds, 3600);
                assert_eq!(args.reset_token_ttl_seconds, 86_400);
                assert_eq!(args.change_email_token_ttl_seconds, 86_400);
                assert_eq!(args.verify_token_ttl_seconds, None);
                assert_eq!(args.smtp.host, None);
                assert_eq!(args.smtp.from, "no-reply@localhost");
            },
        );
    }

    #[test]
    fn verify_ttl_can_be_set() {
        temp_env::with_vars(
            [
                ("KONTO_DSN", Some("postgres://user@localhost:5432/konto")),
                ("KONTO_VERIFY_TOKEN_TTL_SECONDS", Some("3600")),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["konto"]);
                let action = handler(&matches).expect("server action");
                let Action::Server(args) = action;
                assert_eq!(args.verify_token_ttl_seconds, Some(3600));
            },
        );
    }
}
