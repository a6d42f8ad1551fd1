//! One-time purpose tokens: issuance, throttling, and consumption.
//!
//! Each account holds at most one pending token per purpose; issuing a new
//! one replaces the previous row, so only the most recently issued raw token
//! is ever honored. Consumption is a single `DELETE .. RETURNING`, which
//! makes redemption at-most-once: of two concurrent attempts, exactly one
//! observes the row.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::state::AuthConfig;
use super::utils::{generate_token, hash_token};

/// The pending action a one-time token is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TokenPurpose {
    VerifyEmail,
    ResetPassword,
    ChangeEmail,
}

impl TokenPurpose {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::VerifyEmail => "verify_email",
            Self::ResetPassword => "reset_password",
            Self::ChangeEmail => "change_email",
        }
    }
}

/// Outcome of an issuance request.
#[derive(Debug)]
pub(super) enum IssueOutcome {
    /// A fresh token was stored; the raw value goes into the delivery link.
    Issued(String),
    /// A pending token younger than the throttle window exists; nothing was
    /// stored and nothing should be sent.
    Throttled,
}

/// Row contents observed by a successful consumption.
#[derive(Debug)]
pub(super) struct ConsumedToken {
    pub(super) user_id: Uuid,
    pub(super) new_email: Option<String>,
    pub(super) created_at: DateTime<Utc>,
}

/// Outcome of a consumption attempt.
#[derive(Debug)]
pub(super) enum ConsumeOutcome {
    Consumed(ConsumedToken),
    NotFound,
    /// The row matched but was past the purpose's absolute window. The row is
    /// gone either way; the link can never be retried.
    Expired,
}

/// Issue a token for `user_id`/`purpose`, replacing any pending one.
///
/// Returns [`IssueOutcome::Throttled`] without touching the store when the
/// pending token is younger than the throttle window, which bounds outbound
/// mail volume per account per purpose.
pub(super) async fn issue_token(
    pool: &PgPool,
    user_id: Uuid,
    purpose: TokenPurpose,
    new_email: Option<&str>,
    config: &AuthConfig,
) -> Result<IssueOutcome> {
    if throttle_active(pool, user_id, purpose, config.token_throttle_seconds()).await? {
        return Ok(IssueOutcome::Throttled);
    }

    let token = generate_token()?;
    let token_hash = hash_token(&token);

    let query = r"
        INSERT INTO purpose_tokens (user_id, purpose, token_hash, new_email)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, purpose)
        DO UPDATE SET
            token_hash = EXCLUDED.token_hash,
            new_email = EXCLUDED.new_email,
            created_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(purpose.as_str())
        .bind(token_hash)
        .bind(new_email)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store purpose token")?;

    Ok(IssueOutcome::Issued(token))
}

async fn throttle_active(
    pool: &PgPool,
    user_id: Uuid,
    purpose: TokenPurpose,
    throttle_seconds: i64,
) -> Result<bool> {
    let query = r"
        SELECT 1
        FROM purpose_tokens
        WHERE user_id = $1
          AND purpose = $2
          AND created_at > NOW() - ($3 * INTERVAL '1 second')
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(purpose.as_str())
        .bind(throttle_seconds)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check token throttle")?;
    Ok(row.is_some())
}

/// Atomically delete the token row matching the digest and yield its prior
/// contents. Runs inside the caller's transaction so the consuming mutation
/// commits or rolls back together with the delete.
pub(super) async fn consume_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    token_hash: &[u8],
    purpose: TokenPurpose,
    config: &AuthConfig,
) -> Result<ConsumeOutcome> {
    let query = r"
        DELETE FROM purpose_tokens
        WHERE token_hash = $1
          AND purpose = $2
        RETURNING user_id, new_email, created_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(purpose.as_str())
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume purpose token")?;

    let Some(row) = row else {
        return Ok(ConsumeOutcome::NotFound);
    };

    let consumed = ConsumedToken {
        user_id: row.get("user_id"),
        new_email: row.get("new_email"),
        created_at: row.get("created_at"),
    };

    if is_expired(
        consumed.created_at,
        Utc::now(),
        config.token_ttl_seconds(purpose),
    ) {
        return Ok(ConsumeOutcome::Expired);
    }

    Ok(ConsumeOutcome::Consumed(consumed))
}

/// Absolute-expiry check; `None` means the purpose carries no window.
fn is_expired(created_at: DateTime<Utc>, now: DateTime<Utc>, ttl_seconds: Option<i64>) -> bool {
    ttl_seconds.is_some_and(|ttl| now - created_at > Duration::seconds(ttl))
}
