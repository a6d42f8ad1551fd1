//! Database helpers for accounts and sessions.
//!
//! Every check-and-mutate pair that could race lives in a single SQL
//! statement; the store is the only synchronization point.

use anyhow::{anyhow, Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::utils::{generate_token, hash_token, is_unique_violation};

/// Outcome when attempting to create a new account.
#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created(Uuid),
    EmailTaken,
}

/// Minimal fields needed to check a login attempt.
pub(super) struct CredentialRecord {
    pub(super) user_id: Uuid,
    pub(super) password_hash: String,
    pub(super) email_verified: bool,
}

/// Minimal fields needed by the masked issuance endpoints.
pub(super) struct UserRecord {
    pub(super) id: Uuid,
    pub(super) email_verified: bool,
}

pub(super) struct ProfileRecord {
    pub(super) id: Uuid,
    pub(super) name: String,
    pub(super) email: String,
    pub(super) email_verified: bool,
}

/// Insert a new account; emails are already normalized by the caller.
///
/// Relies on the unique index: a concurrent claim of the same address shows
/// up as zero inserted rows, never as a partial write.
pub(super) async fn insert_user(
    pool: &PgPool,
    name: &str,
    email: &str,
    password_hash: &str,
) -> Result<SignupOutcome> {
    let id = Uuid::now_v7();
    let query = r"
        INSERT INTO users (id, name, email, password_hash)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO NOTHING
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to insert user")?;

    Ok(match row {
        Some(row) => SignupOutcome::Created(row.get("id")),
        None => SignupOutcome::EmailTaken,
    })
}

pub(super) async fn lookup_credentials(
    pool: &PgPool,
    email: &str,
) -> Result<Option<CredentialRecord>> {
    let query = "SELECT id, password_hash, email_verified FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup credentials")?;

    Ok(row.map(|row| CredentialRecord {
        user_id: row.get("id"),
        password_hash: row.get("password_hash"),
        email_verified: row.get("email_verified"),
    }))
}

pub(super) async fn lookup_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>> {
    let query = "SELECT id, email_verified FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;

    Ok(row.map(|row| UserRecord {
        id: row.get("id"),
        email_verified: row.get("email_verified"),
    }))
}

/// Create a session and return its id together with the raw bearer token.
/// Only the token hash is stored.
pub(super) async fn create_session(pool: &PgPool, user_id: Uuid) -> Result<(Uuid, String)> {
    let query = r"
        INSERT INTO sessions (id, user_id, token_hash)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let session_id = Uuid::now_v7();
        let token = generate_token()?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(session_id)
            .bind(user_id)
            .bind(token_hash)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok((session_id, token)),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

/// Validate a presented session token and slide its window forward.
///
/// The window check and the touch are one atomic statement so two concurrent
/// requests can never both pass on a stale `last_used_at`. An expired row is
/// indistinguishable from a missing one.
pub(super) async fn validate_session(
    pool: &PgPool,
    token_hash: &[u8],
    idle_seconds: i64,
) -> Result<Option<Uuid>> {
    let query = r"
        UPDATE sessions
        SET last_used_at = NOW()
        WHERE token_hash = $1
          AND last_used_at >= NOW() - ($2 * INTERVAL '1 second')
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(idle_seconds)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to validate session")?;

    Ok(row.map(|row| row.get("user_id")))
}

/// Delete the session matching the digest. Idempotent: logout must never
/// reveal whether the token was ever valid.
pub(super) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = "DELETE FROM sessions WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

/// Revoke every session for the account, forcing re-authentication
/// everywhere. Runs inside the password change/reset transaction.
pub(super) async fn delete_user_sessions(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<u64> {
    let query = "DELETE FROM sessions WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to delete user sessions")?;
    Ok(result.rows_affected())
}

pub(super) async fn fetch_password_hash(pool: &PgPool, user_id: Uuid) -> Result<Option<String>> {
    let query = "SELECT password_hash FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch password hash")?;
    Ok(row.map(|row| row.get("password_hash")))
}

pub(super) async fn update_password(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = "UPDATE users SET password_hash = $1 WHERE id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(password_hash)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update password")?;
    Ok(())
}

/// Flip the verified flag; false -> true exactly once, idempotent after.
pub(super) async fn set_email_verified(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<()> {
    let query = "UPDATE users SET email_verified = TRUE WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to set email verified")?;
    Ok(())
}

pub(super) async fn fetch_user_email(pool: &PgPool, user_id: Uuid) -> Result<Option<String>> {
    let query = "SELECT email FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch user email")?;
    Ok(row.map(|row| row.get("email")))
}

/// Check whether an address is claimed by another account or sits in another
/// account's still-fresh pending email change.
pub(super) async fn email_taken(
    pool: &PgPool,
    email: &str,
    excluding_user: Uuid,
    pending_window_seconds: Option<i64>,
) -> Result<bool> {
    // Without a window, pending claims never lapse.
    let (query, windowed) = match pending_window_seconds {
        Some(_) => (
            r"
            SELECT
                EXISTS (SELECT 1 FROM users WHERE email = $1 AND id <> $2)
                OR EXISTS (
                    SELECT 1 FROM purpose_tokens
                    WHERE purpose = 'change_email'
                      AND LOWER(new_email) = $1
                      AND user_id <> $2
                      AND created_at > NOW() - ($3 * INTERVAL '1 second')
                ) AS taken
            ",
            true,
        ),
        None => (
            r"
            SELECT
                EXISTS (SELECT 1 FROM users WHERE email = $1 AND id <> $2)
                OR EXISTS (
                    SELECT 1 FROM purpose_tokens
                    WHERE purpose = 'change_email'
                      AND LOWER(new_email) = $1
                      AND user_id <> $2
                ) AS taken
            ",
            false,
        ),
    };
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let mut sql = sqlx::query(query).bind(email).bind(excluding_user);
    if windowed {
        sql = sql.bind(pending_window_seconds);
    }
    let row = sql
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check email availability")?;
    Ok(row.get("taken"))
}

/// Consumption-time uniqueness re-check against accounts only; time has
/// passed since the change was requested.
pub(super) async fn email_in_use(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
) -> Result<bool> {
    let query = "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1) AS taken";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check email in use")?;
    Ok(row.get("taken"))
}

/// Overwrite the account's email. Returns `false` when the unique index
/// rejects the address (claimed between check and write).
pub(super) async fn update_email(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    email: &str,
) -> Result<bool> {
    let query = "UPDATE users SET email = $1 WHERE id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    match sqlx::query(query)
        .bind(email)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
    {
        Ok(_) => Ok(true),
        Err(err) if is_unique_violation(&err) => Ok(false),
        Err(err) => Err(err).context("failed to update email"),
    }
}

pub(super) async fn fetch_profile(pool: &PgPool, user_id: Uuid) -> Result<Option<ProfileRecord>> {
    let query = "SELECT id, name, email, email_verified FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch profile")?;

    Ok(row.map(|row| ProfileRecord {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        email_verified: row.get("email_verified"),
    }))
}

pub(super) async fn update_name(pool: &PgPool, user_id: Uuid, name: &str) -> Result<()> {
    let query = "UPDATE users SET name = $1 WHERE id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(name)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update name")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{SignupOutcome, UserRecord};
    use uuid::Uuid;

    #[test]
    fn signup_outcome_debug_names() {
        let created = SignupOutcome::Created(Uuid::nil());
        assert!(format!("{created:?}").starts_with("Created"));
        assert_eq!(format!("{:?}", SignupOutcome::EmailTaken), "EmailTaken");
    }

    #[test]
    fn user_record_holds_values() {
        let record = UserRecord {
            id: Uuid::nil(),
            email_verified: true,
        };
        assert_eq!(record.id, Uuid::nil());
        assert!(record.email_verified);
    }
}
