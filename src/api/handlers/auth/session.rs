//! Bearer session validation and logout.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::audit;

use super::state::{AuthConfig, AuthState};
use super::storage::{delete_session, validate_session};
use super::utils::{extract_bearer_token, hash_token};

/// Resolve the bearer token into an account id, sliding the session window
/// forward. Expired and unknown tokens are indistinguishable to the caller.
pub(super) async fn authenticate(
    headers: &HeaderMap,
    pool: &PgPool,
    config: &AuthConfig,
) -> Result<Uuid, StatusCode> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let token_hash = hash_token(&token);
    match validate_session(pool, &token_hash, config.session_idle_seconds()).await {
        Ok(Some(user_id)) => Ok(user_id),
        Ok(None) => Err(StatusCode::UNAUTHORIZED),
        Err(err) => {
            audit::failure(
                "session validation",
                "failed to validate the session",
                &err,
                json!({}),
                None,
            );
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Report whether the presented session is still valid.
#[utoipa::path(
    get,
    path = "/v1/auth/check",
    responses(
        (status = 204, description = "Session is active"),
        (status = 401, description = "Missing, unknown, or expired session token")
    ),
    tag = "auth"
)]
pub async fn check(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    match authenticate(&headers, &pool, auth_state.config()).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(status) => status.into_response(),
    }
}

/// Revoke the presented session.
///
/// Idempotent by design: logout never reveals whether the token was valid.
#[utoipa::path(
    delete,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session revoked (or was never valid)"),
        (status = 401, description = "No bearer token presented")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let token_hash = hash_token(&token);
    if let Err(err) = delete_session(&pool, &token_hash).await {
        // The session row may survive; the caller still discards the token.
        audit::failure(
            "session revocation",
            "failed to delete the session",
            &err,
            json!({ "route": "/v1/auth/logout" }),
            None,
        );
    }

    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::super::state::{AuthConfig, AuthState};
    use super::{check, logout};
    use crate::api::email::LogMailer;
    use anyhow::Result;
    use axum::extract::Extension;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

    fn auth_state() -> Arc<AuthState> {
        let config = AuthConfig::new("https://accounts.tld".to_string());
        Arc::new(AuthState::new(config, Arc::new(LogMailer)))
    }

    #[tokio::test]
    async fn check_requires_bearer_token() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = check(HeaderMap::new(), Extension(pool), Extension(auth_state()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn logout_requires_bearer_token() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = logout(HeaderMap::new(), Extension(pool))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
