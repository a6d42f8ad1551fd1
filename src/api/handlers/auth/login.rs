//! Password login.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::audit;

use super::state::AuthState;
use super::storage::{create_session, lookup_credentials};
use super::types::{LoginRequest, LoginResponse};
use super::utils::{normalize_email, valid_email, verify_password, MIN_PASSWORD_LEN};

/// Verify the password and mint a session.
///
/// The raw session token is returned exactly once, here; afterwards only its
/// digest exists server-side.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Unknown email or wrong password"),
        (status = 403, description = "Email not verified yet"),
        (status = 422, description = "Email or password fails validation")
    ),
    tag = "auth"
)]
pub async fn login(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) || request.password.len() < MIN_PASSWORD_LEN {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    let record = match lookup_credentials(&pool, &email).await {
        Ok(Some(record)) => record,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            audit::failure(
                "credential lookup",
                "failed to fetch the user's credentials",
                &err,
                json!({ "route": "/v1/auth/login" }),
                None,
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match verify_password(&request.password, &record.password_hash) {
        Ok(true) => {}
        Ok(false) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            audit::failure(
                "password verification",
                "failed to compare the password against the stored digest",
                &err,
                json!({ "route": "/v1/auth/login" }),
                Some(record.user_id),
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    // Unverified accounts can hold a password but not a session.
    if !record.email_verified {
        return StatusCode::FORBIDDEN.into_response();
    }

    match create_session(&pool, record.user_id).await {
        Ok((_session_id, token)) => (StatusCode::OK, Json(LoginResponse { token })).into_response(),
        Err(err) => {
            audit::failure(
                "session storage",
                "failed to store the session",
                &err,
                json!({ "route": "/v1/auth/login" }),
                Some(record.user_id),
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::state::{AuthConfig, AuthState};
    use super::login;
    use crate::api::email::LogMailer;
    use anyhow::Result;
    use axum::extract::Extension;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::Json;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

    fn auth_state() -> Arc<AuthState> {
        let config = AuthConfig::new("https://accounts.tld".to_string());
        Arc::new(AuthState::new(config, Arc::new(LogMailer)))
    }

    #[tokio::test]
    async fn login_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn login_rejects_invalid_email() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(
            Extension(pool),
            Extension(auth_state()),
            Some(Json(super::LoginRequest {
                email: "nope".to_string(),
                password: "password1".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        Ok(())
    }

    #[tokio::test]
    async fn login_rejects_short_password() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = login(
            Extension(pool),
            Extension(auth_state()),
            Some(Json(super::LoginRequest {
                email: "ada@example.com".to_string(),
                password: "short".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        Ok(())
    }
}
