//! Password reset and change flows.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::{audit, email};

use super::session::authenticate;
use super::state::AuthState;
use super::storage::{
    delete_user_sessions, fetch_password_hash, lookup_user_by_email, update_password,
};
use super::tokens::{consume_token, issue_token, ConsumeOutcome, IssueOutcome, TokenPurpose};
use super::types::{ChangePasswordRequest, ForgotPasswordRequest, ResetPasswordRequest};
use super::utils::{
    hash_password, hash_token, normalize_email, valid_email, verify_password, MIN_PASSWORD_LEN,
};

/// Request a password reset link.
///
/// The response is the same 204 whether the account exists, the throttle is
/// active, or a token was actually issued; only backend failures differ.
#[utoipa::path(
    post,
    path = "/v1/auth/forgot",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 204, description = "Accepted; a link may have been sent"),
        (status = 400, description = "Malformed payload"),
        (status = 422, description = "Email fails validation")
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> impl IntoResponse {
    let request: ForgotPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    let user = match lookup_user_by_email(&pool, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => return StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            audit::failure(
                "reset token lookup",
                "failed to look up the account for a reset request",
                &err,
                json!({ "route": "/v1/auth/forgot" }),
                None,
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let config = auth_state.config();
    match issue_token(&pool, user.id, TokenPurpose::ResetPassword, None, config).await {
        Ok(IssueOutcome::Issued(token)) => {
            let link = email::delivery_link(
                config.frontend_base_url(),
                email::MailKind::PasswordReset,
                &token,
            );
            email::spawn_delivery(
                auth_state.mailer(),
                email::MailKind::PasswordReset,
                email,
                link,
                Some(user.id),
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(IssueOutcome::Throttled) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            audit::failure(
                "reset token storage",
                "failed to store the reset token",
                &err,
                json!({ "route": "/v1/auth/forgot" }),
                Some(user.id),
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Consume a reset token and set a new password.
///
/// Token consumption, the password overwrite, and the revocation of every
/// session share one transaction; a crash can not leave a new password with
/// old sessions still alive.
#[utoipa::path(
    put,
    path = "/v1/auth/password/{token}",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password replaced, all sessions revoked"),
        (status = 400, description = "Malformed payload"),
        (status = 404, description = "Token unknown or already consumed"),
        (status = 410, description = "Token past its validity window"),
        (status = 422, description = "Password fails validation")
    ),
    tag = "auth"
)]
pub async fn reset_password(
    Path(token): Path<String>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let request: ResetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if request.password.len() < MIN_PASSWORD_LEN {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    let token_hash = hash_token(&token);
    let config = auth_state.config();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            audit::failure(
                "password reset",
                "failed to start the reset transaction",
                &anyhow::Error::from(err),
                json!({ "route": "/v1/auth/password/{token}" }),
                None,
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let consumed =
        match consume_token(&mut tx, &token_hash, TokenPurpose::ResetPassword, config).await {
            Ok(ConsumeOutcome::Consumed(consumed)) => consumed,
            Ok(ConsumeOutcome::NotFound) => {
                let _ = tx.rollback().await;
                return StatusCode::NOT_FOUND.into_response();
            }
            Ok(ConsumeOutcome::Expired) => {
                // The delete stands; an expired link is gone for good.
                if let Err(err) = tx.commit().await {
                    audit::failure(
                        "password reset",
                        "failed to commit the expired-token delete",
                        &anyhow::Error::from(err),
                        json!({ "route": "/v1/auth/password/{token}" }),
                        None,
                    );
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
                return StatusCode::GONE.into_response();
            }
            Err(err) => {
                let _ = tx.rollback().await;
                audit::failure(
                    "password reset",
                    "failed to consume the reset token",
                    &err,
                    json!({ "route": "/v1/auth/password/{token}" }),
                    None,
                );
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

    let user_id = consumed.user_id;
    let password_hash = match hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            let _ = tx.rollback().await;
            audit::failure(
                "password hashing",
                "failed to hash the replacement password",
                &err,
                json!({ "route": "/v1/auth/password/{token}" }),
                Some(user_id),
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let applied = async {
        update_password(&mut tx, user_id, &password_hash).await?;
        delete_user_sessions(&mut tx, user_id).await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if let Err(err) = applied {
        let _ = tx.rollback().await;
        audit::failure(
            "password reset",
            "failed to apply the password reset",
            &err,
            json!({ "route": "/v1/auth/password/{token}" }),
            Some(user_id),
        );
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if let Err(err) = tx.commit().await {
        audit::failure(
            "password reset",
            "failed to commit the password reset",
            &anyhow::Error::from(err),
            json!({ "route": "/v1/auth/password/{token}" }),
            Some(user_id),
        );
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    StatusCode::NO_CONTENT.into_response()
}

/// Change the password of the authenticated account.
///
/// Requires the current password; on success every session is revoked and the
/// caller has to log in again.
#[utoipa::path(
    put,
    path = "/v1/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password replaced, all sessions revoked"),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Invalid session or wrong current password"),
        (status = 422, description = "Password fails validation")
    ),
    tag = "auth"
)]
pub async fn change_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> impl IntoResponse {
    let user_id = match authenticate(&headers, &pool, auth_state.config()).await {
        Ok(user_id) => user_id,
        Err(status) => return status.into_response(),
    };

    let request: ChangePasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if request.password.len() < MIN_PASSWORD_LEN || request.new_password.len() < MIN_PASSWORD_LEN {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    let current_hash = match fetch_password_hash(&pool, user_id).await {
        Ok(Some(hash)) => hash,
        Ok(None) => {
            audit::failure(
                "password change",
                "authenticated account has no credential row",
                &anyhow::anyhow!("user row missing"),
                json!({ "route": "/v1/auth/password" }),
                Some(user_id),
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(err) => {
            audit::failure(
                "password change",
                "failed to fetch the current password digest",
                &err,
                json!({ "route": "/v1/auth/password" }),
                Some(user_id),
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match verify_password(&request.password, &current_hash) {
        Ok(true) => {}
        Ok(false) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            audit::failure(
                "password verification",
                "failed to compare the current password",
                &err,
                json!({ "route": "/v1/auth/password" }),
                Some(user_id),
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let password_hash = match hash_password(&request.new_password) {
        Ok(hash) => hash,
        Err(err) => {
            audit::failure(
                "password hashing",
                "failed to hash the replacement password",
                &err,
                json!({ "route": "/v1/auth/password" }),
                Some(user_id),
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let applied = async {
        let mut tx = pool.begin().await?;
        update_password(&mut tx, user_id, &password_hash).await?;
        delete_user_sessions(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if let Err(err) = applied {
        audit::failure(
            "password change",
            "failed to apply the password change",
            &err,
            json!({ "route": "/v1/auth/password" }),
            Some(user_id),
        );
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::super::state::{AuthConfig, AuthState};
    use super::{change_password, forgot_password, reset_password};
    use crate::api::email::LogMailer;
    use anyhow::Result;
    use axum::extract::{Extension, Path};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::Json;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

    fn auth_state() -> Arc<AuthState> {
        let config = AuthConfig::new("https://accounts.tld".to_string());
        Arc::new(AuthState::new(config, Arc::new(LogMailer)))
    }

    #[tokio::test]
    async fn forgot_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = forgot_password(Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn forgot_rejects_invalid_email() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = forgot_password(
            Extension(pool),
            Extension(auth_state()),
            Some(Json(super::ForgotPasswordRequest {
                email: "nope".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        Ok(())
    }

    #[tokio::test]
    async fn reset_rejects_short_password() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = reset_password(
            Path("token".to_string()),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(super::ResetPasswordRequest {
                password: "short".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        Ok(())
    }

    #[tokio::test]
    async fn change_requires_session() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = change_password(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(super::ChangePasswordRequest {
                password: "password1".to_string(),
                new_password: "password2".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
