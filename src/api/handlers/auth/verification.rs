//! Email verification endpoints.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::{audit, email};

use super::state::AuthState;
use super::storage::{lookup_user_by_email, set_email_verified};
use super::tokens::{consume_token, issue_token, ConsumeOutcome, IssueOutcome, TokenPurpose};
use super::types::ResendVerificationRequest;
use super::utils::{hash_token, normalize_email, valid_email};

/// Consume a verification link and flip the account to verified.
#[utoipa::path(
    put,
    path = "/v1/auth/verifications/{token}",
    responses(
        (status = 204, description = "Email verified"),
        (status = 404, description = "Token unknown or already consumed"),
        (status = 410, description = "Token past its validity window")
    ),
    tag = "auth"
)]
pub async fn verify_email(
    Path(token): Path<String>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let token_hash = hash_token(&token);
    let config = auth_state.config();

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            audit::failure(
                "email verification",
                "failed to start the verification transaction",
                &anyhow::Error::from(err),
                json!({ "route": "/v1/auth/verifications/{token}" }),
                None,
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let consumed = match consume_token(&mut tx, &token_hash, TokenPurpose::VerifyEmail, config).await
    {
        Ok(ConsumeOutcome::Consumed(consumed)) => consumed,
        Ok(ConsumeOutcome::NotFound) => {
            let _ = tx.rollback().await;
            return StatusCode::NOT_FOUND.into_response();
        }
        Ok(ConsumeOutcome::Expired) => {
            if let Err(err) = tx.commit().await {
                audit::failure(
                    "email verification",
                    "failed to commit the expired-token delete",
                    &anyhow::Error::from(err),
                    json!({ "route": "/v1/auth/verifications/{token}" }),
                    None,
                );
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            return StatusCode::GONE.into_response();
        }
        Err(err) => {
            let _ = tx.rollback().await;
            audit::failure(
                "email verification",
                "failed to consume the verification token",
                &err,
                json!({ "route": "/v1/auth/verifications/{token}" }),
                None,
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(err) = set_email_verified(&mut tx, consumed.user_id).await {
        let _ = tx.rollback().await;
        audit::failure(
            "email verification",
            "failed to mark the email verified",
            &err,
            json!({ "route": "/v1/auth/verifications/{token}" }),
            Some(consumed.user_id),
        );
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if let Err(err) = tx.commit().await {
        audit::failure(
            "email verification",
            "failed to commit the verification",
            &anyhow::Error::from(err),
            json!({ "route": "/v1/auth/verifications/{token}" }),
            Some(consumed.user_id),
        );
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    StatusCode::NO_CONTENT.into_response()
}

/// Resend the verification link.
///
/// Unknown addresses, already-verified accounts, and active throttles all get
/// the same 204 so callers can not probe for accounts.
#[utoipa::path(
    post,
    path = "/v1/auth/verifications",
    request_body = ResendVerificationRequest,
    responses(
        (status = 204, description = "Accepted; a link may have been sent"),
        (status = 400, description = "Malformed payload"),
        (status = 422, description = "Email fails validation")
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> impl IntoResponse {
    let request: ResendVerificationRequest = match payload {
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
                "verification resend",
                "failed to look up the account for a resend",
                &err,
                json!({ "route": "/v1/auth/verifications" }),
                None,
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if user.email_verified {
        return StatusCode::NO_CONTENT.into_response();
    }

    let config = auth_state.config();
    match issue_token(&pool, user.id, TokenPurpose::VerifyEmail, None, config).await {
        Ok(IssueOutcome::Issued(token)) => {
            let link = email::delivery_link(
                config.frontend_base_url(),
                email::MailKind::Verification,
                &token,
            );
            email::spawn_delivery(
                auth_state.mailer(),
                email::MailKind::Verification,
                email,
                link,
                Some(user.id),
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(IssueOutcome::Throttled) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            audit::failure(
                "verification token storage",
                "failed to store the verification token",
                &err,
                json!({ "route": "/v1/auth/verifications" }),
                Some(user.id),
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::state::{AuthConfig, AuthState};
    use super::resend_verification;
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
    async fn resend_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = resend_verification(Extension(pool), Extension(auth_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn resend_rejects_invalid_email() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = resend_verification(
            Extension(pool),
            Extension(auth_state()),
            Some(Json(super::ResendVerificationRequest {
                email: "missing-at.example.com".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        Ok(())
    }
}
