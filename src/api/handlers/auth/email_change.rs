//! Email change: request a confirmation link, then consume it.

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
use super::storage::{email_in_use, email_taken, fetch_user_email, update_email};
use super::tokens::{consume_token, issue_token, ConsumeOutcome, IssueOutcome, TokenPurpose};
use super::types::EmailChangeRequest;
use super::utils::{hash_token, normalize_email, valid_email};

/// Request to move the account to a new address.
///
/// The link goes to the proposed address; the account only changes once it is
/// confirmed from there. The address must be free both among accounts and
/// among other accounts' still-fresh pending changes.
#[utoipa::path(
    post,
    path = "/v1/profile/email",
    request_body = EmailChangeRequest,
    responses(
        (status = 204, description = "Accepted; a confirmation link may have been sent"),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Missing or invalid session"),
        (status = 409, description = "Address already in use or same as current"),
        (status = 422, description = "Email fails validation")
    ),
    tag = "profile"
)]
pub async fn request_email_change(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<EmailChangeRequest>>,
) -> impl IntoResponse {
    let user_id = match authenticate(&headers, &pool, auth_state.config()).await {
        Ok(user_id) => user_id,
        Err(status) => return status.into_response(),
    };

    let request: EmailChangeRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let new_email = normalize_email(&request.email);
    if !valid_email(&new_email) {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    let current_email = match fetch_user_email(&pool, user_id).await {
        Ok(Some(email)) => email,
        Ok(None) => {
            audit::failure(
                "email change request",
                "authenticated account has no user row",
                &anyhow::anyhow!("user row missing"),
                json!({ "route": "/v1/profile/email" }),
                Some(user_id),
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(err) => {
            audit::failure(
                "email change request",
                "failed to fetch the current email",
                &err,
                json!({ "route": "/v1/profile/email" }),
                Some(user_id),
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if new_email == current_email {
        return StatusCode::CONFLICT.into_response();
    }

    let config = auth_state.config();
    let pending_window = config.token_ttl_seconds(TokenPurpose::ChangeEmail);
    match email_taken(&pool, &new_email, user_id, pending_window).await {
        Ok(true) => return StatusCode::CONFLICT.into_response(),
        Ok(false) => {}
        Err(err) => {
            audit::failure(
                "email change request",
                "failed to check whether the address is free",
                &err,
                json!({ "route": "/v1/profile/email" }),
                Some(user_id),
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    match issue_token(
        &pool,
        user_id,
        TokenPurpose::ChangeEmail,
        Some(&new_email),
        config,
    )
    .await
    {
        Ok(IssueOutcome::Issued(token)) => {
            let link = email::delivery_link(
                config.frontend_base_url(),
                email::MailKind::EmailChange,
                &token,
            );
            email::spawn_delivery(
                auth_state.mailer(),
                email::MailKind::EmailChange,
                new_email,
                link,
                Some(user_id),
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(IssueOutcome::Throttled) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            audit::failure(
                "email change token storage",
                "failed to store the email change token",
                &err,
                json!({ "route": "/v1/profile/email" }),
                Some(user_id),
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Consume a change link and move the account to the pending address.
///
/// The address is re-checked at consumption time; another account may have
/// claimed it since the link was issued.
#[utoipa::path(
    put,
    path = "/v1/profile/email/{token}",
    responses(
        (status = 204, description = "Email replaced"),
        (status = 404, description = "Token unknown or already consumed"),
        (status = 409, description = "Address claimed since the link was issued"),
        (status = 410, description = "Token past its validity window")
    ),
    tag = "profile"
)]
pub async fn confirm_email_change(
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
                "email change",
                "failed to start the email change transaction",
                &anyhow::Error::from(err),
                json!({ "route": "/v1/profile/email/{token}" }),
                None,
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let consumed = match consume_token(&mut tx, &token_hash, TokenPurpose::ChangeEmail, config).await
    {
        Ok(ConsumeOutcome::Consumed(consumed)) => consumed,
        Ok(ConsumeOutcome::NotFound) => {
            let _ = tx.rollback().await;
            return StatusCode::NOT_FOUND.into_response();
        }
        Ok(ConsumeOutcome::Expired) => {
            if let Err(err) = tx.commit().await {
                audit::failure(
                    "email change",
                    "failed to commit the expired-token delete",
                    &anyhow::Error::from(err),
                    json!({ "route": "/v1/profile/email/{token}" }),
                    None,
                );
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            return StatusCode::GONE.into_response();
        }
        Err(err) => {
            let _ = tx.rollback().await;
            audit::failure(
                "email change",
                "failed to consume the email change token",
                &err,
                json!({ "route": "/v1/profile/email/{token}" }),
                None,
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let user_id = consumed.user_id;
    let Some(new_email) = consumed.new_email else {
        let _ = tx.rollback().await;
        audit::failure(
            "email change",
            "change token row carries no pending address",
            &anyhow::anyhow!("new_email missing"),
            json!({ "route": "/v1/profile/email/{token}" }),
            Some(user_id),
        );
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    // Consumed is consumed: even on conflict the token row stays deleted.
    match email_in_use(&mut tx, &new_email).await {
        Ok(false) => {}
        Ok(true) => {
            if let Err(err) = tx.commit().await {
                audit::failure(
                    "email change",
                    "failed to commit the conflicting-token delete",
                    &anyhow::Error::from(err),
                    json!({ "route": "/v1/profile/email/{token}" }),
                    Some(user_id),
                );
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            return StatusCode::CONFLICT.into_response();
        }
        Err(err) => {
            let _ = tx.rollback().await;
            audit::failure(
                "email change",
                "failed to re-check the pending address",
                &err,
                json!({ "route": "/v1/profile/email/{token}" }),
                Some(user_id),
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    match update_email(&mut tx, user_id, &new_email).await {
        // The unique index caught a claim racing past the check above. The
        // failed statement aborted the transaction, so the token survives
        // and the link can be retried once the conflict clears.
        Ok(false) => {
            let _ = tx.rollback().await;
            return StatusCode::CONFLICT.into_response();
        }
        Ok(true) => {}
        Err(err) => {
            let _ = tx.rollback().await;
            audit::failure(
                "email change",
                "failed to update the email",
                &err,
                json!({ "route": "/v1/profile/email/{token}" }),
                Some(user_id),
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    if let Err(err) = tx.commit().await {
        audit::failure(
            "email change",
            "failed to commit the email change",
            &anyhow::Error::from(err),
            json!({ "route": "/v1/profile/email/{token}" }),
            Some(user_id),
        );
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::super::state::{AuthConfig, AuthState};
    use super::request_email_change;
    use crate::api::email::LogMailer;
    use anyhow::Result;
    use axum::extract::Extension;
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
    async fn request_requires_session() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = request_email_change(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(super::EmailChangeRequest {
                email: "new@example.com".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
