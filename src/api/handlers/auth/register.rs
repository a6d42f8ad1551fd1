//! Account registration.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::{audit, email};

use super::state::AuthState;
use super::storage::{insert_user, SignupOutcome};
use super::tokens::{issue_token, IssueOutcome, TokenPurpose};
use super::types::RegisterRequest;
use super::utils::{
    hash_password, normalize_email, valid_email, MAX_NAME_LEN, MIN_PASSWORD_LEN,
};

/// Create an account and send the verification link.
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, verification email queued"),
        (status = 400, description = "Malformed payload"),
        (status = 409, description = "Email already registered"),
        (status = 422, description = "Name, email, or password fails validation")
    ),
    tag = "auth"
)]
pub async fn register(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let request: RegisterRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email)
        || request.name.len() > MAX_NAME_LEN
        || request.password.len() < MIN_PASSWORD_LEN
    {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    let password_hash = match hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            audit::failure(
                "password hashing",
                "failed to hash the password during registration",
                &err,
                json!({ "route": "/v1/auth/register" }),
                None,
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let user_id = match insert_user(&pool, &request.name, &email, &password_hash).await {
        Ok(SignupOutcome::Created(id)) => id,
        Ok(SignupOutcome::EmailTaken) => return StatusCode::CONFLICT.into_response(),
        Err(err) => {
            audit::failure(
                "user creation",
                "failed to insert the user",
                &err,
                json!({ "route": "/v1/auth/register" }),
                None,
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let config = auth_state.config();
    match issue_token(&pool, user_id, TokenPurpose::VerifyEmail, None, config).await {
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
                Some(user_id),
            );
        }
        // A brand new account has no pending token; nothing to send if the
        // store says otherwise.
        Ok(IssueOutcome::Throttled) => {}
        Err(err) => {
            audit::failure(
                "verification token storage",
                "failed to store the verification token",
                &err,
                json!({ "route": "/v1/auth/register" }),
                Some(user_id),
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    StatusCode::CREATED.into_response()
}
