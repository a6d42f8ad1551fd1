//! Authenticated self-service profile endpoints.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::audit;

use super::session::authenticate;
use super::state::AuthState;
use super::storage::{fetch_profile, update_name};
use super::types::{ProfileResponse, ProfileUser, UpdateProfileRequest};
use super::utils::MAX_NAME_LEN;

/// Return the authenticated account's profile.
#[utoipa::path(
    get,
    path = "/v1/profile",
    responses(
        (status = 200, description = "The authenticated profile", body = ProfileResponse),
        (status = 401, description = "Missing or invalid session")
    ),
    tag = "profile"
)]
pub async fn get_profile(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let user_id = match authenticate(&headers, &pool, auth_state.config()).await {
        Ok(user_id) => user_id,
        Err(status) => return status.into_response(),
    };

    match fetch_profile(&pool, user_id).await {
        Ok(Some(profile)) => {
            let response = ProfileResponse {
                user: ProfileUser {
                    id: profile.id.to_string(),
                    name: profile.name,
                    email: profile.email,
                    email_verified: profile.email_verified,
                },
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            audit::failure(
                "profile fetch",
                "failed to fetch the profile",
                &err,
                json!({ "route": "/v1/profile" }),
                Some(user_id),
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Update the display name.
#[utoipa::path(
    patch,
    path = "/v1/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 204, description = "Profile updated"),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Missing or invalid session"),
        (status = 422, description = "Name fails validation")
    ),
    tag = "profile"
)]
pub async fn update_profile(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<UpdateProfileRequest>>,
) -> impl IntoResponse {
    let user_id = match authenticate(&headers, &pool, auth_state.config()).await {
        Ok(user_id) => user_id,
        Err(status) => return status.into_response(),
    };

    let request: UpdateProfileRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if request.name.len() > MAX_NAME_LEN {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    match update_name(&pool, user_id, &request.name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            audit::failure(
                "profile update",
                "failed to update the profile",
                &err,
                json!({ "route": "/v1/profile" }),
                Some(user_id),
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::state::{AuthConfig, AuthState};
    use super::{get_profile, update_profile};
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
    async fn get_profile_requires_session() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = get_profile(HeaderMap::new(), Extension(pool), Extension(auth_state()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn update_profile_requires_session() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = update_profile(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(super::UpdateProfileRequest {
                name: "Ada".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
