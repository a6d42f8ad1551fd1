//! Request/response types for the account endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ResetPasswordRequest {
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ChangePasswordRequest {
    pub password: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct EmailChangeRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub name: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ProfileUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ProfileResponse {
    pub user: ProfileUser,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn register_request_round_trips() -> Result<()> {
        let request = RegisterRequest {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password: "password1".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let email = value
            .get("email")
            .and_then(serde_json::Value::as_str)
            .context("missing email")?;
        assert_eq!(email, "ada@example.com");
        let decoded: RegisterRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.name, "Ada");
        Ok(())
    }

    #[test]
    fn register_request_rejects_unknown_fields() {
        let result: std::result::Result<RegisterRequest, _> = serde_json::from_value(
            serde_json::json!({"name": "Ada", "email": "a@b.co", "password": "pw", "extra": 1}),
        );
        assert!(result.is_err());
    }

    #[test]
    fn change_password_request_needs_both_fields() {
        let result: std::result::Result<ChangePasswordRequest, _> =
            serde_json::from_value(serde_json::json!({"password": "old"}));
        assert!(result.is_err());
    }

    #[test]
    fn profile_response_wraps_user() -> Result<()> {
        let response = ProfileResponse {
            user: ProfileUser {
                id: "0".to_string(),
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                email_verified: true,
            },
        };
        let value = serde_json::to_value(&response)?;
        let name = value
            .pointer("/user/name")
            .and_then(serde_json::Value::as_str)
            .context("missing user.name")?;
        assert_eq!(name, "Ada");
        Ok(())
    }
}
