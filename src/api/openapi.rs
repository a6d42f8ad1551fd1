//! OpenAPI document for the documented routes.
//!
//! Keep this list in sync with the router in `api::serve`; routes added there
//! without an entry here are intentionally undocumented (like `/`).

use utoipa::OpenApi;

use super::handlers::{auth, health};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::register::register,
        auth::login::login,
        auth::session::check,
        auth::session::logout,
        auth::password::forgot_password,
        auth::password::reset_password,
        auth::password::change_password,
        auth::verification::verify_email,
        auth::verification::resend_verification,
        auth::profile::get_profile,
        auth::profile::update_profile,
        auth::email_change::request_email_change,
        auth::email_change::confirm_email_change,
    ),
    components(schemas(
        health::Health,
        auth::types::RegisterRequest,
        auth::types::LoginRequest,
        auth::types::LoginResponse,
        auth::types::ForgotPasswordRequest,
        auth::types::ResetPasswordRequest,
        auth::types::ChangePasswordRequest,
        auth::types::ResendVerificationRequest,
        auth::types::EmailChangeRequest,
        auth::types::UpdateProfileRequest,
        auth::types::ProfileUser,
        auth::types::ProfileResponse,
    )),
    tags(
        (name = "auth", description = "Registration, login, sessions, and one-time tokens"),
        (name = "profile", description = "Authenticated self-service"),
        (name = "health", description = "Liveness and build info")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::ApiDoc;
    use utoipa::OpenApi;

    #[test]
    fn document_lists_the_core_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/v1/auth/register"));
        assert!(doc.paths.paths.contains_key("/v1/auth/login"));
        assert!(doc.paths.paths.contains_key("/v1/auth/forgot"));
        assert!(doc.paths.paths.contains_key("/v1/profile/email/{token}"));
    }
}
