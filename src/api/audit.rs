//! Audit sink for internal failures.
//!
//! Every unrecoverable failure is reported here with the operation name, a
//! human message, the underlying error text, a structured context map, and
//! the acting account id. The sink is a structured `tracing` event; callers
//! never see any of this detail.

use serde_json::Value;
use uuid::Uuid;

/// Record an internal failure. `user_id` is `None` for unauthenticated
/// callers. Context must not contain raw credentials or tokens.
pub(crate) fn failure(
    name: &str,
    message: &str,
    err: &anyhow::Error,
    context: Value,
    user_id: Option<Uuid>,
) {
    let user_id = user_id.map_or_else(|| "0".to_string(), |id| id.to_string());
    tracing::error!(
        target: "audit",
        operation = name,
        error = %err,
        context = %context,
        user_id = %user_id,
        "{message}",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_accepts_anonymous_and_known_callers() {
        let err = anyhow::anyhow!("boom");
        failure("test", "failed in test", &err, json!({"route": "/"}), None);
        failure(
            "test",
            "failed in test",
            &err,
            json!({"route": "/"}),
            Some(Uuid::nil()),
        );
    }
}
