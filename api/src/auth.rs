use axum::http::HeaderMap;

use crate::error::AppError;

/// Operator token for the nudge/outbox admin surface, from the environment.
/// Unset or empty means the gate is open (local development).
pub fn admin_token_from_env() -> Option<String> {
    std::env::var("MENTORA_ADMIN_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty())
}

/// Check the x-admin-token header against the configured operator token.
pub fn require_admin(expected: Option<&str>, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let presented = headers
        .get("x-admin-token")
        .and_then(|value| value.to_str().ok());

    if presented == Some(expected) {
        Ok(())
    } else {
        Err(AppError::Unauthorized {
            message: "x-admin-token header missing or invalid".to_string(),
        })
    }
}
