//! API key authentication extractor.
//!
//! Extracts and verifies API keys from:
//! - `Authorization: Bearer <key>` header
//! - `X-API-Key: <key>` header
//!
//! Keys are checked against the hashes in the `api_keys` table.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::http::error::AppError;
use crate::state::AppState;

/// Authenticated request marker. Extracting this validates the API key.
pub struct Authenticated;

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let api_key = extract_api_key(parts)?;

        let valid = state
            .api_keys
            .verify(&api_key)
            .await
            .map_err(|e| AppError::Internal(format!("Database error: {e}")))?;

        if valid {
            Ok(Authenticated)
        } else {
            Err(AppError::Unauthorized(
                "Invalid API key. Provide a valid key via 'Authorization: Bearer <key>' or 'X-API-Key: <key>' header.".to_string(),
            ))
        }
    }
}

/// Extract the API key from request headers.
fn extract_api_key(parts: &Parts) -> Result<String, AppError> {
    if let Some(auth) = parts.headers.get("authorization") {
        let auth_str = auth.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid Authorization header encoding".to_string())
        })?;
        if let Some(key) = auth_str.strip_prefix("Bearer ") {
            return Ok(key.trim().to_string());
        }
    }

    if let Some(key) = parts.headers.get("x-api-key") {
        let key_str = key.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid X-API-Key header encoding".to_string())
        })?;
        return Ok(key_str.trim().to_string());
    }

    Err(AppError::Unauthorized(
        "Missing API key. Provide via 'Authorization: Bearer <key>' or 'X-API-Key: <key>' header.".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assayer_types::config::OrchestratorConfig;
    use axum::http::Request;
    use tempfile::TempDir;

    fn parts(header: Option<(&str, &str)>) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/jobs");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn requests_need_a_known_key() {
        let dir = TempDir::new().unwrap();
        let state = AppState::init(dir.path().to_path_buf(), OrchestratorConfig::default())
            .await
            .unwrap();
        let key = state.api_keys.ensure_key().await.unwrap().unwrap();

        let missing = Authenticated::from_request_parts(&mut parts(None), &state).await;
        assert!(matches!(missing, Err(AppError::Unauthorized(_))));

        let wrong = Authenticated::from_request_parts(
            &mut parts(Some(("x-api-key", "assay_not-a-key"))),
            &state,
        )
        .await;
        assert!(matches!(wrong, Err(AppError::Unauthorized(_))));

        let bearer = format!("Bearer {key}");
        assert!(
            Authenticated::from_request_parts(&mut parts(Some(("authorization", &bearer))), &state)
                .await
                .is_ok()
        );
        assert!(
            Authenticated::from_request_parts(&mut parts(Some(("x-api-key", &key))), &state)
                .await
                .is_ok()
        );
    }
}
