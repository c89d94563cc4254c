use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use murmur_gateway::ChatError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Username already taken")]
    UsernameTaken,

    #[error("Invalid username or password")]
    BadCredentials,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthenticated() -> Self {
        ApiError::Chat(ChatError::Unauthenticated)
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        ApiError::Chat(ChatError::Invalid(reason.into()))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Chat(ChatError::Unauthenticated) | ApiError::BadCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Chat(ChatError::NotAParticipant) => StatusCode::FORBIDDEN,
            ApiError::Chat(ChatError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Chat(ChatError::Invalid(_)) => StatusCode::BAD_REQUEST,
            ApiError::Chat(ChatError::Transient(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::UsernameTaken => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Storage failures outside the core service are as retryable as inside it.
impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Chat(ChatError::Transient(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Chat(ChatError::Transient(e)) => {
                error!("Storage failure: {:#}", e);
                "Service temporarily unavailable".to_string()
            }
            ApiError::Internal(e) => {
                error!("Internal error: {}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_http_status() {
        assert_eq!(ApiError::unauthenticated().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::from(ChatError::NotAParticipant).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::from(ChatError::NotFound("message")).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::invalid("empty").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(anyhow::anyhow!("disk I/O error")).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::UsernameTaken.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn transient_body_hides_cause() {
        let response = ApiError::from(anyhow::anyhow!("database is locked")).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Service temporarily unavailable");
    }
}
