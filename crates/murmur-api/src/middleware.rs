use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode};

use murmur_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// Extract and validate the JWT from the Authorization header, then hand
/// the claims to the handler as an extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers()).ok_or_else(ApiError::unauthenticated)?;
    let claims = decode_token(&state.jwt_secret, &token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|Authorization(bearer)| bearer.token().to_string())
}

/// Expired, malformed, or wrongly signed tokens all read as unauthenticated.
pub fn decode_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::unauthenticated())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{Extension, Router, body::Body, http::StatusCode, routing::get};
    use murmur_db::Database;
    use murmur_gateway::{ChatService, Registry};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::auth::{AppStateInner, create_token};

    fn state() -> AppState {
        let db = Arc::new(Database::open_in_memory().unwrap());
        Arc::new(AppStateInner {
            service: ChatService::new(db, Registry::new()),
            jwt_secret: "test-secret".into(),
            token_ttl: chrono::Duration::hours(1),
        })
    }

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/me", get(|Extension(claims): Extension<Claims>| async move { claims.username }))
            .layer(axum::middleware::from_fn_with_state(state, require_auth))
    }

    async fn call(app: Router, auth: Option<String>) -> StatusCode {
        let mut req = axum::http::Request::builder().uri("/me");
        if let Some(auth) = auth {
            req = req.header("authorization", auth);
        }
        app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap().status()
    }

    #[tokio::test]
    async fn valid_token_passes() {
        let state = state();
        let token = create_token(&state.jwt_secret, Uuid::new_v4(), "alice", chrono::Duration::hours(1)).unwrap();
        assert_eq!(call(app(state), Some(format!("Bearer {}", token))).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_or_bad_tokens_are_401() {
        let state = state();
        let foreign = create_token("other-secret", Uuid::new_v4(), "alice", chrono::Duration::hours(1)).unwrap();
        let expired = create_token(&state.jwt_secret, Uuid::new_v4(), "alice", chrono::Duration::hours(-2)).unwrap();

        assert_eq!(call(app(state.clone()), None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(call(app(state.clone()), Some("Bearer garbage".into())).await, StatusCode::UNAUTHORIZED);
        assert_eq!(call(app(state.clone()), Some(format!("Bearer {}", foreign))).await, StatusCode::UNAUTHORIZED);
        assert_eq!(call(app(state.clone()), Some(format!("Bearer {}", expired))).await, StatusCode::UNAUTHORIZED);
        assert_eq!(call(app(state), Some(format!("Basic {}", expired))).await, StatusCode::UNAUTHORIZED);
    }
}
