use std::sync::Arc;

use anyhow::anyhow;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use murmur_gateway::{ChatService, run_blocking};
use murmur_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub service: ChatService,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    let username_len = username.chars().count();
    if !(3..=32).contains(&username_len) || username.chars().any(char::is_whitespace) {
        return Err(ApiError::invalid("username must be 3-32 characters without spaces"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::invalid("password must be at least 8 characters"));
    }

    let display_name = req
        .display_name
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| username.clone());
    let avatar_url = req.avatar_url.filter(|u| !u.trim().is_empty());
    let user_id = Uuid::new_v4();

    // Argon2 is deliberately slow, keep it off the async threads
    let name = username.clone();
    let created = run_blocking(state.service.db(), move |db| {
        if db.get_user_by_username(&name)?.is_some() {
            return Ok(false);
        }
        let password_hash = hash_password(&req.password)?;
        // A concurrent registration may have taken the name while we hashed
        db.create_user(user_id, &name, &display_name, avatar_url.as_deref(), &password_hash)
    })
    .await?;

    if !created {
        return Err(ApiError::UsernameTaken);
    }

    info!("Registered {} ({})", username, user_id);
    let token = create_token(&state.jwt_secret, user_id, &username, state.token_ttl)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = run_blocking(state.service.db(), move |db| {
        let Some(row) = db.get_user_by_username(&req.username)? else {
            return Ok(None);
        };
        let parsed_hash = PasswordHash::new(&row.password)
            .map_err(|e| anyhow!("corrupt password hash for {}: {}", row.user.id, e))?;
        let verified = Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .is_ok();
        Ok(verified.then_some(row.user))
    })
    .await?
    .ok_or(ApiError::BadCredentials)?;

    let token = create_token(&state.jwt_secret, user.id, &user.username, state.token_ttl)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow!("password hashing failed: {}", e))
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str, ttl: chrono::Duration) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token encoding failed: {}", e)))
}
