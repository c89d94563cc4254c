use axum::{
    Extension, Json,
    extract::{Query, State},
};

use murmur_types::api::{Claims, UserSearchQuery};
use murmur_types::models::User;

use crate::auth::AppState;
use crate::error::ApiError;

/// Find people to start a conversation with. Never lists the caller.
pub async fn search_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<UserSearchQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    let search = query.search.filter(|s| !s.trim().is_empty());
    let users = state.service.search_users(claims.sub, search).await?;
    Ok(Json(users))
}
