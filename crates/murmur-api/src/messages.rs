use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use murmur_gateway::service::NewMessage;
use murmur_types::api::{Claims, MessageQuery, MessageResponse, SendMessageRequest, StatusChangeResponse};
use murmur_types::models::{MessageKind, MessageStatus};

use crate::auth::AppState;
use crate::error::ApiError;

/// Pull path. Returns one page, oldest first, with each message's status as
/// it was before this call; received messages still SENT become DELIVERED.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let page = state
        .service
        .pull_messages(claims.sub, conversation_id, query.limit, query.before)
        .await?;
    Ok(Json(page))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = NewMessage {
        kind: req.kind.unwrap_or(MessageKind::Text),
        text: req.text,
        file_url: req.file_url,
    };
    let created = state
        .service
        .send_message(claims.sub, conversation_id, new)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new(&created.message, MessageStatus::Sent)),
    ))
}

pub async fn mark_delivered(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<StatusChangeResponse>, ApiError> {
    Ok(Json(state.service.mark_delivered(claims.sub, message_id).await?))
}

pub async fn mark_seen(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<StatusChangeResponse>, ApiError> {
    Ok(Json(state.service.mark_seen(claims.sub, message_id).await?))
}
