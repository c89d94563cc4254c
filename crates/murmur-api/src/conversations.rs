use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use murmur_types::api::{
    Claims, ConversationResponse, ConversationSeenResponse, ConversationSummary,
    CreateConversationRequest,
};

use crate::auth::AppState;
use crate::error::ApiError;

/// 201 with a new conversation, 200 with the existing one for the pair.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (conversation, peer, created) = state
        .service
        .create_conversation(claims.sub, req.participant_id)
        .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(ConversationResponse {
            id: conversation.id,
            participants: conversation.participants,
            peer,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            created,
        }),
    ))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    Ok(Json(state.service.list_conversations(claims.sub).await?))
}

/// Opening a conversation: everything the peer sent so far becomes SEEN.
pub async fn mark_conversation_seen(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ConversationSeenResponse>, ApiError> {
    let updated = state
        .service
        .mark_conversation_seen(claims.sub, conversation_id)
        .await?;

    Ok(Json(ConversationSeenResponse {
        conversation_id,
        updated,
    }))
}
