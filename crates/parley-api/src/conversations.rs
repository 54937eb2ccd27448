use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use parley_types::api::{
    Claims, ConversationDetail, ConversationPreview, CreateConversationRequest, MarkReadRequest,
};
use parley_types::models::{Conversation, UserSummary};

use crate::error::{ApiResult, run_blocking};
use crate::AppState;

/// Every conversation the caller actively participates in, with the most
/// recent non-deleted message attached as a preview.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ConversationPreview>>> {
    let db = state.clone();
    let previews = run_blocking(move || db.db.conversations_for_user(claims.sub)).await?;
    Ok(Json(previews))
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let db = state.clone();
    let conversation: Conversation = run_blocking(move || {
        db.db.create_conversation(
            claims.sub,
            &req.participant_ids,
            req.kind,
            req.title.as_deref(),
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<ConversationDetail>> {
    let db = state.clone();
    let detail = run_blocking(move || {
        db.db
            .conversation_with_participants(conversation_id, claims.sub)
    })
    .await?;
    Ok(Json(detail))
}

/// Everyone sharing at least one conversation with the caller, deduplicated.
pub async fn list_partners(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<UserSummary>>> {
    let db = state.clone();
    let partners = run_blocking(move || db.db.conversation_partners(claims.sub)).await?;
    Ok(Json(partners))
}

pub async fn leave_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    let db = state.clone();
    run_blocking(move || db.db.leave_conversation(conversation_id, claims.sub)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> ApiResult<StatusCode> {
    let at = req.at.unwrap_or_else(Utc::now);
    let db = state.clone();
    run_blocking(move || db.db.mark_read(conversation_id, claims.sub, at)).await?;
    Ok(StatusCode::NO_CONTENT)
}
