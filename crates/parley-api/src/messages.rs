use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use parley_types::api::{Claims, CreateMessageRequest, MessagePageQuery, SetStatusRequest};
use parley_types::models::{MessageDetail, Page};

use crate::error::{ApiResult, run_blocking};
use crate::AppState;

/// Paginated history, newest first. Membership is enforced in the store;
/// a non-participant gets Forbidden regardless of what the page asks for.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Query(query): Query<MessagePageQuery>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Page<MessageDetail>>> {
    let db = state.clone();
    let page = run_blocking(move || {
        db.db
            .list_messages(conversation_id, claims.sub, query.page, query.page_size)
    })
    .await?;
    Ok(Json(page))
}

/// Durable write path. Realtime delivery is a separate, client-driven relay
/// command; creating a message does not push anything by itself.
pub async fn create_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let db = state.clone();
    let detail = run_blocking(move || {
        db.db
            .create_message(conversation_id, claims.sub, &req.content, &req.kind)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// The caller's own message history, oldest first.
pub async fn my_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<MessageDetail>>> {
    let db = state.clone();
    let messages = run_blocking(move || db.db.list_messages_by_sender(claims.sub)).await?;
    Ok(Json(messages))
}

pub async fn set_status(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetStatusRequest>,
) -> ApiResult<StatusCode> {
    let db = state.clone();
    run_blocking(move || {
        db.db
            .set_message_status(message_id, claims.sub, req.status, Utc::now())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
