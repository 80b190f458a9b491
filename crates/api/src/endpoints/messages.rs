//! Message endpoints.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, patch, post},
};
use haggle_common::AppResult;
use haggle_core::{MessagePage, MessageView, SendMessageInput};
use haggle_db::entities::chat_message::MessageType;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::{
    extractors::AuthUser,
    middleware::AppState,
    response::{ApiResponse, no_content},
};

/// Routes nested under `/chats`.
pub fn chat_router() -> Router<AppState> {
    Router::new()
        .route("/{chat_id}/messages", get(get_messages).post(send_message))
        .route("/{chat_id}/read", post(mark_read))
}

/// Routes nested under `/messages`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/search", get(search_messages))
        .route("/{message_id}", patch(edit_message).delete(delete_message))
}

/// History query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub limit: Option<u64>,
    /// Return messages older than this one.
    pub before: Option<String>,
}

async fn get_messages(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<ApiResponse<MessagePage>> {
    let limit = state.chat_config.page_size(query.limit);

    let page = state
        .message_service
        .get_messages(&chat_id, &user.id, limit, query.before.as_deref())
        .await?;

    Ok(ApiResponse::ok(page))
}

/// Send message request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
    #[validate(length(max = 5000))]
    pub content: Option<String>,
    #[validate(range(min = 1))]
    pub offer_amount: Option<i64>,
    pub reply_to_id: Option<String>,
}

const fn default_message_type() -> MessageType {
    MessageType::Text
}

impl From<SendMessageRequest> for SendMessageInput {
    fn from(req: SendMessageRequest) -> Self {
        Self {
            message_type: req.message_type,
            content: req.content,
            offer_amount: req.offer_amount,
            reply_to_id: req.reply_to_id,
        }
    }
}

async fn send_message(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;

    let message = state
        .message_service
        .send(&chat_id, &user.id, req.into())
        .await?;

    Ok(ApiResponse::created(message))
}

/// Mark read request. Without ids, everything unread is acknowledged.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub message_ids: Option<Vec<String>>,
}

/// Mark as read response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub read_count: u64,
}

async fn mark_read(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    req: Option<Json<MarkReadRequest>>,
) -> AppResult<ApiResponse<MarkReadResponse>> {
    let req = req.map(|Json(req)| req).unwrap_or_default();

    let read_count = state
        .message_service
        .mark_read(&chat_id, &user.id, req.message_ids.as_deref())
        .await?;

    Ok(ApiResponse::ok(MarkReadResponse { read_count }))
}

/// Edit request.
#[derive(Debug, Deserialize, Validate)]
pub struct EditMessageRequest {
    #[validate(length(min = 1, max = 5000))]
    pub content: String,
}

async fn edit_message(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(req): Json<EditMessageRequest>,
) -> AppResult<ApiResponse<MessageView>> {
    req.validate()?;

    let message = state
        .message_service
        .edit(&message_id, &user.id, &req.content)
        .await?;

    Ok(ApiResponse::ok(message))
}

async fn delete_message(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    info!(user = %user.id, message = %message_id, "Deleting message");

    state
        .message_service
        .soft_delete(&message_id, &user.id)
        .await?;

    Ok(no_content())
}

/// Search query.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<u64>,
}

async fn search_messages(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<ApiResponse<Vec<MessageView>>> {
    let limit = state.chat_config.page_size(query.limit);

    let messages = state
        .message_service
        .search(&user.id, &query.q, limit)
        .await?;

    Ok(ApiResponse::ok(messages))
}
