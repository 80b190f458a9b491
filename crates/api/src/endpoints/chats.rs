//! Chat endpoints.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, patch},
};
use haggle_common::AppResult;
use haggle_core::{ChatDetails, ChatPage, ChatView, CreateChatInput, MessageView};
use haggle_db::entities::chat::ChatStatus;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Create chats router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_chats).post(create_chat))
        .route("/unread/count", get(get_unread_count))
        .route("/{chat_id}", get(get_chat))
        .route("/{chat_id}/status", patch(set_status))
}

/// Open chat request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub listing_id: Option<String>,
    #[validate(length(min = 1))]
    pub vendor_id: String,
    #[validate(length(max = 5000))]
    pub initial_message: Option<String>,
}

/// Open chat response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatResponse {
    pub chat: ChatView,
    pub is_new: bool,
    pub initial_message: Option<MessageView>,
}

/// Open a chat with a vendor, or return the existing one.
async fn create_chat(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateChatRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;

    info!(
        buyer = %user.id,
        vendor = %req.vendor_id,
        listing = ?req.listing_id,
        "Opening chat"
    );

    let creation = state
        .chat_service
        .create_or_get_chat(CreateChatInput {
            listing_id: req.listing_id,
            buyer_id: user.id,
            vendor_id: req.vendor_id,
            initial_message: req.initial_message,
        })
        .await?;

    let response = CreateChatResponse {
        chat: creation.chat.into(),
        is_new: creation.is_new,
        initial_message: creation.initial_message,
    };

    Ok(if response.is_new {
        ApiResponse::created(response)
    } else {
        ApiResponse::ok(response)
    })
}

/// List chats query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChatsQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    pub limit: Option<u64>,
    pub status: Option<ChatStatus>,
}

const fn default_page() -> u64 {
    1
}

/// List the caller's chats, most recently active first.
async fn list_chats(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListChatsQuery>,
) -> AppResult<ApiResponse<ChatPage>> {
    let limit = state.chat_config.page_size(query.limit);

    let page = state
        .chat_service
        .list_chats_for_user(&user.id, query.page, limit, query.status)
        .await?;

    Ok(ApiResponse::ok(page))
}

/// Unread count response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub count: u64,
}

/// Unread messages across every chat of the caller.
async fn get_unread_count(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<UnreadCountResponse>> {
    let count = state.chat_service.unread_total(&user.id).await?;

    Ok(ApiResponse::ok(UnreadCountResponse { count }))
}

async fn get_chat(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> AppResult<ApiResponse<ChatDetails>> {
    let details = state.chat_service.get_chat(&chat_id, &user.id).await?;

    Ok(ApiResponse::ok(details))
}

/// Status change request.
#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: ChatStatus,
}

/// Archive, block or reactivate a chat.
async fn set_status(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(req): Json<SetStatusRequest>,
) -> AppResult<ApiResponse<ChatView>> {
    let chat = state
        .chat_service
        .set_chat_status(&chat_id, &user.id, req.status)
        .await?;

    Ok(ApiResponse::ok(chat.into()))
}
