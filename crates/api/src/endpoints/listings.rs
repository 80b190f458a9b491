//! Listing hooks for the marketplace.

use axum::{
    Router,
    extract::{Path, State},
    routing::post,
};
use haggle_common::AppResult;
use serde::Serialize;
use tracing::info;

use crate::{extractors::AdminUser, middleware::AppState, response::ApiResponse};

/// Create listings router.
pub fn router() -> Router<AppState> {
    Router::new().route("/{listing_id}/archive-chats", post(archive_chats))
}

/// Archive response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveChatsResponse {
    pub archived: u64,
}

/// Archive every active chat about a removed listing.
async fn archive_chats(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
) -> AppResult<ApiResponse<ArchiveChatsResponse>> {
    info!(admin = %admin.id, listing = %listing_id, "Archiving listing chats");

    let archived = state
        .chat_service
        .archive_chats_for_listing(&listing_id)
        .await?;

    Ok(ApiResponse::ok(ArchiveChatsResponse { archived }))
}
