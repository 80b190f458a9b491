//! Offer endpoints.
//!
//! Accepting an offer asks the transaction service to open a transaction.
//! That call never undoes the acceptance: a failure is logged and the
//! response simply carries no transaction id.

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Duration;
use haggle_common::{AppError, AppResult};
use haggle_core::{MakeOfferInput, OfferDecision, OfferResolution, OfferView};
use haggle_db::entities::chat_message::MessageType;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Routes nested under `/chats`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{chat_id}/offers", post(make_offer))
        .route("/{chat_id}/offers/{message_id}", get(get_offer))
        .route("/{chat_id}/offers/{message_id}/respond", post(respond))
}

/// Make offer request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MakeOfferRequest {
    /// Amount in minor currency units.
    #[validate(range(min = 1))]
    pub amount: i64,
    #[serde(default = "default_offer_kind")]
    pub kind: MessageType,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    /// Seconds until the offer lapses.
    #[validate(range(min = 1, max = 2_592_000))]
    pub expires_in_secs: Option<i64>,
}

const fn default_offer_kind() -> MessageType {
    MessageType::Offer
}

async fn make_offer(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(req): Json<MakeOfferRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;

    let expires_in = req
        .expires_in_secs
        .map(|secs| {
            Duration::try_seconds(secs)
                .ok_or_else(|| AppError::Validation("Offer expiry is out of range".to_string()))
        })
        .transpose()?;

    let message = state
        .negotiation_service
        .make_offer(
            &chat_id,
            &user.id,
            MakeOfferInput {
                amount: req.amount,
                kind: req.kind,
                notes: req.notes,
                expires_in,
            },
        )
        .await?;

    Ok(ApiResponse::created(message))
}

async fn get_offer(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(String, String)>,
) -> AppResult<ApiResponse<OfferView>> {
    let view = state
        .negotiation_service
        .offer_state(&chat_id, &message_id, &user.id)
        .await?;

    Ok(ApiResponse::ok(view))
}

/// Respond request.
#[derive(Debug, Deserialize, Validate)]
pub struct RespondRequest {
    pub decision: OfferDecision,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

/// Respond response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondResponse {
    #[serde(flatten)]
    pub resolution: OfferResolution,
    /// Set when the transaction service opened a transaction.
    pub transaction_id: Option<String>,
}

async fn respond(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(String, String)>,
    Json(req): Json<RespondRequest>,
) -> AppResult<ApiResponse<RespondResponse>> {
    req.validate()?;

    let resolution = state
        .negotiation_service
        .respond_to_offer(&chat_id, &message_id, &user.id, req.decision, req.notes)
        .await?;

    let mut transaction_id = None;
    if let Some(accepted) = &resolution.accepted {
        match state.transaction_trigger.on_offer_accepted(accepted).await {
            Ok(id) => {
                info!(chat_id = %chat_id, transaction_id = ?id, "Transaction requested");
                transaction_id = id;
            }
            Err(e) => {
                warn!(error = %e, chat_id = %chat_id, offer_id = %accepted.offer_id, "Failed to create transaction");
            }
        }
    }

    Ok(ApiResponse::ok(RespondResponse {
        resolution,
        transaction_id,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_request_defaults() {
        let req: MakeOfferRequest = serde_json::from_str(r#"{"amount":15000}"#).unwrap();
        assert_eq!(req.kind, MessageType::Offer);
        assert!(req.expires_in_secs.is_none());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_zero_amount_is_invalid() {
        let req: MakeOfferRequest =
            serde_json::from_str(r#"{"amount":0,"kind":"COUNTER_OFFER"}"#).unwrap();
        assert_eq!(req.kind, MessageType::CounterOffer);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_oversized_expiry_is_invalid() {
        let req: MakeOfferRequest =
            serde_json::from_str(r#"{"amount":1,"expiresInSecs":1000000000000000}"#).unwrap();
        assert!(req.validate().is_err());

        let req: MakeOfferRequest =
            serde_json::from_str(r#"{"amount":1,"expiresInSecs":2592000}"#).unwrap();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_respond_request() {
        let req: RespondRequest = serde_json::from_str(r#"{"decision":"REJECT"}"#).unwrap();
        assert_eq!(req.decision, OfferDecision::Reject);
    }
}
