//! Negotiation engine.
//!
//! Offers are ordinary OFFER/COUNTER_OFFER messages; their state is derived
//! from the messages that follow them. Resolution is serialized per chat so
//! the first accept/reject wins.

use chrono::{DateTime, Duration, Utc};
use haggle_common::{AppError, AppResult};
use haggle_db::{
    entities::{chat, chat_message, chat_message::MessageType},
    repositories::ChatMessageRepository,
};
use serde::{Deserialize, Serialize};

use crate::services::locks::KeyedLocks;
use crate::services::message::{MessageDraft, MessageService, MessageView};
use crate::services::transaction::AcceptedOffer;

/// Longest lifetime an offer may be given.
pub const MAX_OFFER_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// How the recipient answers an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferDecision {
    Accept,
    Reject,
}

impl OfferDecision {
    const fn message_type(self) -> MessageType {
        match self {
            Self::Accept => MessageType::OfferAccepted,
            Self::Reject => MessageType::OfferRejected,
        }
    }
}

/// Follow-up the caller must perform after a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionRequired {
    CreateTransaction,
}

/// Derived state of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferState {
    Pending,
    Accepted,
    Rejected,
    Superseded,
    Expired,
}

/// Input for making an offer.
#[derive(Debug, Clone)]
pub struct MakeOfferInput {
    pub amount: i64,
    /// OFFER or COUNTER_OFFER
    pub kind: MessageType,
    pub notes: Option<String>,
    pub expires_in: Option<Duration>,
}

/// Outcome of a response to an offer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferResolution {
    pub response_message: MessageView,
    pub original_offer: MessageView,
    pub action_required: Option<ActionRequired>,
    /// Present when a transaction must be created.
    #[serde(skip)]
    pub accepted: Option<AcceptedOffer>,
}

/// An offer with its derived state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferView {
    pub offer: MessageView,
    pub state: OfferState,
    /// The accept/reject message, once resolved.
    pub response_id: Option<String>,
    /// The newer offer that replaced this one.
    pub superseded_by: Option<String>,
}

/// Negotiation service.
#[derive(Clone)]
pub struct NegotiationService {
    messages: MessageService,
    message_repo: ChatMessageRepository,
    locks: KeyedLocks,
}

impl NegotiationService {
    /// Create a new negotiation service.
    #[must_use]
    pub fn new(messages: MessageService, message_repo: ChatMessageRepository) -> Self {
        Self {
            locks: messages.offer_locks().clone(),
            messages,
            message_repo,
        }
    }

    /// Post an offer or counter-offer.
    pub async fn make_offer(
        &self,
        chat_id: &str,
        sender_id: &str,
        input: MakeOfferInput,
    ) -> AppResult<MessageView> {
        if !input.kind.is_offer() {
            return Err(AppError::Validation(
                "Offer kind must be OFFER or COUNTER_OFFER".to_string(),
            ));
        }
        if input.amount <= 0 {
            return Err(AppError::Validation(
                "Offer amount must be greater than zero".to_string(),
            ));
        }

        let offer_expires_at = input.expires_in.map(offer_deadline).transpose()?;

        let draft = MessageDraft {
            message_type: input.kind,
            content: None,
            offer_amount: Some(input.amount),
            offer_id: None,
            offer_expires_at,
            notes: input.notes,
            reply_to_id: None,
        };

        // Held so a concurrent response never misses a superseding offer
        let _guard = self.locks.lock(chat_id).await;
        self.messages.dispatch(chat_id, sender_id, draft).await
    }

    /// Accept or reject an offer.
    ///
    /// Check order: participant, offer exists in the chat, not already
    /// resolved, responder is not the offerer, offer still answerable.
    pub async fn respond_to_offer(
        &self,
        chat_id: &str,
        offer_id: &str,
        responder_id: &str,
        decision: OfferDecision,
        notes: Option<String>,
    ) -> AppResult<OfferResolution> {
        let _guard = self.locks.lock(chat_id).await;

        let chat = self
            .messages
            .chat_for_participant(chat_id, responder_id)
            .await?;
        let offer = self.find_offer(&chat, offer_id).await?;

        if let Some(response) = self.message_repo.find_terminal_response(&offer.id).await? {
            return Err(AppError::OfferAlreadyResolved(format!(
                "Offer {} was already answered by {}",
                offer.id, response.id
            )));
        }

        if offer.sender_id == responder_id {
            return Err(AppError::Forbidden(
                "Cannot respond to your own offer".to_string(),
            ));
        }

        if offer.is_deleted() {
            return Err(AppError::BusinessLogic(
                "Offer was withdrawn".to_string(),
            ));
        }
        if is_expired(&offer) {
            return Err(AppError::BusinessLogic("Offer has expired".to_string()));
        }
        if self.message_repo.find_offer_after(&offer).await?.is_some() {
            return Err(AppError::BusinessLogic(
                "Offer was superseded by a newer offer".to_string(),
            ));
        }

        let draft = MessageDraft {
            message_type: decision.message_type(),
            content: None,
            offer_amount: offer.offer_amount,
            offer_id: Some(offer.id.clone()),
            offer_expires_at: None,
            notes,
            reply_to_id: Some(offer.id.clone()),
        };
        let response_message = self
            .messages
            .dispatch(&chat.id, responder_id, draft)
            .await?;

        tracing::info!(
            chat_id = %chat.id,
            offer_id = %offer.id,
            responder_id = %responder_id,
            decision = ?decision,
            "Offer resolved"
        );

        let (action_required, accepted) = match decision {
            OfferDecision::Accept => (
                Some(ActionRequired::CreateTransaction),
                Some(AcceptedOffer {
                    chat_id: chat.id.clone(),
                    offer_id: offer.id.clone(),
                    amount: offer.offer_amount.unwrap_or_default(),
                    buyer_id: chat.buyer_id.clone(),
                    vendor_id: chat.vendor_id.clone(),
                }),
            ),
            OfferDecision::Reject => (None, None),
        };

        let original_offer = self
            .messages
            .with_senders(vec![offer])
            .await?
            .pop()
            .ok_or_else(|| AppError::Internal("Offer view missing".to_string()))?;

        Ok(OfferResolution {
            response_message,
            original_offer,
            action_required,
            accepted,
        })
    }

    /// Current derived state of an offer.
    pub async fn offer_state(
        &self,
        chat_id: &str,
        offer_id: &str,
        user_id: &str,
    ) -> AppResult<OfferView> {
        let chat = self
            .messages
            .chat_for_participant(chat_id, user_id)
            .await?;
        let offer = self.find_offer(&chat, offer_id).await?;

        let response = self.message_repo.find_terminal_response(&offer.id).await?;
        let newer = self.message_repo.find_offer_after(&offer).await?;

        let state = match (&response, &newer) {
            (Some(response), _) if response.message_type == MessageType::OfferAccepted => {
                OfferState::Accepted
            }
            (Some(_), _) => OfferState::Rejected,
            (None, _) if is_expired(&offer) => OfferState::Expired,
            (None, Some(_)) => OfferState::Superseded,
            (None, None) => OfferState::Pending,
        };

        let offer = self
            .messages
            .with_senders(vec![offer])
            .await?
            .pop()
            .ok_or_else(|| AppError::Internal("Offer view missing".to_string()))?;

        Ok(OfferView {
            offer,
            state,
            response_id: response.map(|m| m.id),
            superseded_by: if state == OfferState::Superseded {
                newer.map(|m| m.id)
            } else {
                None
            },
        })
    }

    async fn find_offer(
        &self,
        chat: &chat::Model,
        offer_id: &str,
    ) -> AppResult<chat_message::Model> {
        self.message_repo
            .find_by_id(offer_id)
            .await?
            .filter(|message| message.chat_id == chat.id && message.message_type.is_offer())
            .ok_or_else(|| AppError::NotFound(format!("Offer not found: {offer_id}")))
    }
}

/// Absolute expiry for an offer given its lifetime.
fn offer_deadline(ttl: Duration) -> AppResult<DateTime<Utc>> {
    if ttl <= Duration::zero() {
        return Err(AppError::Validation(
            "Offer expiry must be in the future".to_string(),
        ));
    }
    if ttl > Duration::seconds(MAX_OFFER_TTL_SECS) {
        return Err(AppError::Validation(format!(
            "Offer expiry must be at most {MAX_OFFER_TTL_SECS} seconds"
        )));
    }

    Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| AppError::Validation("Offer expiry is out of range".to_string()))
}

fn is_expired(offer: &chat_message::Model) -> bool {
    offer
        .offer_expires_at
        .is_some_and(|expires_at| expires_at.with_timezone(&Utc) <= Utc::now())
}
