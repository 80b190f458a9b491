//! Chat message entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Content replacing the text of a soft-deleted message.
pub const DELETED_CONTENT: &str = "This message was deleted";

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[sea_orm(string_value = "text")]
    Text,
    #[sea_orm(string_value = "image")]
    Image,
    #[sea_orm(string_value = "offer")]
    Offer,
    #[sea_orm(string_value = "counter_offer")]
    CounterOffer,
    #[sea_orm(string_value = "offer_accepted")]
    OfferAccepted,
    #[sea_orm(string_value = "offer_rejected")]
    OfferRejected,
}

impl MessageType {
    /// OFFER or COUNTER_OFFER.
    #[must_use]
    pub const fn is_offer(&self) -> bool {
        matches!(self, Self::Offer | Self::CounterOffer)
    }

    /// OFFER_ACCEPTED or OFFER_REJECTED.
    #[must_use]
    pub const fn is_offer_response(&self) -> bool {
        matches!(self, Self::OfferAccepted | Self::OfferRejected)
    }

    /// TEXT and IMAGE carry their payload in `content`.
    #[must_use]
    pub const fn requires_content(&self) -> bool {
        matches!(self, Self::Text | Self::Image)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chat_message")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub chat_id: String,

    #[sea_orm(indexed)]
    pub sender_id: String,

    pub message_type: MessageType,

    /// Text body or image URL; replaced by [`DELETED_CONTENT`] on delete
    #[sea_orm(column_type = "Text", nullable)]
    pub content: Option<String>,

    /// Offered price in minor currency units (offers and their responses)
    #[sea_orm(nullable)]
    pub offer_amount: Option<i64>,

    /// Offer this message answers (accept/reject responses only)
    #[sea_orm(nullable, indexed)]
    pub offer_id: Option<String>,

    #[sea_orm(nullable)]
    pub offer_expires_at: Option<DateTimeWithTimeZone>,

    /// Free-form notes attached to an offer or a response
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,

    #[sea_orm(nullable)]
    pub reply_to_id: Option<String>,

    /// Has the recipient read this message?
    #[sea_orm(default_value = false)]
    pub is_read: bool,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub edited_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Whether the message has been soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::chat::Entity",
        from = "Column::ChatId",
        to = "super::chat::Column::Id"
    )]
    Chat,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::SenderId",
        to = "super::user::Column::Id"
    )]
    Sender,
}

impl Related<super::chat::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chat.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sender.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_groups() {
        assert!(MessageType::Offer.is_offer());
        assert!(MessageType::CounterOffer.is_offer());
        assert!(!MessageType::OfferAccepted.is_offer());
        assert!(MessageType::OfferRejected.is_offer_response());
        assert!(MessageType::Image.requires_content());
        assert!(!MessageType::Offer.requires_content());
    }

    #[test]
    fn test_message_type_wire_names() {
        let json = serde_json::to_string(&MessageType::CounterOffer).unwrap_or_default();
        assert_eq!(json, "\"COUNTER_OFFER\"");
        let parsed: MessageType =
            serde_json::from_str("\"OFFER_ACCEPTED\"").unwrap_or(MessageType::Text);
        assert_eq!(parsed, MessageType::OfferAccepted);
    }
}
