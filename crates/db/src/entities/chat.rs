//! Chat entity: one buyer/vendor negotiation thread.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatStatus {
    /// Open for messaging.
    #[sea_orm(string_value = "active")]
    Active,
    /// Soft-closed; the next message reactivates it.
    #[sea_orm(string_value = "archived")]
    Archived,
    /// Closed for messaging until a participant or admin unblocks it.
    #[sea_orm(string_value = "blocked")]
    Blocked,
}

impl Default for ChatStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl ChatStatus {
    /// Whether new messages are accepted in this status.
    #[must_use]
    pub const fn accepts_messages(&self) -> bool {
        !matches!(self, Self::Blocked)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chat")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub buyer_id: String,

    #[sea_orm(indexed)]
    pub vendor_id: String,

    /// Listing the chat is about; `None` for vendor-profile chats
    #[sea_orm(nullable, indexed)]
    pub listing_id: Option<String>,

    pub status: ChatStatus,

    pub created_at: DateTimeWithTimeZone,

    /// Bumped on every new message and status change
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Whether the user is the buyer or the vendor of this chat.
    #[must_use]
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.vendor_id == user_id
    }

    /// The participant who is not `user_id`.
    ///
    /// Returns `None` when `user_id` is not a participant.
    #[must_use]
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        if self.buyer_id == user_id {
            Some(&self.vendor_id)
        } else if self.vendor_id == user_id {
            Some(&self.buyer_id)
        } else {
            None
        }
    }

    /// Both participant ids, buyer first.
    #[must_use]
    pub fn participants(&self) -> [&str; 2] {
        [&self.buyer_id, &self.vendor_id]
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::BuyerId",
        to = "super::user::Column::Id"
    )]
    Buyer,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::VendorId",
        to = "super::user::Column::Id"
    )]
    Vendor,

    #[sea_orm(
        belongs_to = "super::listing::Entity",
        from = "Column::ListingId",
        to = "super::listing::Column::Id"
    )]
    Listing,

    #[sea_orm(has_many = "super::chat_message::Entity")]
    Messages,
}

impl Related<super::listing::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Listing.def()
    }
}

impl Related<super::chat_message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Messages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
