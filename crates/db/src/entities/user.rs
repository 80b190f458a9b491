//! User entity.
//!
//! Owned by the marketplace account system; the chat engine only reads it.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Marketplace role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[sea_orm(string_value = "buyer")]
    Buyer,
    #[sea_orm(string_value = "vendor")]
    Vendor,
    #[sea_orm(string_value = "admin")]
    Admin,
}

impl Default for UserRole {
    fn default() -> Self {
        Self::Buyer
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(unique)]
    pub username: String,

    /// Display name
    #[sea_orm(nullable)]
    pub display_name: Option<String>,

    /// Avatar URL
    #[sea_orm(nullable)]
    pub avatar_url: Option<String>,

    pub role: UserRole,

    /// Has the marketplace verified this account?
    #[sea_orm(default_value = false)]
    pub is_verified: bool,

    /// API access token
    #[sea_orm(unique, nullable)]
    #[serde(skip_serializing)]
    pub token: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
