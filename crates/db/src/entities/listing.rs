//! Listing entity.
//!
//! Catalog rows belong to the marketplace; chats reference them by id.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "listing")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Vendor who owns the listing
    #[sea_orm(indexed)]
    pub vendor_id: String,

    pub title: String,

    /// Asking price in minor currency units
    pub price: i64,

    #[sea_orm(nullable)]
    pub primary_image_url: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::VendorId",
        to = "super::user::Column::Id"
    )]
    Vendor,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Vendor.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
