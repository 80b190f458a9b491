//! Create chat table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Chat::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Chat::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Chat::BuyerId).string_len(32).not_null())
                    .col(ColumnDef::new(Chat::VendorId).string_len(32).not_null())
                    .col(ColumnDef::new(Chat::ListingId).string_len(32))
                    .col(
                        ColumnDef::new(Chat::Status)
                            .string_len(16)
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(Chat::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Chat::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chat_buyer")
                            .from(Chat::Table, Chat::BuyerId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chat_vendor")
                            .from(Chat::Table, Chat::VendorId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    // A product chat keeps its listing id for life. Listings with
                    // chats are retired through archival, never deleted.
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chat_listing")
                            .from(Chat::Table, Chat::ListingId)
                            .to(Listing::Table, Listing::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_chat_buyer_id")
                    .table(Chat::Table)
                    .col(Chat::BuyerId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_chat_vendor_id")
                    .table(Chat::Table)
                    .col(Chat::VendorId)
                    .to_owned(),
            )
            .await?;

        // Composite index for the create-or-get lookup
        manager
            .create_index(
                Index::create()
                    .name("idx_chat_listing_buyer_vendor")
                    .table(Chat::Table)
                    .col(Chat::ListingId)
                    .col(Chat::BuyerId)
                    .col(Chat::VendorId)
                    .to_owned(),
            )
            .await?;

        // Index: updated_at for inbox ordering
        manager
            .create_index(
                Index::create()
                    .name("idx_chat_updated_at")
                    .table(Chat::Table)
                    .col(Chat::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Chat::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Chat {
    Table,
    Id,
    BuyerId,
    VendorId,
    ListingId,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}

#[derive(Iden)]
enum Listing {
    Table,
    Id,
}
