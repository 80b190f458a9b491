//! Create listing table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Listing::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Listing::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Listing::VendorId).string_len(32).not_null())
                    .col(ColumnDef::new(Listing::Title).string_len(256).not_null())
                    .col(ColumnDef::new(Listing::Price).big_integer().not_null())
                    .col(ColumnDef::new(Listing::PrimaryImageUrl).string_len(1024))
                    .col(
                        ColumnDef::new(Listing::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_listing_vendor")
                            .from(Listing::Table, Listing::VendorId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_listing_vendor_id")
                    .table(Listing::Table)
                    .col(Listing::VendorId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Listing::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Listing {
    Table,
    Id,
    VendorId,
    Title,
    Price,
    PrimaryImageUrl,
    CreatedAt,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}
