//! Create user table migration.
//!
//! Mirrors the columns the chat engine reads from the marketplace user table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(User::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(User::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(User::Username).string_len(128).not_null().unique_key())
                    .col(ColumnDef::new(User::DisplayName).string_len(256))
                    .col(ColumnDef::new(User::AvatarUrl).string_len(1024))
                    .col(
                        ColumnDef::new(User::Role)
                            .string_len(16)
                            .not_null()
                            .default("buyer"),
                    )
                    .col(ColumnDef::new(User::IsVerified).boolean().not_null().default(false))
                    .col(ColumnDef::new(User::Token).string_len(64).unique_key())
                    .col(
                        ColumnDef::new(User::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(User::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum User {
    Table,
    Id,
    Username,
    DisplayName,
    AvatarUrl,
    Role,
    IsVerified,
    Token,
    CreatedAt,
}
