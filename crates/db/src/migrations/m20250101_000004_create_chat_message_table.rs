//! Create `chat_message` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChatMessage::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChatMessage::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ChatMessage::ChatId).string_len(32).not_null())
                    .col(ColumnDef::new(ChatMessage::SenderId).string_len(32).not_null())
                    .col(
                        ColumnDef::new(ChatMessage::MessageType)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ChatMessage::Content).text())
                    .col(ColumnDef::new(ChatMessage::OfferAmount).big_integer())
                    .col(ColumnDef::new(ChatMessage::OfferId).string_len(32))
                    .col(ColumnDef::new(ChatMessage::OfferExpiresAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(ChatMessage::Notes).text())
                    .col(ColumnDef::new(ChatMessage::ReplyToId).string_len(32))
                    .col(
                        ColumnDef::new(ChatMessage::IsRead)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ChatMessage::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(ChatMessage::EditedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(ChatMessage::DeletedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chat_message_chat")
                            .from(ChatMessage::Table, ChatMessage::ChatId)
                            .to(Chat::Table, Chat::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chat_message_sender")
                            .from(ChatMessage::Table, ChatMessage::SenderId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Composite index for history paging
        manager
            .create_index(
                Index::create()
                    .name("idx_chat_message_chat_created_at")
                    .table(ChatMessage::Table)
                    .col(ChatMessage::ChatId)
                    .col(ChatMessage::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Index: offer_id for terminal-response lookup
        manager
            .create_index(
                Index::create()
                    .name("idx_chat_message_offer_id")
                    .table(ChatMessage::Table)
                    .col(ChatMessage::OfferId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_chat_message_sender_id")
                    .table(ChatMessage::Table)
                    .col(ChatMessage::SenderId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChatMessage::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ChatMessage {
    Table,
    Id,
    ChatId,
    SenderId,
    MessageType,
    Content,
    OfferAmount,
    OfferId,
    OfferExpiresAt,
    Notes,
    ReplyToId,
    IsRead,
    CreatedAt,
    EditedAt,
    DeletedAt,
}

#[derive(Iden)]
enum Chat {
    Table,
    Id,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}
