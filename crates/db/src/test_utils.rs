//! Test utilities for database operations.
//!
//! Provides an in-memory SQLite database with the schema applied, plus
//! fixtures for the marketplace rows the chat engine only reads.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, DbErr, Set};
use tracing::info;

use crate::entities::{listing, user, user::UserRole};

/// A migrated, throwaway database for tests.
pub struct TestDatabase {
    /// Database connection.
    pub conn: Arc<DatabaseConnection>,
}

impl TestDatabase {
    /// Create a fresh in-memory database and run all migrations.
    ///
    /// The pool is pinned to one connection: every SQLite `:memory:`
    /// connection would otherwise see its own empty database.
    pub async fn new() -> Result<Self, DbErr> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        {
            use sea_orm_migration::MigratorTrait;
            crate::migrations::Migrator::up(&conn, None).await?;
        }

        info!("Created in-memory test database");

        Ok(Self {
            conn: Arc::new(conn),
        })
    }

    /// Shared handle for constructing repositories.
    #[must_use]
    pub fn connection(&self) -> Arc<DatabaseConnection> {
        Arc::clone(&self.conn)
    }

    /// Insert a user with the given role; the token is `token-{id}`.
    pub async fn insert_user(&self, id: &str, role: UserRole) -> Result<user::Model, DbErr> {
        user::ActiveModel {
            id: Set(id.to_string()),
            username: Set(id.to_string()),
            display_name: Set(Some(format!("{id} display"))),
            avatar_url: Set(None),
            role: Set(role),
            is_verified: Set(true),
            token: Set(Some(format!("token-{id}"))),
            created_at: Set(Utc::now().into()),
        }
        .insert(self.conn.as_ref())
        .await
    }

    /// Insert a listing owned by `vendor_id`.
    pub async fn insert_listing(
        &self,
        id: &str,
        vendor_id: &str,
        price: i64,
    ) -> Result<listing::Model, DbErr> {
        listing::ActiveModel {
            id: Set(id.to_string()),
            vendor_id: Set(vendor_id.to_string()),
            title: Set(format!("Listing {id}")),
            price: Set(price),
            primary_image_url: Set(None),
            created_at: Set(Utc::now().into()),
        }
        .insert(self.conn.as_ref())
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::chat::ChatStatus;
    use crate::entities::chat_message::MessageType;
    use crate::entities::{chat, chat_message};
    use crate::repositories::{ChatMessageRepository, ChatRepository};
    use haggle_common::AppError;

    async fn seeded() -> (TestDatabase, chat::Model) {
        let db = TestDatabase::new().await.unwrap();
        db.insert_user("buyer", UserRole::Buyer).await.unwrap();
        db.insert_user("vendor", UserRole::Vendor).await.unwrap();

        let chat = ChatRepository::new(db.connection())
            .create(chat::ActiveModel {
                id: Set("chat1".to_string()),
                buyer_id: Set("buyer".to_string()),
                vendor_id: Set("vendor".to_string()),
                listing_id: Set(None),
                status: Set(ChatStatus::Archived),
                created_at: Set(Utc::now().into()),
                updated_at: Set(Utc::now().into()),
            })
            .await
            .unwrap();

        (db, chat)
    }

    fn text(id: &str, chat_id: &str) -> chat_message::ActiveModel {
        chat_message::ActiveModel {
            id: Set(id.to_string()),
            chat_id: Set(chat_id.to_string()),
            sender_id: Set("buyer".to_string()),
            message_type: Set(MessageType::Text),
            content: Set(Some("hello there".to_string())),
            offer_amount: Set(None),
            offer_id: Set(None),
            offer_expires_at: Set(None),
            notes: Set(None),
            reply_to_id: Set(None),
            is_read: Set(false),
            created_at: Set(Utc::now().into()),
            edited_at: Set(None),
            deleted_at: Set(None),
        }
    }

    #[tokio::test]
    async fn test_append_reactivates_archived_chat() {
        let (db, chat) = seeded().await;
        let repo = ChatMessageRepository::new(db.connection());

        let appended = repo.append(text("m1", &chat.id)).await.unwrap();

        assert!(appended.reactivated);
        assert_eq!(appended.chat.status, ChatStatus::Active);
        assert_eq!(appended.chat.updated_at, appended.message.created_at);
    }

    #[tokio::test]
    async fn test_append_to_blocked_chat_inserts_nothing() {
        let (db, chat) = seeded().await;
        let chats = ChatRepository::new(db.connection());
        chats.update_status(chat.clone(), ChatStatus::Blocked).await.unwrap();

        let repo = ChatMessageRepository::new(db.connection());
        let result = repo.append(text("m1", &chat.id)).await;

        assert!(matches!(result, Err(AppError::BusinessLogic(_))));
        assert_eq!(repo.count_in_chat(&chat.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive() {
        let (db, chat) = seeded().await;
        let repo = ChatMessageRepository::new(db.connection());
        repo.append(text("m1", &chat.id)).await.unwrap();

        let found = repo.search(&[chat.id.clone()], "HELLO", 10).await.unwrap();
        assert_eq!(found.len(), 1);

        let none = repo.search(&[chat.id], "bicycle", 10).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_search_wildcards_match_literally() {
        let (db, chat) = seeded().await;
        let repo = ChatMessageRepository::new(db.connection());
        repo.append(text("m1", &chat.id)).await.unwrap();
        let mut discount = text("m2", &chat.id);
        discount.content = Set(Some("50% off today".to_string()));
        repo.append(discount).await.unwrap();

        let found = repo.search(&[chat.id.clone()], "%", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "m2");

        let none = repo.search(&[chat.id], "_", 10).await.unwrap();
        assert!(none.is_empty());
    }
}
