//! Chat repository.

use std::sync::Arc;

use crate::entities::{
    Chat,
    chat::{self, ActiveModel, ChatStatus, Column},
};
use chrono::Utc;
use haggle_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};

/// Repository for chat threads.
#[derive(Clone)]
pub struct ChatRepository {
    db: Arc<DatabaseConnection>,
}

impl ChatRepository {
    /// Create a new chat repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create a new chat.
    pub async fn create(&self, model: ActiveModel) -> AppResult<chat::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a chat by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<chat::Model>> {
        Chat::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a chat by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<chat::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Chat not found: {id}")))
    }

    /// Find the chat for a (listing, buyer, vendor) triple.
    ///
    /// A `None` listing matches only vendor-profile chats.
    pub async fn find_by_participants(
        &self,
        listing_id: Option<&str>,
        buyer_id: &str,
        vendor_id: &str,
    ) -> AppResult<Option<chat::Model>> {
        let mut query = Chat::find()
            .filter(Column::BuyerId.eq(buyer_id))
            .filter(Column::VendorId.eq(vendor_id));

        query = match listing_id {
            Some(id) => query.filter(Column::ListingId.eq(id)),
            None => query.filter(Column::ListingId.is_null()),
        };

        // Prefer a live chat should legacy duplicates exist
        query
            .order_by_asc(Column::Status)
            .order_by_desc(Column::UpdatedAt)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Set the status of a chat and bump `updated_at`.
    pub async fn update_status(&self, chat: chat::Model, status: ChatStatus) -> AppResult<chat::Model> {
        let mut active: ActiveModel = chat.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now().into());

        active
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Page through the chats a user participates in, most recently updated first.
    pub async fn find_for_user(
        &self,
        user_id: &str,
        status: Option<ChatStatus>,
        limit: u64,
        offset: u64,
    ) -> AppResult<Vec<chat::Model>> {
        let mut query = Chat::find().filter(participant_condition(user_id));

        if let Some(status) = status {
            query = query.filter(Column::Status.eq(status));
        }

        query
            .order_by_desc(Column::UpdatedAt)
            .order_by_desc(Column::Id)
            .limit(limit)
            .offset(offset)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// IDs of every chat a user participates in.
    pub async fn find_ids_for_user(&self, user_id: &str) -> AppResult<Vec<String>> {
        Chat::find()
            .select_only()
            .column(Column::Id)
            .filter(participant_condition(user_id))
            .into_tuple::<String>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Chats anchored to a listing in the given status.
    pub async fn find_by_listing(
        &self,
        listing_id: &str,
        status: ChatStatus,
    ) -> AppResult<Vec<chat::Model>> {
        Chat::find()
            .filter(Column::ListingId.eq(listing_id))
            .filter(Column::Status.eq(status))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

fn participant_condition(user_id: &str) -> Condition {
    Condition::any()
        .add(Column::BuyerId.eq(user_id))
        .add(Column::VendorId.eq(user_id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_chat(id: &str, status: ChatStatus) -> chat::Model {
        chat::Model {
            id: id.to_string(),
            buyer_id: "buyer1".to_string(),
            vendor_id: "vendor1".to_string(),
            listing_id: Some("listing1".to_string()),
            status,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_get_by_id_not_found() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<chat::Model>::new()])
                .into_connection(),
        );

        let repo = ChatRepository::new(db);
        let result = repo.get_by_id("missing").await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_by_participants() {
        let chat = create_test_chat("chat1", ChatStatus::Active);

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[chat.clone()]])
                .into_connection(),
        );

        let repo = ChatRepository::new(db);
        let found = repo
            .find_by_participants(Some("listing1"), "buyer1", "vendor1")
            .await
            .unwrap();

        assert_eq!(found.unwrap().id, "chat1");
    }

    #[tokio::test]
    async fn test_update_status() {
        let chat = create_test_chat("chat1", ChatStatus::Active);
        let mut archived = chat.clone();
        archived.status = ChatStatus::Archived;

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[archived.clone()]])
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
        );

        let repo = ChatRepository::new(db);
        let updated = repo.update_status(chat, ChatStatus::Archived).await.unwrap();

        assert_eq!(updated.status, ChatStatus::Archived);
    }

    #[tokio::test]
    async fn test_find_for_user() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[
                    create_test_chat("chat2", ChatStatus::Active),
                    create_test_chat("chat1", ChatStatus::Active),
                ]])
                .into_connection(),
        );

        let repo = ChatRepository::new(db);
        let chats = repo.find_for_user("buyer1", None, 20, 0).await.unwrap();

        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].id, "chat2");
    }
}
