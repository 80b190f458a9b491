//! Chat message repository.

use std::sync::Arc;

use crate::entities::{
    Chat, ChatMessage,
    chat::{self, ChatStatus},
    chat_message::{self, ActiveModel, Column, MessageType},
};
use haggle_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    sea_query::{Expr, Func, LikeExpr},
};

/// Result of appending a message to a chat.
#[derive(Debug, Clone)]
pub struct AppendedMessage {
    /// The persisted message.
    pub message: chat_message::Model,
    /// The chat after the append (status and `updated_at` refreshed).
    pub chat: chat::Model,
    /// Whether the append flipped an archived chat back to active.
    pub reactivated: bool,
}

/// Repository for chat messages.
#[derive(Clone)]
pub struct ChatMessageRepository {
    db: Arc<DatabaseConnection>,
}

impl ChatMessageRepository {
    /// Create a new chat message repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Append a message to its chat.
    ///
    /// Runs in one transaction: the chat row is re-read under lock, a blocked
    /// chat aborts the append, an archived chat is reactivated, the message is
    /// inserted and the chat's `updated_at` is bumped to the message time.
    pub async fn append(&self, model: ActiveModel) -> AppResult<AppendedMessage> {
        let chat_id = match &model.chat_id {
            sea_orm::ActiveValue::Set(id) | sea_orm::ActiveValue::Unchanged(id) => id.clone(),
            sea_orm::ActiveValue::NotSet => {
                return Err(AppError::Internal("Message has no chat id".to_string()));
            }
        };

        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let chat = Chat::find_by_id(chat_id.as_str())
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::NotFound(format!("Chat not found: {chat_id}")))?;

        if chat.status == ChatStatus::Blocked {
            // Dropping the transaction rolls it back
            return Err(AppError::BusinessLogic(format!(
                "Chat {chat_id} is blocked"
            )));
        }

        let reactivated = chat.status == ChatStatus::Archived;

        let message = model
            .insert(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut active_chat: chat::ActiveModel = chat.into();
        active_chat.status = Set(ChatStatus::Active);
        active_chat.updated_at = Set(message.created_at);
        let chat = active_chat
            .update(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(AppendedMessage {
            message,
            chat,
            reactivated,
        })
    }

    /// Find a message by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<chat_message::Model>> {
        ChatMessage::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a message by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<chat_message::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Message not found: {id}")))
    }

    /// Persist changes to an existing message.
    pub async fn update(&self, model: ActiveModel) -> AppResult<chat_message::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Fetch a page of a chat's history, newest first.
    ///
    /// With `before`, only messages strictly older than it (by creation time,
    /// then id) are returned.
    pub async fn find_page(
        &self,
        chat_id: &str,
        limit: u64,
        before: Option<&chat_message::Model>,
    ) -> AppResult<Vec<chat_message::Model>> {
        let mut query = ChatMessage::find().filter(Column::ChatId.eq(chat_id));

        if let Some(cursor) = before {
            query = query.filter(
                Condition::any()
                    .add(Column::CreatedAt.lt(cursor.created_at))
                    .add(
                        Condition::all()
                            .add(Column::CreatedAt.eq(cursor.created_at))
                            .add(Column::Id.lt(cursor.id.as_str())),
                    ),
            );
        }

        query
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Total number of rows in a chat's history.
    pub async fn count_in_chat(&self, chat_id: &str) -> AppResult<u64> {
        ChatMessage::find()
            .filter(Column::ChatId.eq(chat_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// The most recent message of a chat.
    pub async fn find_latest_in_chat(
        &self,
        chat_id: &str,
    ) -> AppResult<Option<chat_message::Model>> {
        ChatMessage::find()
            .filter(Column::ChatId.eq(chat_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Messages in a chat the user has not read yet (sent by the other side).
    pub async fn count_unread_in_chat(&self, chat_id: &str, user_id: &str) -> AppResult<u64> {
        ChatMessage::find()
            .filter(Column::ChatId.eq(chat_id))
            .filter(Column::SenderId.ne(user_id))
            .filter(Column::IsRead.eq(false))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Unread messages across a set of chats.
    pub async fn count_unread_in_chats(&self, chat_ids: &[String], user_id: &str) -> AppResult<u64> {
        if chat_ids.is_empty() {
            return Ok(0);
        }

        ChatMessage::find()
            .filter(Column::ChatId.is_in(chat_ids.to_vec()))
            .filter(Column::SenderId.ne(user_id))
            .filter(Column::IsRead.eq(false))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// IDs of the unread messages a reader could acknowledge in a chat.
    ///
    /// When `only` is given, the result is restricted to those IDs.
    pub async fn find_unread_ids(
        &self,
        chat_id: &str,
        reader_id: &str,
        only: Option<&[String]>,
    ) -> AppResult<Vec<String>> {
        let mut query = ChatMessage::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::ChatId.eq(chat_id))
            .filter(Column::SenderId.ne(reader_id))
            .filter(Column::IsRead.eq(false));

        if let Some(ids) = only {
            if ids.is_empty() {
                return Ok(vec![]);
            }
            query = query.filter(Column::Id.is_in(ids.to_vec()));
        }

        query
            .into_tuple::<String>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Mark messages as read.
    ///
    /// The `is_read = false` guard keeps concurrent acknowledgements from
    /// counting the same row twice.
    pub async fn mark_as_read(
        &self,
        chat_id: &str,
        reader_id: &str,
        ids: &[String],
    ) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = ChatMessage::update_many()
            .col_expr(Column::IsRead, Expr::value(true))
            .filter(Column::ChatId.eq(chat_id))
            .filter(Column::SenderId.ne(reader_id))
            .filter(Column::IsRead.eq(false))
            .filter(Column::Id.is_in(ids.to_vec()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }

    /// The first accept/reject response referencing an offer, if any.
    pub async fn find_terminal_response(
        &self,
        offer_id: &str,
    ) -> AppResult<Option<chat_message::Model>> {
        ChatMessage::find()
            .filter(Column::OfferId.eq(offer_id))
            .filter(
                Column::MessageType.is_in([MessageType::OfferAccepted, MessageType::OfferRejected]),
            )
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// The earliest offer or counter-offer posted in the chat after `offer`.
    pub async fn find_offer_after(
        &self,
        offer: &chat_message::Model,
    ) -> AppResult<Option<chat_message::Model>> {
        ChatMessage::find()
            .filter(Column::ChatId.eq(offer.chat_id.as_str()))
            .filter(Column::MessageType.is_in([MessageType::Offer, MessageType::CounterOffer]))
            .filter(
                Condition::any()
                    .add(Column::CreatedAt.gt(offer.created_at))
                    .add(
                        Condition::all()
                            .add(Column::CreatedAt.eq(offer.created_at))
                            .add(Column::Id.gt(offer.id.as_str())),
                    ),
            )
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Case-insensitive substring search over live message content, newest first.
    pub async fn search(
        &self,
        chat_ids: &[String],
        query: &str,
        limit: u64,
    ) -> AppResult<Vec<chat_message::Model>> {
        if chat_ids.is_empty() {
            return Ok(vec![]);
        }

        let pattern = format!("%{}%", escape_like(&query.to_lowercase()));

        ChatMessage::find()
            .filter(Column::ChatId.is_in(chat_ids.to_vec()))
            .filter(Column::DeletedAt.is_null())
            .filter(
                Expr::expr(Func::lower(Expr::col(Column::Content)))
                    .like(LikeExpr::new(pattern).escape('\\')),
            )
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

/// Escape `LIKE` wildcards so user input matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
