//! Read-only views of the user and listing domains.
//!
//! The chat engine never writes users or listings; it only needs display
//! summaries, role checks and token lookup.

use async_trait::async_trait;
use haggle_common::AppResult;
use haggle_db::{
    entities::{listing, user, user::UserRole},
    repositories::{ListingRepository, UserRepository},
};
use serde::Serialize;
use std::sync::Arc;

/// Public profile of a chat participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: UserRole,
    pub is_verified: bool,
}

impl UserSummary {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

impl From<user::Model> for UserSummary {
    fn from(user: user::Model) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            role: user.role,
            is_verified: user.is_verified,
        }
    }
}

/// Listing a chat is anchored to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingSummary {
    pub id: String,
    pub vendor_id: String,
    pub title: String,
    pub price: i64,
    pub primary_image_url: Option<String>,
}

impl From<listing::Model> for ListingSummary {
    fn from(listing: listing::Model) -> Self {
        Self {
            id: listing.id,
            vendor_id: listing.vendor_id,
            title: listing.title,
            price: listing.price,
            primary_image_url: listing.primary_image_url,
        }
    }
}

/// Lookup of users by id or credential token.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Get a user summary.
    async fn get_user(&self, user_id: &str) -> AppResult<Option<UserSummary>>;

    /// Get summaries for several users. Unknown ids are skipped.
    async fn get_users(&self, user_ids: &[String]) -> AppResult<Vec<UserSummary>>;

    /// Resolve a credential token to its user.
    async fn authenticate(&self, token: &str) -> AppResult<Option<UserSummary>>;
}

/// Lookup of listings by id.
#[async_trait]
pub trait ListingDirectory: Send + Sync {
    /// Get a listing summary.
    async fn get_listing(&self, listing_id: &str) -> AppResult<Option<ListingSummary>>;
}

/// Type alias for a shared user directory.
pub type UserDirectoryService = Arc<dyn UserDirectory>;

/// Type alias for a shared listing directory.
pub type ListingDirectoryService = Arc<dyn ListingDirectory>;

/// Directory backed by the marketplace tables.
#[derive(Clone)]
pub struct DbDirectory {
    user_repo: UserRepository,
    listing_repo: ListingRepository,
}

impl DbDirectory {
    /// Create a new database-backed directory.
    #[must_use]
    pub const fn new(user_repo: UserRepository, listing_repo: ListingRepository) -> Self {
        Self {
            user_repo,
            listing_repo,
        }
    }
}

#[async_trait]
impl UserDirectory for DbDirectory {
    async fn get_user(&self, user_id: &str) -> AppResult<Option<UserSummary>> {
        Ok(self.user_repo.find_by_id(user_id).await?.map(Into::into))
    }

    async fn get_users(&self, user_ids: &[String]) -> AppResult<Vec<UserSummary>> {
        let users = self.user_repo.find_by_ids(user_ids).await?;
        Ok(users.into_iter().map(Into::into).collect())
    }

    async fn authenticate(&self, token: &str) -> AppResult<Option<UserSummary>> {
        if token.is_empty() {
            return Ok(None);
        }
        Ok(self.user_repo.find_by_token(token).await?.map(Into::into))
    }
}

#[async_trait]
impl ListingDirectory for DbDirectory {
    async fn get_listing(&self, listing_id: &str) -> AppResult<Option<ListingSummary>> {
        Ok(self
            .listing_repo
            .find_by_id(listing_id)
            .await?
            .map(Into::into))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn vendor() -> user::Model {
        user::Model {
            id: "vendor1".to_string(),
            username: "acme".to_string(),
            display_name: Some("Acme Goods".to_string()),
            avatar_url: None,
            role: UserRole::Vendor,
            is_verified: true,
            token: Some("secret".to_string()),
            created_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_authenticate_by_token() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[vendor()]])
                .into_connection(),
        );
        let directory = DbDirectory::new(
            UserRepository::new(Arc::clone(&db)),
            ListingRepository::new(db),
        );

        let user = directory.authenticate("secret").await.unwrap().unwrap();
        assert_eq!(user.id, "vendor1");
        assert!(!user.is_admin());
    }

    #[tokio::test]
    async fn test_empty_token_is_anonymous() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let directory = DbDirectory::new(
            UserRepository::new(Arc::clone(&db)),
            ListingRepository::new(db),
        );

        assert!(directory.authenticate("").await.unwrap().is_none());
    }

    #[test]
    fn test_summary_hides_token() {
        let json = serde_json::to_value(UserSummary::from(vendor())).unwrap();
        assert_eq!(json["displayName"], "Acme Goods");
        assert!(json.get("token").is_none());
    }
}
