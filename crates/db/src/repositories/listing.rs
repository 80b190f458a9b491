//! Listing repository.

use std::sync::Arc;

use crate::entities::{Listing, listing};
use haggle_common::{AppError, AppResult};
use sea_orm::{DatabaseConnection, EntityTrait};

/// Read access to marketplace listings.
#[derive(Clone)]
pub struct ListingRepository {
    db: Arc<DatabaseConnection>,
}

impl ListingRepository {
    /// Create a new listing repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a listing by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<listing::Model>> {
        Listing::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_find_by_id() {
        let listing = listing::Model {
            id: "listing1".to_string(),
            vendor_id: "vendor1".to_string(),
            title: "Road bike".to_string(),
            price: 25_000,
            primary_image_url: None,
            created_at: Utc::now().into(),
        };

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[listing.clone()]])
                .into_connection(),
        );

        let repo = ListingRepository::new(db);
        let found = repo.find_by_id("listing1").await.unwrap().unwrap();

        assert_eq!(found.vendor_id, "vendor1");
        assert_eq!(found.price, 25_000);
    }
}
