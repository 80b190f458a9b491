//! Transaction creation trigger.
//!
//! An accepted offer asks the API layer to open a transaction with the
//! marketplace's payment side. The engine itself never calls this.

use async_trait::async_trait;
use haggle_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Details of an accepted offer that a transaction is created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedOffer {
    pub chat_id: String,
    pub offer_id: String,
    pub amount: i64,
    pub buyer_id: String,
    pub vendor_id: String,
}

/// Hook that opens a transaction for an accepted offer.
#[async_trait]
pub trait TransactionTrigger: Send + Sync {
    /// Create a transaction, returning its id when the backend assigns one.
    async fn on_offer_accepted(&self, offer: &AcceptedOffer) -> AppResult<Option<String>>;
}

/// Type alias for a shared transaction trigger.
pub type TransactionTriggerService = Arc<dyn TransactionTrigger>;

/// Trigger used when no transaction service is configured.
#[derive(Clone, Default)]
pub struct NoOpTransactionTrigger;

#[async_trait]
impl TransactionTrigger for NoOpTransactionTrigger {
    async fn on_offer_accepted(&self, offer: &AcceptedOffer) -> AppResult<Option<String>> {
        tracing::debug!(
            chat_id = %offer.chat_id,
            offer_id = %offer.offer_id,
            "No transaction service configured, skipping"
        );
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct CreatedTransaction {
    id: String,
}

/// Trigger that POSTs the accepted offer to a transaction service.
#[derive(Clone)]
pub struct HttpTransactionTrigger {
    http_client: reqwest::Client,
    url: String,
}

impl HttpTransactionTrigger {
    /// Create a trigger for the given endpoint.
    pub fn new(url: impl Into<String>) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Haggle-Chat/1.0")
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TransactionTrigger for HttpTransactionTrigger {
    async fn on_offer_accepted(&self, offer: &AcceptedOffer) -> AppResult<Option<String>> {
        let response = self
            .http_client
            .post(&self.url)
            .json(offer)
            .send()
            .await
            .map_err(|e| AppError::ExternalService(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(format!(
                "Transaction service returned {}",
                response.status()
            )));
        }

        let created: CreatedTransaction = response
            .json()
            .await
            .map_err(|e| AppError::ExternalService(format!("Invalid response body: {e}")))?;

        tracing::info!(
            chat_id = %offer.chat_id,
            offer_id = %offer.offer_id,
            transaction_id = %created.id,
            "Transaction created for accepted offer"
        );

        Ok(Some(created.id))
    }
}
