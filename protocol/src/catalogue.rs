//! Card catalogue and price quotes.
//!
//! Best-effort display enrichment. Nothing in unlock, signing or sending
//! depends on it; callers log failures and carry on.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Display data for a card id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMetadata {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_ref: Option<String>,
}

/// Fiat price of the native coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// e.g. `"USD"`.
    pub currency: String,
    pub price: f64,
    pub fetched_at: DateTime<Utc>,
}

impl Quote {
    /// Fiat value of `wei` at this quote.
    pub fn value_of(&self, wei: u128) -> f64 {
        (wei as f64 / 1e18) * self.price
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogueError {
    #[error("card {0} is not in the catalogue")]
    NotFound(u64),

    #[error("catalogue unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CardCatalogue: Send + Sync {
    async fn card_metadata(&self, id: u64) -> Result<CardMetadata, CatalogueError>;

    async fn quote(&self) -> Result<Quote, CatalogueError>;
}

/// Fixed in-memory catalogue.
#[derive(Debug, Default)]
pub struct StaticCatalogue {
    cards: RwLock<HashMap<u64, CardMetadata>>,
    quote: RwLock<Option<Quote>>,
}

impl StaticCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, metadata: CardMetadata) {
        self.cards.write().insert(metadata.id, metadata);
    }

    pub fn set_quote(&self, quote: Option<Quote>) {
        *self.quote.write() = quote;
    }
}

#[async_trait]
impl CardCatalogue for StaticCatalogue {
    async fn card_metadata(&self, id: u64) -> Result<CardMetadata, CatalogueError> {
        self.cards
            .read()
            .get(&id)
            .cloned()
            .ok_or(CatalogueError::NotFound(id))
    }

    async fn quote(&self) -> Result<Quote, CatalogueError> {
        self.quote
            .read()
            .clone()
            .ok_or_else(|| CatalogueError::Unavailable("no quote".into()))
    }
}
