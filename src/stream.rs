//! Live change broadcast
//!
//! The aggregator publishes a `ChangeEvent` whenever a product is created or
//! materially updated. Delivery is fan-out: every current subscriber gets its
//! own queue, late subscribers see no replay, and publishing never blocks the
//! reconciliation loop.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::database::Provider;
use crate::normalizer::NormalizedProduct;

const DEFAULT_CAPACITY: usize = 256;

/// Product-with-provider view broadcast on create or material update
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub product_id: i64,
    pub external_id: String,
    pub name: String,
    pub description: Option<String>,
    pub current_price: Decimal,
    pub currency: String,
    pub availability: bool,
    pub last_updated: DateTime<Utc>,
    pub provider: ProviderInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub id: i64,
    pub name: String,
    pub base_url: String,
}

impl ChangeEvent {
    /// Join a reconciled product with its provider for broadcast
    pub fn new(product_id: i64, product: &NormalizedProduct, provider: &Provider) -> Self {
        Self {
            product_id,
            external_id: product.external_id.clone(),
            name: product.name.clone(),
            description: product.description.clone(),
            current_price: product.current_price,
            currency: product.currency.clone(),
            availability: product.availability,
            last_updated: product.last_updated,
            provider: ProviderInfo {
                id: provider.id,
                name: provider.name.clone(),
                base_url: provider.base_url.clone(),
            },
        }
    }
}

/// Fan-out channel for change events
#[derive(Debug, Clone)]
pub struct ProductStream {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ProductStream {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers. A send with no
    /// subscribers is not an error; the event is simply dropped.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published from this point on
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ProductStream {
    fn default() -> Self {
        Self::new()
    }
}
