//! Catalog Sync - Product Aggregation Service
//!
//! Collects product catalogs from external providers on a fixed interval,
//! reconciles them against SQLite state, records price/availability history,
//! flags stale entries, and broadcasts changes to live subscribers.

pub mod aggregator;
pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod normalizer;
pub mod stream;

pub use aggregator::Aggregator;
pub use client::ProviderClient;
pub use config::Config;
pub use error::{Result, SyncError};
pub use normalizer::{NormalizedProduct, ProviderKey};
pub use stream::{ChangeEvent, ProductStream};
