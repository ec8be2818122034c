//! Provider payload normalization
//!
//! Each upstream provider reports products in its own schema. This module maps
//! every variant onto one canonical record so the aggregator never touches
//! provider-specific field names. Pure functions, no I/O.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SyncError};

/// The fixed, closed set of upstream providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKey {
    ProviderA,
    ProviderB,
    ProviderC,
}

impl ProviderKey {
    /// The name a provider is registered under in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKey::ProviderA => "provider-a",
            ProviderKey::ProviderB => "provider-b",
            ProviderKey::ProviderC => "provider-c",
        }
    }

    /// Resolve a stored provider name back to its key
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "provider-a" => Some(ProviderKey::ProviderA),
            "provider-b" => Some(ProviderKey::ProviderB),
            "provider-c" => Some(ProviderKey::ProviderC),
            _ => None,
        }
    }
}

/// Canonical product record produced fresh every cycle; never persisted directly
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedProduct {
    /// Unique within one provider
    pub external_id: String,
    pub name: String,
    /// Explicit None when the provider omits it, never an elided field
    pub description: Option<String>,
    pub current_price: Decimal,
    pub currency: String,
    pub availability: bool,
    /// Timestamp asserted by the provider, not by us
    pub last_updated: DateTime<Utc>,
}

/// Provider A: flat objects with an `id` field and ISO-8601 timestamps
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProductA {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    price: f64,
    currency: String,
    availability: bool,
    last_updated: String,
}

/// Provider B: flat objects with alternate field names
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProductB {
    product_id: String,
    title: String,
    #[serde(default)]
    details: Option<String>,
    cost: f64,
    currency_code: String,
    in_stock: bool,
    updated_at: String,
}

/// Provider C: nested object groups and epoch-millisecond timestamps
#[derive(Debug, Deserialize)]
struct RawProductC {
    identifier: String,
    info: RawInfoC,
    pricing: RawPricingC,
    stock: RawStockC,
    metadata: RawMetadataC,
}

#[derive(Debug, Deserialize)]
struct RawInfoC {
    title: String,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPricingC {
    amount: f64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct RawStockC {
    available: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadataC {
    last_modified: i64,
}

/// Map a raw provider payload to canonical records, preserving item order.
///
/// A structurally malformed item (missing required field or nested group) fails
/// the whole call; the aggregator treats that as a provider-level failure for
/// the current cycle.
pub fn normalize(key: ProviderKey, payload: Value) -> Result<Vec<NormalizedProduct>> {
    match key {
        ProviderKey::ProviderA => {
            let raw: Vec<RawProductA> = decode(key, payload)?;
            raw.into_iter()
                .map(|p| {
                    Ok(NormalizedProduct {
                        external_id: p.id,
                        name: p.name,
                        description: p.description,
                        current_price: parse_price(p.price)?,
                        currency: p.currency,
                        availability: p.availability,
                        last_updated: parse_iso_timestamp(&p.last_updated)?,
                    })
                })
                .collect()
        }
        ProviderKey::ProviderB => {
            let raw: Vec<RawProductB> = decode(key, payload)?;
            raw.into_iter()
                .map(|p| {
                    Ok(NormalizedProduct {
                        external_id: p.product_id,
                        name: p.title,
                        description: p.details,
                        current_price: parse_price(p.cost)?,
                        currency: p.currency_code,
                        availability: p.in_stock,
                        last_updated: parse_iso_timestamp(&p.updated_at)?,
                    })
                })
                .collect()
        }
        ProviderKey::ProviderC => {
            let raw: Vec<RawProductC> = decode(key, payload)?;
            raw.into_iter()
                .map(|p| {
                    Ok(NormalizedProduct {
                        external_id: p.identifier,
                        name: p.info.title,
                        description: p.info.summary,
                        current_price: parse_price(p.pricing.amount)?,
                        currency: p.pricing.currency,
                        availability: p.stock.available,
                        last_updated: parse_epoch_millis(p.metadata.last_modified)?,
                    })
                })
                .collect()
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(key: ProviderKey, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| SyncError::MalformedPayload(format!("{}: {}", key.as_str(), e)))
}

/// Convert a provider price to an exact decimal. Prices are compared as decimal
/// values during reconciliation, so the conversion must not carry float noise.
fn parse_price(value: f64) -> Result<Decimal> {
    if !value.is_finite() || value < 0.0 {
        return Err(SyncError::MalformedPayload(format!(
            "invalid price: {}",
            value
        )));
    }
    Decimal::try_from(value)
        .map_err(|e| SyncError::MalformedPayload(format!("invalid price {}: {}", value, e)))
}

fn parse_iso_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::MalformedPayload(format!("invalid timestamp {:?}: {}", raw, e)))
}

fn parse_epoch_millis(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| SyncError::MalformedPayload(format!("invalid epoch millis: {}", millis)))
}
