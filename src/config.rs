//! Runtime configuration from environment variables
//!
//! Every setting has a default so the service starts with no environment at all.
//! Provider base URLs default to the local simulator ports.

use std::time::Duration;

use crate::normalizer::ProviderKey;

/// Static provider seed: key plus the base URL to fetch from
#[derive(Debug, Clone)]
pub struct ProviderSeed {
    pub key: ProviderKey,
    pub base_url: String,
}

/// Service configuration, read once at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// How often a reconciliation cycle runs
    pub fetch_interval: Duration,
    /// Per-request timeout for provider fetches
    pub provider_timeout: Duration,
    /// Products older than this are flagged stale by the sweep
    pub stale_threshold: Duration,
    pub provider_a_url: String,
    pub provider_b_url: String,
    pub provider_c_url: String,
}

impl Config {
    /// Build configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            fetch_interval: Duration::from_millis(env_ms("FETCH_INTERVAL_MS", 10_000)),
            provider_timeout: Duration::from_millis(env_ms("PROVIDER_TIMEOUT_MS", 5_000)),
            stale_threshold: Duration::from_millis(env_ms("STALE_THRESHOLD_MS", 60_000)),
            provider_a_url: env_or("PROVIDER_A_URL", "http://localhost:3001"),
            provider_b_url: env_or("PROVIDER_B_URL", "http://localhost:3002"),
            provider_c_url: env_or("PROVIDER_C_URL", "http://localhost:3003"),
        }
    }

    /// The fixed provider set seeded into the database at startup
    pub fn provider_seeds(&self) -> Vec<ProviderSeed> {
        vec![
            ProviderSeed {
                key: ProviderKey::ProviderA,
                base_url: self.provider_a_url.clone(),
            },
            ProviderSeed {
                key: ProviderKey::ProviderB,
                base_url: self.provider_b_url.clone(),
            },
            ProviderSeed {
                key: ProviderKey::ProviderC,
                base_url: self.provider_c_url.clone(),
            },
        ]
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Read a millisecond value from the environment; invalid values fall back to
/// the default with a warning rather than aborting startup.
fn env_ms(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("Invalid {}={:?}, using default {}ms", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
