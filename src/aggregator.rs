//! Reconciliation engine
//!
//! One cycle: load active providers, fetch and normalize every provider's feed
//! concurrently, diff each item against stored state sequentially, then run the
//! staleness sweep. A provider failure is isolated to that provider; a failure
//! loading the provider list or sweeping fails the whole cycle. The next
//! scheduled tick is the only retry mechanism across cycles.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::task::JoinSet;

use crate::client::ProviderClient;
use crate::config::ProviderSeed;
use crate::database::{self, HistoryEntry, Provider};
use crate::error::{Result, SyncError};
use crate::normalizer::{self, NormalizedProduct, ProviderKey};
use crate::stream::{ChangeEvent, ProductStream};

pub struct Aggregator {
    db: Arc<Mutex<Connection>>,
    client: ProviderClient,
    stream: ProductStream,
    stale_threshold: Duration,
}

impl Aggregator {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        client: ProviderClient,
        stream: ProductStream,
        stale_threshold: Duration,
    ) -> Self {
        Self {
            db,
            client,
            stream,
            stale_threshold,
        }
    }

    /// The change stream this aggregator publishes to
    pub fn stream(&self) -> &ProductStream {
        &self.stream
    }

    /// Upsert the configured provider set. Runs once at process start, before
    /// the first cycle; a failure is logged per provider and is not fatal.
    pub fn seed_providers(&self, seeds: &[ProviderSeed]) {
        let conn = self.db.lock().unwrap();
        for seed in seeds {
            match database::upsert_provider(&conn, seed.key.as_str(), &seed.base_url) {
                Ok(provider) => {
                    log::info!("Seeded provider {} -> {}", provider.name, provider.base_url);
                }
                Err(e) => {
                    log::error!("Failed to seed provider {}: {}", seed.key.as_str(), e);
                }
            }
        }
    }

    /// Run one reconciliation cycle.
    ///
    /// Returns an error only for cycle-level failures (provider list load or
    /// staleness sweep); per-provider and per-product failures are logged and
    /// absorbed here.
    pub async fn run_cycle(&self) -> Result<()> {
        let started = Instant::now();

        let providers = {
            let conn = self.db.lock().unwrap();
            database::find_active_providers(&conn)?
        };

        let mut tasks = JoinSet::new();
        for provider in providers {
            let client = self.client.clone();
            tasks.spawn(async move {
                let key = ProviderKey::from_name(&provider.name)
                    .ok_or_else(|| SyncError::UnknownProvider(provider.name.clone()))?;
                let payload = client.fetch_products(&provider.base_url).await?;
                let items = normalizer::normalize(key, payload)?;
                Ok::<_, SyncError>((provider, items))
            });
        }

        // allSettled join: every provider branch finishes, success or failure,
        // before any write happens
        let mut batches = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(batch)) => batches.push(batch),
                Ok(Err(e)) => log::error!("Provider fetch failed: {}", e),
                Err(e) => log::error!("Provider task failed: {}", e),
            }
        }

        {
            let mut conn = self.db.lock().unwrap();
            for (provider, items) in &batches {
                self.upsert_batch(&mut conn, provider, items);
            }
        }

        // Runs unconditionally, even when zero providers returned data; this is
        // how disappearing providers surface as stale rows. A threshold beyond
        // chrono's range degrades to a cutoff no product can predate.
        let threshold = chrono::Duration::from_std(self.stale_threshold)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(threshold)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let flagged = {
            let conn = self.db.lock().unwrap();
            database::mark_stale(&conn, cutoff)?
        };
        if flagged > 0 {
            log::info!("Marked {} products stale (cutoff {})", flagged, cutoff);
        }

        log::info!("Aggregation cycle done in {}ms", started.elapsed().as_millis());
        Ok(())
    }

    /// Write one provider's normalized batch sequentially. A storage failure
    /// on one product is logged and skipped; the rest of the batch continues.
    fn upsert_batch(&self, conn: &mut Connection, provider: &Provider, items: &[NormalizedProduct]) {
        let mut created = 0;
        let mut updated = 0;
        let mut unchanged = 0;

        for item in items {
            match self.upsert_one(conn, provider, item) {
                Ok(Outcome::Created) => created += 1,
                Ok(Outcome::Updated) => updated += 1,
                Ok(Outcome::Unchanged) => unchanged += 1,
                Err(e) => {
                    log::error!(
                        "Write failed for {}/{}: {}",
                        provider.name,
                        item.external_id,
                        e
                    );
                }
            }
        }

        log::info!(
            "Provider {}: {} created, {} updated, {} unchanged",
            provider.name,
            created,
            updated,
            unchanged
        );
    }

    fn upsert_one(
        &self,
        conn: &mut Connection,
        provider: &Provider,
        item: &NormalizedProduct,
    ) -> Result<Outcome> {
        let existing = database::find_product(conn, &item.external_id, provider.id)?;

        let Some(existing) = existing else {
            // First sighting: create with one initial history entry
            let id = database::create_product(conn, provider.id, item, &history_from(item))?;
            self.stream.publish(ChangeEvent::new(id, item, provider));
            return Ok(Outcome::Created);
        };

        // Material change means price or availability delta; prices compare as
        // exact decimal values
        let price_changed = existing.current_price != item.current_price;
        let availability_changed = existing.availability != item.availability;

        if price_changed || availability_changed {
            database::update_product(
                conn,
                &item.external_id,
                provider.id,
                item,
                Some(&history_from(item)),
            )?;
            self.stream
                .publish(ChangeEvent::new(existing.id, item, provider));
            Ok(Outcome::Updated)
        } else {
            // Required no-op short-circuit: bookkeeping only, no history row,
            // no event
            database::touch_product(conn, &item.external_id, provider.id, item.last_updated)?;
            Ok(Outcome::Unchanged)
        }
    }
}

enum Outcome {
    Created,
    Updated,
    Unchanged,
}

fn history_from(item: &NormalizedProduct) -> HistoryEntry {
    HistoryEntry {
        price: item.current_price,
        currency: item.currency.clone(),
        changed_at: item.last_updated,
    }
}
