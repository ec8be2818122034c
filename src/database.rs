//! Database operations for catalog reconciliation
//!
//! Uses parameterized queries exclusively (no SQL string concatenation).
//! Multi-statement writes are transactional; each contract operation is
//! individually atomic, the cycle as a whole is not one transaction.
//!
//! Prices are stored as decimal strings and timestamps as RFC 3339 text so
//! both round-trip exactly. RFC 3339 in UTC sorts lexicographically, which the
//! staleness sweep relies on.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::normalizer::NormalizedProduct;

/// Result type for database operations
pub type DbResult<T> = rusqlite::Result<T>;

/// A registered upstream provider
#[derive(Debug, Clone)]
pub struct Provider {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub is_active: bool,
}

/// A persisted product row
#[derive(Debug, Clone)]
pub struct ProductRecord {
    pub id: i64,
    pub external_id: String,
    pub provider_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub current_price: Decimal,
    pub currency: String,
    pub availability: bool,
    pub last_updated: DateTime<Utc>,
    pub is_stale: bool,
}

/// Input for one append-only price history row
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub price: Decimal,
    pub currency: String,
    pub changed_at: DateTime<Utc>,
}

/// A stored price history row (read back for tests and inspection)
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub product_id: i64,
    pub price: Decimal,
    pub currency: String,
    pub changed_at: DateTime<Utc>,
}

/// Initialize the database schema
///
/// Creates tables if they don't exist:
/// - `providers`: the fixed upstream provider set
/// - `products`: reconciled catalog, unique per (external_id, provider_id)
/// - `price_history`: append-only price/availability change log
pub fn init_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS providers (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            base_url TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        );

        -- One row per (external_id, provider_id) pair; identity is immutable
        CREATE TABLE IF NOT EXISTS products (
            id INTEGER PRIMARY KEY,
            external_id TEXT NOT NULL,
            provider_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            current_price TEXT NOT NULL,
            currency TEXT NOT NULL,
            availability INTEGER NOT NULL,
            last_updated TEXT NOT NULL,
            is_stale INTEGER NOT NULL DEFAULT 0,
            UNIQUE (external_id, provider_id),
            FOREIGN KEY (provider_id) REFERENCES providers(id)
        );

        CREATE INDEX IF NOT EXISTS idx_products_provider ON products(provider_id);
        CREATE INDEX IF NOT EXISTS idx_products_last_updated ON products(last_updated);

        CREATE TABLE IF NOT EXISTS price_history (
            id INTEGER PRIMARY KEY,
            product_id INTEGER NOT NULL,
            price TEXT NOT NULL,
            currency TEXT NOT NULL,
            changed_at TEXT NOT NULL,
            inserted_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (product_id) REFERENCES products(id)
        );

        CREATE INDEX IF NOT EXISTS idx_price_history_product ON price_history(product_id);
        ",
    )?;

    log::info!("Database schema initialized");
    Ok(())
}

/// Insert a provider if absent, otherwise refresh its base URL.
/// Idempotent by name; `is_active` is left alone on update.
pub fn upsert_provider(conn: &Connection, name: &str, base_url: &str) -> DbResult<Provider> {
    conn.execute(
        "INSERT INTO providers (name, base_url, is_active) VALUES (?1, ?2, 1)
         ON CONFLICT(name) DO UPDATE SET base_url = excluded.base_url",
        params![name, base_url],
    )?;

    conn.query_row(
        "SELECT id, name, base_url, is_active FROM providers WHERE name = ?1",
        params![name],
        provider_from_row,
    )
}

/// Load all providers flagged active
pub fn find_active_providers(conn: &Connection) -> DbResult<Vec<Provider>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, base_url, is_active FROM providers WHERE is_active = 1 ORDER BY name",
    )?;
    let providers = stmt.query_map([], provider_from_row)?.collect();
    providers
}

fn provider_from_row(row: &rusqlite::Row<'_>) -> DbResult<Provider> {
    Ok(Provider {
        id: row.get(0)?,
        name: row.get(1)?,
        base_url: row.get(2)?,
        is_active: row.get(3)?,
    })
}

/// Look up a product by its (external_id, provider_id) identity
pub fn find_product(
    conn: &Connection,
    external_id: &str,
    provider_id: i64,
) -> DbResult<Option<ProductRecord>> {
    conn.query_row(
        "SELECT id, external_id, provider_id, name, description, current_price,
                currency, availability, last_updated, is_stale
         FROM products
         WHERE external_id = ?1 AND provider_id = ?2",
        params![external_id, provider_id],
        product_from_row,
    )
    .optional()
}

fn product_from_row(row: &rusqlite::Row<'_>) -> DbResult<ProductRecord> {
    let price: String = row.get(5)?;
    let last_updated: String = row.get(8)?;
    Ok(ProductRecord {
        id: row.get(0)?,
        external_id: row.get(1)?,
        provider_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        current_price: decode_price(5, &price)?,
        currency: row.get(6)?,
        availability: row.get(7)?,
        last_updated: decode_timestamp(8, &last_updated)?,
        is_stale: row.get(9)?,
    })
}

/// Create a product on first sighting, together with its initial price
/// history entry, in one transaction. Returns the new product id.
pub fn create_product(
    conn: &mut Connection,
    provider_id: i64,
    product: &NormalizedProduct,
    initial_history: &HistoryEntry,
) -> DbResult<i64> {
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO products
         (external_id, provider_id, name, description, current_price,
          currency, availability, last_updated, is_stale)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
        params![
            &product.external_id,
            provider_id,
            &product.name,
            &product.description,
            product.current_price.to_string(),
            &product.currency,
            product.availability,
            product.last_updated.to_rfc3339(),
        ],
    )?;
    let product_id = tx.last_insert_rowid();

    insert_history(&tx, product_id, initial_history)?;
    tx.commit()?;
    Ok(product_id)
}

/// Update a product on re-sighting, appending a history entry when the cycle
/// detected a material change. One transaction.
pub fn update_product(
    conn: &mut Connection,
    external_id: &str,
    provider_id: i64,
    product: &NormalizedProduct,
    history: Option<&HistoryEntry>,
) -> DbResult<()> {
    let tx = conn.transaction()?;

    tx.execute(
        "UPDATE products
         SET name = ?1, description = ?2, current_price = ?3, currency = ?4,
             availability = ?5, last_updated = ?6, is_stale = 0
         WHERE external_id = ?7 AND provider_id = ?8",
        params![
            &product.name,
            &product.description,
            product.current_price.to_string(),
            &product.currency,
            product.availability,
            product.last_updated.to_rfc3339(),
            external_id,
            provider_id,
        ],
    )?;

    if let Some(entry) = history {
        let product_id: i64 = tx.query_row(
            "SELECT id FROM products WHERE external_id = ?1 AND provider_id = ?2",
            params![external_id, provider_id],
            |row| row.get(0),
        )?;
        insert_history(&tx, product_id, entry)?;
    }

    tx.commit()?;
    Ok(())
}

/// Bookkeeping-only update for a re-sighting with no material change:
/// refresh `last_updated`, clear the stale flag, write no history.
pub fn touch_product(
    conn: &Connection,
    external_id: &str,
    provider_id: i64,
    last_updated: DateTime<Utc>,
) -> DbResult<()> {
    conn.execute(
        "UPDATE products SET last_updated = ?1, is_stale = 0
         WHERE external_id = ?2 AND provider_id = ?3",
        params![last_updated.to_rfc3339(), external_id, provider_id],
    )?;
    Ok(())
}

/// Flag every product whose `last_updated` predates the cutoff as stale.
/// Returns the number of rows flagged in this pass.
pub fn mark_stale(conn: &Connection, cutoff: DateTime<Utc>) -> DbResult<usize> {
    conn.execute(
        "UPDATE products SET is_stale = 1 WHERE last_updated < ?1 AND is_stale = 0",
        params![cutoff.to_rfc3339()],
    )
}

fn insert_history(tx: &Transaction<'_>, product_id: i64, entry: &HistoryEntry) -> DbResult<()> {
    tx.execute(
        "INSERT INTO price_history (product_id, price, currency, changed_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            product_id,
            entry.price.to_string(),
            &entry.currency,
            entry.changed_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Price history for one product, ordered chronologically
pub fn history_for_product(conn: &Connection, product_id: i64) -> DbResult<Vec<HistoryRow>> {
    let mut stmt = conn.prepare(
        "SELECT product_id, price, currency, changed_at
         FROM price_history
         WHERE product_id = ?1
         ORDER BY changed_at ASC, id ASC",
    )?;

    let rows = stmt
        .query_map(params![product_id], |row| {
            let price: String = row.get(1)?;
            let changed_at: String = row.get(3)?;
            Ok(HistoryRow {
                product_id: row.get(0)?,
                price: decode_price(1, &price)?,
                currency: row.get(2)?,
                changed_at: decode_timestamp(3, &changed_at)?,
            })
        })?
        .collect();
    rows
}

/// Total count of products
pub fn product_count(conn: &Connection) -> DbResult<i64> {
    conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))
}

/// Total count of price history rows
pub fn history_count(conn: &Connection) -> DbResult<i64> {
    conn.query_row("SELECT COUNT(*) FROM price_history", [], |row| row.get(0))
}

/// Count of products currently flagged stale
pub fn stale_count(conn: &Connection) -> DbResult<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM products WHERE is_stale = 1",
        [],
        |row| row.get(0),
    )
}

fn decode_price(idx: usize, raw: &str) -> DbResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn decode_timestamp(idx: usize, raw: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
pub use tests::{make_test_product, test_db};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Create an in-memory database for testing
    pub fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    /// Create a normalized product with default values
    pub fn make_test_product(external_id: &str, price: &str) -> NormalizedProduct {
        NormalizedProduct {
            external_id: external_id.to_string(),
            name: format!("Product {}", external_id),
            description: None,
            current_price: Decimal::from_str(price).unwrap(),
            currency: "USD".to_string(),
            availability: true,
            last_updated: Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap(),
        }
    }

    fn history_from(product: &NormalizedProduct) -> HistoryEntry {
        HistoryEntry {
            price: product.current_price,
            currency: product.currency.clone(),
            changed_at: product.last_updated,
        }
    }

    #[test]
    fn init_schema_creates_tables() {
        let conn = test_db();

        for table in ["providers", "products", "price_history"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[test]
    fn upsert_provider_is_idempotent_by_name() {
        let conn = test_db();

        let first = upsert_provider(&conn, "provider-a", "http://localhost:3001").unwrap();
        let second = upsert_provider(&conn, "provider-a", "http://other:9000").unwrap();

        // Same row, refreshed base URL
        assert_eq!(first.id, second.id);
        assert_eq!(second.base_url, "http://other:9000");
        assert!(second.is_active);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM providers", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn find_active_providers_skips_inactive() {
        let conn = test_db();
        upsert_provider(&conn, "provider-a", "http://a").unwrap();
        upsert_provider(&conn, "provider-b", "http://b").unwrap();
        conn.execute(
            "UPDATE providers SET is_active = 0 WHERE name = 'provider-b'",
            [],
        )
        .unwrap();

        let active = find_active_providers(&conn).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "provider-a");
    }

    #[test]
    fn create_product_writes_product_and_initial_history() {
        let mut conn = test_db();
        let provider = upsert_provider(&conn, "provider-a", "http://a").unwrap();

        let product = make_test_product("a-1", "49.99");
        let id = create_product(&mut conn, provider.id, &product, &history_from(&product)).unwrap();

        let stored = find_product(&conn, "a-1", provider.id).unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.current_price, Decimal::from_str("49.99").unwrap());
        assert_eq!(stored.last_updated, product.last_updated);
        assert!(!stored.is_stale);

        let history = history_for_product(&conn, id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].price, Decimal::from_str("49.99").unwrap());
    }

    #[test]
    fn find_product_returns_none_for_unknown_identity() {
        let conn = test_db();
        let provider = upsert_provider(&conn, "provider-a", "http://a").unwrap();
        assert!(find_product(&conn, "nope", provider.id).unwrap().is_none());
    }

    #[test]
    fn same_external_id_is_distinct_per_provider() {
        let mut conn = test_db();
        let a = upsert_provider(&conn, "provider-a", "http://a").unwrap();
        let b = upsert_provider(&conn, "provider-b", "http://b").unwrap();

        let product = make_test_product("x-1", "10");
        create_product(&mut conn, a.id, &product, &history_from(&product)).unwrap();
        create_product(&mut conn, b.id, &product, &history_from(&product)).unwrap();

        assert_eq!(product_count(&conn).unwrap(), 2);
    }

    #[test]
    fn update_product_with_history_appends_entry() {
        let mut conn = test_db();
        let provider = upsert_provider(&conn, "provider-a", "http://a").unwrap();

        let v1 = make_test_product("a-1", "29.99");
        let id = create_product(&mut conn, provider.id, &v1, &history_from(&v1)).unwrap();

        let v2 = make_test_product("a-1", "49.99");
        update_product(&mut conn, "a-1", provider.id, &v2, Some(&history_from(&v2))).unwrap();

        let stored = find_product(&conn, "a-1", provider.id).unwrap().unwrap();
        assert_eq!(stored.current_price, Decimal::from_str("49.99").unwrap());

        let history = history_for_product(&conn, id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].price, Decimal::from_str("49.99").unwrap());
    }

    #[test]
    fn touch_product_refreshes_bookkeeping_only() {
        let mut conn = test_db();
        let provider = upsert_provider(&conn, "provider-a", "http://a").unwrap();

        let product = make_test_product("a-1", "29.99");
        let id = create_product(&mut conn, provider.id, &product, &history_from(&product)).unwrap();
        conn.execute("UPDATE products SET is_stale = 1 WHERE id = ?1", params![id])
            .unwrap();

        let later = Utc.with_ymd_and_hms(2026, 2, 2, 10, 0, 0).unwrap();
        touch_product(&conn, "a-1", provider.id, later).unwrap();

        let stored = find_product(&conn, "a-1", provider.id).unwrap().unwrap();
        assert_eq!(stored.last_updated, later);
        assert!(!stored.is_stale);
        // Still the original price, still exactly one history row
        assert_eq!(stored.current_price, Decimal::from_str("29.99").unwrap());
        assert_eq!(history_count(&conn).unwrap(), 1);
    }

    #[test]
    fn mark_stale_flags_only_products_older_than_cutoff() {
        let mut conn = test_db();
        let provider = upsert_provider(&conn, "provider-a", "http://a").unwrap();

        let mut old = make_test_product("old", "1");
        old.last_updated = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        create_product(&mut conn, provider.id, &old, &history_from(&old)).unwrap();

        let mut fresh = make_test_product("fresh", "1");
        fresh.last_updated = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        create_product(&mut conn, provider.id, &fresh, &history_from(&fresh)).unwrap();

        let cutoff = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let flagged = mark_stale(&conn, cutoff).unwrap();
        assert_eq!(flagged, 1);

        let stored_old = find_product(&conn, "old", provider.id).unwrap().unwrap();
        let stored_fresh = find_product(&conn, "fresh", provider.id).unwrap().unwrap();
        assert!(stored_old.is_stale);
        assert!(!stored_fresh.is_stale);

        // Second sweep with the same cutoff flags nothing new
        assert_eq!(mark_stale(&conn, cutoff).unwrap(), 0);
    }

    #[test]
    fn price_round_trips_exactly_through_storage() {
        let mut conn = test_db();
        let provider = upsert_provider(&conn, "provider-a", "http://a").unwrap();

        for (external_id, price) in [("p1", "0.1"), ("p2", "49.99"), ("p3", "1234.5678")] {
            let product = make_test_product(external_id, price);
            create_product(&mut conn, provider.id, &product, &history_from(&product)).unwrap();
            let stored = find_product(&conn, external_id, provider.id)
                .unwrap()
                .unwrap();
            assert_eq!(stored.current_price, Decimal::from_str(price).unwrap());
        }
    }

    #[test]
    fn description_none_round_trips() {
        let mut conn = test_db();
        let provider = upsert_provider(&conn, "provider-a", "http://a").unwrap();

        let mut product = make_test_product("a-1", "1");
        product.description = None;
        create_product(&mut conn, provider.id, &product, &history_from(&product)).unwrap();

        let stored = find_product(&conn, "a-1", provider.id).unwrap().unwrap();
        assert_eq!(stored.description, None);
    }
}
