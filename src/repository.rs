use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};

use crate::evaluator;
use crate::models::{NewTrackedItem, PricePoint, StockSnapshot, TrackedItem};
use crate::utils::error::StorageError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tracked_items (
        id TEXT PRIMARY KEY,
        product_ref TEXT NOT NULL,
        region TEXT NOT NULL,
        target_size TEXT NOT NULL,
        label TEXT NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT 1,
        invalid BOOLEAN NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        last_checked TEXT,
        UNIQUE(product_ref, region, target_size)
    )",
    "CREATE TABLE IF NOT EXISTS stock_snapshots (
        item_id TEXT PRIMARY KEY REFERENCES tracked_items(id) ON DELETE CASCADE,
        observed_at TEXT NOT NULL,
        price INTEGER NOT NULL,
        currency TEXT NOT NULL,
        sizes TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS price_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id TEXT NOT NULL REFERENCES tracked_items(id) ON DELETE CASCADE,
        observed_at TEXT NOT NULL,
        price INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_price_history_item
        ON price_history(item_id, observed_at)",
    "CREATE TABLE IF NOT EXISTS user_settings (
        setting_key TEXT PRIMARY KEY,
        setting_value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
];

/// Result of folding one poll observation into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Snapshot that was current before this write, for transition
    /// evaluation.
    pub previous: Option<StockSnapshot>,
    /// False when the observation was stale and discarded.
    pub snapshot_written: bool,
    pub price_recorded: bool,
}

/// Durable store for tracked items, their current snapshot, price history
/// and user settings. The only mutation point for item lifecycle; the
/// scheduler writes snapshots and flags, nothing else.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Opens (creating if missing) the SQLite store at `path` with WAL
    /// journaling for concurrent reader access from the dashboard.
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(60))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let repository = Self { pool };
        repository.init_schema().await?;
        Ok(repository)
    }

    /// In-memory store for tests. Single connection, so every handle sees
    /// the same database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(StorageError::from)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let repository = Self { pool };
        repository.init_schema().await?;
        Ok(repository)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn create_item(&self, new_item: NewTrackedItem) -> Result<TrackedItem, StorageError> {
        let item = TrackedItem::new(new_item);
        sqlx::query(
            "INSERT INTO tracked_items
                (id, product_ref, region, target_size, label, enabled, invalid, created_at, last_checked)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id)
        .bind(&item.product_ref)
        .bind(&item.region)
        .bind(&item.target_size)
        .bind(&item.label)
        .bind(item.enabled)
        .bind(item.invalid)
        .bind(item.created_at)
        .bind(item.last_checked)
        .execute(&self.pool)
        .await?;

        Ok(item)
    }

    pub async fn get_item(&self, item_id: &str) -> Result<Option<TrackedItem>, StorageError> {
        let item = sqlx::query_as::<_, TrackedItem>(
            "SELECT * FROM tracked_items WHERE id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    pub async fn list_items(&self) -> Result<Vec<TrackedItem>, StorageError> {
        let items = sqlx::query_as::<_, TrackedItem>(
            "SELECT * FROM tracked_items ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Items the poll cycle sweeps: enabled and not flagged invalid.
    pub async fn list_pollable(&self) -> Result<Vec<TrackedItem>, StorageError> {
        let items = sqlx::query_as::<_, TrackedItem>(
            "SELECT * FROM tracked_items WHERE enabled = 1 AND invalid = 0 ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Returns false when no such item exists.
    pub async fn set_enabled(&self, item_id: &str, enabled: bool) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE tracked_items SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Flags an item whose product is gone upstream so the dashboard can
    /// surface it for removal. Written only by the poll path.
    pub async fn mark_invalid(&self, item_id: &str, invalid: bool) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE tracked_items SET invalid = ? WHERE id = ?")
            .bind(invalid)
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes an item together with its snapshot and price history.
    pub async fn delete_item(&self, item_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM tracked_items WHERE id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn current_snapshot(
        &self,
        item_id: &str,
    ) -> Result<Option<StockSnapshot>, StorageError> {
        let row = sqlx::query(
            "SELECT observed_at, price, currency, sizes FROM stock_snapshots WHERE item_id = ?",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| snapshot_from_row(&row)).transpose()
    }

    /// Folds one poll observation into the store in a single transaction:
    /// replaces the current snapshot, appends a price point when the price
    /// differs from the last recorded one, and stamps `last_checked`.
    ///
    /// If two fetches for the same item were somehow in flight, the result
    /// carrying the older observation time loses: it is discarded whole and
    /// `snapshot_written` comes back false.
    pub async fn record_observation(
        &self,
        item_id: &str,
        snapshot: &StockSnapshot,
    ) -> Result<Observation, StorageError> {
        let mut tx = self.pool.begin().await?;

        let previous = sqlx::query(
            "SELECT observed_at, price, currency, sizes FROM stock_snapshots WHERE item_id = ?",
        )
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| snapshot_from_row(&row))
        .transpose()?;

        if let Some(prev) = &previous {
            if prev.observed_at >= snapshot.observed_at {
                tx.rollback().await?;
                return Ok(Observation {
                    previous,
                    snapshot_written: false,
                    price_recorded: false,
                });
            }
        }

        let sizes_json = serde_json::to_string(&snapshot.sizes)?;
        sqlx::query(
            "INSERT INTO stock_snapshots (item_id, observed_at, price, currency, sizes)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(item_id) DO UPDATE SET
                observed_at = excluded.observed_at,
                price = excluded.price,
                currency = excluded.currency,
                sizes = excluded.sizes",
        )
        .bind(item_id)
        .bind(snapshot.observed_at)
        .bind(snapshot.price)
        .bind(&snapshot.currency)
        .bind(&sizes_json)
        .execute(&mut *tx)
        .await?;

        let last_price: Option<i64> = sqlx::query_scalar(
            "SELECT price FROM price_history WHERE item_id = ?
             ORDER BY observed_at DESC, id DESC LIMIT 1",
        )
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await?;

        let price_recorded = evaluator::price_changed(last_price, snapshot.price);
        if price_recorded {
            sqlx::query("INSERT INTO price_history (item_id, observed_at, price) VALUES (?, ?, ?)")
                .bind(item_id)
                .bind(snapshot.observed_at)
                .bind(snapshot.price)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE tracked_items SET last_checked = ? WHERE id = ?")
            .bind(snapshot.observed_at)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Observation {
            previous,
            snapshot_written: true,
            price_recorded,
        })
    }

    /// Price points for an item, newest first.
    pub async fn price_history(
        &self,
        item_id: &str,
        limit: u32,
    ) -> Result<Vec<PricePoint>, StorageError> {
        let points = sqlx::query_as::<_, PricePoint>(
            "SELECT id, item_id, observed_at, price FROM price_history
             WHERE item_id = ? ORDER BY observed_at DESC, id DESC LIMIT ?",
        )
        .bind(item_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(points)
    }

    pub async fn get_setting(&self, key: &str, default: &str) -> Result<String, StorageError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT setting_value FROM user_settings WHERE setting_key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.unwrap_or_else(|| default.to_string()))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO user_settings (setting_key, setting_value, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(setting_key) DO UPDATE SET
                setting_value = excluded.setting_value,
                updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn snapshot_from_row(row: &SqliteRow) -> Result<StockSnapshot, StorageError> {
    let sizes_json: String = row.try_get("sizes")?;
    let sizes = serde_json::from_str(&sizes_json)?;

    Ok(StockSnapshot {
        observed_at: row.try_get("observed_at")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        sizes,
    })
}
