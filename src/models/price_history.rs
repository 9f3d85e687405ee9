use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One appended price observation for a tracked item.
///
/// Entries are append-only and deduplicated on write: two consecutive points
/// for the same item never carry the same price.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct PricePoint {
    pub id: i64,
    pub item_id: String,
    pub observed_at: DateTime<Utc>,
    /// Minor currency units.
    pub price: i64,
}
