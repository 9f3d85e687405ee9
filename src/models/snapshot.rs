use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::StockStatus;

/// A single point-in-time read of price and per-size availability for a
/// tracked item. Exactly one current snapshot is stored per item; a failed
/// poll leaves the prior snapshot untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockSnapshot {
    pub observed_at: DateTime<Utc>,
    /// Minor currency units (cents, kuruş), as the API reports them.
    pub price: i64,
    pub currency: String,
    pub sizes: HashMap<String, StockStatus>,
}

impl StockSnapshot {
    /// Status for a size label, matched case-insensitively. A size the
    /// provider did not report is Unknown: absence is no evidence either way.
    pub fn status_for(&self, size: &str) -> StockStatus {
        self.sizes
            .iter()
            .find(|(label, _)| label.eq_ignore_ascii_case(size))
            .map(|(_, status)| *status)
            .unwrap_or(StockStatus::Unknown)
    }
}
