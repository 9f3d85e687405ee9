use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::generate_id;

/// A (product variant, target size, region) tuple the user wants monitored.
///
/// Created and deleted only through the repository's CRUD surface; the poll
/// path touches `invalid` and `last_checked`, the user toggles `enabled`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct TrackedItem {
    pub id: String,
    /// Provider-side variant identifier.
    pub product_ref: String,
    pub region: String,
    pub target_size: String,
    /// Display name shown in alerts and the dashboard.
    pub label: String,
    pub enabled: bool,
    /// Set when the product is gone upstream, so the user can remove it.
    pub invalid: bool,
    pub created_at: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrackedItem {
    pub product_ref: String,
    pub region: String,
    pub target_size: String,
    pub label: Option<String>,
}

impl TrackedItem {
    pub fn new(new_item: NewTrackedItem) -> Self {
        Self {
            id: generate_id(),
            label: new_item
                .label
                .unwrap_or_else(|| new_item.product_ref.clone()),
            product_ref: new_item.product_ref,
            region: new_item.region,
            target_size: new_item.target_size,
            enabled: true,
            invalid: false,
            created_at: Utc::now(),
            last_checked: None,
        }
    }

    /// Items the scheduler polls: enabled and not flagged invalid upstream.
    pub fn is_pollable(&self) -> bool {
        self.enabled && !self.invalid
    }
}
