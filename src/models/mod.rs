use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod price_history;
pub mod snapshot;
pub mod tracked_item;

// Re-exports for convenience
pub use price_history::*;
pub use snapshot::*;
pub use tracked_item::*;

/// Availability of one size as reported by the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
    Unknown,
}

impl StockStatus {
    /// Purchasable right now.
    pub fn is_available(self) -> bool {
        matches!(self, StockStatus::InStock | StockStatus::LowStock)
    }

    /// Maps the upstream availability strings. Anything unrecognized
    /// ("back_soon", "coming_soon", future schema drift) is Unknown rather
    /// than a guess in either direction.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "in_stock" => StockStatus::InStock,
            "low_on_stock" | "low_stock" => StockStatus::LowStock,
            "out_of_stock" => StockStatus::OutOfStock,
            _ => StockStatus::Unknown,
        }
    }
}

// Helper function to generate ids in the format expected by the database
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
