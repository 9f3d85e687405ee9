use serde::{Deserialize, Serialize};

use crate::models::{StockSnapshot, StockStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// The target size became purchasable. The only kind that triggers a
    /// notification by default.
    BecameAvailable,
    /// The target size sold out. Recorded, dispatched only when configured.
    WentOutOfStock,
}

/// A classified change between two consecutive snapshots' target-size
/// status. Ephemeral: produced and consumed within one poll cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub item_id: String,
    pub size: String,
    pub from: StockStatus,
    pub to: StockStatus,
    /// Price at the new observation, minor currency units.
    pub price: i64,
    pub kind: TransitionKind,
}

/// Compares the target size's status across two chronologically adjacent
/// snapshots of the same item.
///
/// The first observation of an item only establishes a baseline, so adding
/// an already-in-stock product does not fire an alert. An Unknown status in
/// the new snapshot never counts as evidence of change.
pub fn evaluate(
    item_id: &str,
    target_size: &str,
    previous: Option<&StockSnapshot>,
    new: &StockSnapshot,
) -> Option<Transition> {
    let previous = previous?;
    let from = previous.status_for(target_size);
    let to = new.status_for(target_size);

    let kind = match (from, to) {
        (
            StockStatus::OutOfStock | StockStatus::Unknown,
            StockStatus::InStock | StockStatus::LowStock,
        ) => TransitionKind::BecameAvailable,
        (
            StockStatus::InStock | StockStatus::LowStock,
            StockStatus::OutOfStock,
        ) => TransitionKind::WentOutOfStock,
        _ => return None,
    };

    Some(Transition {
        item_id: item_id.to_string(),
        size: target_size.to_string(),
        from,
        to,
        price: new.price,
        kind,
    })
}

/// Whether a price point should be appended, given the item's most recent
/// recorded price. Independent of any stock transition.
pub fn price_changed(last_recorded: Option<i64>, new_price: i64) -> bool {
    last_recorded != Some(new_price)
}
