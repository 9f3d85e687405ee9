use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::evaluator::{Transition, TransitionKind};

pub mod webhook;

pub use webhook::WebhookDispatcher;

/// Everything a delivery mechanism needs to render an alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockAlert {
    pub item_id: String,
    pub label: String,
    pub target_size: String,
    /// Minor currency units at the observation that produced the alert.
    pub price: i64,
    pub currency: String,
    pub transition: Transition,
}

/// Delivery mechanism boundary. Fire-and-forget: the core emits at most one
/// dispatch per transition and never retries duplicate sends itself.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, alert: &StockAlert);
}

/// Logs alerts through tracing. The default when no webhook is configured.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, alert: &StockAlert) {
        tracing::info!(
            item = %alert.label,
            size = %alert.target_size,
            kind = ?alert.transition.kind,
            price = alert.price,
            "stock alert"
        );
    }
}

/// Human-readable one-liner shared by delivery mechanisms.
pub fn format_alert_message(alert: &StockAlert) -> String {
    match alert.transition.kind {
        TransitionKind::BecameAvailable => format!(
            "Size {} of {} is now in stock ({})",
            alert.target_size,
            alert.label,
            format_price(alert.price, &alert.currency)
        ),
        TransitionKind::WentOutOfStock => format!(
            "Size {} of {} went out of stock",
            alert.target_size, alert.label
        ),
    }
}

pub fn format_price(minor: i64, currency: &str) -> String {
    format!("{}.{:02} {}", minor / 100, (minor % 100).abs(), currency)
}
