//! Order model
//!
//! The terminal only patches status fields; pricing and fiscal
//! breakdowns are computed server-side and arrive read-only.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Active,
    Completed,
    Cancelled,
}

/// Kitchen display status of a single order item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Pending,
    Preparing,
    Ready,
    Served,
}

/// One line of an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub status: ItemStatus,
}

/// Order record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub receipt_number: String,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Whether the last local change reached the server
    #[serde(default = "default_synced")]
    pub synced: bool,
}

fn default_synced() -> bool {
    true
}

/// Partial order update - only supplied fields change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    /// (item id, new status) pairs; items not listed are untouched
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_status: Vec<(String, ItemStatus)>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderPatch {
    pub fn apply(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
        }
        for (item_id, status) in &self.item_status {
            if let Some(item) = order.items.iter_mut().find(|i| &i.id == item_id) {
                item.status = *status;
            }
        }
        if let Some(updated_at) = self.updated_at {
            order.updated_at = Some(updated_at);
        }
    }
}
