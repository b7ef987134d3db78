//! Business day model
//!
//! One business day is open per store at a time; all shifts and
//! orders hang off it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Business day lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusinessDayStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "CLOSED")]
    Closed,
}

/// Business day record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessDay {
    pub id: String,
    pub status: BusinessDayStatus,
    /// Day open time
    pub opened_at: DateTime<Utc>,
    /// Day close time, None while open
    pub closed_at: Option<DateTime<Utc>>,
    /// Gross sales accumulated over the day
    pub total_sales: Decimal,
    /// Number of orders settled during the day
    pub order_count: u32,
    /// Whether the last local change reached the server
    #[serde(default = "default_synced")]
    pub synced: bool,
}

fn default_synced() -> bool {
    true
}

impl BusinessDay {
    pub fn is_open(&self) -> bool {
        self.status == BusinessDayStatus::Open
    }
}

/// Partial business day update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessDayPatch {
    pub status: Option<BusinessDayStatus>,
    pub closed_at: Option<DateTime<Utc>>,
    pub total_sales: Option<Decimal>,
    pub order_count: Option<u32>,
}

impl BusinessDayPatch {
    pub fn apply(&self, day: &mut BusinessDay) {
        if let Some(status) = self.status {
            day.status = status;
        }
        if let Some(closed_at) = self.closed_at {
            day.closed_at = Some(closed_at);
        }
        if let Some(total_sales) = self.total_sales {
            day.total_sales = total_sales;
        }
        if let Some(order_count) = self.order_count {
            day.order_count = order_count;
        }
    }
}
