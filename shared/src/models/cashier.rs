//! Cashier shift model
//!
//! A shift is owned exclusively by the terminal that opened it until
//! closed; after close it becomes read-only history.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Shift lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftStatus {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl Default for ShiftStatus {
    fn default() -> Self {
        Self::Open
    }
}

/// Cashier shift - the register session of one operator on one terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashierShift {
    pub id: String,
    /// Operator employee ID
    pub operator_id: String,
    /// Operator display name
    pub operator_name: String,
    /// Shift status
    pub status: ShiftStatus,
    /// Cash in the drawer at open
    pub starting_cash: Decimal,
    /// Cash currently in the drawer (starting + deposits - withdrawals)
    pub current_cash: Decimal,
    /// Cash counted at close, if closed
    pub counted_cash: Option<Decimal>,
    /// Shift start time
    pub opened_at: DateTime<Utc>,
    /// Shift end time, None while still open
    pub closed_at: Option<DateTime<Utc>>,
    /// Whether the last local change reached the server
    #[serde(default = "default_synced")]
    pub synced: bool,
    /// Notes
    pub note: Option<String>,
}

fn default_synced() -> bool {
    true
}

impl CashierShift {
    pub fn is_open(&self) -> bool {
        self.status == ShiftStatus::Open
    }
}

/// Open shift payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftOpen {
    pub operator_id: String,
    pub operator_name: String,
    /// Starting cash amount (default 0)
    #[serde(default)]
    pub starting_cash: Decimal,
    pub note: Option<String>,
}

/// Close shift payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftClose {
    /// Actual cash counted
    pub counted_cash: Decimal,
    pub note: Option<String>,
}

/// Cash drawer movement direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashMovementKind {
    Deposit,
    Withdraw,
}

/// A deposit into or withdrawal from the open drawer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashMovement {
    pub kind: CashMovementKind,
    pub amount: Decimal,
    pub reason: Option<String>,
}

/// Partial shift update - only supplied fields change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShiftPatch {
    pub status: Option<ShiftStatus>,
    pub current_cash: Option<Decimal>,
    pub counted_cash: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl ShiftPatch {
    /// Apply the patch, leaving unset fields untouched
    pub fn apply(&self, shift: &mut CashierShift) {
        if let Some(status) = self.status {
            shift.status = status;
        }
        if let Some(current_cash) = self.current_cash {
            shift.current_cash = current_cash;
        }
        if let Some(counted_cash) = self.counted_cash {
            shift.counted_cash = Some(counted_cash);
        }
        if let Some(closed_at) = self.closed_at {
            shift.closed_at = Some(closed_at);
        }
        if let Some(ref note) = self.note {
            shift.note = Some(note.clone());
        }
    }
}
