//! Domain models

pub mod business_day;
pub mod cashier;
pub mod log;
pub mod offline;
pub mod order;

pub use business_day::{BusinessDay, BusinessDayPatch, BusinessDayStatus};
pub use cashier::{
    CashMovement, CashMovementKind, CashierShift, ShiftClose, ShiftOpen, ShiftPatch, ShiftStatus,
};
pub use log::{LogEntry, LogLevel};
pub use offline::{EntityKind, OfflineMutation};
pub use order::{ItemStatus, Order, OrderItem, OrderPatch, OrderStatus};
