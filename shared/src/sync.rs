//! Cross-terminal sync messages
//!
//! When a resource changes on one terminal (or on the backend), a
//! `SyncEnvelope` is pushed to every connected terminal. The envelope
//! itself is untyped wire data; `SyncEvent::from_envelope` is the
//! runtime guard that turns it into a tagged variant before it may
//! enter the event bus.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{BusinessDay, CashMovement, CashierShift, Order};

/// Network-pushed change notification
///
/// # Example
/// - `resource`: "shift"
/// - `action`: "updated"
/// - `id`: "shift_123"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    /// Resource type ("shift", "business_day", "order")
    pub resource: String,
    /// Change type ("created", "updated", "deleted", "operation")
    pub action: String,
    /// Id of the changed entity
    pub id: String,
    /// Resource data, None for deletions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Why an envelope was rejected at the bus boundary
#[derive(Debug, Error)]
pub enum SyncGuardError {
    #[error("unknown sync resource: {0}")]
    UnknownResource(String),

    #[error("unknown action {action} for resource {resource}")]
    UnknownAction { resource: String, action: String },

    #[error("malformed {resource} payload: {source}")]
    Malformed {
        resource: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing payload for {resource} {action}")]
    MissingData { resource: String, action: String },
}

/// Typed sync event, one variant per topic
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A shift was created or updated elsewhere
    CashierUpdated { shift: CashierShift },
    /// A cash movement happened on an open shift elsewhere
    CashierOperation {
        shift_id: String,
        movement: CashMovement,
    },
    /// An order changed elsewhere
    OrderUpdated { order: Order },
    /// An order was deleted elsewhere
    OrderDeleted { order_id: String },
    /// The business day changed elsewhere
    BusinessDayUpdated { day: BusinessDay },
}

impl SyncEvent {
    /// Bus topic this event is published on
    pub fn topic(&self) -> &'static str {
        match self {
            Self::CashierUpdated { .. } => "sync:cashier:update",
            Self::CashierOperation { .. } => "sync:cashier:operation",
            Self::OrderUpdated { .. } => "sync:order:update",
            Self::OrderDeleted { .. } => "sync:order:delete",
            Self::BusinessDayUpdated { .. } => "sync:business_day:update",
        }
    }

    /// Id of the entity the event refers to
    pub fn entity_id(&self) -> &str {
        match self {
            Self::CashierUpdated { shift } => &shift.id,
            Self::CashierOperation { shift_id, .. } => shift_id,
            Self::OrderUpdated { order } => &order.id,
            Self::OrderDeleted { order_id } => order_id,
            Self::BusinessDayUpdated { day } => &day.id,
        }
    }

    /// Validate and type an inbound envelope
    pub fn from_envelope(envelope: &SyncEnvelope) -> Result<Self, SyncGuardError> {
        fn parse<T: serde::de::DeserializeOwned>(
            envelope: &SyncEnvelope,
        ) -> Result<T, SyncGuardError> {
            let data = envelope
                .data
                .as_ref()
                .ok_or_else(|| SyncGuardError::MissingData {
                    resource: envelope.resource.clone(),
                    action: envelope.action.clone(),
                })?;
            serde_json::from_value(data.clone()).map_err(|source| SyncGuardError::Malformed {
                resource: envelope.resource.clone(),
                source,
            })
        }

        match (envelope.resource.as_str(), envelope.action.as_str()) {
            ("shift", "created") | ("shift", "updated") => Ok(Self::CashierUpdated {
                shift: parse(envelope)?,
            }),
            ("shift", "operation") => Ok(Self::CashierOperation {
                shift_id: envelope.id.clone(),
                movement: parse(envelope)?,
            }),
            ("order", "created") | ("order", "updated") => Ok(Self::OrderUpdated {
                order: parse(envelope)?,
            }),
            ("order", "deleted") => Ok(Self::OrderDeleted {
                order_id: envelope.id.clone(),
            }),
            ("business_day", "created") | ("business_day", "updated") => {
                Ok(Self::BusinessDayUpdated {
                    day: parse(envelope)?,
                })
            }
            ("shift", action) | ("order", action) | ("business_day", action) => {
                Err(SyncGuardError::UnknownAction {
                    resource: envelope.resource.clone(),
                    action: action.to_string(),
                })
            }
            (resource, _) => Err(SyncGuardError::UnknownResource(resource.to_string())),
        }
    }
}
