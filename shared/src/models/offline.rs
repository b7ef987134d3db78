//! Offline mutation queue record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entity types the offline queue can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Shift,
    BusinessDay,
    Order,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shift => "shift",
            Self::BusinessDay => "business_day",
            Self::Order => "order",
        }
    }
}

/// A mutation deferred because no network path was available
///
/// `state` carries the full replacement state of the entity, not a
/// relative delta, so replaying the same record twice is safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineMutation {
    pub id: String,
    pub entity: EntityKind,
    pub entity_id: String,
    /// Full target state to PUT on replay
    pub state: serde_json::Value,
    /// Pre-mutation snapshot, kept for diagnostics
    pub snapshot: serde_json::Value,
    pub queued_at: DateTime<Utc>,
    pub synced: bool,
}

impl OfflineMutation {
    pub fn new(
        entity: EntityKind,
        entity_id: impl Into<String>,
        state: serde_json::Value,
        snapshot: serde_json::Value,
    ) -> Self {
        Self {
            id: format!("mut_{}", Uuid::new_v4()),
            entity,
            entity_id: entity_id.into(),
            state,
            snapshot,
            queued_at: Utc::now(),
            synced: false,
        }
    }
}
