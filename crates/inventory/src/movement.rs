//! Ledger entries.
//!
//! A movement is recorded as a [`MovementRecorded`] (decided, not yet
//! committed) and comes back from the store as a [`MovementRecord`] once it
//! has an ordering position and a server timestamp.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockroom_core::{DomainError, LocationId, MaterialId, MovementId, UserId};
use stockroom_events::{Event, EventEnvelope};

use crate::position::StockKey;

/// Stream type for per-(material, location) stock streams.
pub const STOCK_STREAM_TYPE: &str = "inventory.stock";

/// Direction of a ledger entry. Quantities are always stored positive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    In,
    Out,
    Adjustment,
}

impl MovementKind {
    /// Contribution of `quantity` to current stock.
    pub fn signed(self, quantity: i64) -> i64 {
        match self {
            MovementKind::In | MovementKind::Adjustment => quantity,
            MovementKind::Out => -quantity,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::In => "in",
            MovementKind::Out => "out",
            MovementKind::Adjustment => "adjustment",
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" => Ok(MovementKind::In),
            "out" => Ok(MovementKind::Out),
            "adjustment" => Ok(MovementKind::Adjustment),
            other => Err(DomainError::validation(format!("unknown movement kind '{other}'"))),
        }
    }
}

/// A decided ledger entry awaiting an atomic append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub movement_id: MovementId,
    pub material_id: MaterialId,
    pub location_id: LocationId,
    pub kind: MovementKind,
    pub quantity: i64,
    pub worker_name: Option<String>,
    pub reason: Option<String>,
    pub user_id: UserId,
    /// Caller-supplied deduplication token, shared by every entry of one `record()`.
    pub idempotency_key: Option<Uuid>,
}

impl MovementRecorded {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.material_id, self.location_id)
    }

    pub fn signed_quantity(&self) -> i64 {
        self.kind.signed(self.quantity)
    }

    /// Stamp the store-assigned ordering and timestamp onto this entry.
    pub fn commit(self, sequence_number: u64, position: u64, created_at: DateTime<Utc>) -> MovementRecord {
        MovementRecord {
            id: self.movement_id,
            material_id: self.material_id,
            location_id: self.location_id,
            kind: self.kind,
            quantity: self.quantity,
            worker_name: self.worker_name,
            reason: self.reason,
            user_id: self.user_id,
            idempotency_key: self.idempotency_key,
            sequence_number,
            position,
            created_at,
        }
    }
}

/// A committed, immutable ledger entry.
///
/// Serialized in the persisted record shape (`entry_type` carries the kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: MovementId,
    pub material_id: MaterialId,
    pub location_id: LocationId,
    #[serde(rename = "entry_type")]
    pub kind: MovementKind,
    pub quantity: i64,
    pub worker_name: Option<String>,
    pub reason: Option<String>,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<Uuid>,
    /// 1-based revision within the (material, location) stream.
    pub sequence_number: u64,
    /// 1-based store-wide append order.
    pub position: u64,
    pub created_at: DateTime<Utc>,
}

impl MovementRecord {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.material_id, self.location_id)
    }

    pub fn signed_quantity(&self) -> i64 {
        self.kind.signed(self.quantity)
    }

    /// Strip the commit metadata, e.g. to re-fold a loaded stream.
    pub fn as_recorded(&self) -> MovementRecorded {
        MovementRecorded {
            movement_id: self.id,
            material_id: self.material_id,
            location_id: self.location_id,
            kind: self.kind,
            quantity: self.quantity,
            worker_name: self.worker_name.clone(),
            reason: self.reason.clone(),
            user_id: self.user_id,
            idempotency_key: self.idempotency_key,
        }
    }

    pub fn to_envelope(&self) -> EventEnvelope<MovementRecord> {
        EventEnvelope::new(
            *self.id.as_uuid(),
            self.key().stream_id(),
            STOCK_STREAM_TYPE,
            self.sequence_number,
            self.position,
            self.clone(),
        )
    }
}

impl Event for MovementRecord {
    fn event_type(&self) -> &'static str {
        "inventory.movement.recorded"
    }

    fn version(&self) -> u32 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_is_the_only_debit() {
        assert_eq!(MovementKind::In.signed(4), 4);
        assert_eq!(MovementKind::Adjustment.signed(4), 4);
        assert_eq!(MovementKind::Out.signed(4), -4);
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("OUT".parse::<MovementKind>().unwrap(), MovementKind::Out);
        assert!("transfer".parse::<MovementKind>().is_err());
    }

    #[test]
    fn committed_record_serializes_in_persisted_shape() {
        let record = MovementRecorded {
            movement_id: MovementId::new(),
            material_id: MaterialId::new(),
            location_id: LocationId::new(),
            kind: MovementKind::Out,
            quantity: 5,
            worker_name: Some("Alice".to_string()),
            reason: None,
            user_id: UserId::new(),
            idempotency_key: None,
        }
        .commit(2, 17, Utc::now());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["entry_type"], "out");
        assert_eq!(json["quantity"], 5);
        assert_eq!(json["worker_name"], "Alice");
        assert!(json["reason"].is_null());
        assert!(json.get("idempotency_key").is_none());
    }

    #[test]
    fn envelope_is_addressed_to_the_stock_stream() {
        let record = MovementRecorded {
            movement_id: MovementId::new(),
            material_id: MaterialId::new(),
            location_id: LocationId::new(),
            kind: MovementKind::In,
            quantity: 3,
            worker_name: None,
            reason: None,
            user_id: UserId::new(),
            idempotency_key: None,
        }
        .commit(1, 9, Utc::now());

        let env = record.to_envelope();
        assert_eq!(env.stream_type(), STOCK_STREAM_TYPE);
        assert_eq!(env.stream_id(), record.key().stream_id());
        assert_eq!(env.position(), 9);
        assert_eq!(env.sequence_number(), 1);
    }
}
