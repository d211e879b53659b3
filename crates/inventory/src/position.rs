//! Stock position aggregate: the decision state for one (material, location).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use stockroom_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, LocationId, MaterialId, MovementId, UserId,
};

use crate::movement::{MovementKind, MovementRecord, MovementRecorded, STOCK_STREAM_TYPE};

/// Compound key of a stock stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub material_id: MaterialId,
    pub location_id: LocationId,
}

impl StockKey {
    pub fn new(material_id: MaterialId, location_id: LocationId) -> Self {
        Self {
            material_id,
            location_id,
        }
    }

    /// Ledger stream id for this key.
    pub fn stream_id(&self) -> AggregateId {
        AggregateId::derived(
            STOCK_STREAM_TYPE,
            &[self.material_id.as_uuid(), self.location_id.as_uuid()],
        )
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.material_id, self.location_id)
    }
}

/// Command: record one movement intent against a stock stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub material_id: MaterialId,
    pub location_id: LocationId,
    pub kind: MovementKind,
    pub quantity: i64,
    #[serde(default)]
    pub worker_name: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub acting_user: UserId,
    #[serde(default)]
    pub idempotency_key: Option<Uuid>,
}

impl RecordMovement {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.material_id, self.location_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MovementError {
    #[error("quantity must be greater than zero (got {0})")]
    InvalidQuantity(i64),

    #[error("worker name is required for outbound movements")]
    MissingWorker,

    #[error("command addressed {found} but stream holds {expected}")]
    KeyMismatch { expected: StockKey, found: StockKey },

    #[error("quantity {quantity} would take stock of {stock} past the supported range")]
    QuantityOutOfRange { stock: i64, quantity: i64 },

    #[error("stream for {key} is out of order at entry {found} (expected {expected})")]
    CorruptStream { key: StockKey, expected: u64, found: u64 },

    #[error("stream for {key} overflows at entry {sequence}")]
    StockOverflow { key: StockKey, sequence: u64 },
}

impl From<MovementError> for DomainError {
    fn from(value: MovementError) -> Self {
        match value {
            MovementError::InvalidQuantity(_)
            | MovementError::MissingWorker
            | MovementError::QuantityOutOfRange { .. } => DomainError::validation(value.to_string()),
            MovementError::KeyMismatch { .. }
            | MovementError::CorruptStream { .. }
            | MovementError::StockOverflow { .. } => DomainError::invariant(value.to_string()),
        }
    }
}

/// Reason written on a compensating adjustment.
pub fn adjustment_reason(operator_reason: Option<&str>) -> String {
    let detail = operator_reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("No reason provided");
    format!("Stock adjustment to match physical inventory: {detail}")
}

/// Current stock of one (material, location), folded from its stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockPosition {
    key: StockKey,
    stock: i64,
    version: u64,
}

impl StockPosition {
    /// A stream with no entries yet.
    pub fn empty(key: StockKey) -> Self {
        Self {
            key,
            stock: 0,
            version: 0,
        }
    }

    /// Rehydrate from a loaded stream, checking it is contiguous from 1.
    pub fn from_records(key: StockKey, records: &[MovementRecord]) -> Result<Self, MovementError> {
        let mut position = Self::empty(key);
        for record in records {
            if record.key() != key {
                return Err(MovementError::KeyMismatch {
                    expected: key,
                    found: record.key(),
                });
            }
            let expected = position.version + 1;
            if record.sequence_number != expected {
                return Err(MovementError::CorruptStream {
                    key,
                    expected,
                    found: record.sequence_number,
                });
            }
            position.stock = position
                .stock
                .checked_add(record.signed_quantity())
                .ok_or(MovementError::StockOverflow {
                    key,
                    sequence: record.sequence_number,
                })?;
            position.version = expected;
        }
        Ok(position)
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn stock(&self) -> i64 {
        self.stock
    }
}

impl AggregateRoot for StockPosition {
    type Id = StockKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for StockPosition {
    type Command = RecordMovement;
    type Event = MovementRecorded;
    type Error = MovementError;

    /// `handle` never emits a batch that leaves the `i64` range.
    fn apply(&mut self, event: &Self::Event) {
        self.stock = self.stock.saturating_add(event.signed_quantity());
        self.version += 1;
    }

    /// Decide the entries for one movement.
    ///
    /// An outbound quantity above current stock is preceded by an adjustment
    /// for the shortfall, so the stream never sums below zero.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if command.key() != self.key {
            return Err(MovementError::KeyMismatch {
                expected: self.key,
                found: command.key(),
            });
        }
        if command.quantity <= 0 {
            return Err(MovementError::InvalidQuantity(command.quantity));
        }

        let worker_name = command
            .worker_name
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_string);
        if command.kind == MovementKind::Out && worker_name.is_none() {
            return Err(MovementError::MissingWorker);
        }
        let reason = command
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        let entry = |kind, quantity, worker_name, reason| MovementRecorded {
            movement_id: MovementId::new(),
            material_id: command.material_id,
            location_id: command.location_id,
            kind,
            quantity,
            worker_name,
            reason,
            user_id: command.acting_user,
            idempotency_key: command.idempotency_key,
        };

        let mut events = Vec::with_capacity(2);
        let available = self.stock.max(0);
        if command.kind == MovementKind::Out && command.quantity > available {
            events.push(entry(
                MovementKind::Adjustment,
                command.quantity - available,
                None,
                Some(adjustment_reason(reason.as_deref())),
            ));
        }
        events.push(entry(command.kind, command.quantity, worker_name, reason));

        let mut running = self.stock;
        for event in &events {
            running = running
                .checked_add(event.signed_quantity())
                .ok_or(MovementError::QuantityOutOfRange {
                    stock: self.stock,
                    quantity: command.quantity,
                })?;
        }
        Ok(events)
    }
}
