//! Movement Recorder: validates a movement, decides its ledger entries, and
//! appends them as one atomic batch.
//!
//! ```text
//! request + acting user
//!   ↓
//! 1. authenticate, validate input, check catalog references
//!   ↓
//! 2. idempotency key already committed? → return those records
//!   ↓
//! 3. load the (material, location) stream and rebuild StockPosition
//!   ↓
//! 4. decide: [ADJUSTMENT(shortfall)], MOVEMENT
//!   ↓
//! 5. append_atomic with ExpectedVersion::Exact(version)
//!      └─ Concurrency → back off, go to 3 (bounded by RetryPolicy)
//!   ↓
//! 6. fold into the aggregator (writer sees its own write)
//!   ↓
//! 7. publish change notifications (failure is reported, never fatal)
//! ```

use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use stockroom_auth::Identity;
use stockroom_core::{Aggregate, AggregateRoot, ExpectedVersion, LocationId, MaterialId};
use stockroom_events::{EventBus, EventEnvelope};
use stockroom_inventory::{
    MovementError, MovementKind, MovementRecord, RecordMovement, StockKey, StockPosition,
};

use crate::aggregator::StockAggregator;
use crate::catalog::Catalog;
use crate::ledger::{LedgerStore, LedgerStoreError};
use crate::projections::StockSnapshot;
use crate::read_model::{InMemoryReadModelStore, ReadModelStore};
use crate::retry::RetryPolicy;

/// A movement as submitted by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub material_id: MaterialId,
    pub location_id: LocationId,
    #[serde(rename = "entry_type")]
    pub kind: MovementKind,
    pub quantity: i64,
    #[serde(default)]
    pub worker_name: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    /// Deduplication token for client retries.
    #[serde(default)]
    pub idempotency_key: Option<Uuid>,
}

impl MovementRequest {
    pub fn new(material_id: MaterialId, location_id: LocationId, kind: MovementKind, quantity: i64) -> Self {
        Self {
            material_id,
            location_id,
            kind,
            quantity,
            worker_name: None,
            reason: None,
            idempotency_key: None,
        }
    }

    pub fn with_worker(mut self, worker_name: impl Into<String>) -> Self {
        self.worker_name = Some(worker_name.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: Uuid) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.material_id, self.location_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    /// Committed entries in ledger order; the requested movement is last.
    pub records: Vec<MovementRecord>,
    /// Stock for the key right after these entries.
    pub current_stock: i64,
    /// Ledger position of the requested movement.
    pub position: u64,
    /// The idempotency key had already been committed; nothing new was written.
    pub deduplicated: bool,
    /// Set when the change notification could not be published.
    pub notification_error: Option<String>,
}

impl RecordOutcome {
    pub fn movement(&self) -> Option<&MovementRecord> {
        self.records.last()
    }

    /// The compensating entry, when the request needed one.
    pub fn adjustment(&self) -> Option<&MovementRecord> {
        match self.records.as_slice() {
            [adjustment, _] => Some(adjustment),
            _ => None,
        }
    }
}

/// Caller-facing error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    ValidationError,
    ReferenceError,
    AuthorizationError,
    /// Retry the whole request.
    ConflictError,
    PersistenceFailure,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "ValidationError",
            Self::ReferenceError => "ReferenceError",
            Self::AuthorizationError => "AuthorizationError",
            Self::ConflictError => "ConflictError",
            Self::PersistenceFailure => "PersistenceFailure",
        }
    }
}

/// Every variant means nothing was written for this request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("quantity must be greater than zero (got {0})")]
    InvalidQuantity(i64),

    #[error("worker name is required for outbound movements")]
    MissingWorker,

    #[error("unknown {0}")]
    UnknownReference(String),

    #[error("idempotency key {0} was already used for a different material or location")]
    IdempotencyKeyReused(Uuid),

    #[error("an authenticated user is required to record movements")]
    Unauthenticated,

    #[error("concurrent writes kept conflicting after {attempts} attempts: {message}")]
    Conflict { attempts: u32, message: String },

    #[error("ledger write failed: {0}")]
    PersistenceFailure(String),
}

impl RecordError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidQuantity(_) | Self::MissingWorker | Self::IdempotencyKeyReused(_) => {
                ErrorCategory::ValidationError
            }
            Self::UnknownReference(_) => ErrorCategory::ReferenceError,
            Self::Unauthenticated => ErrorCategory::AuthorizationError,
            Self::Conflict { .. } => ErrorCategory::ConflictError,
            Self::PersistenceFailure(_) => ErrorCategory::PersistenceFailure,
        }
    }
}

impl From<MovementError> for RecordError {
    fn from(value: MovementError) -> Self {
        match value {
            MovementError::InvalidQuantity(q) | MovementError::QuantityOutOfRange { quantity: q, .. } => {
                Self::InvalidQuantity(q)
            }
            MovementError::MissingWorker => Self::MissingWorker,
            other => Self::PersistenceFailure(other.to_string()),
        }
    }
}

fn persistence(err: LedgerStoreError) -> RecordError {
    RecordError::PersistenceFailure(err.to_string())
}

pub struct MovementRecorder<L, C, B, S = InMemoryReadModelStore<StockKey, StockSnapshot>>
where
    S: ReadModelStore<StockKey, StockSnapshot>,
{
    aggregator: Arc<StockAggregator<L, C, S>>,
    bus: B,
    retry: RetryPolicy,
}

impl<L, C, B, S> MovementRecorder<L, C, B, S>
where
    L: LedgerStore,
    C: Catalog,
    B: EventBus<EventEnvelope<MovementRecord>>,
    S: ReadModelStore<StockKey, StockSnapshot>,
{
    pub fn new(aggregator: Arc<StockAggregator<L, C, S>>, bus: B, retry: RetryPolicy) -> Self {
        Self { aggregator, bus, retry }
    }

    pub fn aggregator(&self) -> &Arc<StockAggregator<L, C, S>> {
        &self.aggregator
    }

    /// Record one movement on behalf of `acting_user`.
    ///
    /// An OUT above current stock is committed together with an ADJUSTMENT
    /// for the shortfall, never on its own.
    #[instrument(
        skip(self, request, acting_user),
        fields(
            material_id = %request.material_id,
            location_id = %request.location_id,
            kind = %request.kind,
            quantity = request.quantity,
        ),
        err
    )]
    pub fn record(
        &self,
        request: MovementRequest,
        acting_user: Option<&Identity>,
    ) -> Result<RecordOutcome, RecordError> {
        let identity = acting_user.ok_or(RecordError::Unauthenticated)?;
        let key = request.key();
        let command = RecordMovement {
            material_id: request.material_id,
            location_id: request.location_id,
            kind: request.kind,
            quantity: request.quantity,
            worker_name: request.worker_name,
            reason: request.reason,
            acting_user: identity.user_id,
            idempotency_key: request.idempotency_key,
        };

        // Input checks do not depend on stock, so run them before any IO.
        StockPosition::empty(key).handle(&command)?;

        let catalog = self.aggregator.catalog();
        if !catalog.material_exists(command.material_id) {
            return Err(RecordError::UnknownReference(format!("material {}", command.material_id)));
        }
        if !catalog.location_exists(command.location_id) {
            return Err(RecordError::UnknownReference(format!("location {}", command.location_id)));
        }

        if let Some(token) = command.idempotency_key {
            let existing = self.aggregator.ledger().find_by_idempotency_key(token).map_err(persistence)?;
            if !existing.is_empty() {
                return self.already_committed(token, key, existing);
            }
        }

        let ledger = self.aggregator.ledger();
        let mut retries = 0;
        let (records, current_stock) = loop {
            let history = ledger.load_stream(key).map_err(persistence)?;
            let mut position = StockPosition::from_records(key, &history)?;
            let entries = position.handle(&command)?;

            match ledger.append_atomic(key, entries.clone(), ExpectedVersion::Exact(position.version())) {
                Ok(committed) => {
                    for entry in &entries {
                        position.apply(entry);
                    }
                    break (committed, position.stock());
                }
                Err(LedgerStoreError::Concurrency(message)) => {
                    if !self.retry.should_retry(retries) {
                        return Err(RecordError::Conflict {
                            attempts: retries + 1,
                            message,
                        });
                    }
                    retries += 1;
                    let delay = self.retry.delay_for_attempt(retries);
                    warn!(attempt = retries, delay_ms = delay.as_millis() as u64, %message, "ledger append conflicted; retrying");
                    thread::sleep(delay);
                }
                Err(LedgerStoreError::DuplicateIdempotencyKey(token)) => {
                    let existing = ledger.find_by_idempotency_key(token).map_err(persistence)?;
                    return self.already_committed(token, key, existing);
                }
                Err(err) => return Err(persistence(err)),
            }
        };

        if let [adjustment, _] = records.as_slice() {
            info!(
                shortfall = adjustment.quantity,
                adjustment_id = %adjustment.id,
                "recorded stock adjustment to cover outbound shortfall"
            );
        }

        if let Err(err) = self.aggregator.observe_committed(&records) {
            warn!(error = %err, "committed movement not folded into stock view; it will appear on next refresh");
        }
        let notification_error = self.notify(&records);

        let position = records.last().map(|r| r.position).unwrap_or(0);
        debug!(position, current_stock, entries = records.len(), "movement recorded");
        Ok(RecordOutcome {
            records,
            current_stock,
            position,
            deduplicated: false,
            notification_error,
        })
    }

    fn already_committed(
        &self,
        token: Uuid,
        key: StockKey,
        existing: Vec<MovementRecord>,
    ) -> Result<RecordOutcome, RecordError> {
        let Some(last) = existing.last() else {
            return Err(RecordError::PersistenceFailure(format!(
                "idempotency key {token} reported committed but no entries were found"
            )));
        };
        if existing.iter().any(|r| r.key() != key) {
            return Err(RecordError::IdempotencyKeyReused(token));
        }
        let position = last.position;

        if let Err(err) = self.aggregator.observe_committed(&existing) {
            warn!(error = %err, "replayed movement not folded into stock view");
        }
        info!(idempotency_key = %token, position, "movement already recorded; returning committed entries");

        Ok(RecordOutcome {
            current_stock: self.aggregator.materialized_stock(&key),
            records: existing,
            position,
            deduplicated: true,
            notification_error: None,
        })
    }

    fn notify(&self, records: &[MovementRecord]) -> Option<String> {
        for record in records {
            if let Err(err) = self.bus.publish(record.to_envelope()) {
                warn!(error = ?err, position = record.position, "change notification failed; observers fall back to polling");
                return Some(format!("{err:?}"));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::aggregator::StalenessPolicy;
    use crate::catalog::InMemoryCatalog;
    use crate::ledger::InMemoryLedgerStore;
    use stockroom_core::UserId;
    use stockroom_events::InMemoryEventBus;
    use stockroom_inventory::{NewLocation, NewMaterial, StatusBands};

    type Recorder = MovementRecorder<
        Arc<InMemoryLedgerStore>,
        Arc<InMemoryCatalog>,
        Arc<InMemoryEventBus<EventEnvelope<MovementRecord>>>,
    >;

    struct Fixture {
        recorder: Recorder,
        ledger: Arc<InMemoryLedgerStore>,
        bus: Arc<InMemoryEventBus<EventEnvelope<MovementRecord>>>,
        material: MaterialId,
        location: LocationId,
        user: Identity,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::new());
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let material = catalog
            .create_material(NewMaterial {
                name: "Gloves".to_string(),
                unit: "pairs".to_string(),
                min_quantity: 5,
                max_quantity: 20,
                ..Default::default()
            })
            .unwrap()
            .id;
        let location = catalog
            .create_location(NewLocation {
                name: "Main".to_string(),
                description: None,
            })
            .unwrap()
            .id;
        let aggregator = Arc::new(StockAggregator::in_memory(
            ledger.clone(),
            catalog,
            StatusBands::default(),
            StalenessPolicy {
                poll_interval: Duration::from_secs(3600),
                push_refresh: false,
            },
        ));
        Fixture {
            recorder: MovementRecorder::new(aggregator, bus.clone(), RetryPolicy::fixed(3, Duration::ZERO)),
            ledger,
            bus,
            material,
            location,
            user: Identity::new(UserId::new()),
        }
    }

    #[test]
    fn outbound_shortfall_is_covered_by_one_adjustment() {
        let f = fixture();
        let outcome = f
            .recorder
            .record(
                MovementRequest::new(f.material, f.location, MovementKind::Out, 5).with_worker("Alice"),
                Some(&f.user),
            )
            .unwrap();

        let adjustment = outcome.adjustment().unwrap();
        assert_eq!((adjustment.kind, adjustment.quantity), (MovementKind::Adjustment, 5));
        assert_eq!(adjustment.worker_name, None);
        assert_eq!(
            adjustment.reason.as_deref(),
            Some("Stock adjustment to match physical inventory: No reason provided")
        );
        let out = outcome.movement().unwrap();
        assert_eq!((out.kind, out.quantity, out.worker_name.as_deref()), (MovementKind::Out, 5, Some("Alice")));
        assert_eq!(out.user_id, f.user.user_id);
        assert_eq!(outcome.current_stock, 0);
        assert_eq!(outcome.position, 2);
    }

    #[test]
    fn missing_identity_writes_nothing() {
        let f = fixture();
        let err = f
            .recorder
            .record(MovementRequest::new(f.material, f.location, MovementKind::In, 3), None)
            .unwrap_err();
        assert_eq!(err, RecordError::Unauthenticated);
        assert_eq!(err.category(), ErrorCategory::AuthorizationError);
        assert!(f.ledger.is_empty());
    }

    #[test]
    fn input_and_reference_errors_write_nothing() {
        let f = fixture();
        let cases = [
            (MovementRequest::new(f.material, f.location, MovementKind::In, 0), ErrorCategory::ValidationError),
            (
                MovementRequest::new(f.material, f.location, MovementKind::Out, 2).with_worker("  "),
                ErrorCategory::ValidationError,
            ),
            (
                MovementRequest::new(MaterialId::new(), f.location, MovementKind::In, 2),
                ErrorCategory::ReferenceError,
            ),
            (
                MovementRequest::new(f.material, LocationId::new(), MovementKind::In, 2),
                ErrorCategory::ReferenceError,
            ),
        ];
        for (request, category) in cases {
            let err = f.recorder.record(request, Some(&f.user)).unwrap_err();
            assert_eq!(err.category(), category, "{err}");
        }
        assert!(f.ledger.is_empty());
    }

    #[test]
    fn inbound_that_would_overflow_stock_is_rejected_before_writing() {
        let f = fixture();
        f.recorder
            .record(MovementRequest::new(f.material, f.location, MovementKind::In, i64::MAX), Some(&f.user))
            .unwrap();

        let err = f
            .recorder
            .record(MovementRequest::new(f.material, f.location, MovementKind::In, 1), Some(&f.user))
            .unwrap_err();
        assert_eq!(err, RecordError::InvalidQuantity(1));
        assert_eq!(err.category(), ErrorCategory::ValidationError);
        assert_eq!(f.ledger.len(), 1);

        // The key stays usable.
        let outcome = f
            .recorder
            .record(
                MovementRequest::new(f.material, f.location, MovementKind::Out, 7).with_worker("Alice"),
                Some(&f.user),
            )
            .unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.current_stock, i64::MAX - 7);
        assert!(f.recorder.aggregator().verify().unwrap().is_consistent());
    }

    #[test]
    fn retried_idempotency_key_returns_committed_entries() {
        let f = fixture();
        let token = Uuid::now_v7();
        let request = MovementRequest::new(f.material, f.location, MovementKind::Out, 2)
            .with_worker("Bob")
            .with_idempotency_key(token);

        let first = f.recorder.record(request.clone(), Some(&f.user)).unwrap();
        let again = f.recorder.record(request, Some(&f.user)).unwrap();

        assert!(!first.deduplicated);
        assert!(again.deduplicated);
        assert_eq!(again.records, first.records);
        assert_eq!(again.current_stock, 0);
        assert_eq!(f.ledger.len(), 2);

        let other = f
            .recorder
            .aggregator()
            .catalog()
            .create_location(NewLocation {
                name: "Overflow".to_string(),
                description: None,
            })
            .unwrap();
        let elsewhere = MovementRequest::new(f.material, other.id, MovementKind::In, 1).with_idempotency_key(token);
        let err = f.recorder.record(elsewhere, Some(&f.user)).unwrap_err();
        assert_eq!(err, RecordError::IdempotencyKeyReused(token));
        assert_eq!(f.ledger.len(), 2);
    }

    #[test]
    fn committed_entries_are_published() {
        let f = fixture();
        let sub = f.bus.subscribe();
        let outcome = f
            .recorder
            .record(MovementRequest::new(f.material, f.location, MovementKind::In, 4), Some(&f.user))
            .unwrap();

        let pushed = sub.drain();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].payload(), &outcome.records[0]);
        assert_eq!(outcome.notification_error, None);
        assert_eq!(f.recorder.aggregator().materialized_stock(&StockKey::new(f.material, f.location)), 4);
    }
}
