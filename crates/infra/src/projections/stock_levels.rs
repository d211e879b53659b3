use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use stockroom_core::{LocationId, MaterialId};
use stockroom_events::EventEnvelope;
use stockroom_inventory::{MovementRecord, StockKey};

use crate::ledger::{LedgerStore, LedgerStoreError};
use crate::read_model::ReadModelStore;

/// Materialized stock for one (material, location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub material_id: MaterialId,
    pub location_id: LocationId,
    pub current_stock: i64,
    /// Stream revision folded so far.
    pub last_sequence: u64,
    /// Ledger position of the newest folded entry.
    pub last_position: u64,
}

impl StockSnapshot {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.material_id, self.location_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    /// Already folded; nothing changed.
    Duplicate,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockProjectionError {
    #[error("stream {key} skipped from sequence {last} to {found}")]
    SequenceGap { key: StockKey, last: u64, found: u64 },

    #[error("stream {key} overflows stock at sequence {sequence}")]
    StockOverflow { key: StockKey, sequence: u64 },

    #[error("envelope metadata does not match its record: {0}")]
    EnvelopeMismatch(String),

    #[error("projection state lock poisoned")]
    Poisoned,

    #[error(transparent)]
    Ledger(#[from] LedgerStoreError),
}

/// Current stock per (material, location), folded from ledger records.
///
/// Two ways in:
/// - `apply` takes records from any source (the writer's own commits, bus
///   pushes). A per-stream sequence cursor drops duplicates and refuses gaps.
/// - `catch_up` tails the ledger by position from `checkpoint`, the point
///   below which every entry is known to be folded.
///
/// `generation` increases on every change so dependents can cache results.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: ReadModelStore<StockKey, StockSnapshot>,
{
    store: S,
    cursors: Mutex<HashMap<StockKey, u64>>,
    checkpoint: AtomicU64,
    generation: AtomicU64,
}

impl<S> StockLevelsProjection<S>
where
    S: ReadModelStore<StockKey, StockSnapshot>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: Mutex::new(HashMap::new()),
            checkpoint: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &StockKey) -> Option<StockSnapshot> {
        self.store.get(key)
    }

    pub fn list(&self) -> Vec<StockSnapshot> {
        self.store.list()
    }

    pub fn checkpoint(&self) -> u64 {
        self.checkpoint.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Fold one committed record.
    pub fn apply(&self, record: &MovementRecord) -> Result<Applied, StockProjectionError> {
        let key = record.key();
        let mut cursors = self.cursors.lock().map_err(|_| StockProjectionError::Poisoned)?;
        let last = cursors.get(&key).copied().unwrap_or(0);
        let found = record.sequence_number;

        if found <= last {
            return Ok(Applied::Duplicate);
        }
        if found != last + 1 {
            return Err(StockProjectionError::SequenceGap { key, last, found });
        }

        let current = self.store.get(&key).map(|s| s.current_stock).unwrap_or(0);
        let current_stock = current
            .checked_add(record.signed_quantity())
            .ok_or(StockProjectionError::StockOverflow { key, sequence: found })?;
        self.store.upsert(
            key,
            StockSnapshot {
                material_id: key.material_id,
                location_id: key.location_id,
                current_stock,
                last_sequence: found,
                last_position: record.position,
            },
        );
        cursors.insert(key, found);
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(Applied::Updated)
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<MovementRecord>) -> Result<Applied, StockProjectionError> {
        let record = envelope.payload();
        if envelope.sequence_number() != record.sequence_number
            || envelope.position() != record.position
            || envelope.stream_id() != record.key().stream_id()
        {
            return Err(StockProjectionError::EnvelopeMismatch(format!(
                "envelope {} carries record {}",
                envelope.event_id(),
                record.id
            )));
        }
        self.apply(record)
    }

    /// Fold every ledger entry after `checkpoint`, `batch_size` at a time.
    /// Returns the number of records read.
    pub fn catch_up<L>(&self, ledger: &L, batch_size: usize) -> Result<usize, StockProjectionError>
    where
        L: LedgerStore + ?Sized,
    {
        let batch_size = batch_size.max(1);
        let mut read = 0;
        loop {
            let from = self.checkpoint();
            let batch = ledger.read_after(from, batch_size)?;
            let Some(last) = batch.last().map(|r| r.position) else {
                break;
            };
            for record in &batch {
                self.apply(record)?;
            }
            read += batch.len();
            self.checkpoint.fetch_max(last, Ordering::AcqRel);
            if batch.len() < batch_size {
                break;
            }
        }
        if read > 0 {
            debug!(read, checkpoint = self.checkpoint(), "stock projection caught up");
        }
        Ok(read)
    }

    /// Drop all state and refold the ledger from position 1.
    pub fn rebuild<L>(&self, ledger: &L, batch_size: usize) -> Result<usize, StockProjectionError>
    where
        L: LedgerStore + ?Sized,
    {
        {
            let mut cursors = self.cursors.lock().map_err(|_| StockProjectionError::Poisoned)?;
            cursors.clear();
            self.store.clear();
            self.checkpoint.store(0, Ordering::Release);
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        self.catch_up(ledger, batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedgerStore;
    use crate::read_model::InMemoryReadModelStore;
    use stockroom_core::{ExpectedVersion, MovementId, UserId};
    use stockroom_inventory::{MovementKind, MovementRecorded};

    fn projection() -> StockLevelsProjection<InMemoryReadModelStore<StockKey, StockSnapshot>> {
        StockLevelsProjection::new(InMemoryReadModelStore::new())
    }

    fn recorded(key: StockKey, kind: MovementKind, quantity: i64) -> MovementRecorded {
        MovementRecorded {
            movement_id: MovementId::new(),
            material_id: key.material_id,
            location_id: key.location_id,
            kind,
            quantity,
            worker_name: Some("Ana".to_string()),
            reason: None,
            user_id: UserId::new(),
            idempotency_key: None,
        }
    }

    #[test]
    fn duplicates_are_ignored_and_gaps_refused() {
        let ledger = InMemoryLedgerStore::new();
        let key = StockKey::new(MaterialId::new(), LocationId::new());
        let r1 = ledger.append(recorded(key, MovementKind::In, 10), ExpectedVersion::Exact(0)).unwrap();
        let r2 = ledger.append(recorded(key, MovementKind::Out, 4), ExpectedVersion::Exact(1)).unwrap();
        let r3 = ledger.append(recorded(key, MovementKind::In, 1), ExpectedVersion::Exact(2)).unwrap();

        let p = projection();
        assert_eq!(p.apply(&r1).unwrap(), Applied::Updated);
        assert_eq!(p.apply(&r1).unwrap(), Applied::Duplicate);
        assert_eq!(
            p.apply(&r3).unwrap_err(),
            StockProjectionError::SequenceGap { key, last: 1, found: 3 }
        );
        p.apply(&r2).unwrap();
        p.apply(&r3).unwrap();

        let snap = p.get(&key).unwrap();
        assert_eq!(snap.current_stock, 7);
        assert_eq!(snap.last_sequence, 3);
        assert_eq!(snap.last_position, 3);
    }

    #[test]
    fn catch_up_pages_and_skips_already_applied_records() {
        let ledger = InMemoryLedgerStore::new();
        let a = StockKey::new(MaterialId::new(), LocationId::new());
        let b = StockKey::new(MaterialId::new(), LocationId::new());
        let first = ledger.append(recorded(a, MovementKind::In, 5), ExpectedVersion::Any).unwrap();
        for _ in 0..4 {
            ledger.append(recorded(b, MovementKind::In, 2), ExpectedVersion::Any).unwrap();
        }

        let p = projection();
        p.apply(&first).unwrap();
        assert_eq!(p.checkpoint(), 0);

        assert_eq!(p.catch_up(&ledger, 2).unwrap(), 5);
        assert_eq!(p.checkpoint(), 5);
        assert_eq!(p.get(&a).unwrap().current_stock, 5);
        assert_eq!(p.get(&b).unwrap().current_stock, 8);
        assert_eq!(p.catch_up(&ledger, 2).unwrap(), 0);
    }

    #[test]
    fn rebuild_matches_incremental_state() {
        let ledger = InMemoryLedgerStore::new();
        let key = StockKey::new(MaterialId::new(), LocationId::new());
        ledger.append(recorded(key, MovementKind::In, 9), ExpectedVersion::Any).unwrap();
        ledger.append(recorded(key, MovementKind::Out, 9), ExpectedVersion::Any).unwrap();

        let p = projection();
        p.catch_up(&ledger, 10).unwrap();
        let before = p.list();
        let generation = p.generation();

        p.rebuild(&ledger, 1).unwrap();
        assert_eq!(p.list(), before);
        assert!(p.generation() > generation);
    }

    #[test]
    fn overflowing_stream_is_refused_without_breaking_other_keys() {
        let ledger = InMemoryLedgerStore::new();
        let full = StockKey::new(MaterialId::new(), LocationId::new());
        let other = StockKey::new(MaterialId::new(), LocationId::new());
        let r1 = ledger.append(recorded(full, MovementKind::In, i64::MAX), ExpectedVersion::Exact(0)).unwrap();
        let r2 = ledger.append(recorded(full, MovementKind::In, 1), ExpectedVersion::Exact(1)).unwrap();
        let r3 = ledger.append(recorded(other, MovementKind::In, 3), ExpectedVersion::Exact(0)).unwrap();

        let p = projection();
        p.apply(&r1).unwrap();
        assert_eq!(
            p.apply(&r2).unwrap_err(),
            StockProjectionError::StockOverflow { key: full, sequence: 2 }
        );
        assert_eq!(p.get(&full).unwrap().current_stock, i64::MAX);
        assert_eq!(p.get(&full).unwrap().last_sequence, 1);

        assert_eq!(p.apply(&r3).unwrap(), Applied::Updated);
        assert_eq!(p.get(&other).unwrap().current_stock, 3);
    }

    #[test]
    fn envelope_must_describe_its_record() {
        let ledger = InMemoryLedgerStore::new();
        let key = StockKey::new(MaterialId::new(), LocationId::new());
        let record = ledger.append(recorded(key, MovementKind::In, 1), ExpectedVersion::Any).unwrap();

        let p = projection();
        let forged = EventEnvelope::new(record.id.into(), key.stream_id(), "inventory.stock", 2, 1, record.clone());
        assert!(matches!(
            p.apply_envelope(&forged),
            Err(StockProjectionError::EnvelopeMismatch(_))
        ));
        assert_eq!(p.apply_envelope(&record.to_envelope()).unwrap(), Applied::Updated);
    }
}
