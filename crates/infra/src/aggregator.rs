//! Stock Aggregator: derived current stock with a bounded-staleness read policy.
//!
//! Stock is never stored as ground truth. The aggregator keeps a
//! [`StockLevelsProjection`] folded from the ledger and decides when to
//! re-read the ledger:
//!
//! - the writer's own commits are folded immediately (`observe_committed`),
//!   so a read that follows `record()` in the same causal chain sees it
//! - every other observer lags by at most `StalenessPolicy::poll_interval`:
//!   a read older than that triggers a catch-up before answering
//! - with `push_refresh`, bus notifications shorten the lag further

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use stockroom_core::{LocationId, MaterialId};
use stockroom_events::{EventEnvelope, ProjectionError};
use stockroom_inventory::{MovementRecord, StatusBands, StockKey, StockStatus, StockTotals, classify};

use crate::catalog::Catalog;
use crate::ledger::{LedgerStore, LedgerStoreError};
use crate::projections::{StockLevelsProjection, StockProjectionError, StockSnapshot};
use crate::read_model::{InMemoryReadModelStore, ReadModelStore};

/// Ledger entries read per round trip while catching up.
pub const REFRESH_BATCH_SIZE: usize = 500;

/// Maximum lag for readers other than the writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessPolicy {
    pub poll_interval: Duration,
    /// Fold bus notifications as they arrive instead of waiting for the poll.
    pub push_refresh: bool,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            push_refresh: true,
        }
    }
}

/// One row of the stock listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockLevel {
    pub material_id: MaterialId,
    pub material_name: String,
    pub unit: String,
    pub location_id: LocationId,
    pub location_name: String,
    pub current_stock: i64,
    pub min_quantity: i64,
    pub max_quantity: i64,
    pub status: StockStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockMismatch {
    pub key: StockKey,
    pub materialized: i64,
    pub replayed: i64,
}

/// Outcome of comparing the materialized view against a ledger replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Checkpoint the comparison was made at.
    pub position: u64,
    pub checked_keys: usize,
    pub mismatches: Vec<StockMismatch>,
    pub negative: Vec<StockKey>,
    /// Keys whose replay leaves the `i64` range.
    pub overflowed: Vec<StockKey>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty() && self.negative.is_empty() && self.overflowed.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error(transparent)]
    Projection(#[from] StockProjectionError),

    #[error(transparent)]
    Ledger(#[from] LedgerStoreError),

    #[error("ledger replay failed: {0}")]
    Replay(#[from] ProjectionError),
}

pub struct StockAggregator<L, C, S = InMemoryReadModelStore<StockKey, StockSnapshot>>
where
    S: ReadModelStore<StockKey, StockSnapshot>,
{
    ledger: L,
    catalog: C,
    projection: StockLevelsProjection<S>,
    bands: StatusBands,
    policy: StalenessPolicy,
    last_refresh: Mutex<Option<Instant>>,
    refreshing: Mutex<()>,
}

impl<L, C> StockAggregator<L, C>
where
    L: LedgerStore,
    C: Catalog,
{
    pub fn in_memory(ledger: L, catalog: C, bands: StatusBands, policy: StalenessPolicy) -> Self {
        Self::new(ledger, catalog, InMemoryReadModelStore::new(), bands, policy)
    }
}

impl<L, C, S> StockAggregator<L, C, S>
where
    L: LedgerStore,
    C: Catalog,
    S: ReadModelStore<StockKey, StockSnapshot>,
{
    pub fn new(ledger: L, catalog: C, store: S, bands: StatusBands, policy: StalenessPolicy) -> Self {
        Self {
            ledger,
            catalog,
            projection: StockLevelsProjection::new(store),
            bands,
            policy,
            last_refresh: Mutex::new(None),
            refreshing: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    pub fn bands(&self) -> &StatusBands {
        &self.bands
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Highest ledger position known to be fully folded.
    pub fn position(&self) -> u64 {
        self.projection.checkpoint()
    }

    /// Changes on every fold; used for caching derived views.
    pub fn generation(&self) -> u64 {
        self.projection.generation()
    }

    /// Time since the last catch-up, `None` before the first one.
    pub fn staleness(&self) -> Option<Duration> {
        self.last_refresh
            .lock()
            .ok()
            .and_then(|at| at.map(|at| at.elapsed()))
    }

    /// Stock for one key. Zero when the key has no entries.
    pub fn current_stock(&self, material_id: MaterialId, location_id: LocationId) -> Result<i64, AggregatorError> {
        self.refresh_if_stale()?;
        let key = StockKey::new(material_id, location_id);
        Ok(self.projection.get(&key).map(|s| s.current_stock).unwrap_or(0))
    }

    /// Materialized value as of now, without checking staleness.
    pub fn materialized_stock(&self, key: &StockKey) -> i64 {
        self.projection.get(key).map(|s| s.current_stock).unwrap_or(0)
    }

    /// Every key with ledger entries, joined with the catalog, ordered by
    /// material name then location name. Keys whose material has left the
    /// catalog are skipped.
    pub fn all_stock(&self) -> Result<Vec<StockLevel>, AggregatorError> {
        self.refresh_if_stale()?;

        let mut rows: Vec<StockLevel> = self
            .projection
            .list()
            .into_iter()
            .filter_map(|snapshot| self.level(&snapshot))
            .collect();
        rows.sort_by(|a, b| {
            a.material_name
                .cmp(&b.material_name)
                .then_with(|| a.location_name.cmp(&b.location_name))
                .then_with(|| a.material_id.as_uuid().cmp(b.material_id.as_uuid()))
                .then_with(|| a.location_id.as_uuid().cmp(b.location_id.as_uuid()))
        });
        Ok(rows)
    }

    fn level(&self, snapshot: &StockSnapshot) -> Option<StockLevel> {
        let material = self.catalog.material(snapshot.material_id)?;
        let location_name = self
            .catalog
            .location(snapshot.location_id)
            .map(|l| l.name)
            .unwrap_or_else(|| "Unknown".to_string());

        Some(StockLevel {
            material_id: material.id,
            status: classify(snapshot.current_stock, &material.thresholds, &self.bands),
            min_quantity: material.thresholds.min_quantity(),
            max_quantity: material.thresholds.max_quantity(),
            material_name: material.name,
            unit: material.unit,
            location_id: snapshot.location_id,
            location_name,
            current_stock: snapshot.current_stock,
        })
    }

    pub fn refresh_if_stale(&self) -> Result<(), AggregatorError> {
        let stale = match self.staleness() {
            Some(age) => age >= self.policy.poll_interval,
            None => true,
        };
        if stale {
            self.refresh()?;
        }
        Ok(())
    }

    /// Catch up with the ledger. Returns how many entries were read.
    pub fn refresh(&self) -> Result<usize, AggregatorError> {
        let _guard = self.refreshing.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let read = self.projection.catch_up(&self.ledger, REFRESH_BATCH_SIZE)?;
        if let Ok(mut at) = self.last_refresh.lock() {
            *at = Some(Instant::now());
        }
        Ok(read)
    }

    /// Make sure everything up to `position` is folded. Returns the
    /// checkpoint reached, which is below `position` only when the ledger
    /// has not committed that far.
    pub fn ensure_position(&self, position: u64) -> Result<u64, AggregatorError> {
        if self.projection.checkpoint() < position {
            self.refresh()?;
        }
        Ok(self.projection.checkpoint())
    }

    /// Fold records the caller just committed. When another writer's entry on
    /// the same stream has not been seen yet, falls back to a catch-up.
    pub fn observe_committed(&self, records: &[MovementRecord]) -> Result<(), AggregatorError> {
        for record in records {
            match self.projection.apply(record) {
                Ok(_) => {}
                Err(StockProjectionError::SequenceGap { key, last, found }) => {
                    debug!(stream = %key, last, found, "stream ahead of projection; catching up");
                    self.refresh()?;
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Fold a bus notification (at-least-once).
    pub fn apply_notification(&self, envelope: &EventEnvelope<MovementRecord>) -> Result<(), AggregatorError> {
        match self.projection.apply_envelope(envelope) {
            Ok(_) => Ok(()),
            Err(StockProjectionError::SequenceGap { .. }) => self.refresh().map(|_| ()),
            Err(err) => Err(err.into()),
        }
    }

    /// Replay the ledger from scratch and compare with the materialized view.
    ///
    /// Each materialized key is checked against the entries it claims to have
    /// folded (`last_sequence`); any other key against entries up to the
    /// checkpoint. Concurrent appends therefore never show up as mismatches.
    pub fn verify(&self) -> Result<ConsistencyReport, AggregatorError> {
        self.refresh()?;
        let position = self.projection.checkpoint();
        let snapshots: BTreeMap<StockKey, StockSnapshot> =
            self.projection.list().into_iter().map(|s| (s.key(), s)).collect();

        let mut ledger = Vec::new();
        let mut after = 0;
        loop {
            let batch = self.ledger.read_after(after, REFRESH_BATCH_SIZE)?;
            let Some(last) = batch.last().map(|r| r.position) else {
                break;
            };
            after = last;
            ledger.extend(batch.into_iter().filter(|r| match snapshots.get(&r.key()) {
                Some(s) => r.sequence_number <= s.last_sequence,
                None => r.position <= position,
            }));
        }

        let replayed = StockTotals::replay(&ledger)?;

        let mut mismatches = Vec::new();
        let mut keys: Vec<StockKey> = snapshots.keys().copied().collect();
        keys.extend(replayed.iter().map(|(k, _)| *k).filter(|k| !snapshots.contains_key(k)));
        for key in &keys {
            let materialized = snapshots.get(key).map(|s| s.current_stock).unwrap_or(0);
            let expected = replayed.get(key);
            if materialized != expected {
                mismatches.push(StockMismatch {
                    key: *key,
                    materialized,
                    replayed: expected,
                });
            }
        }

        let mut negative = replayed.negative_keys();
        negative.extend(
            snapshots
                .values()
                .filter(|s| s.current_stock < 0 && replayed.get(&s.key()) >= 0)
                .map(StockSnapshot::key),
        );

        let report = ConsistencyReport {
            position,
            checked_keys: keys.len(),
            mismatches,
            negative,
            overflowed: replayed.overflowed_keys(),
        };
        if !report.is_consistent() {
            warn!(
                position,
                mismatches = report.mismatches.len(),
                negative = report.negative.len(),
                overflowed = report.overflowed.len(),
                "stock view disagrees with ledger replay"
            );
        }
        Ok(report)
    }

    /// Discard the materialized view and refold the whole ledger.
    pub fn rebuild(&self) -> Result<usize, AggregatorError> {
        let _guard = self.refreshing.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let read = self.projection.rebuild(&self.ledger, REFRESH_BATCH_SIZE)?;
        if let Ok(mut at) = self.last_refresh.lock() {
            *at = Some(Instant::now());
        }
        Ok(read)
    }
}
