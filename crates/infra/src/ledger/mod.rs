//! Append-only movement ledger boundary.
//!
//! The ledger is the only source of truth for stock. Entries are grouped into
//! one stream per (material, location); every entry also carries a store-wide
//! `position` so readers can tail the whole ledger in commit order.

pub mod in_memory;
pub mod postgres;
pub mod query;

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use stockroom_core::{ExpectedVersion, LocationId, MaterialId};
use stockroom_inventory::{MovementRecord, MovementRecorded, StockKey};

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use query::{DEFAULT_PAGE_SIZE, LedgerFilter, LedgerOrdering, LedgerPage, MAX_PAGE_SIZE, Pagination};

/// Ledger store operation error.
///
/// Infrastructure failures only; business rules are decided before an
/// append is attempted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerStoreError {
    /// The stream moved since it was read. Retry the whole decision.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A batch already committed under this idempotency key.
    #[error("idempotency key {0} already committed")]
    DuplicateIdempotencyKey(Uuid),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// Store unreachable, timed out or aborted the transaction.
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only, transactional ledger of movement entries.
///
/// Implementations must:
/// - append a batch all-or-nothing, to a single stream
/// - check `expected` against the stream's current version inside the same
///   atomic unit as the insert
/// - assign per-stream `sequence_number`s starting at `current + 1`
/// - assign store-wide `position`s so that tailing by position never skips
///   a commit that lands after a later one was read
/// - assign `created_at` server-side, monotonic per store
pub trait LedgerStore: Send + Sync {
    /// Atomically append `entries` to the stream for `key`.
    fn append_atomic(
        &self,
        key: StockKey,
        entries: Vec<MovementRecorded>,
        expected: ExpectedVersion,
    ) -> Result<Vec<MovementRecord>, LedgerStoreError>;

    /// Single-entry append.
    fn append(
        &self,
        entry: MovementRecorded,
        expected: ExpectedVersion,
    ) -> Result<MovementRecord, LedgerStoreError> {
        let key = entry.key();
        self.append_atomic(key, vec![entry], expected)?
            .pop()
            .ok_or_else(|| LedgerStoreError::InvalidAppend("store committed nothing".to_string()))
    }

    /// Full stream for `key`, ascending by sequence number. Empty if unknown.
    fn load_stream(&self, key: StockKey) -> Result<Vec<MovementRecord>, LedgerStoreError>;

    /// Filtered, ordered, paginated read.
    fn query(
        &self,
        filter: &LedgerFilter,
        ordering: LedgerOrdering,
        pagination: Pagination,
    ) -> Result<LedgerPage, LedgerStoreError>;

    /// Up to `limit` entries with `position > after`, ascending by position.
    fn read_after(&self, after: u64, limit: usize) -> Result<Vec<MovementRecord>, LedgerStoreError>;

    /// Entries committed under `key`, ascending by position.
    fn find_by_idempotency_key(&self, key: Uuid) -> Result<Vec<MovementRecord>, LedgerStoreError>;

    /// Highest committed position (0 for an empty ledger).
    fn head_position(&self) -> Result<u64, LedgerStoreError>;

    fn references_material(&self, material_id: MaterialId) -> Result<bool, LedgerStoreError> {
        let page = self.query(
            &LedgerFilter::for_material(material_id),
            LedgerOrdering::OldestFirst,
            Pagination::new(Some(1), None),
        )?;
        Ok(page.total > 0)
    }

    fn references_location(&self, location_id: LocationId) -> Result<bool, LedgerStoreError> {
        let page = self.query(
            &LedgerFilter::for_location(location_id),
            LedgerOrdering::OldestFirst,
            Pagination::new(Some(1), None),
        )?;
        Ok(page.total > 0)
    }
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn append_atomic(
        &self,
        key: StockKey,
        entries: Vec<MovementRecorded>,
        expected: ExpectedVersion,
    ) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        (**self).append_atomic(key, entries, expected)
    }

    fn load_stream(&self, key: StockKey) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        (**self).load_stream(key)
    }

    fn query(
        &self,
        filter: &LedgerFilter,
        ordering: LedgerOrdering,
        pagination: Pagination,
    ) -> Result<LedgerPage, LedgerStoreError> {
        (**self).query(filter, ordering, pagination)
    }

    fn read_after(&self, after: u64, limit: usize) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        (**self).read_after(after, limit)
    }

    fn find_by_idempotency_key(&self, key: Uuid) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        (**self).find_by_idempotency_key(key)
    }

    fn head_position(&self) -> Result<u64, LedgerStoreError> {
        (**self).head_position()
    }
}

/// Shared pre-insert checks for a batch.
pub(crate) fn validate_batch(key: StockKey, entries: &[MovementRecorded]) -> Result<(), LedgerStoreError> {
    let batch_token = entries.first().and_then(|e| e.idempotency_key);
    for (idx, e) in entries.iter().enumerate() {
        if e.key() != key {
            return Err(LedgerStoreError::InvalidAppend(format!(
                "batch entry {idx} targets {} instead of {key}",
                e.key()
            )));
        }
        if e.quantity <= 0 {
            return Err(LedgerStoreError::InvalidAppend(format!(
                "batch entry {idx} has non-positive quantity {}",
                e.quantity
            )));
        }
        if e.idempotency_key != batch_token {
            return Err(LedgerStoreError::InvalidAppend(format!(
                "batch entry {idx} carries a different idempotency key"
            )));
        }
    }
    Ok(())
}
