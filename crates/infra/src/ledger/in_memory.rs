use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use stockroom_core::ExpectedVersion;
use stockroom_inventory::{MovementRecord, MovementRecorded, StockKey};

use super::query::{LedgerFilter, LedgerOrdering, LedgerPage, Pagination};
use super::{LedgerStore, LedgerStoreError, validate_batch};

#[derive(Debug, Default)]
struct Ledger {
    /// Index `i` holds position `i + 1`.
    entries: Vec<MovementRecord>,
    streams: HashMap<StockKey, Vec<usize>>,
    by_idempotency_key: HashMap<Uuid, Vec<usize>>,
    last_created_at: Option<DateTime<Utc>>,
}

impl Ledger {
    fn stream_version(&self, key: &StockKey) -> u64 {
        self.streams.get(key).map(|s| s.len() as u64).unwrap_or(0)
    }

    /// Wall clock, bumped so no two entries share a timestamp.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let at = match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(at);
        at
    }
}

/// In-memory ledger store.
///
/// One write lock covers the version check and the insert, which makes each
/// batch atomic and serializes appends per store. Intended for tests and
/// single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    ledger: RwLock<Ledger>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ledger.read().map(|l| l.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> LedgerStoreError {
    LedgerStoreError::Unavailable("ledger lock poisoned".to_string())
}

impl LedgerStore for InMemoryLedgerStore {
    fn append_atomic(
        &self,
        key: StockKey,
        entries: Vec<MovementRecorded>,
        expected: ExpectedVersion,
    ) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        if entries.is_empty() {
            return Ok(vec![]);
        }
        validate_batch(key, &entries)?;

        let mut ledger = self.ledger.write().map_err(|_| poisoned())?;

        let current = ledger.stream_version(&key);
        if !expected.matches(current) {
            return Err(LedgerStoreError::Concurrency(format!(
                "stream {key}: expected {expected:?}, found {current}"
            )));
        }
        if let Some(token) = entries[0].idempotency_key {
            if ledger.by_idempotency_key.contains_key(&token) {
                return Err(LedgerStoreError::DuplicateIdempotencyKey(token));
            }
        }

        // Every check has passed; nothing below can fail.
        let mut committed = Vec::with_capacity(entries.len());
        for (offset, entry) in entries.into_iter().enumerate() {
            let index = ledger.entries.len();
            let created_at = ledger.next_created_at();
            let record = entry.commit(current + offset as u64 + 1, index as u64 + 1, created_at);

            ledger.streams.entry(key).or_default().push(index);
            if let Some(token) = record.idempotency_key {
                ledger.by_idempotency_key.entry(token).or_default().push(index);
            }
            ledger.entries.push(record.clone());
            committed.push(record);
        }

        Ok(committed)
    }

    fn load_stream(&self, key: StockKey) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        let ledger = self.ledger.read().map_err(|_| poisoned())?;
        Ok(ledger
            .streams
            .get(&key)
            .map(|idx| idx.iter().map(|i| ledger.entries[*i].clone()).collect())
            .unwrap_or_default())
    }

    fn query(
        &self,
        filter: &LedgerFilter,
        ordering: LedgerOrdering,
        pagination: Pagination,
    ) -> Result<LedgerPage, LedgerStoreError> {
        let ledger = self.ledger.read().map_err(|_| poisoned())?;

        let mut matching: Vec<&MovementRecord> =
            ledger.entries.iter().filter(|r| filter.matches(r)).collect();
        if ordering == LedgerOrdering::NewestFirst {
            matching.reverse();
        }

        let total = matching.len() as u64;
        let records = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();

        Ok(LedgerPage {
            records,
            total,
            pagination,
        })
    }

    fn read_after(&self, after: u64, limit: usize) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        let ledger = self.ledger.read().map_err(|_| poisoned())?;
        let start = usize::try_from(after).unwrap_or(usize::MAX).min(ledger.entries.len());
        Ok(ledger.entries[start..].iter().take(limit).cloned().collect())
    }

    fn find_by_idempotency_key(&self, key: Uuid) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        let ledger = self.ledger.read().map_err(|_| poisoned())?;
        Ok(ledger
            .by_idempotency_key
            .get(&key)
            .map(|idx| idx.iter().map(|i| ledger.entries[*i].clone()).collect())
            .unwrap_or_default())
    }

    fn head_position(&self) -> Result<u64, LedgerStoreError> {
        let ledger = self.ledger.read().map_err(|_| poisoned())?;
        Ok(ledger.entries.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::{LocationId, MaterialId, MovementId, UserId};
    use stockroom_inventory::MovementKind;

    fn key() -> StockKey {
        StockKey::new(MaterialId::new(), LocationId::new())
    }

    fn entry(key: StockKey, kind: MovementKind, quantity: i64) -> MovementRecorded {
        MovementRecorded {
            movement_id: MovementId::new(),
            material_id: key.material_id,
            location_id: key.location_id,
            kind,
            quantity,
            worker_name: None,
            reason: None,
            user_id: UserId::new(),
            idempotency_key: None,
        }
    }

    #[test]
    fn append_assigns_sequence_position_and_monotonic_time() {
        let store = InMemoryLedgerStore::new();
        let a = key();
        let b = key();

        let first = store
            .append_atomic(
                a,
                vec![entry(a, MovementKind::Adjustment, 5), entry(a, MovementKind::Out, 5)],
                ExpectedVersion::Exact(0),
            )
            .unwrap();
        let second = store.append(entry(b, MovementKind::In, 3), ExpectedVersion::Exact(0)).unwrap();

        assert_eq!(
            first.iter().map(|r| (r.sequence_number, r.position)).collect::<Vec<_>>(),
            vec![(1, 1), (2, 2)]
        );
        assert_eq!((second.sequence_number, second.position), (1, 3));
        assert!(first[0].created_at < first[1].created_at);
        assert!(first[1].created_at < second.created_at);
        assert_eq!(store.head_position().unwrap(), 3);
    }

    #[test]
    fn stale_expected_version_is_a_conflict_and_writes_nothing() {
        let store = InMemoryLedgerStore::new();
        let a = key();
        store.append(entry(a, MovementKind::In, 1), ExpectedVersion::Exact(0)).unwrap();

        let err = store
            .append_atomic(
                a,
                vec![entry(a, MovementKind::Adjustment, 1), entry(a, MovementKind::Out, 2)],
                ExpectedVersion::Exact(0),
            )
            .unwrap_err();

        assert!(matches!(err, LedgerStoreError::Concurrency(_)));
        assert_eq!(store.load_stream(a).unwrap().len(), 1);
    }

    #[test]
    fn invalid_batch_is_rejected_whole() {
        let store = InMemoryLedgerStore::new();
        let a = key();

        let err = store
            .append_atomic(
                a,
                vec![entry(a, MovementKind::In, 2), entry(key(), MovementKind::In, 2)],
                ExpectedVersion::Any,
            )
            .unwrap_err();

        assert!(matches!(err, LedgerStoreError::InvalidAppend(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn idempotency_key_is_unique_per_ledger() {
        let store = InMemoryLedgerStore::new();
        let a = key();
        let token = Uuid::now_v7();
        let mut first = entry(a, MovementKind::In, 2);
        first.idempotency_key = Some(token);
        store.append(first, ExpectedVersion::Any).unwrap();

        let mut again = entry(a, MovementKind::In, 2);
        again.idempotency_key = Some(token);
        let err = store.append(again, ExpectedVersion::Any).unwrap_err();

        assert_eq!(err, LedgerStoreError::DuplicateIdempotencyKey(token));
        assert_eq!(store.find_by_idempotency_key(token).unwrap().len(), 1);
    }

    #[test]
    fn query_filters_orders_and_counts() {
        let store = InMemoryLedgerStore::new();
        let a = key();
        let b = key();
        for q in 1..=3 {
            store.append(entry(a, MovementKind::In, q), ExpectedVersion::Any).unwrap();
        }
        store.append(entry(b, MovementKind::In, 9), ExpectedVersion::Any).unwrap();

        let page = store
            .query(
                &LedgerFilter::for_material(a.material_id),
                LedgerOrdering::NewestFirst,
                Pagination::page(1, 2),
            )
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.records.iter().map(|r| r.quantity).collect::<Vec<_>>(), vec![3, 2]);
        assert!(page.has_more());
        assert!(store.references_location(b.location_id).unwrap());
        assert!(!store.references_material(MaterialId::new()).unwrap());
    }

    #[test]
    fn read_after_tails_by_position() {
        let store = InMemoryLedgerStore::new();
        let a = key();
        for q in 1..=5 {
            store.append(entry(a, MovementKind::In, q), ExpectedVersion::Any).unwrap();
        }

        let tail = store.read_after(2, 2).unwrap();
        assert_eq!(tail.iter().map(|r| r.position).collect::<Vec<_>>(), vec![3, 4]);
        assert!(store.read_after(5, 10).unwrap().is_empty());
        assert!(store.read_after(99, 10).unwrap().is_empty());
    }
}
