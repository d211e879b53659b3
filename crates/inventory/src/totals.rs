//! Whole-ledger stock fold.
//!
//! `StockTotals` is the reference derivation of current stock: replaying the
//! ledger in position order and summing signed quantities per key. Read
//! models elsewhere are checked against it.

use std::collections::{BTreeMap, BTreeSet};

use stockroom_events::{EventEnvelope, Projection, ProjectionError, ProjectionRunner};

use crate::movement::MovementRecord;
use crate::position::StockKey;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockTotals {
    by_key: BTreeMap<StockKey, i64>,
    /// Keys whose sum left the `i64` range; their totals are saturated.
    overflowed: BTreeSet<StockKey>,
}

impl StockTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold committed records, which must be in strictly increasing position order.
    pub fn replay(records: &[MovementRecord]) -> Result<Self, ProjectionError> {
        let envelopes: Vec<_> = records.iter().map(MovementRecord::to_envelope).collect();
        let (totals, _) = ProjectionRunner::rebuild_from_scratch(Self::new, &envelopes)?;
        Ok(totals)
    }

    /// Stock for `key`; zero when the key has no entries.
    pub fn get(&self, key: &StockKey) -> i64 {
        self.by_key.get(key).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StockKey, &i64)> {
        self.by_key.iter()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Keys whose ledger sums below zero. Always empty for a healthy ledger.
    pub fn negative_keys(&self) -> Vec<StockKey> {
        self.by_key
            .iter()
            .filter(|(_, v)| **v < 0)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Keys whose ledger sums past the `i64` range. Always empty for a healthy ledger.
    pub fn overflowed_keys(&self) -> Vec<StockKey> {
        self.overflowed.iter().copied().collect()
    }
}

impl Projection for StockTotals {
    type Ev = MovementRecord;

    fn apply(&mut self, envelope: &EventEnvelope<MovementRecord>) {
        let record = envelope.payload();
        let key = record.key();
        let total = self.by_key.entry(key).or_insert(0);
        match total.checked_add(record.signed_quantity()) {
            Some(sum) => *total = sum,
            None => {
                *total = total.saturating_add(record.signed_quantity());
                self.overflowed.insert(key);
            }
        }
    }
}
