use crate::{Event, EventEnvelope};

/// A projection builds a read model from the append-only ledger.
///
/// Read models are disposable. They can be dropped and rebuilt by replaying
/// the ledger from position 1, and replaying the same envelopes in the same
/// order must always produce the same state.
///
/// Implementations should be idempotent with respect to redelivery. The
/// [`ProjectionRunner`](crate::ProjectionRunner) guards ordering; stateful
/// projections fed directly from a bus guard it themselves.
pub trait Projection {
    type Ev: Event;

    /// Fold a single committed envelope into the read model.
    fn apply(&mut self, envelope: &EventEnvelope<Self::Ev>);
}
