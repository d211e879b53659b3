//! Change-notification pub/sub abstraction (mechanics only).
//!
//! The bus distributes ledger envelopes **after** they are committed. It is
//! not a source of truth: a subscriber that misses a message catches up by
//! reading the ledger from its last known position.
//!
//! - **At-least-once**: a message may be delivered more than once.
//! - **Per-publisher order**: messages from one publisher arrive in publish order.
//! - **No persistence**: the ledger store owns durability.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// A subscription to a bus (broadcast semantics: every subscriber sees every message).
///
/// ```ignore
/// let sub = bus.subscribe();
/// loop {
///     match sub.recv_timeout(poll_interval) {
///         Ok(envelope) => projection.apply_envelope(&envelope)?,
///         Err(RecvTimeoutError::Timeout) => aggregator.refresh()?,
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
///
/// A subscription is consumed by one thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Transport-agnostic event bus.
///
/// ```text
/// record() → LedgerStore (atomic append) → EventBus (publish) → subscribers
///                                                                 ├─ stock projection
///                                                                 └─ history views
/// ```
///
/// `publish()` may fail; the ledger write has already happened by then, so
/// callers treat a publish failure as a missed push and rely on polling.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
