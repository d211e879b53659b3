use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use stockroom_events::{EventBus, EventEnvelope, Subscription};
use stockroom_inventory::{MovementRecord, StockKey};

use crate::aggregator::StockAggregator;
use crate::catalog::Catalog;
use crate::ledger::LedgerStore;
use crate::projections::StockSnapshot;
use crate::read_model::ReadModelStore;

/// Longest the loop blocks before checking for shutdown.
const MAX_TICK: Duration = Duration::from_millis(250);

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Keeps a stock view inside its staleness window.
///
/// - every `poll_interval` the ledger is tailed from the last checkpoint
/// - with `push_refresh`, bus notifications are folded as they arrive
///
/// Handlers must tolerate duplicates (at-least-once delivery).
#[derive(Debug)]
pub struct RefreshWorker;

impl RefreshWorker {
    /// Spawn a refresh loop for `aggregator`, using its staleness policy.
    pub fn spawn<L, C, S, B>(aggregator: Arc<StockAggregator<L, C, S>>, bus: &B) -> io::Result<WorkerHandle>
    where
        L: LedgerStore + 'static,
        C: Catalog + 'static,
        S: ReadModelStore<StockKey, StockSnapshot> + 'static,
        B: EventBus<EventEnvelope<MovementRecord>>,
    {
        let policy = aggregator.policy().clone();
        let on_push = Arc::clone(&aggregator);
        Self::spawn_with(
            "stock-refresh",
            bus.subscribe(),
            policy.poll_interval,
            move |envelope: EventEnvelope<MovementRecord>| {
                if policy.push_refresh {
                    on_push.apply_notification(&envelope)
                } else {
                    Ok(())
                }
            },
            move || aggregator.refresh().map(|_| ()),
        )
    }

    /// Generic loop: `on_message` for every push, `on_poll` every `poll_interval`.
    pub fn spawn_with<M, H, P, E>(
        name: &'static str,
        sub: Subscription<M>,
        poll_interval: Duration,
        mut on_message: H,
        mut on_poll: P,
    ) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        P: FnMut() -> Result<(), E> + Send + 'static,
        E: std::fmt::Display,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new().name(name.to_string()).spawn(move || {
            worker_loop(name, sub, shutdown_rx, poll_interval, &mut on_message, &mut on_poll)
        })?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, H, P, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    poll_interval: Duration,
    on_message: &mut H,
    on_poll: &mut P,
) where
    H: FnMut(M) -> Result<(), E>,
    P: FnMut() -> Result<(), E>,
    E: std::fmt::Display,
{
    let tick = poll_interval.clamp(Duration::from_millis(1), MAX_TICK);
    let mut last_poll: Option<Instant> = None;

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        if last_poll.is_none_or(|at| at.elapsed() >= poll_interval) {
            if let Err(err) = on_poll() {
                warn!(worker = name, error = %err, "periodic stock refresh failed");
            }
            last_poll = Some(Instant::now());
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if let Err(err) = on_message(msg) {
                    warn!(worker = name, error = %err, "push refresh failed; next poll will catch up");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!(worker = name, "bus closed; stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use stockroom_events::InMemoryEventBus;

    #[test]
    fn polls_and_handles_pushes_until_shutdown() {
        let bus: InMemoryEventBus<u32> = InMemoryEventBus::new();
        let pushes = Arc::new(AtomicUsize::new(0));
        let polls = Arc::new(AtomicUsize::new(0));

        let (p, q) = (pushes.clone(), polls.clone());
        let handle = RefreshWorker::spawn_with(
            "test-refresh",
            bus.subscribe(),
            Duration::from_millis(5),
            move |m: u32| {
                p.fetch_add(m as usize, Ordering::SeqCst);
                Ok::<(), String>(())
            },
            move || {
                q.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();

        bus.publish(2).unwrap();
        bus.publish(3).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while (pushes.load(Ordering::SeqCst) < 5 || polls.load(Ordering::SeqCst) < 2) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        handle.shutdown();

        assert_eq!(pushes.load(Ordering::SeqCst), 5);
        assert!(polls.load(Ordering::SeqCst) >= 2);
    }
}
