//! Infrastructure wiring: ledger store, catalog, stock views, recorder and
//! the background workers that keep observers fresh.

use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use stockroom_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use stockroom_infra::{
    InMemoryCatalog, InMemoryLedgerStore, InventoryConfig, LedgerStore, LowStockMonitor, MovementHistory,
    MovementRecorder, PostgresLedgerStore, RefreshWorker, StockAggregator, WorkerHandle,
};
#[cfg(feature = "redis")]
use stockroom_infra::notify::{DEFAULT_CHANNEL, RedisNotificationBus};
use stockroom_inventory::MovementRecord;

use crate::app::errors::ApiError;

pub type Ledger = Arc<dyn LedgerStore>;
pub type SharedCatalog = Arc<InMemoryCatalog>;
pub type Aggregator = StockAggregator<Ledger, SharedCatalog>;
pub type Recorder = MovementRecorder<Ledger, SharedCatalog, NotificationBus>;

type Envelope = EventEnvelope<MovementRecord>;

/// Message fanned out to SSE clients.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Change-notification transport selected at startup.
#[derive(Clone)]
pub enum NotificationBus {
    InMemory(Arc<InMemoryEventBus<Envelope>>),
    #[cfg(feature = "redis")]
    Redis(Arc<RedisNotificationBus>),
}

impl EventBus<Envelope> for NotificationBus {
    type Error = String;

    fn publish(&self, message: Envelope) -> Result<(), Self::Error> {
        match self {
            Self::InMemory(bus) => bus.publish(message).map_err(|e| format!("{e:?}")),
            #[cfg(feature = "redis")]
            Self::Redis(bus) => bus.publish(message).map_err(|e| e.to_string()),
        }
    }

    fn subscribe(&self) -> Subscription<Envelope> {
        match self {
            Self::InMemory(bus) => bus.subscribe(),
            #[cfg(feature = "redis")]
            Self::Redis(bus) => bus.subscribe(),
        }
    }
}

pub struct AppServices {
    pub catalog: SharedCatalog,
    pub ledger: Ledger,
    pub aggregator: Arc<Aggregator>,
    pub recorder: Recorder,
    pub monitor: LowStockMonitor<Ledger, SharedCatalog>,
    pub history: MovementHistory<Ledger, SharedCatalog>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl AppServices {
    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }

    /// Run `f` on the blocking pool.
    ///
    /// Every ledger component is synchronous; the Postgres store bridges
    /// into the runtime with `block_in_place`, which needs a blocking thread.
    pub async fn run_blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&AppServices) -> Result<T, ApiError> + Send + 'static,
    {
        let services = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&services))
            .await
            .map_err(|e| ApiError::Background(e.to_string()))?
    }

    /// Stop the background workers and wait for them.
    pub fn shutdown(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            worker.shutdown();
        }
    }
}

async fn build_ledger(config: &InventoryConfig) -> anyhow::Result<Ledger> {
    match &config.database.url {
        Some(url) => {
            let store = PostgresLedgerStore::connect(url, config.database.max_connections)
                .await
                .context("failed to connect to the ledger database")?;
            store.migrate().await.context("failed to migrate the ledger schema")?;
            tracing::info!(max_connections = config.database.max_connections, "using postgres ledger store");
            let ledger: Ledger = Arc::new(store);
            Ok(ledger)
        }
        None => {
            tracing::info!("database.url not set; using in-memory ledger store");
            let ledger: Ledger = Arc::new(InMemoryLedgerStore::new());
            Ok(ledger)
        }
    }
}

fn build_bus(config: &InventoryConfig) -> anyhow::Result<NotificationBus> {
    #[cfg(feature = "redis")]
    if let Some(url) = &config.notify.redis_url {
        let channel = config.notify.channel.clone().unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
        let bus = RedisNotificationBus::new(url, channel).context("failed to create redis notification bus")?;
        tracing::info!(channel = bus.channel(), "publishing ledger notifications to redis");
        return Ok(NotificationBus::Redis(Arc::new(bus)));
    }

    #[cfg(not(feature = "redis"))]
    if config.notify.redis_url.is_some() {
        tracing::warn!("notify.redis_url is set but the redis feature is disabled; notifications stay in-process");
    }

    Ok(NotificationBus::InMemory(Arc::new(InMemoryEventBus::new())))
}

pub async fn build_services(config: &InventoryConfig) -> anyhow::Result<AppServices> {
    let ledger = build_ledger(config).await?;
    let bus = build_bus(config)?;
    let catalog: SharedCatalog = Arc::new(InMemoryCatalog::new());

    let bands = config.status_bands().context("invalid status bands")?;
    let aggregator = Arc::new(StockAggregator::in_memory(
        ledger.clone(),
        catalog.clone(),
        bands,
        config.staleness_policy(),
    ));

    {
        let aggregator = aggregator.clone();
        let caught_up = tokio::task::spawn_blocking(move || aggregator.refresh())
            .await
            .context("initial stock refresh panicked")?
            .context("initial stock refresh failed")?;
        tracing::info!(entries = caught_up, "stock view caught up with the ledger");
    }

    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    let mut workers = Vec::with_capacity(2);
    workers.push(RefreshWorker::spawn(aggregator.clone(), &bus).context("failed to spawn stock refresh worker")?);

    // Bus -> SSE fan-out (lossy; a slow client never backs up the recorder).
    {
        let tx = realtime_tx.clone();
        workers.push(
            RefreshWorker::spawn_with(
                "realtime-fanout",
                bus.subscribe(),
                Duration::from_secs(3600),
                move |envelope: Envelope| {
                    let record = envelope.payload();
                    let _ = tx.send(RealtimeMessage {
                        topic: "stock.movement_recorded".to_string(),
                        payload: serde_json::json!({
                            "position": envelope.position(),
                            "material_id": record.material_id,
                            "location_id": record.location_id,
                            "entry_type": record.kind,
                            "quantity": record.quantity,
                        }),
                    });
                    Ok::<(), Infallible>(())
                },
                || Ok(()),
            )
            .context("failed to spawn realtime fan-out worker")?,
        );
    }

    let monitor = LowStockMonitor::new(aggregator.clone());
    let history = MovementHistory::with_page_size(ledger.clone(), catalog.clone(), config.history.page_size);
    let recorder = MovementRecorder::new(aggregator.clone(), bus, config.retry_policy());

    Ok(AppServices {
        catalog,
        ledger,
        aggregator,
        recorder,
        monitor,
        history,
        realtime_tx,
        workers: Mutex::new(workers),
    })
}

pub fn movement_sse_stream(
    services: Arc<AppServices>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(m) => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
