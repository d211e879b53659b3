//! Redis pub/sub change notification.
//!
//! Pub/sub is fire-and-forget: a subscriber that is offline misses messages.
//! That is acceptable here because notifications only shorten the staleness
//! window; the periodic ledger poll is what guarantees convergence.

use std::sync::mpsc;
use std::thread;

use redis::Commands;
use thiserror::Error;
use tracing::{debug, warn};

use stockroom_events::{EventBus, EventEnvelope, Subscription};
use stockroom_inventory::MovementRecord;

#[derive(Debug, Error)]
pub enum RedisBusError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to encode notification: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Publishes committed ledger envelopes as JSON on one channel.
#[derive(Debug, Clone)]
pub struct RedisNotificationBus {
    client: redis::Client,
    channel: String,
}

impl RedisNotificationBus {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl EventBus<EventEnvelope<MovementRecord>> for RedisNotificationBus {
    type Error = RedisBusError;

    fn publish(&self, message: EventEnvelope<MovementRecord>) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message)?;
        let mut conn = self.client.get_connection()?;
        let _: i64 = conn.publish(&self.channel, payload)?;
        Ok(())
    }

    fn subscribe(&self) -> Subscription<EventEnvelope<MovementRecord>> {
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let channel = self.channel.clone();

        let spawned = thread::Builder::new()
            .name("redis-notify".to_string())
            .spawn(move || forward(client, channel, tx));
        if let Err(err) = spawned {
            warn!(error = %err, "could not start redis subscriber; relying on polling");
        }

        Subscription::new(rx)
    }
}

fn forward(client: redis::Client, channel: String, tx: mpsc::Sender<EventEnvelope<MovementRecord>>) {
    let mut conn = match client.get_connection() {
        Ok(c) => c,
        Err(err) => {
            warn!(error = %err, "redis subscriber could not connect");
            return;
        }
    };

    let mut pubsub = conn.as_pubsub();
    if let Err(err) = pubsub.subscribe(&channel) {
        warn!(error = %err, channel = %channel, "redis subscribe failed");
        return;
    }

    loop {
        let msg = match pubsub.get_message() {
            Ok(m) => m,
            Err(err) => {
                warn!(error = %err, "redis subscription closed");
                return;
            }
        };

        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(_) => continue,
        };

        let envelope: EventEnvelope<MovementRecord> = match serde_json::from_str(&payload) {
            Ok(e) => e,
            Err(err) => {
                debug!(error = %err, "skipping undecodable notification");
                continue;
            }
        };

        if tx.send(envelope).is_err() {
            return;
        }
    }
}
