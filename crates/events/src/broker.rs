//! The broker port: pub/sub for live events plus the small list/value
//! surface the emitter uses for durable log history and progress snapshots.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::debug;

use crate::envelope::{Channel, EventEnvelope};
use crate::error::EventBusError;

/// Transport between the event producer and the ingestor.
///
/// Implementations must preserve per-channel FIFO ordering for a single
/// publisher.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Deliver an envelope to everyone subscribed to its channel.
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), EventBusError>;

    /// Subscribe to a set of channels; all matching envelopes arrive merged
    /// on one receiver, per-channel order preserved.
    async fn subscribe(
        &self,
        channels: &[Channel],
    ) -> Result<mpsc::Receiver<EventEnvelope>, EventBusError>;

    /// Append to a capped list (oldest entries trimmed past `cap`).
    async fn list_push(&self, key: &str, value: String, cap: usize) -> Result<(), EventBusError>;

    /// Most recent `limit` list entries, oldest first.
    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>, EventBusError>;

    /// Store a single value under a key (latest-wins).
    async fn put(&self, key: &str, value: String) -> Result<(), EventBusError>;

    async fn get(&self, key: &str) -> Result<Option<String>, EventBusError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), EventBusError>;
}

const CHANNEL_DEPTH: usize = 4096;

/// In-process reference broker: a broadcast sender per channel plus mutexed
/// lists and key-values. `set_connected(false)` simulates an outage for the
/// reconnect and buffering paths.
pub struct InProcessBroker {
    channels: HashMap<Channel, broadcast::Sender<EventEnvelope>>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    values: Mutex<HashMap<String, String>>,
    connected: AtomicBool,
}

impl InProcessBroker {
    pub fn new() -> Arc<Self> {
        let mut channels = HashMap::new();
        for ch in Channel::ALL {
            let (tx, _rx) = broadcast::channel(CHANNEL_DEPTH);
            channels.insert(ch, tx);
        }
        Arc::new(Self {
            channels,
            lists: Mutex::new(HashMap::new()),
            values: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        })
    }

    /// Simulate broker loss/restore.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn check_connected(&self) -> Result<(), EventBusError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(EventBusError::Broker("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), EventBusError> {
        self.check_connected()?;
        let tx = self
            .channels
            .get(&envelope.channel)
            .expect("every channel is registered at construction");
        // No subscribers is not an error; the envelope is simply dropped.
        let _ = tx.send(envelope);
        Ok(())
    }

    async fn subscribe(
        &self,
        channels: &[Channel],
    ) -> Result<mpsc::Receiver<EventEnvelope>, EventBusError> {
        self.check_connected()?;
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        for ch in channels {
            let mut sub = self
                .channels
                .get(ch)
                .expect("every channel is registered at construction")
                .subscribe();
            let tx = tx.clone();
            let channel = *ch;
            tokio::spawn(async move {
                loop {
                    match sub.recv().await {
                        Ok(env) => {
                            if tx.send(env).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(channel = %channel, skipped = n, "subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }
        Ok(rx)
    }

    async fn list_push(&self, key: &str, value: String, cap: usize) -> Result<(), EventBusError> {
        self.check_connected()?;
        let mut lists = self.lists.lock().await;
        let list = lists.entry(key.to_string()).or_default();
        list.push_back(value);
        while list.len() > cap {
            list.pop_front();
        }
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>, EventBusError> {
        self.check_connected()?;
        let lists = self.lists.lock().await;
        Ok(lists
            .get(key)
            .map(|l| {
                let skip = l.len().saturating_sub(limit);
                l.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), EventBusError> {
        self.check_connected()?;
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, EventBusError> {
        self.check_connected()?;
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn ping(&self) -> Result<(), EventBusError> {
        self.check_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let broker = InProcessBroker::new();
        let mut rx = broker.subscribe(&[Channel::Logs]).await.unwrap();

        let env = EventEnvelope::new("log_message", Channel::Logs, json!({"task_id": "t1"}));
        broker.publish(env.clone()).await.unwrap();

        let got = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, env);
    }

    #[tokio::test]
    async fn channel_isolation() {
        let broker = InProcessBroker::new();
        let mut rx = broker.subscribe(&[Channel::Status]).await.unwrap();

        broker
            .publish(EventEnvelope::new("log_message", Channel::Logs, json!({})))
            .await
            .unwrap();
        broker
            .publish(EventEnvelope::new("status_update", Channel::Status, json!({})))
            .await
            .unwrap();

        let got = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.kind, "status_update");
    }

    #[tokio::test]
    async fn disconnect_rejects_operations() {
        let broker = InProcessBroker::new();
        broker.set_connected(false);

        assert!(broker.ping().await.is_err());
        let env = EventEnvelope::new("log_message", Channel::Logs, json!({}));
        assert!(broker.publish(env).await.is_err());

        broker.set_connected(true);
        assert!(broker.ping().await.is_ok());
    }

    #[tokio::test]
    async fn capped_list_trims_oldest() {
        let broker = InProcessBroker::new();
        for i in 0..5 {
            broker
                .list_push("logs:t1", format!("entry-{i}"), 3)
                .await
                .unwrap();
        }
        let entries = broker.list_range("logs:t1", 10).await.unwrap();
        assert_eq!(entries, vec!["entry-2", "entry-3", "entry-4"]);

        let last_two = broker.list_range("logs:t1", 2).await.unwrap();
        assert_eq!(last_two, vec!["entry-3", "entry-4"]);
    }

    #[tokio::test]
    async fn key_value_latest_wins() {
        let broker = InProcessBroker::new();
        broker.put("progress:t1", "a".to_string()).await.unwrap();
        broker.put("progress:t1", "b".to_string()).await.unwrap();
        assert_eq!(broker.get("progress:t1").await.unwrap().as_deref(), Some("b"));
        assert!(broker.get("missing").await.unwrap().is_none());
    }
}
