//! The ingestor/broadcaster: one pub/sub loop, one batch-flush loop.
//!
//! For every inbound envelope: validate and sanitize, rate-limit, route to
//! outbound topics, micro-batch, and fan out through the [`SubscriberHub`].
//! A periodic probe watches broker health; after the failure streak the
//! ingestor reconnects with exponential backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use magpie_core::config::EventBusConfig;

use crate::batcher::{delivery_payload, EventBatcher};
use crate::broker::Broker;
use crate::envelope::{Channel, EventEnvelope};
use crate::health::HealthMonitor;
use crate::hub::SubscriberHub;
use crate::rate_limit::RateLimiter;
use crate::router::route;
use crate::validate::{validate_event, Validation};

/// How often pending batches are checked against the age threshold.
const BATCH_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Counters exposed over `GET /stats`.
#[derive(Debug, Default)]
pub struct IngestorStats {
    pub events_received: AtomicU64,
    pub events_emitted: AtomicU64,
    pub events_validation_failed: AtomicU64,
    pub events_rate_limited: AtomicU64,
    pub events_unroutable: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub reconnections: AtomicU64,
}

/// Serializable snapshot of [`IngestorStats`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestorStatsSnapshot {
    pub events_received: u64,
    pub events_emitted: u64,
    pub events_validation_failed: u64,
    pub events_rate_limited: u64,
    pub events_unroutable: u64,
    pub batches_flushed: u64,
    pub reconnections: u64,
}

impl IngestorStats {
    pub fn snapshot(&self) -> IngestorStatsSnapshot {
        IngestorStatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            events_validation_failed: self.events_validation_failed.load(Ordering::Relaxed),
            events_rate_limited: self.events_rate_limited.load(Ordering::Relaxed),
            events_unroutable: self.events_unroutable.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
        }
    }
}

/// Running ingestor; dropping the handle leaves the task running, call
/// [`IngestorHandle::stop`] for a clean shutdown.
pub struct IngestorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    stats: Arc<IngestorStats>,
}

impl IngestorHandle {
    pub fn stats(&self) -> &Arc<IngestorStats> {
        &self.stats
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

pub struct EventIngestor;

impl EventIngestor {
    /// Subscribe to all three channels and start the processing loop.
    pub async fn spawn(
        broker: Arc<dyn Broker>,
        hub: Arc<SubscriberHub>,
        config: EventBusConfig,
    ) -> IngestorHandle {
        let stats = Arc::new(IngestorStats::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_loop(
            broker,
            hub,
            config,
            stats.clone(),
            shutdown_rx,
        ));

        IngestorHandle {
            shutdown: shutdown_tx,
            task,
            stats,
        }
    }
}

async fn run_loop(
    broker: Arc<dyn Broker>,
    hub: Arc<SubscriberHub>,
    config: EventBusConfig,
    stats: Arc<IngestorStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rx: Option<mpsc::Receiver<EventEnvelope>> =
        match broker.subscribe(&Channel::ALL).await {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!(error = %e, "initial broker subscription failed");
                None
            }
        };

    let mut limiter = RateLimiter::new(&config);
    let mut batcher = EventBatcher::new(
        config.batch_max_size,
        Duration::from_secs(config.batch_max_age_secs),
    );
    let mut health = HealthMonitor::new(&config);
    if rx.is_none() {
        // Start in the failure path so the reconnect schedule kicks in.
        for _ in 0..config.max_consecutive_failures {
            health.record_probe(false);
        }
    }

    let mut batch_sweep = tokio::time::interval(BATCH_SWEEP_INTERVAL);
    let mut health_tick =
        tokio::time::interval(Duration::from_secs(config.health_check_interval_secs.max(1)));
    // The first interval tick fires immediately; skip it so the probe cadence
    // starts one full period out.
    health_tick.tick().await;

    info!("event ingestor started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // A dropped sender also ends the loop.
                if changed.is_err() || *shutdown.borrow() {
                    for (topic, events) in batcher.take_all() {
                        flush_batch(&hub, &stats, &topic, events);
                    }
                    break;
                }
            }
            received = recv_or_pending(&mut rx) => {
                match received {
                    Some(envelope) => {
                        handle_event(envelope, &mut limiter, &mut batcher, &hub, &stats);
                    }
                    None => {
                        debug!("broker subscription closed");
                        rx = None;
                        health.record_probe(false);
                    }
                }
            }
            _ = batch_sweep.tick() => {
                for (topic, events) in batcher.take_expired() {
                    flush_batch(&hub, &stats, &topic, events);
                }
            }
            _ = health_tick.tick() => {
                let ok = broker.ping().await.is_ok();
                let was_healthy = health.is_healthy() && rx.is_some();
                health.record_probe(ok && rx.is_some());

                if ok && !was_healthy {
                    try_resubscribe(&broker, &mut rx, &mut health, &stats).await;
                } else if !health.is_healthy()
                    && health.should_attempt_reconnect(Instant::now())
                {
                    health.record_reconnect_attempt(Instant::now());
                    try_resubscribe(&broker, &mut rx, &mut health, &stats).await;
                }
            }
        }
    }

    info!("event ingestor stopped");
}

/// Receive from the subscription when open; otherwise park this branch so
/// `select!` never busy-loops on a closed channel.
async fn recv_or_pending(
    rx: &mut Option<mpsc::Receiver<EventEnvelope>>,
) -> Option<EventEnvelope> {
    match rx {
        Some(inner) => inner.recv().await,
        None => std::future::pending().await,
    }
}

async fn try_resubscribe(
    broker: &Arc<dyn Broker>,
    rx: &mut Option<mpsc::Receiver<EventEnvelope>>,
    health: &mut HealthMonitor,
    stats: &Arc<IngestorStats>,
) {
    match broker.subscribe(&Channel::ALL).await {
        Ok(new_rx) => {
            *rx = Some(new_rx);
            health.record_probe(true);
            stats.reconnections.fetch_add(1, Ordering::Relaxed);
            info!("broker connection restored");
        }
        Err(e) => {
            debug!(error = %e, "broker resubscribe failed");
        }
    }
}

fn handle_event(
    envelope: EventEnvelope,
    limiter: &mut RateLimiter,
    batcher: &mut EventBatcher,
    hub: &Arc<SubscriberHub>,
    stats: &Arc<IngestorStats>,
) {
    stats.events_received.fetch_add(1, Ordering::Relaxed);

    let mut data = envelope.data;
    match validate_event(&envelope.kind, &mut data) {
        Validation::Accepted => {}
        Validation::Rejected(reason) => {
            debug!(kind = %envelope.kind, %reason, "event rejected");
            stats
                .events_validation_failed
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
    }

    if !limiter.is_allowed() {
        stats.events_rate_limited.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let task_id = data
        .get("task_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let topics = route(envelope.channel, &envelope.kind, task_id.as_deref());
    if topics.is_empty() {
        stats.events_unroutable.fetch_add(1, Ordering::Relaxed);
        return;
    }

    for topic in topics {
        if let Some((full_topic, events)) = batcher.push(&topic, data.clone()) {
            flush_batch(hub, stats, &full_topic, events);
        }
    }
}

fn flush_batch(
    hub: &Arc<SubscriberHub>,
    stats: &Arc<IngestorStats>,
    topic: &str,
    events: Vec<Value>,
) {
    let count = events.len() as u64;
    let payload = delivery_payload(events);
    hub.deliver(topic, &payload);
    stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
    stats.events_emitted.fetch_add(count, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InProcessBroker;
    use serde_json::json;

    fn config() -> EventBusConfig {
        EventBusConfig {
            buffer_capacity: 1000,
            publish_timeout_ms: 250,
            max_events_per_second: 50,
            max_events_per_minute: 1000,
            burst_allowance: 10,
            batch_max_size: 10,
            batch_max_age_secs: 1,
            health_check_interval_secs: 1,
            max_consecutive_failures: 3,
            reconnect_base_secs: 1,
            reconnect_cap_secs: 60,
            reconnect_max_attempts: 10,
            stats_port: 0,
        }
    }

    async fn publish_log(broker: &Arc<InProcessBroker>, task: &str, message: &str) {
        let env = EventEnvelope::new(
            "log_message",
            Channel::Logs,
            json!({"task_id": task, "message": message, "level": "INFO"}),
        );
        Broker::publish(&**broker, env).await.unwrap();
    }

    #[tokio::test]
    async fn routes_and_delivers_log_events() {
        let broker = InProcessBroker::new();
        let hub = Arc::new(SubscriberHub::new());
        let mut live_log = hub.subscribe("live_log");
        let mut log = hub.subscribe("log");

        let handle =
            EventIngestor::spawn(broker.clone() as Arc<dyn Broker>, hub.clone(), config()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        publish_log(&broker, "t1", "hello").await;

        // Batches flush on the age threshold (1s) since only one event is pending.
        let raw = tokio::time::timeout(Duration::from_secs(3), live_log.recv())
            .await
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["event"], "live_log");
        assert_eq!(value["data"]["message"], "hello");
        assert!(log.recv().await.is_ok());

        let snap = handle.stats().snapshot();
        assert_eq!(snap.events_received, 1);
        assert_eq!(snap.events_validation_failed, 0);
        handle.stop().await;
    }

    #[tokio::test]
    async fn batches_large_bursts_per_topic() {
        let broker = InProcessBroker::new();
        let hub = Arc::new(SubscriberHub::new());
        let mut log = hub.subscribe("log");

        let handle =
            EventIngestor::spawn(broker.clone() as Arc<dyn Broker>, hub.clone(), config()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        for i in 0..10 {
            publish_log(&broker, "t1", &format!("m{i}")).await;
        }

        let raw = tokio::time::timeout(Duration::from_secs(3), log.recv())
            .await
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        // Ten events hit the size threshold and arrive as one array payload.
        assert_eq!(value["data"]["count"], 10);
        assert_eq!(value["data"]["events"].as_array().unwrap().len(), 10);
        handle.stop().await;
    }

    #[tokio::test]
    async fn event_storm_is_rate_limited() {
        let broker = InProcessBroker::new();
        let hub = Arc::new(SubscriberHub::new());
        let _keepalive = hub.subscribe("log");

        let handle =
            EventIngestor::spawn(broker.clone() as Arc<dyn Broker>, hub.clone(), config()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        for i in 0..1000 {
            publish_log(&broker, "t1", &format!("storm-{i}")).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        let snap = handle.stats().snapshot();
        assert_eq!(snap.events_received, 1000);
        // At most max_per_second + burst pass in the first window.
        assert!(
            snap.events_rate_limited >= 1000 - 60,
            "expected >= 940 rate-limited, got {}",
            snap.events_rate_limited
        );
        handle.stop().await;
    }

    #[tokio::test]
    async fn invalid_events_are_counted_not_fatal() {
        let broker = InProcessBroker::new();
        let hub = Arc::new(SubscriberHub::new());
        let handle =
            EventIngestor::spawn(broker.clone() as Arc<dyn Broker>, hub.clone(), config()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Not an object.
        let bad = EventEnvelope::new("log_message", Channel::Logs, json!("just a string"));
        Broker::publish(&*broker, bad).await.unwrap();
        // Valid event still flows afterwards.
        publish_log(&broker, "t1", "still alive").await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let snap = handle.stats().snapshot();
        assert_eq!(snap.events_received, 2);
        assert_eq!(snap.events_validation_failed, 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn broker_outage_triggers_reconnect() {
        let broker = InProcessBroker::new();
        let hub = Arc::new(SubscriberHub::new());
        let mut log = hub.subscribe("log");
        let handle =
            EventIngestor::spawn(broker.clone() as Arc<dyn Broker>, hub.clone(), config()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Fail three consecutive probes (1s apart).
        broker.set_connected(false);
        tokio::time::sleep(Duration::from_millis(3500)).await;

        broker.set_connected(true);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let snap = handle.stats().snapshot();
        assert!(
            snap.reconnections >= 1,
            "expected a reconnection, got {:?}",
            snap
        );

        // Events flow again after the reconnect.
        publish_log(&broker, "t1", "after outage").await;
        let raw = tokio::time::timeout(Duration::from_secs(3), log.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(raw.contains("after outage"));
        handle.stop().await;
    }
}
