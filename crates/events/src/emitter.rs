//! Producer-side unified emitter.
//!
//! Every log line, phase event, progress tick and status change from the
//! workers goes through one path: assign a per-task sequence number, make a
//! bounded publish attempt, and fall back to a per-channel ring buffer when
//! the broker is unreachable. Buffered events are re-flushed in FIFO order
//! as soon as a publish succeeds again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use magpie_core::config::EventBusConfig;

use crate::broker::Broker;
use crate::buffer::RingBuffer;
use crate::envelope::{Channel, EventEnvelope};
use crate::error::EventBusError;
use crate::types::{
    kinds, LogEvent, LogLevel, PhaseEvent, PhaseEventKind, ProgressEvent, StatusEvent,
};

/// How many log entries the durable per-task history keeps.
const LOG_HISTORY_CAP: usize = 1000;

#[derive(Debug, Default)]
struct Counters {
    events_emitted: AtomicU64,
    events_buffered_total: AtomicU64,
    buffer_evictions: AtomicU64,
    flushes: AtomicU64,
}

/// Point-in-time emitter statistics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmitterStats {
    pub events_emitted: u64,
    pub events_buffered_total: u64,
    pub events_buffered: usize,
    pub buffer_evictions: u64,
    pub flushes: u64,
}

pub struct EventEmitter {
    broker: Arc<dyn Broker>,
    publish_timeout: Duration,
    buffer_capacity: usize,
    seq: Mutex<HashMap<String, u64>>,
    buffers: Mutex<HashMap<Channel, RingBuffer<EventEnvelope>>>,
    counters: Counters,
}

impl EventEmitter {
    pub fn new(broker: Arc<dyn Broker>, config: &EventBusConfig) -> Self {
        Self {
            broker,
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
            buffer_capacity: config.buffer_capacity,
            seq: Mutex::new(HashMap::new()),
            buffers: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    // ── The four producer operations ─────────────────────────────────

    /// Emit a log line on the `logs` channel.
    pub async fn emit_log(
        &self,
        task_id: &str,
        level: LogLevel,
        component: &str,
        message: impl Into<String>,
    ) {
        let event = LogEvent {
            task_id: task_id.to_string(),
            seq: 0,
            level,
            message: message.into(),
            component: component.to_string(),
            phase: None,
            timestamp: Utc::now(),
            structured_data: None,
            traceback: None,
        };
        self.emit_log_event(event).await;
    }

    /// Emit a fully-populated log event. The `seq` field is assigned here.
    pub async fn emit_log_event(&self, mut event: LogEvent) {
        event.seq = self.next_seq(&event.task_id).await;

        // Durable history so a reconnecting UI can replay recent lines.
        if let Ok(raw) = serde_json::to_string(&event) {
            let key = format!("logs:{}", event.task_id);
            if let Err(e) = self.broker.list_push(&key, raw, LOG_HISTORY_CAP).await {
                debug!(error = %e, "log history write skipped");
            }
        }

        match serde_json::to_value(&event) {
            Ok(data) => {
                self.publish_or_buffer(EventEnvelope::new(kinds::LOG_MESSAGE, Channel::Logs, data))
                    .await;
            }
            Err(e) => warn!(error = %e, "failed to serialize log event"),
        }
    }

    /// Emit a phase lifecycle event on the `phase` channel.
    pub async fn emit_phase(&self, kind: PhaseEventKind, mut event: PhaseEvent) {
        if event.status.is_empty() {
            event.status = kind.status().to_string();
        }
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }
        match serde_json::to_value(&event) {
            Ok(data) => {
                self.publish_or_buffer(EventEnvelope::new(kind.event_kind(), Channel::Phase, data))
                    .await;
            }
            Err(e) => warn!(error = %e, "failed to serialize phase event"),
        }
    }

    /// Emit a progress tick on the `phase` channel.
    pub async fn emit_progress(&self, task_id: &str, operation: &str, processed: u64, total: u64) {
        let event = ProgressEvent::new(task_id, operation, processed, total);

        // Latest-wins snapshot for UIs that join mid-run.
        if let Ok(raw) = serde_json::to_string(&event) {
            let key = format!("progress:{task_id}");
            if let Err(e) = self.broker.put(&key, raw).await {
                debug!(error = %e, "progress snapshot write skipped");
            }
        }

        match serde_json::to_value(&event) {
            Ok(data) => {
                self.publish_or_buffer(EventEnvelope::new(
                    kinds::PROGRESS_UPDATE,
                    Channel::Phase,
                    data,
                ))
                .await;
            }
            Err(e) => warn!(error = %e, "failed to serialize progress event"),
        }
    }

    /// Emit a run status change on the `status` channel.
    pub async fn emit_status(&self, mut event: StatusEvent) {
        event.updated_at.get_or_insert_with(Utc::now);
        match serde_json::to_value(&event) {
            Ok(data) => {
                self.publish_or_buffer(EventEnvelope::new(
                    kinds::STATUS_UPDATE,
                    Channel::Status,
                    data,
                ))
                .await;
            }
            Err(e) => warn!(error = %e, "failed to serialize status event"),
        }
    }

    // ── Phase conveniences used by the orchestrator ──────────────────

    pub async fn phase_start(
        &self,
        task_id: &str,
        phase_id: &str,
        message: impl Into<String>,
        estimated_duration: Option<u64>,
    ) {
        self.emit_phase(
            PhaseEventKind::Start,
            PhaseEvent {
                task_id: task_id.to_string(),
                phase_id: phase_id.to_string(),
                message: message.into(),
                estimated_duration,
                ..Default::default()
            },
        )
        .await;
    }

    pub async fn phase_progress(
        &self,
        task_id: &str,
        phase_id: &str,
        processed: u64,
        total: u64,
        message: impl Into<String>,
    ) {
        self.emit_phase(
            PhaseEventKind::Progress,
            PhaseEvent {
                task_id: task_id.to_string(),
                phase_id: phase_id.to_string(),
                message: message.into(),
                processed_count: Some(processed),
                total_count: Some(total),
                ..Default::default()
            },
        )
        .await;
    }

    pub async fn phase_complete(
        &self,
        task_id: &str,
        phase_id: &str,
        processed: u64,
        total: u64,
        error_count: u64,
        duration_seconds: f64,
    ) {
        self.emit_phase(
            PhaseEventKind::Complete,
            PhaseEvent {
                task_id: task_id.to_string(),
                phase_id: phase_id.to_string(),
                message: format!("{phase_id} completed"),
                processed_count: Some(processed),
                total_count: Some(total),
                error_count: Some(error_count),
                duration_seconds: Some(duration_seconds),
                ..Default::default()
            },
        )
        .await;
    }

    pub async fn phase_error(
        &self,
        task_id: &str,
        phase_id: &str,
        error_type: &str,
        error_message: impl Into<String>,
        traceback: Option<String>,
    ) {
        let error_message = error_message.into();
        self.emit_phase(
            PhaseEventKind::Error,
            PhaseEvent {
                task_id: task_id.to_string(),
                phase_id: phase_id.to_string(),
                message: format!("{phase_id} failed: {error_message}"),
                error_type: Some(error_type.to_string()),
                error_message: Some(error_message),
                traceback,
                ..Default::default()
            },
        )
        .await;
    }

    // ── Buffering machinery ──────────────────────────────────────────

    /// Drain the outage buffers to the broker, oldest first. Returns how
    /// many events were flushed.
    pub async fn flush(&self) -> usize {
        let mut buffers = self.buffers.lock().await;
        let mut flushed = 0;
        for channel in Channel::ALL {
            let Some(ring) = buffers.get_mut(&channel) else {
                continue;
            };
            while let Some(envelope) = ring.pop_front() {
                match self.try_publish(envelope.clone()).await {
                    Ok(()) => {
                        flushed += 1;
                        self.counters.events_emitted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        ring.push_front(envelope);
                        if flushed > 0 {
                            self.counters.flushes.fetch_add(1, Ordering::Relaxed);
                        }
                        return flushed;
                    }
                }
            }
        }
        if flushed > 0 {
            self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        }
        flushed
    }

    pub async fn stats(&self) -> EmitterStats {
        let buffers = self.buffers.lock().await;
        let buffered: usize = buffers.values().map(RingBuffer::len).sum();
        let evictions: u64 = buffers.values().map(RingBuffer::evicted).sum();
        EmitterStats {
            events_emitted: self.counters.events_emitted.load(Ordering::Relaxed),
            events_buffered_total: self.counters.events_buffered_total.load(Ordering::Relaxed),
            events_buffered: buffered,
            buffer_evictions: evictions,
            flushes: self.counters.flushes.load(Ordering::Relaxed),
        }
    }

    async fn next_seq(&self, task_id: &str) -> u64 {
        let mut seq = self.seq.lock().await;
        let counter = seq.entry(task_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    async fn try_publish(&self, envelope: EventEnvelope) -> Result<(), EventBusError> {
        match tokio::time::timeout(self.publish_timeout, self.broker.publish(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(EventBusError::PublishTimeout(
                self.publish_timeout.as_millis() as u64,
            )),
        }
    }

    async fn publish_or_buffer(&self, envelope: EventEnvelope) {
        // Older buffered events go first so per-task ordering survives an
        // outage; if any remain after the flush attempt, the new event joins
        // the tail instead of overtaking them.
        let pending: usize = {
            let buffers = self.buffers.lock().await;
            buffers.values().map(RingBuffer::len).sum()
        };
        if pending > 0 {
            self.flush().await;
            let still_pending: usize = {
                let buffers = self.buffers.lock().await;
                buffers.values().map(RingBuffer::len).sum()
            };
            if still_pending > 0 {
                self.buffer(envelope).await;
                return;
            }
        }

        match self.try_publish(envelope.clone()).await {
            Ok(()) => {
                self.counters.events_emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                debug!(error = %e, channel = %envelope.channel, "publish failed, buffering");
                self.buffer(envelope).await;
            }
        }
    }

    async fn buffer(&self, envelope: EventEnvelope) {
        let mut buffers = self.buffers.lock().await;
        let ring = buffers
            .entry(envelope.channel)
            .or_insert_with(|| RingBuffer::new(self.buffer_capacity));
        ring.push(envelope);
        self.counters
            .events_buffered_total
            .fetch_add(1, Ordering::Relaxed);
    }
}
