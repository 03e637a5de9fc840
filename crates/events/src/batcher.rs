//! Per-topic micro-batching for outbound delivery.
//!
//! Events destined for the same subscriber topic within the size or age
//! threshold are delivered as one array payload; a lone event keeps the
//! scalar form.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};

#[derive(Debug)]
struct TopicBatch {
    events: Vec<Value>,
    started: Instant,
}

/// Accumulates outbound events per topic; flushes on size or age.
#[derive(Debug)]
pub struct EventBatcher {
    max_size: usize,
    max_age: Duration,
    batches: HashMap<String, TopicBatch>,
}

impl EventBatcher {
    pub fn new(max_size: usize, max_age: Duration) -> Self {
        Self {
            max_size,
            max_age,
            batches: HashMap::new(),
        }
    }

    /// Add an event. Returns the full batch when this push reaches the size
    /// threshold.
    pub fn push(&mut self, topic: &str, event: Value) -> Option<(String, Vec<Value>)> {
        let batch = self
            .batches
            .entry(topic.to_string())
            .or_insert_with(|| TopicBatch {
                events: Vec::new(),
                started: Instant::now(),
            });
        batch.events.push(event);
        if batch.events.len() >= self.max_size {
            let batch = self.batches.remove(topic).expect("batch was just inserted");
            return Some((topic.to_string(), batch.events));
        }
        None
    }

    /// Drain every batch older than the age threshold.
    pub fn take_expired(&mut self) -> Vec<(String, Vec<Value>)> {
        self.take_expired_at(Instant::now())
    }

    /// Deterministic variant for tests.
    pub fn take_expired_at(&mut self, now: Instant) -> Vec<(String, Vec<Value>)> {
        let expired: Vec<String> = self
            .batches
            .iter()
            .filter(|(_, b)| now.duration_since(b.started) >= self.max_age)
            .map(|(topic, _)| topic.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|topic| self.batches.remove(&topic).map(|b| (topic, b.events)))
            .collect()
    }

    /// Drain everything, regardless of age (shutdown path).
    pub fn take_all(&mut self) -> Vec<(String, Vec<Value>)> {
        self.batches
            .drain()
            .map(|(topic, b)| (topic, b.events))
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.batches.values().map(|b| b.events.len()).sum()
    }
}

/// The delivered payload: scalar for a single event, array envelope for a
/// batch.
pub fn delivery_payload(events: Vec<Value>) -> Value {
    if events.len() == 1 {
        events.into_iter().next().expect("length checked")
    } else {
        let count = events.len();
        json!({
            "events": events,
            "count": count,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flushes_at_size_threshold() {
        let mut batcher = EventBatcher::new(3, Duration::from_secs(60));
        assert!(batcher.push("log", json!({"n": 1})).is_none());
        assert!(batcher.push("log", json!({"n": 2})).is_none());
        let (topic, events) = batcher.push("log", json!({"n": 3})).unwrap();
        assert_eq!(topic, "log");
        assert_eq!(events.len(), 3);
        assert_eq!(batcher.pending(), 0);
    }

    #[test]
    fn topics_batch_independently() {
        let mut batcher = EventBatcher::new(2, Duration::from_secs(60));
        assert!(batcher.push("log", json!({"n": 1})).is_none());
        assert!(batcher.push("phase_update", json!({"n": 2})).is_none());
        assert_eq!(batcher.pending(), 2);

        let flushed = batcher.push("log", json!({"n": 3})).unwrap();
        assert_eq!(flushed.1.len(), 2);
        assert_eq!(batcher.pending(), 1);
    }

    #[test]
    fn age_based_flush() {
        let mut batcher = EventBatcher::new(100, Duration::from_millis(10));
        batcher.push("log", json!({"n": 1}));
        let now = Instant::now();

        assert!(batcher.take_expired_at(now).is_empty() || batcher.pending() == 0);
        let later = now + Duration::from_millis(50);
        let expired = batcher.take_expired_at(later);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].1.len(), 1);
        assert_eq!(batcher.pending(), 0);
    }

    #[test]
    fn every_delivery_respects_size_or_age() {
        // P5: any flushed batch is either <= max_size (size path) or was
        // held no longer than max_age (age path).
        let max_size = 10;
        let mut batcher = EventBatcher::new(max_size, Duration::from_secs(1));
        for i in 0..37 {
            if let Some((_, events)) = batcher.push("log", json!({"n": i})) {
                assert!(events.len() <= max_size);
            }
        }
        for (_, events) in batcher.take_all() {
            assert!(events.len() <= max_size);
        }
    }

    #[test]
    fn single_event_keeps_scalar_form() {
        let payload = delivery_payload(vec![json!({"message": "solo"})]);
        assert_eq!(payload["message"], "solo");
        assert!(payload.get("events").is_none());
    }

    #[test]
    fn batch_payload_carries_count() {
        let payload = delivery_payload(vec![json!({"n": 1}), json!({"n": 2})]);
        assert_eq!(payload["count"], 2);
        assert_eq!(payload["events"].as_array().unwrap().len(), 2);
        assert!(payload["timestamp"].is_string());
    }
}
