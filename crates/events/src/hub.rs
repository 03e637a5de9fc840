//! Fan-out point between the ingestor and connected operator UIs.
//!
//! One broadcast channel per outbound topic; WebSocket handlers subscribe to
//! the topics they care about and receive ready-to-send JSON strings.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{json, Value};
use tokio::sync::broadcast;

const TOPIC_DEPTH: usize = 1024;

#[derive(Default)]
pub struct SubscriberHub {
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to an outbound topic. The channel is created on first use.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<String> {
        let mut topics = self.topics.lock().expect("hub lock poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_DEPTH).0)
            .subscribe()
    }

    /// Deliver a payload to every subscriber of `topic`. Returns how many
    /// subscribers received it.
    pub fn deliver(&self, topic: &str, payload: &Value) -> usize {
        let message = json!({"event": topic, "data": payload}).to_string();
        let topics = self.topics.lock().expect("hub lock poisoned");
        match topics.get(topic) {
            Some(tx) => tx.send(message).unwrap_or(0),
            None => 0,
        }
    }

    /// Topics that currently have at least one subscriber.
    pub fn active_topics(&self) -> Vec<String> {
        let topics = self.topics.lock().expect("hub lock poisoned");
        topics
            .iter()
            .filter(|(_, tx)| tx.receiver_count() > 0)
            .map(|(name, _)| name.clone())
            .collect()
    }
}
