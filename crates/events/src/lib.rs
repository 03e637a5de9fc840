//! The real-time event bus.
//!
//! Producer side: a unified [`EventEmitter`] that workers use for log lines,
//! phase lifecycle events, progress ticks and status changes. Everything
//! funnels through one bounded publish path with a per-channel ring buffer
//! for broker outages.
//!
//! Consumer side: the [`EventIngestor`] subscribes to the broker channels,
//! validates and sanitizes each event, applies rate limiting, routes to
//! outbound subscriber topics (including legacy aliases), micro-batches, and
//! fans out to WebSocket subscribers through the [`SubscriberHub`].

pub mod batcher;
pub mod broker;
pub mod buffer;
pub mod emitter;
pub mod envelope;
pub mod error;
pub mod health;
pub mod http;
pub mod hub;
pub mod ingestor;
pub mod rate_limit;
pub mod router;
pub mod types;
pub mod validate;

pub use broker::{Broker, InProcessBroker};
pub use emitter::{EmitterStats, EventEmitter};
pub use envelope::{Channel, EventEnvelope};
pub use hub::SubscriberHub;
pub use ingestor::{EventIngestor, IngestorHandle, IngestorStats};
pub use types::{kinds, LogLevel, PhaseEventKind};
