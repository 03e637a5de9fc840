//! Relational persistence for items, the processing queue, the category
//! registry and run statistics.
//!
//! Two driver profiles share one SQL body: SQLite (WAL, `synchronous=NORMAL`,
//! foreign keys, 64 MB page cache) for single-node deployments and Postgres
//! (pooled, pre-ping, `application_name` tag) for shared ones. Queries are
//! written with `?` placeholders and rewritten to `$n` for Postgres.

pub mod categories;
pub mod db;
pub mod error;
pub mod items;
pub mod queue;
mod row;
pub mod schema;
pub mod stats;

pub use categories::CategoryStore;
pub use db::{Db, Dialect};
pub use error::StoreError;
pub use items::{FlagUpdate, ItemFilter, ItemPatch, ItemSort, ItemStats, ItemStore, ProcessingFlag, ReprocessKind};
pub use queue::{QueueStats, QueueStore};
pub use stats::StatsStore;
