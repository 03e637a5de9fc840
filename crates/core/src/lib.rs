pub mod category;
pub mod config;
pub mod error;
pub mod item;
pub mod queue;
pub mod run;
pub mod stats;

pub use category::CategoryRow;
pub use config::Config;
pub use error::{ErrorClass, ItemErrorKind};
pub use item::{FailureClass, Item, ThreadSegment};
pub use queue::{QueueRow, QueueStatus};
pub use run::{RunDescriptor, RunMode, RunPreferences};
