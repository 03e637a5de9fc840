//! Cross-cutting integrity validation and auto-repair over the item store,
//! the processing queue, the category registry and the KB filesystem.

pub mod report;
pub mod validator;

pub use report::{CheckResult, HealthReport, HealthStatus, ValidationSummary};
pub use validator::Validator;
