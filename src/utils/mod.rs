//! Utility modules

pub mod memory_storage;
pub mod retry;
pub mod telemetry;
pub mod validation;

pub use memory_storage::*;
pub use retry::with_backoff;
pub use telemetry::init_tracing;
pub use validation::*;
