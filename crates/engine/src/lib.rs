//! USB autotrigger engine
//!
//! Reacts to USB device attachment events and runs operator-defined scripts
//! keyed by device vendor/product identity. Front ends drive the engine
//! through [`Engine`] and render the human-readable status lines delivered
//! over the [`LogSink`] channel; the engine never touches a terminal itself.

pub mod engine;
pub mod error;
pub mod executor;
pub mod logging;
pub mod monitor;
pub mod sink;
pub mod store;

pub use engine::Engine;
pub use error::{BusError, ConfigError};
pub use executor::{ExecutionOutcome, FailureKind, dispatch};
pub use logging::setup_logging;
pub use monitor::MonitorState;
pub use sink::LogSink;
pub use store::{ActionRule, DeviceIdentity, RuleStore, RuleTable};
