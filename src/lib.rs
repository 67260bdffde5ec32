//! Event-driven ICMP echo probe engine.
//!
//! The engine never blocks and never owns a clock: sends, linger timeouts and
//! inbound replies are all callbacks dispatched by whoever drives it. The
//! [`runtime`] module drives it with tokio and a raw socket; tests drive it
//! with the virtual-time [`timer::EventQueue`].

pub mod config;
pub mod engine;
pub mod error;
pub mod icmp;
pub mod ledger;
pub mod matcher;
pub mod observer;
pub mod runtime;
pub mod signature;
pub mod stats;
pub mod timer;
pub mod transport;

pub use config::{ProbeConfig, Verbosity};
pub use engine::{EngineState, EngineTimer, Identity, ProbeEngine};
pub use error::ProbeError;
pub use observer::{EventSink, ProbeEvent};
pub use stats::{Report, RttSummary, RunningStats};
