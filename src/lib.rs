//! pagebridge host library.
//!
//! [`BridgeHost`] owns the injection channel (DevTools or emulated) and opens
//! one [`InstrumentationSession`] per document; the binary is a thin CLI over
//! it.

pub mod config;
pub mod host;
pub mod metrics;
pub mod probe;
pub mod session;

pub use config::{load_config, BridgeConfig, LifecycleSection, ThrottleSection};
pub use host::BridgeHost;
pub use probe::{probe_resource, ProbeOutcome, PROBE_TIMEOUT_MS};
pub use session::InstrumentationSession;
