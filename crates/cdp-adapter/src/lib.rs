//! Injection channel into embedded documents.
//!
//! [`CdpInjector`] drives a document owned by the host shell over an existing
//! DevTools websocket: it executes compiled fragments with `Runtime.evaluate`
//! and turns page/target events into typed [`LifecycleSignal`]s.
//! [`EmulatedDocument`] is the in-process stand-in used when no endpoint is
//! configured and by the test suites.

use std::sync::Arc;

use pagebridge_core_types::LifecycleSignal;
use pagebridge_event_bus::InMemoryBus;

pub mod channel;
pub mod emulated;
pub mod injector;
pub mod metrics;
pub mod registry;
pub mod transport;

pub mod config {
    use serde::{Deserialize, Serialize};
    use std::env;

    pub const WS_URL_ENV: &str = "PAGEBRIDGE_CDP_WS";

    /// Connection settings for the DevTools endpoint.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CdpConfig {
        pub websocket_url: Option<String>,
        pub default_deadline_ms: u64,
        pub heartbeat_interval_ms: u64,
        pub retry_backoff_ms: u64,
    }

    impl Default for CdpConfig {
        fn default() -> Self {
            Self {
                websocket_url: websocket_url_from_env(),
                default_deadline_ms: 30_000,
                heartbeat_interval_ms: 15_000,
                retry_backoff_ms: 100,
            }
        }
    }

    impl CdpConfig {
        /// Applies `PAGEBRIDGE_CDP_WS` on top of file-provided values.
        pub fn apply_env(mut self) -> Self {
            if let Some(url) = websocket_url_from_env() {
                self.websocket_url = Some(url);
            }
            self
        }
    }

    fn websocket_url_from_env() -> Option<String> {
        env::var(WS_URL_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

pub use channel::{InjectionChannel, InstrumentedChannel, SharedChannel};
pub use config::CdpConfig;
pub use emulated::{EmulatedDocument, EmulatedRequest, ProbeBehavior};
pub use injector::CdpInjector;
pub use metrics::BridgeMetricsSnapshot;
pub use registry::{DocumentContext, DocumentRegistry};
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent};

pub type SignalBus = Arc<InMemoryBus<LifecycleSignal>>;

/// Creates the lifecycle signal bus shared by a channel and its coordinator.
pub fn signal_bus(capacity: usize) -> SignalBus {
    InMemoryBus::new(capacity)
}
