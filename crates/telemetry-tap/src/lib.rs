//! Host-side telemetry for an instrumented document.
//!
//! The page-side observers buffer requests and console lines; the collector
//! drains them on a fixed interval into newest-first rings capped at
//! [`TelemetryConfig::request_cap`] and [`TelemetryConfig::console_cap`],
//! persists the rings after each merge and restores them on start.

pub mod collector;
pub mod config;
pub mod errors;
pub mod export;
pub mod model;
pub mod ring;
pub mod store;

pub use collector::{CollectorHandle, TelemetryCollector};
pub use config::{TelemetryConfig, HISTORY_DIR_ENV};
pub use errors::TelemetryError;
pub use export::{export_har, HarExport};
pub use model::{
    ConsoleRecord, DrainBatch, HistorySnapshot, NetworkRequestRecord, TelemetryRecord,
    TelemetryUpdate,
};
pub use ring::TelemetryRing;
pub use store::{JsonFileStore, MemoryStore, SnapshotStore};
