//! Throttle simulation for instrumented documents.
//!
//! Latency injection only: the page-side gate delays outbound `fetch` and
//! `XMLHttpRequest` dispatch by the active profile's `latencyMs` and rejects
//! them outright when the profile is offline. There is no byte-rate shaping.

pub mod catalog;
pub mod errors;
pub mod profile;
pub mod simulator;

pub use catalog::{
    load_bundle_from_path, load_bundle_from_reader, parse_bundle_str, ProfileBundle,
    ProfileCatalog,
};
pub use errors::ThrottleError;
pub use profile::{ThrottleProfile, FAST_3G, NO_THROTTLING, OFFLINE, SLOW_3G};
pub use simulator::{ThrottleReport, ThrottleSimulator};
