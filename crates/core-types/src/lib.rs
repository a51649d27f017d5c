//! Shared primitives for the pagebridge crates.
//!
//! Everything that crosses a crate boundary lives here: document handles and
//! navigation generations, the lifecycle signals emitted by the injection
//! layer, the bridge error taxonomy, and the `{ok, data|error}` envelope every
//! page-side outcome is normalized into.

pub mod envelope;
pub mod errors;
pub mod signals;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use envelope::Envelope;
pub use errors::{BridgeError, BridgeErrorKind, BridgeResult};
pub use signals::{LifecycleSignal, SignalKind};

/// Identifier for one embedded document instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct DocumentHandle(pub Uuid);

impl DocumentHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc:{}", self.0)
    }
}

/// Navigation epoch of a document. Page-side state never outlives one.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    pub const INITIAL: Generation = Generation(0);

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
