use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use fragment_codec::Capability;
use pagebridge_core_types::{DocumentHandle, Generation};

/// Arming state of one document's capabilities.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ArmState {
    #[default]
    Uninstalled,
    Installing,
    Armed,
}

/// Host-side mirror of the page-side installation flags.
///
/// Each entry is tagged with the generation it was confirmed in; entries from
/// an older generation count as absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstallationRegistry {
    entries: HashMap<Capability, Generation>,
}

impl InstallationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_installed(&self, cap: Capability, generation: Generation) -> bool {
        self.entries.get(&cap) == Some(&generation)
    }

    /// Returns `false` when `cap` was already recorded for `generation`.
    pub fn record(&mut self, cap: Capability, generation: Generation) -> bool {
        self.entries.insert(cap, generation) != Some(generation)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Capabilities confirmed in `generation`, in arming order.
    pub fn installed(&self, generation: Generation) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|cap| self.is_installed(*cap, generation))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleSnapshot {
    pub handle: DocumentHandle,
    pub state: ArmState,
    pub generation: Generation,
    pub installed: Vec<Capability>,
    pub url: Option<String>,
}

/// What the coordinator did with one lifecycle signal.
#[derive(Clone, Debug, PartialEq)]
pub enum SignalOutcome {
    /// Signal for another document or from a nested frame.
    Ignored,
    Reset { generation: Generation },
    Armed { generation: Generation },
    /// Arming failed; the session stays unarmed until the next signal.
    ArmFailed { message: String },
    InPageConfirmed,
    /// The document's own location did not match the signalled url.
    InPageRejected { reported: Option<String> },
}
