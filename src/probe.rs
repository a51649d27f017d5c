//! Resource-load probe.
//!
//! The page-side fragment bounds itself with a timer, so a probe never hangs
//! the caller; a timeout resolves as [`ProbeOutcome::TimedOutAssumedOk`]
//! rather than being reported as a load.

use serde::{Deserialize, Serialize};

use cdp_adapter::{InjectionChannel, SharedChannel};
use fragment_codec::Command;
use pagebridge_core_types::{BridgeResult, DocumentHandle};

pub const PROBE_TIMEOUT_MS: u64 = 3_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ProbeOutcome {
    Loaded { status: u16 },
    Failed { error: String },
    TimedOutAssumedOk,
}

impl ProbeOutcome {
    /// Loaded, or timed out and assumed reachable.
    pub fn is_reachable(&self) -> bool {
        !matches!(self, ProbeOutcome::Failed { .. })
    }
}

pub async fn probe_resource(
    channel: &SharedChannel,
    handle: DocumentHandle,
    url: &str,
) -> BridgeResult<ProbeOutcome> {
    let raw = channel
        .run(handle, Command::probe(url, PROBE_TIMEOUT_MS))
        .await?;
    Ok(serde_json::from_value(raw)?)
}
