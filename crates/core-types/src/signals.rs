use serde::{Deserialize, Serialize};

use crate::DocumentHandle;

/// Lifecycle transitions reported for an embedded document.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// A real navigation committed; page-side state is gone.
    NavigationCommitted,
    /// The document finished parsing and accepts fragments.
    ContentLoaded,
    /// Fragment/hash or history-API change inside the same document.
    InPageNavigation,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleSignal {
    pub handle: DocumentHandle,
    pub kind: SignalKind,
    pub url: String,
    pub is_main_frame: bool,
}

impl LifecycleSignal {
    pub fn new(
        handle: DocumentHandle,
        kind: SignalKind,
        url: impl Into<String>,
        is_main_frame: bool,
    ) -> Self {
        Self {
            handle,
            kind,
            url: url.into(),
            is_main_frame,
        }
    }

    pub fn navigation_committed(handle: DocumentHandle, url: impl Into<String>) -> Self {
        Self::new(handle, SignalKind::NavigationCommitted, url, true)
    }

    pub fn content_loaded(handle: DocumentHandle, url: impl Into<String>) -> Self {
        Self::new(handle, SignalKind::ContentLoaded, url, true)
    }

    pub fn in_page(handle: DocumentHandle, url: impl Into<String>) -> Self {
        Self::new(handle, SignalKind::InPageNavigation, url, true)
    }

    /// Marks the signal as originating from a nested frame.
    pub fn from_subframe(mut self) -> Self {
        self.is_main_frame = false;
        self
    }
}
