//! Registry of attached documents keyed by bridge handle.

use dashmap::DashMap;

use pagebridge_core_types::DocumentHandle;

#[derive(Clone, Debug, Default)]
pub struct DocumentContext {
    pub target_id: Option<String>,
    pub cdp_session: Option<String>,
    pub main_frame_id: Option<String>,
    pub url: Option<String>,
    pub content_loaded: bool,
}

/// Concurrent registry of documents known to the injector.
#[derive(Default)]
pub struct DocumentRegistry {
    documents: DashMap<DocumentHandle, DocumentContext>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: DocumentHandle, target_id: Option<String>) {
        self.documents.insert(
            handle,
            DocumentContext {
                target_id,
                ..DocumentContext::default()
            },
        );
    }

    pub fn remove(&self, handle: &DocumentHandle) -> Option<DocumentContext> {
        self.documents.remove(handle).map(|(_, ctx)| ctx)
    }

    pub fn get(&self, handle: &DocumentHandle) -> Option<DocumentContext> {
        self.documents.get(handle).map(|entry| entry.value().clone())
    }

    pub fn handles(&self) -> Vec<DocumentHandle> {
        self.documents.iter().map(|entry| *entry.key()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn clear(&self) {
        self.documents.clear();
    }

    pub fn set_cdp_session(&self, handle: &DocumentHandle, session: String) {
        if let Some(mut entry) = self.documents.get_mut(handle) {
            entry.cdp_session = Some(session);
        }
    }

    /// Records a committed main-frame navigation; the new document is not
    /// loaded yet.
    pub fn commit_navigation(&self, handle: &DocumentHandle, frame_id: String, url: String) {
        if let Some(mut entry) = self.documents.get_mut(handle) {
            entry.main_frame_id = Some(frame_id);
            entry.url = Some(url);
            entry.content_loaded = false;
        }
    }

    pub fn mark_content_loaded(&self, handle: &DocumentHandle) -> Option<String> {
        let mut entry = self.documents.get_mut(handle)?;
        entry.content_loaded = true;
        Some(entry.url.clone().unwrap_or_default())
    }

    pub fn set_url(&self, handle: &DocumentHandle, url: String) {
        if let Some(mut entry) = self.documents.get_mut(handle) {
            entry.url = Some(url);
        }
    }

    pub fn is_main_frame(&self, handle: &DocumentHandle, frame_id: &str) -> bool {
        self.documents
            .get(handle)
            .and_then(|entry| entry.main_frame_id.as_deref().map(|id| id == frame_id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_resets_content_loaded() {
        let registry = DocumentRegistry::new();
        let handle = DocumentHandle::new();
        registry.insert(handle, Some("T1".into()));
        registry.commit_navigation(&handle, "F1".into(), "https://a.test/".into());
        assert_eq!(
            registry.mark_content_loaded(&handle).as_deref(),
            Some("https://a.test/")
        );
        assert!(registry.get(&handle).unwrap().content_loaded);

        registry.commit_navigation(&handle, "F1".into(), "https://b.test/".into());
        let ctx = registry.get(&handle).unwrap();
        assert!(!ctx.content_loaded);
        assert_eq!(ctx.url.as_deref(), Some("https://b.test/"));
        assert!(registry.is_main_frame(&handle, "F1"));
        assert!(!registry.is_main_frame(&handle, "F2"));
    }
}
