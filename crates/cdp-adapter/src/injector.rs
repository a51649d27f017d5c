use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::select;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fragment_codec::Fragment;
use pagebridge_core_types::{
    BridgeError, BridgeResult, DocumentHandle, Envelope, LifecycleSignal, SignalKind,
};

use crate::channel::InjectionChannel;
use crate::config::CdpConfig;
use crate::metrics;
use crate::registry::DocumentRegistry;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent};
use crate::SignalBus;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    target_id: String,
    #[serde(rename = "type")]
    target_type: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetCreatedParams {
    target_info: TargetInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachedToTargetParams {
    session_id: String,
    target_info: TargetInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetachedFromTargetParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetDestroyedParams {
    target_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameInfo {
    id: String,
    #[serde(default)]
    parent_id: Option<String>,
    url: String,
    #[serde(default)]
    url_fragment: Option<String>,
}

impl FrameInfo {
    fn full_url(&self) -> String {
        match &self.url_fragment {
            Some(fragment) => format!("{}{}", self.url, fragment),
            None => self.url.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FrameNavigatedParams {
    frame: FrameInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigatedWithinDocumentParams {
    frame_id: String,
    url: String,
}

fn decode<T: for<'de> Deserialize<'de>>(params: Value) -> BridgeResult<T> {
    serde_json::from_value(params).map_err(BridgeError::from)
}

/// DevTools-backed [`InjectionChannel`] plus lifecycle signal source.
pub struct CdpInjector {
    cfg: CdpConfig,
    transport: Arc<dyn CdpTransport>,
    registry: Arc<DocumentRegistry>,
    signals: SignalBus,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    targets: DashMap<String, DocumentHandle>,
    sessions: DashMap<String, DocumentHandle>,
}

impl CdpInjector {
    pub fn new(cfg: CdpConfig, signals: SignalBus) -> Self {
        let transport: Arc<dyn CdpTransport> = if cfg.websocket_url.is_some() {
            info!(target: "cdp-adapter", "using devtools transport");
            Arc::new(ChromiumTransport::new(cfg.clone()))
        } else {
            warn!(
                target: "cdp-adapter",
                "no devtools websocket configured; every execute will fail NotReady"
            );
            Arc::new(NoopTransport)
        };
        Self::with_transport(cfg, signals, transport)
    }

    pub fn with_transport(
        cfg: CdpConfig,
        signals: SignalBus,
        transport: Arc<dyn CdpTransport>,
    ) -> Self {
        Self {
            cfg,
            transport,
            registry: Arc::new(DocumentRegistry::new()),
            signals,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            targets: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    pub fn registry(&self) -> Arc<DocumentRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn signals(&self) -> SignalBus {
        Arc::clone(&self.signals)
    }

    pub fn documents(&self) -> Vec<DocumentHandle> {
        self.registry.handles()
    }

    pub async fn start(self: Arc<Self>) -> BridgeResult<()> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.transport.start().await?;
        let loop_task = tokio::spawn(Self::event_loop(Arc::clone(&self)));
        self.tasks.lock().await.push(loop_task);
        info!(target: "cdp-adapter", "injector event loop started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            let _ = handle.await;
        }
    }

    async fn event_loop(self: Arc<Self>) {
        debug!(target: "cdp-adapter", "event loop entered");
        let min_backoff = Duration::from_millis(self.cfg.retry_backoff_ms.max(1));
        const MAX_BACKOFF: Duration = Duration::from_secs(5);
        let mut backoff = min_backoff;

        loop {
            select! {
                _ = self.shutdown.cancelled() => break,
                event = self.transport.next_event() => {
                    match event {
                        Some(ev) => {
                            backoff = min_backoff;
                            self.handle_event(ev).await;
                        }
                        None => {
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            self.handle_transport_disconnect();
                            warn!(target: "cdp-adapter", "transport stream ended; attempting restart");
                            if let Err(err) = self.transport.start().await {
                                warn!(target: "cdp-adapter", %err, "transport restart failed");
                            }
                            select! {
                                _ = self.shutdown.cancelled() => break,
                                _ = sleep(backoff) => {}
                            }
                            backoff = (backoff + min_backoff).min(MAX_BACKOFF);
                        }
                    }
                }
            }
        }
        debug!(target: "cdp-adapter", "event loop exiting");
    }

    fn handle_transport_disconnect(&self) {
        if !self.registry.is_empty() {
            info!(
                target: "cdp-adapter",
                documents = self.registry.handles().len(),
                "devtools transport restarted; attached documents were dropped"
            );
        }
        self.registry.clear();
        self.targets.clear();
        self.sessions.clear();
    }

    async fn handle_event(&self, event: TransportEvent) {
        let method = event.method.clone();
        if let Err(err) = self.process_event(event).await {
            debug!(target: "cdp-adapter", %method, %err, "cdp event handling error");
        }
    }

    async fn process_event(&self, event: TransportEvent) -> BridgeResult<()> {
        match event.method.as_str() {
            "Target.targetCreated" => self.on_target_created(event.params)?,
            "Target.attachedToTarget" => self.on_target_attached(event.params).await?,
            "Target.detachedFromTarget" => self.on_target_detached(event.params)?,
            "Target.targetDestroyed" => self.on_target_destroyed(event.params)?,
            "Page.frameNavigated" => self.on_frame_navigated(event)?,
            "Page.domContentEventFired" => self.on_content_loaded(event),
            "Page.navigatedWithinDocument" => self.on_navigated_within_document(event)?,
            _ => {
                debug!(target: "cdp-adapter", method = %event.method, "unhandled cdp event");
            }
        }
        Ok(())
    }

    fn document_for_target(&self, info: &TargetInfo) -> DocumentHandle {
        if let Some(existing) = self.targets.get(&info.target_id) {
            return *existing.value();
        }
        let handle = DocumentHandle::new();
        self.targets.insert(info.target_id.clone(), handle);
        self.registry.insert(handle, Some(info.target_id.clone()));
        if let Some(url) = info.url.clone().filter(|u| !u.is_empty()) {
            self.registry.set_url(&handle, url);
        }
        handle
    }

    fn on_target_created(&self, params: Value) -> BridgeResult<()> {
        let payload: TargetCreatedParams = decode(params)?;
        if payload.target_info.target_type != "page" {
            return Ok(());
        }
        let handle = self.document_for_target(&payload.target_info);
        debug!(target: "cdp-adapter", %handle, target_id = %payload.target_info.target_id, "page target discovered");
        Ok(())
    }

    async fn on_target_attached(&self, params: Value) -> BridgeResult<()> {
        let payload: AttachedToTargetParams = decode(params)?;
        if payload.target_info.target_type != "page" {
            return Ok(());
        }

        let handle = self.document_for_target(&payload.target_info);
        self.sessions.insert(payload.session_id.clone(), handle);
        self.registry
            .set_cdp_session(&handle, payload.session_id.clone());

        let session = CommandTarget::Session(payload.session_id);
        self.transport
            .send_command(session.clone(), "Page.enable", json!({}))
            .await?;
        self.bootstrap_loaded_document(handle, session).await;
        info!(target: "cdp-adapter", %handle, "document attached");
        Ok(())
    }

    /// A document that finished loading before we attached never fires
    /// `domContentEventFired`; detect it from the frame tree and readyState.
    async fn bootstrap_loaded_document(&self, handle: DocumentHandle, session: CommandTarget) {
        let tree = match self
            .transport
            .send_command(session.clone(), "Page.getFrameTree", json!({}))
            .await
        {
            Ok(tree) => tree,
            Err(err) => {
                debug!(target: "cdp-adapter", %handle, %err, "frame tree unavailable");
                return;
            }
        };
        let Some(frame) = tree
            .pointer("/frameTree/frame")
            .cloned()
            .and_then(|frame| serde_json::from_value::<FrameInfo>(frame).ok())
        else {
            return;
        };
        let url = frame.full_url();
        self.registry
            .commit_navigation(&handle, frame.id.clone(), url.clone());

        let ready = self
            .transport
            .send_command(
                session,
                "Runtime.evaluate",
                json!({ "expression": "document.readyState", "returnByValue": true }),
            )
            .await
            .ok()
            .and_then(|resp| {
                resp.pointer("/result/value")
                    .and_then(Value::as_str)
                    .map(|state| state != "loading")
            })
            .unwrap_or(false);
        if ready {
            self.registry.mark_content_loaded(&handle);
            self.emit(LifecycleSignal::content_loaded(handle, url));
        }
    }

    fn on_target_detached(&self, params: Value) -> BridgeResult<()> {
        let payload: DetachedFromTargetParams = decode(params)?;
        if let Some((_, handle)) = self.sessions.remove(&payload.session_id) {
            self.targets.retain(|_, h| *h != handle);
            self.registry.remove(&handle);
            info!(target: "cdp-adapter", %handle, "document detached");
        }
        Ok(())
    }

    fn on_target_destroyed(&self, params: Value) -> BridgeResult<()> {
        let payload: TargetDestroyedParams = decode(params)?;
        if let Some((_, handle)) = self.targets.remove(&payload.target_id) {
            self.sessions.retain(|_, h| *h != handle);
            self.registry.remove(&handle);
            info!(target: "cdp-adapter", %handle, "document destroyed");
        }
        Ok(())
    }

    fn handle_for_session(&self, session_id: Option<&String>) -> Option<DocumentHandle> {
        session_id.and_then(|id| self.sessions.get(id).map(|entry| *entry.value()))
    }

    fn on_frame_navigated(&self, event: TransportEvent) -> BridgeResult<()> {
        let Some(handle) = self.handle_for_session(event.session_id.as_ref()) else {
            return Ok(());
        };
        let payload: FrameNavigatedParams = decode(event.params)?;
        let url = payload.frame.full_url();
        let is_main_frame = payload.frame.parent_id.is_none();
        if is_main_frame {
            self.registry
                .commit_navigation(&handle, payload.frame.id.clone(), url.clone());
        }
        self.emit(LifecycleSignal::new(
            handle,
            SignalKind::NavigationCommitted,
            url,
            is_main_frame,
        ));
        Ok(())
    }

    fn on_content_loaded(&self, event: TransportEvent) {
        let Some(handle) = self.handle_for_session(event.session_id.as_ref()) else {
            return;
        };
        if let Some(url) = self.registry.mark_content_loaded(&handle) {
            self.emit(LifecycleSignal::content_loaded(handle, url));
        }
    }

    fn on_navigated_within_document(&self, event: TransportEvent) -> BridgeResult<()> {
        let Some(handle) = self.handle_for_session(event.session_id.as_ref()) else {
            return Ok(());
        };
        let payload: NavigatedWithinDocumentParams = decode(event.params)?;
        let is_main_frame = self.registry.is_main_frame(&handle, &payload.frame_id);
        if is_main_frame {
            self.registry.set_url(&handle, payload.url.clone());
        }
        self.emit(LifecycleSignal::new(
            handle,
            SignalKind::InPageNavigation,
            payload.url,
            is_main_frame,
        ));
        Ok(())
    }

    fn emit(&self, signal: LifecycleSignal) {
        metrics::record_signal();
        debug!(
            target: "cdp-adapter",
            handle = %signal.handle,
            kind = ?signal.kind,
            url = %signal.url,
            main_frame = signal.is_main_frame,
            "lifecycle signal"
        );
        self.signals.send(signal);
    }
}

fn exception_text(details: &Value) -> String {
    details
        .pointer("/exception/description")
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("script raised an exception")
        .to_string()
}

#[async_trait]
impl InjectionChannel for CdpInjector {
    async fn execute(&self, handle: DocumentHandle, fragment: &Fragment) -> BridgeResult<Value> {
        let ctx = self
            .registry
            .get(&handle)
            .ok_or_else(|| BridgeError::not_ready(format!("{handle} is not attached")))?;
        let session = ctx
            .cdp_session
            .ok_or_else(|| BridgeError::not_ready(format!("{handle} has no devtools session")))?;
        if !ctx.content_loaded {
            return Err(BridgeError::not_ready(format!(
                "{handle} has not finished loading"
            )));
        }

        let response = self
            .transport
            .send_command(
                CommandTarget::Session(session),
                "Runtime.evaluate",
                json!({
                    "expression": fragment.source(),
                    "awaitPromise": true,
                    "returnByValue": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            return Err(BridgeError::execution_failed(exception_text(details))
                .with_data(details.clone()));
        }

        let value = response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null);
        Envelope::normalize(value).into_result()
    }
}
