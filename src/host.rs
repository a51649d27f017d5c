//! Owns the injection channel and the per-document sessions.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use cdp_adapter::{
    signal_bus, CdpInjector, EmulatedDocument, InstrumentedChannel, SharedChannel, SignalBus,
};
use network_throttle::{load_bundle_from_path, ProfileCatalog, ThrottleSimulator};
use pagebridge_core_types::DocumentHandle;
use pagebridge_event_bus::EventBus;

use crate::config::BridgeConfig;
use crate::session::InstrumentationSession;

const EMULATED_DOCUMENT_KEY: &str = "emulated";

enum ChannelSource {
    Cdp(Arc<CdpInjector>),
    Emulated(EmulatedDocument),
}

pub struct BridgeHost {
    config: BridgeConfig,
    signals: SignalBus,
    channel: SharedChannel,
    source: ChannelSource,
    throttle: Arc<ThrottleSimulator>,
    sessions: DashMap<DocumentHandle, Arc<InstrumentationSession>>,
}

impl BridgeHost {
    /// Attaches to the DevTools endpoint named by `config.cdp`.
    pub async fn connect(config: BridgeConfig) -> Result<Self> {
        if config.cdp.websocket_url.is_none() {
            bail!("no DevTools websocket configured; set cdp.websocket_url, PAGEBRIDGE_CDP_WS or use --emulated");
        }
        let signals = signal_bus(config.lifecycle.signal_capacity);
        let injector = Arc::new(CdpInjector::new(config.cdp.clone(), signals.clone()));
        Arc::clone(&injector)
            .start()
            .await
            .context("Failed to start the DevTools transport")?;
        let channel: SharedChannel = Arc::new(InstrumentedChannel::new(Arc::clone(&injector)));
        Self::assemble(config, signals, channel, ChannelSource::Cdp(injector))
    }

    /// Runs against an in-process document at `url`.
    pub fn emulated(config: BridgeConfig, url: &str) -> Result<Self> {
        let signals = signal_bus(config.lifecycle.signal_capacity);
        let document = EmulatedDocument::with_signals(url, signals.clone());
        let channel: SharedChannel = Arc::new(InstrumentedChannel::new(document.clone()));
        Self::assemble(config, signals, channel, ChannelSource::Emulated(document))
    }

    fn assemble(
        config: BridgeConfig,
        signals: SignalBus,
        channel: SharedChannel,
        source: ChannelSource,
    ) -> Result<Self> {
        let mut catalog = ProfileCatalog::builtin();
        if let Some(path) = &config.throttle.bundle {
            let bundle = load_bundle_from_path(path)
                .with_context(|| format!("Failed to load throttle bundle {}", path.display()))?;
            catalog
                .merge_bundle(bundle)
                .context("Invalid throttle bundle")?;
            info!(target: "pagebridge", path = %path.display(), "throttle bundle loaded");
        }
        if let Some(id) = &config.throttle.default_profile {
            catalog
                .get(id)
                .with_context(|| format!("Unknown default throttle profile {id}"))?;
        }
        let throttle = Arc::new(ThrottleSimulator::with_catalog(channel.clone(), catalog));
        Ok(Self {
            config,
            signals,
            channel,
            source,
            throttle,
            sessions: DashMap::new(),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }

    pub fn throttle(&self) -> &Arc<ThrottleSimulator> {
        &self.throttle
    }

    /// The in-process document, when running emulated.
    pub fn emulated_document(&self) -> Option<&EmulatedDocument> {
        match &self.source {
            ChannelSource::Emulated(document) => Some(document),
            ChannelSource::Cdp(_) => None,
        }
    }

    pub fn documents(&self) -> Vec<DocumentHandle> {
        match &self.source {
            ChannelSource::Cdp(injector) => injector.documents(),
            ChannelSource::Emulated(document) => vec![document.handle()],
        }
    }

    /// Identity the document's history is persisted under: the DevTools
    /// target id when known, otherwise the handle. The in-process document
    /// is the only one in its host and always maps to the same key.
    pub fn document_key(&self, handle: DocumentHandle) -> String {
        match &self.source {
            ChannelSource::Cdp(injector) => injector
                .registry()
                .get(&handle)
                .and_then(|context| context.target_id)
                .unwrap_or_else(|| handle.to_string()),
            ChannelSource::Emulated(_) => EMULATED_DOCUMENT_KEY.to_string(),
        }
    }

    /// First attached document, waiting up to `wait` for one to appear.
    pub async fn wait_for_document(&self, wait: Duration) -> Result<DocumentHandle> {
        let deadline = Instant::now() + wait;
        let mut signals = self.signals.subscribe();
        loop {
            if let Some(handle) = self.documents().into_iter().next() {
                return Ok(handle);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, signals.recv()).await {
                Ok(Ok(_)) => continue,
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(_)) => bail!("signal bus closed before a document attached"),
                Err(_) => bail!("no document attached within {} ms", wait.as_millis()),
            }
        }
    }

    /// Opens and starts the session for `handle`, or returns the running one.
    pub fn open_session(&self, handle: DocumentHandle) -> Result<Arc<InstrumentationSession>> {
        if let Some(existing) = self.sessions.get(&handle) {
            return Ok(Arc::clone(existing.value()));
        }
        let document_key = self.document_key(handle);
        let session = Arc::new(InstrumentationSession::open(
            self.channel.clone(),
            handle,
            &self.config,
            Arc::clone(&self.throttle),
            &document_key,
        ));
        if let Some(id) = &self.config.throttle.default_profile {
            session
                .preselect_throttle(id)
                .with_context(|| format!("Unknown default throttle profile {id}"))?;
        }
        session.start(&self.signals);
        self.sessions.insert(handle, Arc::clone(&session));
        Ok(session)
    }

    pub fn session(&self, handle: DocumentHandle) -> Option<Arc<InstrumentationSession>> {
        self.sessions.get(&handle).map(|entry| Arc::clone(entry.value()))
    }

    pub async fn close_session(&self, handle: DocumentHandle) {
        if let Some((_, session)) = self.sessions.remove(&handle) {
            session.shutdown().await;
        }
    }

    pub async fn shutdown(&self) {
        let handles: Vec<DocumentHandle> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for handle in handles {
            self.close_session(handle).await;
        }
        if let ChannelSource::Cdp(injector) = &self.source {
            injector.shutdown().await;
        }
        if !self.sessions.is_empty() {
            warn!(target: "pagebridge", "sessions opened during shutdown were left running");
        }
    }
}
