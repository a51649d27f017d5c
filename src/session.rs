//! One instrumented document: its coordinator, telemetry collector, throttle
//! state and storage queries, wired to a shared injection channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

use cdp_adapter::{InjectionChannel, SharedChannel, SignalBus};
use fragment_codec::Command;
use lifecycle::{CoordinatorHandle, LifecycleCoordinator, LifecycleSnapshot};
use network_throttle::ThrottleSimulator;
use pagebridge_core_types::{BridgeResult, DocumentHandle, Envelope, Generation};
use pagebridge_event_bus::to_mpsc_filtered_with_lag;
use storage_query::StorageQueryInterpreter;
use telemetry_tap::{
    CollectorHandle, ConsoleRecord, HarExport, JsonFileStore, MemoryStore, NetworkRequestRecord,
    SnapshotStore, TelemetryCollector, TelemetryError, TelemetryUpdate,
};

use crate::config::BridgeConfig;
use crate::probe::{probe_resource, ProbeOutcome};

struct SessionTasks {
    coordinator: CoordinatorHandle,
    collector: CollectorHandle,
}

pub struct InstrumentationSession {
    handle: DocumentHandle,
    channel: SharedChannel,
    coordinator: Arc<LifecycleCoordinator>,
    collector: Arc<TelemetryCollector>,
    throttle: Arc<ThrottleSimulator>,
    queries: StorageQueryInterpreter,
    signal_capacity: usize,
    tasks: Mutex<Option<SessionTasks>>,
}

impl InstrumentationSession {
    /// Builds the session and restores the history persisted for
    /// `document_key`. Nothing runs until [`InstrumentationSession::start`].
    ///
    /// `document_key` names the document across restarts; sessions with
    /// different keys never share a snapshot file.
    pub fn open(
        channel: SharedChannel,
        handle: DocumentHandle,
        config: &BridgeConfig,
        throttle: Arc<ThrottleSimulator>,
        document_key: &str,
    ) -> Self {
        let coordinator = Arc::new(LifecycleCoordinator::with_capabilities(
            channel.clone(),
            handle,
            config.lifecycle.capabilities.clone(),
            config.telemetry.install_options(),
        ));
        coordinator.add_hook(throttle.clone());

        let store: Arc<dyn SnapshotStore> = match &config.telemetry.history_dir {
            Some(dir) => Arc::new(JsonFileStore::for_document(
                dir,
                &config.telemetry.history_key,
                document_key,
            )),
            None => Arc::new(MemoryStore::new()),
        };
        let collector = Arc::new(TelemetryCollector::new(
            channel.clone(),
            handle,
            config.telemetry.clone(),
            store,
        ));

        Self {
            handle,
            queries: StorageQueryInterpreter::new(channel.clone()),
            channel,
            coordinator,
            collector,
            throttle,
            signal_capacity: config.lifecycle.signal_capacity,
            tasks: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> DocumentHandle {
        self.handle
    }

    /// Starts the signal loop and the drain ticker. Idempotent.
    pub fn start(&self, signals: &SignalBus) {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return;
        }
        let handle = self.handle;
        let coordinator = Arc::clone(&self.coordinator);
        let rx = to_mpsc_filtered_with_lag(
            signals,
            self.signal_capacity,
            move |signal| signal.handle == handle,
            move |skipped| coordinator.note_lag(skipped),
        );
        *tasks = Some(SessionTasks {
            coordinator: Arc::clone(&self.coordinator).spawn(rx),
            collector: self.collector.spawn(),
        });
        info!(target: "pagebridge", %handle, "session started");
    }

    pub async fn shutdown(&self) {
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.coordinator.shutdown().await;
            if let Err(err) = tasks.collector.shutdown().await {
                warn!(target: "pagebridge", handle = %self.handle, %err, "drain loop ended abnormally");
            }
        }
        self.throttle.forget(self.handle);
    }

    /// Arms now instead of waiting for the next content-loaded signal, for
    /// documents that finished loading before the session existed.
    pub async fn arm(&self) -> BridgeResult<Generation> {
        self.coordinator.arm().await
    }

    pub fn lifecycle(&self) -> LifecycleSnapshot {
        self.coordinator.snapshot()
    }

    pub fn coordinator(&self) -> &Arc<LifecycleCoordinator> {
        &self.coordinator
    }

    pub fn collector(&self) -> &Arc<TelemetryCollector> {
        &self.collector
    }

    pub fn subscribe_telemetry(&self) -> tokio::sync::broadcast::Receiver<TelemetryUpdate> {
        self.collector.subscribe()
    }

    pub async fn drain_now(&self) -> Option<TelemetryUpdate> {
        self.collector.drain_once().await
    }

    pub fn requests(&self) -> Vec<NetworkRequestRecord> {
        self.collector.requests()
    }

    pub fn console(&self) -> Vec<ConsoleRecord> {
        self.collector.console()
    }

    pub fn clear_history(&self) -> Result<(), TelemetryError> {
        self.collector.clear()
    }

    pub fn export_har(&self, exported_at: DateTime<Utc>) -> Result<HarExport, TelemetryError> {
        self.collector.export_har(exported_at)
    }

    pub async fn query(&self, line: &str) -> Envelope {
        self.queries.run(self.handle, line).await
    }

    pub async fn apply_throttle(&self, profile_id: &str) -> Envelope {
        Envelope::from_typed(self.throttle.apply(self.handle, profile_id).await)
    }

    pub fn preselect_throttle(&self, profile_id: &str) -> BridgeResult<()> {
        self.throttle.preselect(self.handle, profile_id)
    }

    pub async fn execute(&self, expression: &str) -> Envelope {
        Envelope::from_result(self.evaluate(expression).await)
    }

    pub async fn evaluate(&self, expression: &str) -> BridgeResult<Value> {
        self.channel.run(self.handle, Command::execute(expression)).await
    }

    pub async fn probe(&self, url: &str) -> BridgeResult<ProbeOutcome> {
        probe_resource(&self.channel, self.handle, url).await
    }
}
