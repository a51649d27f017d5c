use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cdp_adapter::{InjectionChannel, SharedChannel};
use fragment_codec::Command;
use pagebridge_core_types::DocumentHandle;

use crate::config::TelemetryConfig;
use crate::errors::TelemetryError;
use crate::export::{export_har, HarExport};
use crate::model::{
    ConsoleRecord, DrainBatch, HistorySnapshot, NetworkRequestRecord, TelemetryUpdate,
};
use crate::ring::TelemetryRing;
use crate::store::SnapshotStore;

/// Periodically drains one document's pending telemetry into capped,
/// persisted host-side history.
pub struct TelemetryCollector {
    channel: SharedChannel,
    handle: DocumentHandle,
    config: TelemetryConfig,
    requests: TelemetryRing<NetworkRequestRecord>,
    console: TelemetryRing<ConsoleRecord>,
    store: Arc<dyn SnapshotStore>,
    updates: broadcast::Sender<TelemetryUpdate>,
}

impl TelemetryCollector {
    /// Restores any persisted history before live collection starts. A
    /// corrupt or unreadable snapshot is logged and history starts empty.
    pub fn new(
        channel: SharedChannel,
        handle: DocumentHandle,
        config: TelemetryConfig,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let (updates, _) = broadcast::channel(64);
        let collector = Self {
            channel,
            handle,
            requests: TelemetryRing::new(config.request_cap),
            console: TelemetryRing::new(config.console_cap),
            config,
            store,
            updates,
        };
        match collector.store.load() {
            Ok(Some(snapshot)) => {
                collector.requests.restore(snapshot.requests);
                collector.console.restore(snapshot.console);
                info!(
                    target: "telemetry-tap",
                    requests = collector.requests.len(),
                    console = collector.console.len(),
                    "history restored"
                );
            }
            Ok(None) => {}
            Err(err) => warn!(target: "telemetry-tap", %err, "history not restored"),
        }
        collector
    }

    pub fn handle(&self) -> DocumentHandle {
        self.handle
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryUpdate> {
        self.updates.subscribe()
    }

    /// Newest first.
    pub fn requests(&self) -> Vec<NetworkRequestRecord> {
        self.requests.snapshot()
    }

    /// Newest first.
    pub fn console(&self) -> Vec<ConsoleRecord> {
        self.console.snapshot()
    }

    /// Runs one DRAIN. Failures are expected while the document is
    /// navigating or not yet armed, so they are logged at debug and the
    /// tick is skipped.
    pub async fn drain_once(&self) -> Option<TelemetryUpdate> {
        let batch = match self.channel.run(self.handle, Command::drain()).await {
            Ok(value) => match serde_json::from_value::<DrainBatch>(value) {
                Ok(batch) => batch,
                Err(err) => {
                    debug!(target: "telemetry-tap", handle = %self.handle, %err, "drain payload rejected");
                    return None;
                }
            },
            Err(err) => {
                debug!(target: "telemetry-tap", handle = %self.handle, %err, "drain skipped");
                return None;
            }
        };
        if batch.is_empty() {
            return None;
        }
        Some(self.ingest(batch))
    }

    /// Merges a drained batch and persists the result.
    pub fn ingest(&self, batch: DrainBatch) -> TelemetryUpdate {
        let update = TelemetryUpdate {
            handle: self.handle,
            added_requests: self.requests.merge_batch(batch.network),
            added_console: self.console.merge_batch(batch.console),
        };
        if let Err(err) = self.persist() {
            warn!(target: "telemetry-tap", %err, "history not persisted");
        }
        debug!(
            target: "telemetry-tap",
            handle = %self.handle,
            requests = update.added_requests,
            console = update.added_console,
            "drained"
        );
        let _ = self.updates.send(update.clone());
        update
    }

    pub fn persist(&self) -> Result<(), TelemetryError> {
        self.store.save(&HistorySnapshot {
            version: HistorySnapshot::VERSION,
            requests: self.requests.snapshot(),
            console: self.console.snapshot(),
        })
    }

    pub fn clear(&self) -> Result<(), TelemetryError> {
        self.requests.clear();
        self.console.clear();
        self.store.clear()
    }

    pub fn export_har(&self, exported_at: DateTime<Utc>) -> Result<HarExport, TelemetryError> {
        export_har(&self.requests.snapshot(), exported_at)
    }

    /// Drains every [`TelemetryConfig::drain_interval_ms`] until the handle
    /// is shut down.
    pub fn spawn(self: &Arc<Self>) -> CollectorHandle {
        let collector = Arc::clone(self);
        let cancel = CancellationToken::new();
        let loop_token = cancel.clone();
        let period = self.config.drain_interval();
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        collector.drain_once().await;
                    }
                }
            }
        });
        CollectorHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Returned by [`TelemetryCollector::spawn`].
pub struct CollectorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CollectorHandle {
    /// Stops the drain loop and waits for it to finish.
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(_) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err),
            }
        } else {
            Ok(())
        }
    }
}

impl Drop for CollectorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
