use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cdp_adapter::{InjectionChannel, SharedChannel};
use fragment_codec::{Capability, Command, InstallOptions};
use pagebridge_core_types::{
    BridgeError, BridgeResult, DocumentHandle, Generation, LifecycleSignal, SignalKind,
};

use crate::machine::LifecycleMachine;
use crate::model::{ArmState, LifecycleSnapshot, SignalOutcome};

/// Work that must be redone after every successful arm, since page-side
/// state does not survive navigation.
#[async_trait]
pub trait ArmHook: Send + Sync {
    fn name(&self) -> &str;
    async fn on_armed(&self, handle: DocumentHandle, generation: Generation) -> BridgeResult<()>;
}

/// Keeps one document's capabilities installed across navigations.
pub struct LifecycleCoordinator {
    channel: SharedChannel,
    handle: DocumentHandle,
    capabilities: Vec<Capability>,
    options: InstallOptions,
    machine: Mutex<LifecycleMachine>,
    hooks: RwLock<Vec<Arc<dyn ArmHook>>>,
    arming: AsyncMutex<()>,
    lagged: AtomicBool,
}

impl LifecycleCoordinator {
    pub fn new(channel: SharedChannel, handle: DocumentHandle) -> Self {
        Self::with_capabilities(
            channel,
            handle,
            Capability::ALL.to_vec(),
            InstallOptions::default(),
        )
    }

    /// `capabilities` are installed in [`Capability::ALL`] order regardless
    /// of the order given.
    pub fn with_capabilities(
        channel: SharedChannel,
        handle: DocumentHandle,
        capabilities: Vec<Capability>,
        options: InstallOptions,
    ) -> Self {
        let capabilities = Capability::ALL
            .into_iter()
            .filter(|cap| capabilities.contains(cap))
            .collect();
        Self {
            channel,
            handle,
            capabilities,
            options,
            machine: Mutex::new(LifecycleMachine::new()),
            hooks: RwLock::new(Vec::new()),
            arming: AsyncMutex::new(()),
            lagged: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> DocumentHandle {
        self.handle
    }

    pub fn add_hook(&self, hook: Arc<dyn ArmHook>) {
        self.hooks.write().push(hook);
    }

    pub fn state(&self) -> ArmState {
        self.machine.lock().state()
    }

    pub fn generation(&self) -> Generation {
        self.machine.lock().generation()
    }

    pub fn is_installed(&self, cap: Capability) -> bool {
        self.machine.lock().is_installed(cap)
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        let machine = self.machine.lock();
        LifecycleSnapshot {
            handle: self.handle,
            state: machine.state(),
            generation: machine.generation(),
            installed: machine.registry().installed(machine.generation()),
            url: machine.url().map(String::from),
        }
    }

    pub async fn handle_signal(&self, signal: &LifecycleSignal) -> SignalOutcome {
        if signal.handle != self.handle || !signal.is_main_frame {
            debug!(
                target: "lifecycle",
                handle = %signal.handle,
                main_frame = signal.is_main_frame,
                "signal ignored"
            );
            return SignalOutcome::Ignored;
        }

        match signal.kind {
            SignalKind::NavigationCommitted => {
                let generation = self.machine.lock().navigation_committed(&signal.url);
                info!(
                    target: "lifecycle",
                    handle = %self.handle,
                    %generation,
                    url = %signal.url,
                    "navigation committed; capabilities reset"
                );
                SignalOutcome::Reset { generation }
            }
            SignalKind::ContentLoaded => self.arm_outcome().await,
            SignalKind::InPageNavigation => self.confirm_in_page(&signal.url).await,
        }
    }

    async fn arm_outcome(&self) -> SignalOutcome {
        match self.arm().await {
            Ok(generation) => SignalOutcome::Armed { generation },
            Err(err) => SignalOutcome::ArmFailed {
                message: err.to_string(),
            },
        }
    }

    /// Accepts an in-page signal only when the document reports the same
    /// location; a nested frame's history change would not match.
    async fn confirm_in_page(&self, url: &str) -> SignalOutcome {
        let reported = match self.channel.run(self.handle, Command::locate()).await {
            Ok(value) => value.as_str().map(String::from),
            Err(err) => {
                debug!(target: "lifecycle", handle = %self.handle, %err, "locate failed");
                None
            }
        };

        if reported.as_deref() != Some(url) {
            warn!(
                target: "lifecycle",
                handle = %self.handle,
                signalled = %url,
                reported = ?reported,
                "in-page navigation rejected"
            );
            return SignalOutcome::InPageRejected { reported };
        }

        self.machine.lock().in_page_navigation(url);
        debug!(target: "lifecycle", handle = %self.handle, %url, "in-page navigation confirmed");
        if self.state() != ArmState::Armed {
            if let SignalOutcome::ArmFailed { message } = self.arm_outcome().await {
                debug!(target: "lifecycle", handle = %self.handle, %message, "re-arm after in-page navigation failed");
            }
        }
        SignalOutcome::InPageConfirmed
    }

    /// Records that signals for this document were dropped upstream. The
    /// spawned loop reconciles before handling the next signal.
    pub fn note_lag(&self, skipped: u64) {
        warn!(target: "lifecycle", handle = %self.handle, skipped, "lifecycle signals lost");
        self.lagged.store(true, Ordering::SeqCst);
    }

    /// Catches up after lost signals. A location that moved since the last
    /// signal counts as a committed navigation; the capabilities are then
    /// re-armed, which is a no-op wherever the page-side flags survived.
    /// A reload to the same url cannot be told apart and keeps the generation.
    pub async fn reconcile(&self) -> SignalOutcome {
        let reported = match self.channel.run(self.handle, Command::locate()).await {
            Ok(value) => value.as_str().map(String::from),
            Err(err) => {
                debug!(target: "lifecycle", handle = %self.handle, %err, "locate failed during reconcile");
                return SignalOutcome::ArmFailed {
                    message: err.to_string(),
                };
            }
        };
        if let Some(url) = reported {
            let moved = self.machine.lock().url() != Some(url.as_str());
            if moved {
                let generation = self.machine.lock().navigation_committed(&url);
                info!(
                    target: "lifecycle",
                    handle = %self.handle,
                    %generation,
                    %url,
                    "missed navigation detected; capabilities reset"
                );
            }
        }
        self.arm_outcome().await
    }

    /// Issues INSTALL for every configured capability, then runs the arm
    /// hooks. Safe to call at any time: the page-side guard turns repeated
    /// installs into no-ops.
    pub async fn arm(&self) -> BridgeResult<Generation> {
        let _guard = self.arming.lock().await;
        let generation = self.machine.lock().begin_install();

        for cap in self.capabilities.iter().copied() {
            let command = Command::install(cap, generation, &self.options);
            match self.channel.run(self.handle, command).await {
                Ok(reply) => {
                    let wrapped = reply
                        .get("installed")
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(false);
                    self.machine.lock().record_install(cap, generation);
                    debug!(
                        target: "lifecycle",
                        handle = %self.handle,
                        capability = %cap,
                        %generation,
                        wrapped,
                        "capability installed"
                    );
                }
                Err(err) => {
                    self.machine.lock().abort_install(generation);
                    debug!(
                        target: "lifecycle",
                        handle = %self.handle,
                        capability = %cap,
                        %err,
                        "install failed"
                    );
                    return Err(err);
                }
            }
        }

        let hooks: Vec<Arc<dyn ArmHook>> = self.hooks.read().clone();
        for hook in hooks {
            if let Err(err) = hook.on_armed(self.handle, generation).await {
                warn!(
                    target: "lifecycle",
                    handle = %self.handle,
                    hook = hook.name(),
                    %err,
                    "arm hook failed"
                );
            }
        }

        if !self.machine.lock().finish_install(generation) {
            return Err(BridgeError::not_ready(format!(
                "navigation committed while arming generation {generation}"
            )));
        }
        info!(target: "lifecycle", handle = %self.handle, %generation, "armed");
        Ok(generation)
    }

    /// Consumes `signals` in order until the sender closes or the handle is
    /// shut down.
    pub fn spawn(self: Arc<Self>, mut signals: mpsc::Receiver<LifecycleSignal>) -> CoordinatorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = signals.recv() => match next {
                        Some(signal) => {
                            if self.lagged.swap(false, Ordering::SeqCst) {
                                self.reconcile().await;
                            }
                            self.handle_signal(&signal).await;
                        }
                        None => break,
                    }
                }
            }
            debug!(target: "lifecycle", handle = %self.handle, "signal loop exiting");
        });
        CoordinatorHandle {
            cancel,
            task: Some(task),
        }
    }
}

pub struct CoordinatorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CoordinatorHandle {
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
