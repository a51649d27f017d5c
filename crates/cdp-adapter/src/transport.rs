//! DevTools wire transport.
//!
//! The injector needs three things from the wire: a socket with target
//! discovery switched on, request/reply commands, and the `Target.*` and
//! `Page.*` events it turns into lifecycle signals. Everything else the
//! browser emits is dropped here. A dead link is only replaced when the
//! injector calls [`CdpTransport::start`] again.

use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use pagebridge_core_types::{BridgeError, BridgeResult};

use crate::config::CdpConfig;

const FORWARDED_DOMAINS: [&str; 2] = ["Target.", "Page."];
const LIVENESS_METHOD: &str = "Browser.getVersion";

#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    /// Opens the link, or reopens it when the previous one died.
    async fn start(&self) -> BridgeResult<()>;
    /// `None` once the link is gone.
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> BridgeResult<Value>;
}

#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> BridgeResult<()> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> BridgeResult<Value> {
        Err(BridgeError::not_ready(format!(
            "no devtools endpoint configured for {method}"
        )))
    }
}

/// Transport over a DevTools websocket owned by the host shell.
pub struct ChromiumTransport {
    cfg: CdpConfig,
    link: Mutex<Option<Arc<Link>>>,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        Self {
            cfg,
            link: Mutex::new(None),
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }

    async fn open_link(&self) -> BridgeResult<Arc<Link>> {
        match self.link.lock().await.as_ref() {
            Some(link) if link.is_open() => Ok(Arc::clone(link)),
            _ => Err(BridgeError::not_ready("devtools transport is not connected")),
        }
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> BridgeResult<()> {
        let mut slot = self.link.lock().await;
        if slot.as_ref().is_some_and(|link| link.is_open()) {
            return Ok(());
        }
        let link = Arc::new(Link::connect(&self.cfg).await?);
        let deadline = self.deadline();
        link.call(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
            deadline,
        )
        .await?;
        link.call(
            CommandTarget::Browser,
            "Target.setAutoAttach",
            json!({ "autoAttach": true, "waitForDebuggerOnStart": false, "flatten": true }),
            deadline,
        )
        .await?;
        *slot = Some(link);
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let link = self.link.lock().await.clone()?;
        link.next_event().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> BridgeResult<Value> {
        self.open_link()
            .await?
            .call(target, method, params, self.deadline())
            .await
    }
}

struct Outgoing {
    target: CommandTarget,
    method: String,
    params: Value,
    reply: oneshot::Sender<BridgeResult<Value>>,
}

type Pending = HashMap<CallId, oneshot::Sender<BridgeResult<Value>>>;

/// One websocket connection and the task pumping it.
struct Link {
    commands: mpsc::Sender<Outgoing>,
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    pump: JoinHandle<()>,
}

impl Link {
    async fn connect(cfg: &CdpConfig) -> BridgeResult<Self> {
        let url = cfg
            .websocket_url
            .clone()
            .ok_or_else(|| BridgeError::not_ready("no devtools websocket url configured"))?;
        let conn = Connection::<CdpEventMessage>::connect(&url)
            .await
            .map_err(|err| BridgeError::not_ready(format!("devtools connect failed: {err}")))?;

        let (commands, command_rx) = mpsc::channel(64);
        let (event_tx, events) = mpsc::channel(256);
        let liveness = Duration::from_millis(cfg.heartbeat_interval_ms);
        let pump = tokio::spawn(async move {
            match pump(conn, command_rx, event_tx, liveness).await {
                Ok(()) => info!(target: "cdp-transport", "devtools connection closed"),
                Err(err) => warn!(target: "cdp-transport", %err, "devtools connection lost"),
            }
        });
        info!(target: "cdp-transport", %url, "devtools connection established");

        Ok(Self {
            commands,
            events: Mutex::new(events),
            pump,
        })
    }

    fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn call(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> BridgeResult<Value> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(Outgoing {
                target,
                method: method.to_string(),
                params,
                reply,
            })
            .await
            .map_err(|_| BridgeError::not_ready("devtools connection closed"))?;

        match tokio::time::timeout(deadline, answer).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::not_ready("devtools connection closed mid-call")),
            Err(_) => Err(BridgeError::internal(format!(
                "{method} unanswered after {}ms",
                deadline.as_millis()
            ))),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Moves commands out and replies/events in until the socket ends. With a
/// non-zero `liveness`, a liveness call still unanswered one interval
/// later also ends the link.
async fn pump(
    mut conn: Connection<CdpEventMessage>,
    mut commands: mpsc::Receiver<Outgoing>,
    events: mpsc::Sender<TransportEvent>,
    liveness: Duration,
) -> BridgeResult<()> {
    let mut pending = Pending::new();
    let mut unanswered: Option<CallId> = None;
    let checks_enabled = !liveness.is_zero();
    let period = if checks_enabled { liveness } else { Duration::from_secs(3600) };
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let result = loop {
        tokio::select! {
            Some(outgoing) = commands.recv() => {
                let method: MethodId = outgoing.method.clone().into();
                match conn.submit_command(method, session_of(&outgoing.target), outgoing.params) {
                    Ok(id) => {
                        pending.insert(id, outgoing.reply);
                    }
                    Err(err) => {
                        let failure = BridgeError::not_ready(format!("submit {} failed: {err}", outgoing.method));
                        let _ = outgoing.reply.send(Err(failure.clone()));
                        break Err(failure);
                    }
                }
            }
            _ = ticker.tick(), if checks_enabled => {
                if unanswered.is_some() {
                    break Err(BridgeError::not_ready("devtools endpoint stopped answering"));
                }
                match conn.submit_command(LIVENESS_METHOD.to_string().into(), None, json!({})) {
                    Ok(id) => unanswered = Some(id),
                    Err(err) => break Err(BridgeError::not_ready(format!("liveness check failed: {err}"))),
                }
            }
            message = conn.next() => match message {
                Some(Ok(Message::Response(response))) => {
                    if unanswered.as_ref() == Some(&response.id) {
                        unanswered = None;
                    } else if let Some(reply) = pending.remove(&response.id) {
                        let _ = reply.send(reply_payload(response));
                    }
                }
                Some(Ok(Message::Event(event))) => forward(event, &events).await,
                Some(Err(err)) => break Err(wire_error(err)),
                None => break Ok(()),
            }
        }
    };

    let closed = BridgeError::not_ready("devtools connection closed");
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(closed.clone()));
    }
    result
}

async fn forward(event: CdpEventMessage, events: &mpsc::Sender<TransportEvent>) {
    let raw: CdpJsonEventMessage = match event.try_into() {
        Ok(raw) => raw,
        Err(err) => {
            debug!(target: "cdp-transport", %err, "undecodable cdp event");
            return;
        }
    };
    if !forwarded(&raw.method) {
        return;
    }
    let event = TransportEvent {
        method: raw.method.into_owned(),
        params: raw.params,
        session_id: raw.session_id,
    };
    if events.send(event).await.is_err() {
        debug!(target: "cdp-transport", "event receiver dropped");
    }
}

fn forwarded(method: &str) -> bool {
    FORWARDED_DOMAINS
        .iter()
        .any(|domain| method.starts_with(domain))
}

fn session_of(target: &CommandTarget) -> Option<CdpSessionId> {
    match target {
        CommandTarget::Browser => None,
        CommandTarget::Session(id) => Some(CdpSessionId::from(id.clone())),
    }
}

/// Protocol-level errors mean the target is gone or not evaluable yet.
fn reply_payload(response: Response) -> BridgeResult<Value> {
    match (response.result, response.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(BridgeError::not_ready(format!(
            "cdp error {}: {}",
            error.code, error.message
        ))),
        (None, None) => Err(BridgeError::internal("empty cdp response")),
    }
}

fn wire_error(err: CdpError) -> BridgeError {
    let message = err.to_string();
    match err {
        CdpError::JavascriptException(_) => BridgeError::execution_failed(message),
        CdpError::Serde(_) | CdpError::DecodeError(_) => BridgeError::internal(message),
        _ => BridgeError::not_ready(message),
    }
}
