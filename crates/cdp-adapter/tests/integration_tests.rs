//! Injector tests driven by a scripted transport: CDP events in, lifecycle
//! signals and `Runtime.evaluate` calls out.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{
    signal_bus, CdpConfig, CdpInjector, CdpTransport, CommandTarget, InjectionChannel,
    TransportEvent,
};
use fragment_codec::Command;
use pagebridge_core_types::{BridgeErrorKind, BridgeResult, LifecycleSignal, SignalKind};
use pagebridge_event_bus::EventBus;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::timeout;

struct MockTransport {
    rx: Mutex<mpsc::Receiver<TransportEvent>>,
    commands: Mutex<Vec<(String, Value)>>,
    responses: Mutex<VecDeque<(String, Value)>>,
}

impl MockTransport {
    fn new_pair() -> (Arc<Self>, mpsc::Sender<TransportEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (
            Arc::new(Self {
                rx: Mutex::new(rx),
                commands: Mutex::new(Vec::new()),
                responses: Mutex::new(VecDeque::new()),
            }),
            tx,
        )
    }

    async fn respond(&self, method: &str, value: Value) {
        self.responses
            .lock()
            .await
            .push_back((method.to_string(), value));
    }

    async fn methods(&self) -> Vec<String> {
        self.commands
            .lock()
            .await
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }
}

#[async_trait]
impl CdpTransport for MockTransport {
    async fn start(&self) -> BridgeResult<()> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.rx.lock().await.recv().await
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        params: Value,
    ) -> BridgeResult<Value> {
        self.commands
            .lock()
            .await
            .push((method.to_string(), params));
        let mut responses = self.responses.lock().await;
        match responses.iter().position(|(m, _)| m == method) {
            Some(idx) => Ok(responses.remove(idx).map(|(_, v)| v).unwrap_or(Value::Null)),
            None => Ok(Value::Null),
        }
    }
}

fn event(method: &str, session: Option<&str>, params: Value) -> TransportEvent {
    TransportEvent {
        method: method.to_string(),
        params,
        session_id: session.map(String::from),
    }
}

async fn next_signal(rx: &mut broadcast::Receiver<LifecycleSignal>) -> LifecycleSignal {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("signal before timeout")
        .expect("bus open")
}

async fn attached_injector() -> (
    Arc<CdpInjector>,
    Arc<MockTransport>,
    mpsc::Sender<TransportEvent>,
    broadcast::Receiver<LifecycleSignal>,
) {
    let bus = signal_bus(32);
    let rx = bus.subscribe();
    let (transport, tx) = MockTransport::new_pair();
    let injector = Arc::new(CdpInjector::with_transport(
        CdpConfig::default(),
        bus,
        transport.clone() as Arc<dyn CdpTransport>,
    ));
    Arc::clone(&injector).start().await.unwrap();

    let info = json!({ "targetId": "T1", "type": "page", "url": "about:blank" });
    tx.send(event("Target.targetCreated", None, json!({ "targetInfo": info.clone() })))
        .await
        .unwrap();
    tx.send(event(
        "Target.attachedToTarget",
        None,
        json!({ "sessionId": "S1", "targetInfo": info }),
    ))
    .await
    .unwrap();
    (injector, transport, tx, rx)
}

#[tokio::test]
async fn page_events_become_lifecycle_signals() {
    let (injector, transport, tx, mut rx) = attached_injector().await;

    tx.send(event(
        "Page.frameNavigated",
        Some("S1"),
        json!({ "frame": { "id": "F1", "url": "https://a.test/", "loaderId": "L1" } }),
    ))
    .await
    .unwrap();
    let committed = next_signal(&mut rx).await;
    assert_eq!(committed.kind, SignalKind::NavigationCommitted);
    assert!(committed.is_main_frame);
    assert_eq!(committed.url, "https://a.test/");

    tx.send(event(
        "Page.frameNavigated",
        Some("S1"),
        json!({ "frame": { "id": "F2", "parentId": "F1", "url": "https://ads.test/" } }),
    ))
    .await
    .unwrap();
    let nested = next_signal(&mut rx).await;
    assert!(!nested.is_main_frame);

    tx.send(event("Page.domContentEventFired", Some("S1"), json!({ "timestamp": 1.0 })))
        .await
        .unwrap();
    let loaded = next_signal(&mut rx).await;
    assert_eq!(loaded.kind, SignalKind::ContentLoaded);
    assert_eq!(loaded.url, "https://a.test/");

    tx.send(event(
        "Page.navigatedWithinDocument",
        Some("S1"),
        json!({ "frameId": "F1", "url": "https://a.test/#b" }),
    ))
    .await
    .unwrap();
    let in_page = next_signal(&mut rx).await;
    assert_eq!(in_page.kind, SignalKind::InPageNavigation);
    assert!(in_page.is_main_frame);

    assert!(transport.methods().await.contains(&"Page.enable".to_string()));
    injector.shutdown().await;
}

#[tokio::test]
async fn execute_requires_a_loaded_document() {
    let (injector, transport, tx, mut rx) = attached_injector().await;

    tx.send(event(
        "Page.frameNavigated",
        Some("S1"),
        json!({ "frame": { "id": "F1", "url": "https://a.test/" } }),
    ))
    .await
    .unwrap();
    let handle = next_signal(&mut rx).await.handle;

    let err = injector.run(handle, Command::locate()).await.unwrap_err();
    assert_eq!(err.kind, BridgeErrorKind::NotReady);

    tx.send(event("Page.domContentEventFired", Some("S1"), json!({})))
        .await
        .unwrap();
    next_signal(&mut rx).await;

    transport
        .respond(
            "Runtime.evaluate",
            json!({ "result": { "type": "object", "value": { "ok": true, "data": "https://a.test/" } } }),
        )
        .await;
    let href = injector.run(handle, Command::locate()).await.unwrap();
    assert_eq!(href, json!("https://a.test/"));

    transport
        .respond(
            "Runtime.evaluate",
            json!({ "result": { "type": "object", "value": {
                "ok": false, "error": "no indexedDB", "errorKind": "Unsupported"
            } } }),
        )
        .await;
    let err = injector
        .run(handle, Command::show_databases())
        .await
        .unwrap_err();
    assert_eq!(err.kind, BridgeErrorKind::Unsupported);
    assert_eq!(err.message, "no indexedDB");

    transport
        .respond(
            "Runtime.evaluate",
            json!({ "exceptionDetails": { "text": "Uncaught", "exception": {
                "description": "SyntaxError: Unexpected token"
            } } }),
        )
        .await;
    let err = injector
        .run(handle, Command::execute("1 +"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, BridgeErrorKind::ExecutionFailed);
    assert!(err.message.contains("SyntaxError"));

    injector.shutdown().await;
}

#[tokio::test]
async fn detached_documents_are_not_ready() {
    let (injector, _transport, tx, mut rx) = attached_injector().await;

    tx.send(event(
        "Page.frameNavigated",
        Some("S1"),
        json!({ "frame": { "id": "F1", "url": "https://a.test/" } }),
    ))
    .await
    .unwrap();
    let handle = next_signal(&mut rx).await.handle;
    tx.send(event("Page.domContentEventFired", Some("S1"), json!({})))
        .await
        .unwrap();
    next_signal(&mut rx).await;

    tx.send(event(
        "Target.detachedFromTarget",
        None,
        json!({ "sessionId": "S1", "targetId": "T1" }),
    ))
    .await
    .unwrap();

    let mut attempts = 0;
    while injector.documents().contains(&handle) && attempts < 50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        attempts += 1;
    }
    let err = injector.run(handle, Command::drain()).await.unwrap_err();
    assert!(err.is_retriable());
    injector.shutdown().await;
}

#[tokio::test]
async fn already_loaded_documents_signal_on_attach() {
    let bus = signal_bus(8);
    let mut rx = bus.subscribe();
    let (transport, tx) = MockTransport::new_pair();
    transport
        .respond(
            "Page.getFrameTree",
            json!({ "frameTree": { "frame": { "id": "F1", "url": "https://loaded.test/" } } }),
        )
        .await;
    transport
        .respond(
            "Runtime.evaluate",
            json!({ "result": { "type": "string", "value": "complete" } }),
        )
        .await;
    let injector = Arc::new(CdpInjector::with_transport(
        CdpConfig::default(),
        bus,
        transport.clone() as Arc<dyn CdpTransport>,
    ));
    Arc::clone(&injector).start().await.unwrap();

    tx.send(event(
        "Target.attachedToTarget",
        None,
        json!({ "sessionId": "S9", "targetInfo": { "targetId": "T9", "type": "page" } }),
    ))
    .await
    .unwrap();

    let signal = next_signal(&mut rx).await;
    assert_eq!(signal.kind, SignalKind::ContentLoaded);
    assert_eq!(signal.url, "https://loaded.test/");
    injector.shutdown().await;
}
