use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{EmulatedDocument, EmulatedRequest, SharedChannel};
use fragment_codec::Capability;
use lifecycle::ArmState;
use network_throttle::ThrottleSimulator;
use pagebridge_cli::{BridgeConfig, BridgeHost, InstrumentationSession};
use pagebridge_core_types::{BridgeErrorKind, Envelope, Generation};
use serde_json::json;

fn config_in(dir: &std::path::Path) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.cdp.websocket_url = None;
    config.telemetry.history_dir = Some(dir.to_path_buf());
    config.telemetry.drain_interval_ms = 20;
    config
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

async fn armed(session: &InstrumentationSession) -> bool {
    eventually(|| session.lifecycle().state == ArmState::Armed).await
}

#[tokio::test]
async fn navigation_resets_generation_but_keeps_history() {
    let dir = tempfile::tempdir().unwrap();
    let host = BridgeHost::emulated(config_in(dir.path()), "https://example.com/").unwrap();
    let doc = host.emulated_document().unwrap().clone();
    let session = host.open_session(doc.handle()).unwrap();
    assert_eq!(session.lifecycle().generation, Generation(0));

    doc.finish_load();
    assert!(armed(&session).await);
    assert_eq!(session.lifecycle().generation, Generation(0));
    assert_eq!(doc.capability_flag(Capability::NetworkObserver), Some(0));

    doc.emulate_request(EmulatedRequest::get("https://example.com/a").status(200).duration_ms(42))
        .unwrap();
    assert!(eventually(|| session.requests().len() == 1).await);
    assert_eq!(session.requests()[0].duration_ms, 42);

    doc.navigate("https://example.com/next");
    assert!(eventually(|| session.lifecycle().generation == Generation(1)).await);
    assert_eq!(doc.capability_flag(Capability::NetworkObserver), None);
    assert_eq!(session.requests().len(), 1);

    doc.finish_load();
    assert!(armed(&session).await);
    assert_eq!(doc.wrap_count(Capability::NetworkObserver), 1);
    host.shutdown().await;
}

#[tokio::test]
async fn history_is_restored_for_the_next_host() {
    let dir = tempfile::tempdir().unwrap();
    {
        let host = BridgeHost::emulated(config_in(dir.path()), "https://example.com/").unwrap();
        let doc = host.emulated_document().unwrap().clone();
        let session = host.open_session(doc.handle()).unwrap();
        doc.finish_load();
        assert!(armed(&session).await);
        doc.emulate_request(EmulatedRequest::get("https://example.com/kept")).unwrap();
        assert!(eventually(|| !session.requests().is_empty()).await);
        host.shutdown().await;
    }

    let host = BridgeHost::emulated(config_in(dir.path()), "https://example.com/").unwrap();
    let doc = host.emulated_document().unwrap().clone();
    let session = host.open_session(doc.handle()).unwrap();
    assert_eq!(session.requests()[0].url, "https://example.com/kept");

    let har = session.export_har(chrono::Utc::now()).unwrap();
    assert!(har.json.contains("https://example.com/kept"));
    host.shutdown().await;
}

fn open_for(doc: &EmulatedDocument, config: &BridgeConfig, key: &str) -> InstrumentationSession {
    let channel: SharedChannel = Arc::new(doc.clone());
    let throttle = Arc::new(ThrottleSimulator::new(channel.clone()));
    InstrumentationSession::open(channel, doc.handle(), config, throttle, key)
}

async fn record_one(doc: &EmulatedDocument, session: &InstrumentationSession, url: &str) {
    doc.finish_load();
    session.arm().await.unwrap();
    doc.emulate_request(EmulatedRequest::get(url)).unwrap();
    session.drain_now().await.unwrap();
}

#[tokio::test]
async fn documents_keep_separate_histories() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let first = EmulatedDocument::new("https://a.test/");
    let second = EmulatedDocument::new("https://b.test/");

    let a = open_for(&first, &config, "target-a");
    let b = open_for(&second, &config, "target-b");
    record_one(&first, &a, "https://a.test/x").await;
    record_one(&second, &b, "https://b.test/y").await;
    drop((a, b));

    let restored_a = open_for(&EmulatedDocument::new("https://a.test/"), &config, "target-a");
    let urls: Vec<String> = restored_a.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(urls, vec!["https://a.test/x".to_string()]);

    let restored_b = open_for(&EmulatedDocument::new("https://b.test/"), &config, "target-b");
    let urls: Vec<String> = restored_b.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(urls, vec!["https://b.test/y".to_string()]);
}

#[tokio::test]
async fn one_shot_operations_return_envelopes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.throttle.default_profile = Some("slow-3g".into());
    let host = BridgeHost::emulated(config, "https://example.com/").unwrap();
    let doc = host.emulated_document().unwrap().clone();
    doc.put_record("shop", "cart", json!(1), json!({"qty": 2}));
    let session = host.open_session(doc.handle()).unwrap();

    let early = session.query("SHOW DATABASES").await;
    assert_eq!(
        early.to_value()["errorKind"],
        BridgeErrorKind::NotReady.as_str()
    );

    doc.finish_load();
    assert!(armed(&session).await);
    assert!(eventually(|| doc.effective_latency_ms() == 2_000).await);

    let rows = session.query("SELECT * FROM shop.cart").await;
    assert!(rows.is_ok());
    assert_eq!(rows.to_value()["data"]["count"], 1);

    let throttled = session.apply_throttle("fast-3g").await;
    assert_eq!(throttled.to_value()["data"]["active"], "fast-3g");
    assert_eq!(doc.effective_latency_ms(), 563);

    match session.execute("1 + 1").await {
        Envelope::Err { kind, .. } => assert_eq!(kind, BridgeErrorKind::Unsupported),
        other => panic!("unexpected {other:?}"),
    }

    let probe = session.probe("https://cdn.example.com/app.js").await.unwrap();
    assert!(probe.is_reachable());
    host.shutdown().await;
}

#[tokio::test]
async fn unknown_default_profile_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.throttle.default_profile = Some("carrier-pigeon".into());
    assert!(BridgeHost::emulated(config, "about:blank").is_err());
}
