use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{EmulatedDocument, EmulatedRequest, InjectionChannel, SharedChannel};
use fragment_codec::{Capability, Command};
use pagebridge_core_types::{BridgeError, Generation};
use telemetry_tap::{JsonFileStore, MemoryStore, SnapshotStore, TelemetryCollector, TelemetryConfig};

async fn armed_document() -> EmulatedDocument {
    let doc = EmulatedDocument::new("https://a.test/");
    doc.finish_load();
    let options = TelemetryConfig::default().install_options();
    for cap in [Capability::NetworkObserver, Capability::ConsoleObserver] {
        doc.run(doc.handle(), Command::install(cap, Generation(0), &options))
            .await
            .unwrap();
    }
    doc
}

fn collector(doc: &EmulatedDocument, config: TelemetryConfig, store: Arc<dyn SnapshotStore>) -> TelemetryCollector {
    let channel: SharedChannel = Arc::new(doc.clone());
    TelemetryCollector::new(channel, doc.handle(), config, store)
}

#[tokio::test]
async fn drained_records_land_newest_first() {
    let doc = armed_document().await;
    let collector = collector(&doc, TelemetryConfig::default(), Arc::new(MemoryStore::new()));
    let mut updates = collector.subscribe();

    doc.emulate_request(EmulatedRequest::get("https://a.test/one").duration_ms(42))
        .unwrap();
    doc.emulate_request(EmulatedRequest::get("https://a.test/two")).unwrap();
    doc.emulate_console("warn", "slow");

    let update = collector.drain_once().await.unwrap();
    assert_eq!(update.added_requests, 2);
    assert_eq!(update.added_console, 1);
    assert_eq!(updates.recv().await.unwrap(), update);

    let requests = collector.requests();
    assert_eq!(requests[0].url, "https://a.test/two");
    assert_eq!(requests[1].duration_ms, 42);
    assert_eq!(collector.console()[0].text, "slow");

    assert!(collector.drain_once().await.is_none());
    assert_eq!(doc.pending_len(), (0, 0));
}

#[tokio::test]
async fn history_never_exceeds_its_cap() {
    let doc = armed_document().await;
    let config = TelemetryConfig {
        request_cap: 5,
        ..TelemetryConfig::default()
    };
    let collector = collector(&doc, config, Arc::new(MemoryStore::new()));

    for round in 0..4 {
        for i in 0..3 {
            doc.emulate_request(EmulatedRequest::get(format!("https://a.test/{round}/{i}")))
                .unwrap();
        }
        collector.drain_once().await;
        assert!(collector.requests().len() <= 5);
    }
    let urls: Vec<String> = collector.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(urls[0], "https://a.test/3/2");
    assert_eq!(urls[4], "https://a.test/2/1");
}

#[tokio::test]
async fn drain_failures_are_swallowed() {
    let doc = armed_document().await;
    let collector = collector(&doc, TelemetryConfig::default(), Arc::new(MemoryStore::new()));
    doc.emulate_request(EmulatedRequest::get("https://a.test/kept")).unwrap();
    doc.fail_next(fragment_codec::Verb::Drain, BridgeError::not_ready("navigating"));

    assert!(collector.drain_once().await.is_none());
    assert!(collector.requests().is_empty());
    assert_eq!(collector.drain_once().await.unwrap().added_requests, 1);
}

#[tokio::test]
async fn history_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> = Arc::new(JsonFileStore::new(dir.path(), "default"));

    let doc = armed_document().await;
    let first = collector(&doc, TelemetryConfig::default(), Arc::clone(&store));
    doc.emulate_request(EmulatedRequest::get("https://a.test/persisted").status(201))
        .unwrap();
    doc.emulate_console("error", "kaboom");
    first.drain_once().await.unwrap();
    drop(first);

    let restarted = collector(&doc, TelemetryConfig::default(), Arc::clone(&store));
    assert_eq!(restarted.requests().len(), 1);
    assert_eq!(restarted.requests()[0].status, 201);
    assert_eq!(restarted.console()[0].level, "error");

    restarted.clear().unwrap();
    let empty = collector(&doc, TelemetryConfig::default(), store);
    assert!(empty.requests().is_empty());
}

#[tokio::test]
async fn spawned_loop_drains_on_interval() {
    let doc = armed_document().await;
    let config = TelemetryConfig {
        drain_interval_ms: 10,
        ..TelemetryConfig::default()
    };
    let collector = Arc::new(collector(&doc, config, Arc::new(MemoryStore::new())));
    let running = collector.spawn();

    doc.emulate_request(EmulatedRequest::get("https://a.test/bg")).unwrap();
    let mut attempts = 0;
    while collector.requests().is_empty() && attempts < 100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        attempts += 1;
    }
    assert_eq!(collector.requests().len(), 1);
    running.shutdown().await.unwrap();
}
