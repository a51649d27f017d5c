use std::sync::Arc;

use cdp_adapter::{EmulatedDocument, SharedChannel};
use fragment_codec::Verb;
use pagebridge_core_types::{BridgeErrorKind, Envelope};
use serde_json::json;
use storage_query::{QueryOutput, StorageQueryInterpreter, ACCEPTED_FORMS, SELECT_LIMIT};

fn setup() -> (EmulatedDocument, StorageQueryInterpreter) {
    let doc = EmulatedDocument::new("https://shop.test/");
    doc.finish_load();
    let channel: SharedChannel = Arc::new(doc.clone());
    (doc, StorageQueryInterpreter::new(channel))
}

#[tokio::test]
async fn select_is_capped() {
    let (doc, interpreter) = setup();
    for i in 0..75 {
        doc.put_record("mydb", "items", json!(i), json!({ "sku": format!("sku-{i}") }));
    }

    let output = interpreter
        .execute(doc.handle(), "select * from mydb.items")
        .await
        .unwrap();
    match &output {
        QueryOutput::Records {
            records,
            count,
            total,
            ..
        } => {
            assert_eq!(records.len(), SELECT_LIMIT);
            assert_eq!(*count, SELECT_LIMIT);
            assert_eq!(*total, 75);
            assert_eq!(records[0].value["sku"], "sku-0");
        }
        other => panic!("unexpected output {other:?}"),
    }
    assert!(output.render().starts_with("mydb.items: showing 50 of 75"));
}

#[tokio::test]
async fn show_and_clear() {
    let (doc, interpreter) = setup();
    doc.put_record("mydb", "items", json!("a"), json!(1));
    doc.create_store("mydb", "orders");

    let stores = interpreter
        .execute(doc.handle(), "SHOW STORES FROM mydb")
        .await
        .unwrap();
    assert_eq!(
        stores,
        QueryOutput::Stores {
            db: "mydb".into(),
            version: Some(1),
            stores: vec!["items".into(), "orders".into()],
        }
    );

    let dbs = interpreter.execute(doc.handle(), "SHOW DATABASES").await.unwrap();
    assert!(matches!(dbs, QueryOutput::Databases(ref list) if list[0].name == "mydb"));

    let cleared = interpreter
        .run(doc.handle(), "CLEAR FROM mydb.items")
        .await;
    assert!(cleared.is_ok());
    assert_eq!(doc.record_count("mydb", "items"), Some(0));
}

#[tokio::test]
async fn enumeration_gap_is_unsupported_not_empty() {
    let (doc, interpreter) = setup();
    doc.set_supports_enumeration(false);
    let err = interpreter
        .execute(doc.handle(), "SHOW DATABASES")
        .await
        .unwrap_err();
    assert_eq!(err.kind, BridgeErrorKind::Unsupported);
}

#[tokio::test]
async fn missing_database_fails_execution() {
    let (doc, interpreter) = setup();
    let envelope = interpreter
        .run(doc.handle(), "SELECT * FROM ghost.items")
        .await;
    assert_eq!(
        envelope,
        Envelope::Err {
            error: "database \"ghost\" does not exist".into(),
            kind: BridgeErrorKind::ExecutionFailed,
        }
    );
}

#[tokio::test]
async fn grammar_errors_never_reach_the_document() {
    let (doc, interpreter) = setup();
    let envelope = interpreter.run(doc.handle(), "DROP TABLE x").await;
    match envelope {
        Envelope::Err { error, kind } => {
            assert_eq!(kind, BridgeErrorKind::Unsupported);
            assert!(error.contains(ACCEPTED_FORMS));
        }
        other => panic!("unexpected {other:?}"),
    }
    let value = interpreter.run(doc.handle(), "SELECT * FROM a.b;c").await.to_value();
    assert_eq!(value["errorKind"], "ParseError");
    assert!(!doc.calls().contains(&Verb::Select));
    assert!(doc.calls().is_empty());
}
