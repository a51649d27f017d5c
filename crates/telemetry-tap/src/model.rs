use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use pagebridge_core_types::DocumentHandle;

/// One request issued by the document's own code, as observed page-side.
///
/// `status` is 0 and `error` is set when the request failed before a
/// response arrived. `response_size` is -1 when the body was not readable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequestRecord {
    pub id: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub status: u16,
    /// Epoch milliseconds.
    #[serde(default)]
    pub started_at: u64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub request_body: Option<String>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response_body: Option<String>,
    #[serde(default = "unknown_size")]
    pub response_size: i64,
    #[serde(default)]
    pub error: Option<String>,
}

fn unknown_size() -> i64 {
    -1
}

impl NetworkRequestRecord {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleRecord {
    pub id: String,
    pub level: String,
    pub text: String,
    /// Epoch milliseconds.
    #[serde(default)]
    pub at: u64,
}

/// Either kind of drained observation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TelemetryRecord {
    Network(NetworkRequestRecord),
    Console(ConsoleRecord),
}

/// Reply to DRAIN: everything recorded since the previous drain, oldest
/// first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainBatch {
    #[serde(default)]
    pub network: Vec<NetworkRequestRecord>,
    #[serde(default)]
    pub console: Vec<ConsoleRecord>,
}

impl DrainBatch {
    pub fn is_empty(&self) -> bool {
        self.network.is_empty() && self.console.is_empty()
    }

    pub fn len(&self) -> usize {
        self.network.len() + self.console.len()
    }

    /// Records in arrival order, requests before console lines.
    pub fn into_records(self) -> Vec<TelemetryRecord> {
        self.network
            .into_iter()
            .map(TelemetryRecord::Network)
            .chain(self.console.into_iter().map(TelemetryRecord::Console))
            .collect()
    }
}

/// Broadcast after every drain that produced records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryUpdate {
    pub handle: DocumentHandle,
    pub added_requests: usize,
    pub added_console: usize,
}

/// Persisted form of the host-side history, newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub version: u32,
    pub requests: Vec<NetworkRequestRecord>,
    pub console: Vec<ConsoleRecord>,
}

impl HistorySnapshot {
    pub const VERSION: u32 = 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_a_page_side_batch() {
        let batch: DrainBatch = serde_json::from_value(json!({
            "network": [{
                "id": "req-1",
                "url": "https://a.test/api",
                "method": "GET",
                "status": 200,
                "startedAt": 1_700_000_000_000u64,
                "durationMs": 42,
                "requestHeaders": {"accept": "*/*"},
                "requestBody": null,
                "responseHeaders": {},
                "responseBody": "hello",
                "responseSize": 5,
                "error": null
            }],
            "console": [{"id": "log-1", "level": "warn", "text": "careful", "at": 1}]
        }))
        .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.network[0].duration_ms, 42);
        assert_eq!(batch.network[0].request_headers["accept"], "*/*");
        assert!(!batch.network[0].failed());
        let records = batch.into_records();
        assert!(matches!(records[1], TelemetryRecord::Console(_)));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let record: NetworkRequestRecord = serde_json::from_value(json!({
            "id": "req-2",
            "url": "https://a.test/down",
            "method": "POST",
            "error": "network error"
        }))
        .unwrap();
        assert_eq!(record.status, 0);
        assert_eq!(record.response_size, -1);
        assert!(record.failed());
    }
}
