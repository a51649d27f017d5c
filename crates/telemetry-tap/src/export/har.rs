//! HAR 1.2 export of the request history.
//!
//! The document only exposes what its own code saw, so cookies, redirect
//! targets and header sizes are unknown. Unknown sizes are written as -1 and
//! the whole duration is attributed to `timings.wait`.

use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use url::Url;

use crate::errors::TelemetryError;
use crate::model::NetworkRequestRecord;

const HTTP_VERSION: &str = "HTTP/1.1";

/// A rendered archive and the file name it should be saved under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarExport {
    pub filename: String,
    pub json: String,
}

impl HarExport {
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf, TelemetryError> {
        let dir = dir.as_ref();
        if !dir.as_os_str().is_empty() {
            create_dir_all(dir)?;
        }
        let path = dir.join(&self.filename);
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(self.json.as_bytes())?;
        writer.flush()?;
        Ok(path)
    }
}

/// Renders `records` (newest first, as held by the collector) as a HAR
/// document with entries in chronological order. The JSON depends only on
/// `records`; `exported_at` only names the file.
pub fn export_har(
    records: &[NetworkRequestRecord],
    exported_at: DateTime<Utc>,
) -> Result<HarExport, TelemetryError> {
    let har = Har {
        log: HarLog {
            version: "1.2",
            creator: HarCreator {
                name: "pagebridge",
                version: env!("CARGO_PKG_VERSION"),
            },
            entries: records.iter().rev().map(entry).collect(),
        },
    };
    Ok(HarExport {
        filename: format!("pagebridge-{}.har", exported_at.format("%Y%m%d-%H%M%S")),
        json: serde_json::to_string_pretty(&har)?,
    })
}

fn entry(record: &NetworkRequestRecord) -> HarEntry {
    let started = Utc
        .timestamp_millis_opt(record.started_at as i64)
        .single()
        .unwrap_or_default();
    let time = record.duration_ms as i64;
    let request_size = record
        .request_body
        .as_ref()
        .map(|body| body.len() as i64)
        .unwrap_or(-1);

    HarEntry {
        started_date_time: started.to_rfc3339_opts(SecondsFormat::Millis, true),
        time,
        request: HarRequest {
            method: record.method.clone(),
            url: record.url.clone(),
            http_version: HTTP_VERSION,
            cookies: Vec::new(),
            headers: headers(&record.request_headers),
            query_string: query_string(&record.url),
            post_data: record.request_body.as_ref().map(|text| HarPostData {
                mime_type: content_type(&record.request_headers),
                text: text.clone(),
            }),
            headers_size: -1,
            body_size: request_size,
        },
        response: HarResponse {
            status: record.status,
            status_text: String::new(),
            http_version: HTTP_VERSION,
            cookies: Vec::new(),
            headers: headers(&record.response_headers),
            content: HarContent {
                size: record.response_size,
                mime_type: content_type(&record.response_headers),
                text: record.response_body.clone(),
            },
            redirect_url: String::new(),
            headers_size: -1,
            body_size: record.response_size,
            error: record.error.clone(),
        },
        cache: HarCache {},
        timings: HarTimings {
            send: 0,
            wait: time,
            receive: 0,
        },
    }
}

fn headers(map: &BTreeMap<String, String>) -> Vec<HarNameValue> {
    map.iter()
        .map(|(name, value)| HarNameValue {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

fn content_type(map: &BTreeMap<String, String>) -> String {
    map.get("content-type").cloned().unwrap_or_default()
}

/// Decoded query pairs; urls that do not parse (relative ones included)
/// contribute none.
fn query_string(raw: &str) -> Vec<HarNameValue> {
    let Ok(url) = Url::parse(raw) else {
        return Vec::new();
    };
    url.query_pairs()
        .map(|(name, value)| HarNameValue {
            name: name.into_owned(),
            value: value.into_owned(),
        })
        .collect()
}

#[derive(Serialize)]
struct Har {
    log: HarLog,
}

#[derive(Serialize)]
struct HarLog {
    version: &'static str,
    creator: HarCreator,
    entries: Vec<HarEntry>,
}

#[derive(Serialize)]
struct HarCreator {
    name: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HarEntry {
    started_date_time: String,
    time: i64,
    request: HarRequest,
    response: HarResponse,
    cache: HarCache,
    timings: HarTimings,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HarRequest {
    method: String,
    url: String,
    http_version: &'static str,
    cookies: Vec<HarNameValue>,
    headers: Vec<HarNameValue>,
    query_string: Vec<HarNameValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    post_data: Option<HarPostData>,
    headers_size: i64,
    body_size: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HarResponse {
    status: u16,
    status_text: String,
    http_version: &'static str,
    cookies: Vec<HarNameValue>,
    headers: Vec<HarNameValue>,
    content: HarContent,
    #[serde(rename = "redirectURL")]
    redirect_url: String,
    headers_size: i64,
    body_size: i64,
    #[serde(rename = "_error", skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
struct HarNameValue {
    name: String,
    value: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HarPostData {
    mime_type: String,
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HarContent {
    size: i64,
    mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Serialize)]
struct HarCache {}

#[derive(Serialize)]
struct HarTimings {
    send: i64,
    wait: i64,
    receive: i64,
}
