//! In-process document model.
//!
//! [`EmulatedDocument`] answers fragments by interpreting their structured
//! [`Command`] against modeled page-side state: the capability registry,
//! wrapper counts, the pending telemetry lists, the active throttle profile
//! and an IndexedDB-like store. It backs the CLI's `--emulated` mode and the
//! test suites, where no script engine is available.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;

use fragment_codec::{Capability, Command, Fragment, Verb};
use pagebridge_core_types::{BridgeError, BridgeResult, DocumentHandle, LifecycleSignal};

use crate::channel::InjectionChannel;
use crate::SignalBus;

/// A request issued by the document's own code.
#[derive(Clone, Debug, PartialEq)]
pub struct EmulatedRequest {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub duration_ms: u64,
    pub request_headers: BTreeMap<String, String>,
    pub request_body: Option<String>,
    pub response_headers: BTreeMap<String, String>,
    pub response_body: Option<String>,
}

impl EmulatedRequest {
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.into(),
            status: 200,
            duration_ms: 0,
            request_headers: BTreeMap::new(),
            request_body: None,
            response_headers: BTreeMap::new(),
            response_body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn request_header(mut self, key: &str, value: &str) -> Self {
        self.request_headers
            .insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn request_body(mut self, body: impl Into<String>) -> Self {
        self.request_body = Some(body.into());
        self
    }

    pub fn response_header(mut self, key: &str, value: &str) -> Self {
        self.response_headers
            .insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn response_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = Some(body.into());
        self
    }
}

/// How the document's network answers a resource-load probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeBehavior {
    Respond(u16),
    Fail(String),
    Hang,
}

#[derive(Clone, Debug, Default)]
struct EmulatedDatabase {
    version: u64,
    stores: BTreeMap<String, Vec<(Value, Value)>>,
}

/// Everything a real navigation wipes.
#[derive(Default)]
struct PageState {
    url: String,
    content_loaded: bool,
    caps: HashMap<String, u64>,
    wraps: HashMap<Capability, usize>,
    pending_network: Vec<Value>,
    pending_console: Vec<Value>,
    pending_cap: usize,
    max_body_bytes: usize,
    console_levels: HashSet<String>,
    throttle: Option<Value>,
    seq: u64,
}

impl PageState {
    fn fresh(url: String) -> Self {
        Self {
            url,
            pending_cap: 1_000,
            max_body_bytes: 64 * 1024,
            ..Self::default()
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.seq += 1;
        format!("{prefix}-{}", self.seq)
    }

    fn installed(&self, cap: Capability) -> bool {
        self.caps.contains_key(cap.flag_name())
    }

    fn clip(&self, text: Option<&String>) -> Value {
        match text {
            Some(text) => Value::String(text.chars().take(self.max_body_bytes).collect()),
            None => Value::Null,
        }
    }

    fn active_profile(&self) -> Option<&Value> {
        if self.installed(Capability::ThrottleGate) {
            self.throttle.as_ref()
        } else {
            None
        }
    }
}

fn push_capped(list: &mut Vec<Value>, record: Value, cap: usize) {
    list.push(record);
    if list.len() > cap {
        let excess = list.len() - cap;
        list.drain(..excess);
    }
}

fn is_offline(profile: &Value) -> bool {
    profile.get("downloadBps").and_then(Value::as_i64) == Some(0)
        && profile.get("uploadBps").and_then(Value::as_i64) == Some(0)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

struct Inner {
    handle: DocumentHandle,
    attached: AtomicBool,
    supports_enumeration: AtomicBool,
    page: Mutex<PageState>,
    databases: Mutex<BTreeMap<String, EmulatedDatabase>>,
    probes: Mutex<HashMap<String, ProbeBehavior>>,
    failures: Mutex<HashMap<Verb, BridgeError>>,
    calls: Mutex<Vec<Verb>>,
    signals: Option<SignalBus>,
}

/// Cloneable handle onto one modeled document; clones share state.
#[derive(Clone)]
pub struct EmulatedDocument {
    inner: Arc<Inner>,
}

impl EmulatedDocument {
    /// An attached document at `url` that has not finished loading.
    pub fn new(url: impl Into<String>) -> Self {
        Self::build(url.into(), None)
    }

    /// Like [`EmulatedDocument::new`], also publishing every lifecycle
    /// transition on `signals`.
    pub fn with_signals(url: impl Into<String>, signals: SignalBus) -> Self {
        Self::build(url.into(), Some(signals))
    }

    fn build(url: String, signals: Option<SignalBus>) -> Self {
        Self {
            inner: Arc::new(Inner {
                handle: DocumentHandle::new(),
                attached: AtomicBool::new(true),
                supports_enumeration: AtomicBool::new(true),
                page: Mutex::new(PageState::fresh(url)),
                databases: Mutex::new(BTreeMap::new()),
                probes: Mutex::new(HashMap::new()),
                failures: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                signals,
            }),
        }
    }

    pub fn handle(&self) -> DocumentHandle {
        self.inner.handle
    }

    pub fn url(&self) -> String {
        self.inner.page.lock().url.clone()
    }

    fn emit(&self, signal: LifecycleSignal) -> LifecycleSignal {
        if let Some(bus) = &self.inner.signals {
            bus.send(signal.clone());
        }
        signal
    }

    /// Real navigation: page-side state is discarded.
    pub fn navigate(&self, url: impl Into<String>) -> LifecycleSignal {
        let url = url.into();
        *self.inner.page.lock() = PageState::fresh(url.clone());
        self.emit(LifecycleSignal::navigation_committed(self.handle(), url))
    }

    pub fn finish_load(&self) -> LifecycleSignal {
        let url = {
            let mut page = self.inner.page.lock();
            page.content_loaded = true;
            page.url.clone()
        };
        self.emit(LifecycleSignal::content_loaded(self.handle(), url))
    }

    /// Hash or history-API change; page-side state survives.
    pub fn navigate_in_page(&self, url: impl Into<String>) -> LifecycleSignal {
        let url = url.into();
        self.inner.page.lock().url = url.clone();
        self.emit(LifecycleSignal::in_page(self.handle(), url))
    }

    /// In-page navigation of a nested frame; the main document is unchanged.
    pub fn subframe_navigation(&self, url: impl Into<String>) -> LifecycleSignal {
        self.emit(LifecycleSignal::in_page(self.handle(), url).from_subframe())
    }

    pub fn detach(&self) {
        self.inner.attached.store(false, Ordering::SeqCst);
    }

    /// Number of live wrappers for `cap` in the current page lifetime.
    pub fn wrap_count(&self, cap: Capability) -> usize {
        self.inner
            .page
            .lock()
            .wraps
            .get(&cap)
            .copied()
            .unwrap_or_default()
    }

    pub fn capability_flag(&self, cap: Capability) -> Option<u64> {
        self.inner.page.lock().caps.get(cap.flag_name()).copied()
    }

    /// Latency the throttle wrapper adds to the next outbound call.
    pub fn effective_latency_ms(&self) -> u64 {
        self.inner
            .page
            .lock()
            .active_profile()
            .and_then(|profile| profile.get("latencyMs"))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn active_throttle(&self) -> Option<Value> {
        self.inner.page.lock().active_profile().cloned()
    }

    pub fn pending_len(&self) -> (usize, usize) {
        let page = self.inner.page.lock();
        (page.pending_network.len(), page.pending_console.len())
    }

    /// Issues a request from page code. Returns the status the page sees,
    /// or the error text when the throttle gate rejects it.
    pub fn emulate_request(&self, request: EmulatedRequest) -> Result<u16, String> {
        let mut page = self.inner.page.lock();
        let profile = page.active_profile().cloned();
        let offline = profile.as_ref().map(is_offline).unwrap_or(false);
        let latency = profile
            .as_ref()
            .and_then(|p| p.get("latencyMs"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let outcome = if offline {
            Err("Failed to fetch (simulated offline)".to_string())
        } else {
            Ok(request.status)
        };

        if page.installed(Capability::NetworkObserver) {
            let id = page.next_id("req");
            let (status, duration_ms, response_headers, response_body, response_size) =
                match &outcome {
                    Ok(status) => (
                        *status,
                        request.duration_ms + latency,
                        request.response_headers.clone(),
                        page.clip(request.response_body.as_ref()),
                        request
                            .response_body
                            .as_ref()
                            .map(|body| body.len() as i64)
                            .unwrap_or(-1),
                    ),
                    Err(_) => (0, 0, BTreeMap::new(), Value::Null, -1),
                };
            let record = json!({
                "id": id,
                "url": request.url,
                "method": request.method,
                "status": status,
                "startedAt": now_ms(),
                "durationMs": duration_ms,
                "requestHeaders": request.request_headers,
                "requestBody": page.clip(request.request_body.as_ref()),
                "responseHeaders": response_headers,
                "responseBody": response_body,
                "responseSize": response_size,
                "error": outcome.as_ref().err(),
            });
            let cap = page.pending_cap;
            push_capped(&mut page.pending_network, record, cap);
        }
        outcome
    }

    /// A console call from page code; recorded only while observed.
    pub fn emulate_console(&self, level: &str, text: impl Into<String>) {
        let mut page = self.inner.page.lock();
        if !page.installed(Capability::ConsoleObserver) || !page.console_levels.contains(level) {
            return;
        }
        let id = page.next_id("log");
        let record = json!({
            "id": id,
            "level": level,
            "text": text.into(),
            "at": now_ms(),
        });
        let cap = page.pending_cap;
        push_capped(&mut page.pending_console, record, cap);
    }

    pub fn set_supports_enumeration(&self, supported: bool) {
        self.inner
            .supports_enumeration
            .store(supported, Ordering::SeqCst);
    }

    pub fn create_store(&self, db: &str, store: &str) {
        let mut dbs = self.inner.databases.lock();
        let entry = dbs.entry(db.to_string()).or_insert_with(|| EmulatedDatabase {
            version: 1,
            ..EmulatedDatabase::default()
        });
        entry.stores.entry(store.to_string()).or_default();
    }

    pub fn put_record(&self, db: &str, store: &str, key: Value, value: Value) {
        self.create_store(db, store);
        let mut dbs = self.inner.databases.lock();
        if let Some(records) = dbs
            .get_mut(db)
            .and_then(|database| database.stores.get_mut(store))
        {
            match records.iter_mut().find(|(k, _)| *k == key) {
                Some(existing) => existing.1 = value,
                None => records.push((key, value)),
            }
        }
    }

    pub fn record_count(&self, db: &str, store: &str) -> Option<usize> {
        self.inner
            .databases
            .lock()
            .get(db)
            .and_then(|database| database.stores.get(store))
            .map(Vec::len)
    }

    pub fn set_probe(&self, url: &str, behavior: ProbeBehavior) {
        self.inner.probes.lock().insert(url.to_string(), behavior);
    }

    /// The next fragment with `verb` fails with `error`.
    pub fn fail_next(&self, verb: Verb, error: BridgeError) {
        self.inner.failures.lock().insert(verb, error);
    }

    /// Verbs executed so far, in order.
    pub fn calls(&self) -> Vec<Verb> {
        self.inner.calls.lock().clone()
    }

    fn interpret(&self, command: &Command) -> BridgeResult<Value> {
        match command.verb {
            Verb::Install => self.install(command),
            Verb::Drain => {
                let mut page = self.inner.page.lock();
                let network = std::mem::take(&mut page.pending_network);
                let console = std::mem::take(&mut page.pending_console);
                Ok(json!({ "network": network, "console": console }))
            }
            Verb::ApplyThrottle => {
                let profile = command
                    .param("profile")
                    .cloned()
                    .ok_or_else(|| BridgeError::internal("APPLY_THROTTLE without profile"))?;
                let field = |key: &str| profile.get(key).and_then(Value::as_i64);
                let unlimited = matches!(field("downloadBps"), Some(bps) if bps < 0)
                    && matches!(field("uploadBps"), Some(bps) if bps < 0)
                    && field("latencyMs").unwrap_or(0) <= 0;
                let mut page = self.inner.page.lock();
                let active = profile.get("id").cloned().unwrap_or(Value::Null);
                page.throttle = if unlimited { None } else { Some(profile) };
                Ok(json!({
                    "active": active,
                    "wrapped": page.installed(Capability::ThrottleGate),
                }))
            }
            Verb::Locate => Ok(Value::String(self.url())),
            Verb::Execute => Err(BridgeError::unsupported(
                "the emulated document has no script engine",
            )),
            Verb::Probe => {
                let url = command.param_str("url").unwrap_or_default();
                let behavior = self
                    .inner
                    .probes
                    .lock()
                    .get(url)
                    .cloned()
                    .unwrap_or(ProbeBehavior::Respond(200));
                Ok(match behavior {
                    ProbeBehavior::Respond(status) => json!({ "outcome": "loaded", "status": status }),
                    ProbeBehavior::Fail(error) => json!({ "outcome": "failed", "error": error }),
                    ProbeBehavior::Hang => json!({ "outcome": "timedOutAssumedOk" }),
                })
            }
            Verb::ShowDatabases => {
                if !self.inner.supports_enumeration.load(Ordering::SeqCst) {
                    return Err(BridgeError::unsupported(
                        "this platform does not expose IndexedDB database enumeration",
                    ));
                }
                let dbs = self.inner.databases.lock();
                Ok(Value::Array(
                    dbs.iter()
                        .map(|(name, db)| json!({ "name": name, "version": db.version }))
                        .collect(),
                ))
            }
            Verb::ShowStores => {
                let name = command.param_str("db").unwrap_or_default();
                let dbs = self.inner.databases.lock();
                let db = open_existing(&dbs, name)?;
                Ok(json!({
                    "db": name,
                    "version": db.version,
                    "stores": db.stores.keys().collect::<Vec<_>>(),
                }))
            }
            Verb::Select => {
                let name = command.param_str("db").unwrap_or_default();
                let store = command.param_str("store").unwrap_or_default();
                let limit = command.param_u64("limit").unwrap_or(0) as usize;
                let dbs = self.inner.databases.lock();
                let records = require_store(open_existing(&dbs, name)?, name, store)?;
                let page: Vec<Value> = records
                    .iter()
                    .take(limit)
                    .map(|(key, value)| json!({ "key": key, "value": value }))
                    .collect();
                Ok(json!({
                    "db": name,
                    "store": store,
                    "count": page.len(),
                    "total": records.len(),
                    "records": page,
                }))
            }
            Verb::Clear => {
                let name = command.param_str("db").unwrap_or_default();
                let store = command.param_str("store").unwrap_or_default();
                let mut dbs = self.inner.databases.lock();
                open_existing(&dbs, name)?;
                let records = dbs
                    .get_mut(name)
                    .and_then(|db| db.stores.get_mut(store))
                    .ok_or_else(|| missing_store(name, store))?;
                records.clear();
                Ok(json!({ "db": name, "store": store, "cleared": true }))
            }
        }
    }

    fn install(&self, command: &Command) -> BridgeResult<Value> {
        let cap = command.capability().ok_or_else(|| {
            BridgeError::unsupported(format!(
                "unknown capability {:?}",
                command.param_str("capability").unwrap_or_default()
            ))
        })?;
        let generation = command.param_u64("generation").unwrap_or(0);
        let mut page = self.inner.page.lock();
        let already = page.installed(cap);
        page.caps.insert(cap.flag_name().to_string(), generation);
        if already {
            return Ok(json!({
                "installed": false,
                "capability": cap.flag_name(),
                "generation": generation,
            }));
        }

        *page.wraps.entry(cap).or_default() += 1;
        if let Some(pending_cap) = command.param_u64("pendingCap") {
            page.pending_cap = pending_cap as usize;
        }
        if let Some(max_body) = command.param_u64("maxBodyBytes") {
            page.max_body_bytes = max_body as usize;
        }
        if let Some(levels) = command.param("levels").and_then(Value::as_array) {
            page.console_levels = levels
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
        }
        Ok(json!({
            "installed": true,
            "capability": cap.flag_name(),
            "generation": generation,
        }))
    }
}

fn open_existing<'a>(
    dbs: &'a BTreeMap<String, EmulatedDatabase>,
    name: &str,
) -> BridgeResult<&'a EmulatedDatabase> {
    dbs.get(name)
        .ok_or_else(|| BridgeError::execution_failed(format!("database \"{name}\" does not exist")))
}

fn missing_store(db: &str, store: &str) -> BridgeError {
    BridgeError::execution_failed(format!(
        "object store \"{store}\" does not exist in database \"{db}\""
    ))
}

fn require_store<'a>(
    db: &'a EmulatedDatabase,
    name: &str,
    store: &str,
) -> BridgeResult<&'a Vec<(Value, Value)>> {
    db.stores.get(store).ok_or_else(|| missing_store(name, store))
}

#[async_trait]
impl InjectionChannel for EmulatedDocument {
    async fn execute(&self, handle: DocumentHandle, fragment: &Fragment) -> BridgeResult<Value> {
        if handle != self.inner.handle || !self.inner.attached.load(Ordering::SeqCst) {
            return Err(BridgeError::not_ready(format!("{handle} is not attached")));
        }
        if !self.inner.page.lock().content_loaded {
            return Err(BridgeError::not_ready(format!(
                "{handle} has not finished loading"
            )));
        }
        let verb = fragment.verb();
        self.inner.calls.lock().push(verb);
        if let Some(err) = self.inner.failures.lock().remove(&verb) {
            debug!(target: "cdp-adapter", %handle, %verb, "injected failure");
            return Err(err);
        }
        self.interpret(fragment.command())
    }
}

impl std::fmt::Debug for EmulatedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedDocument")
            .field("handle", &self.inner.handle)
            .field("url", &self.url())
            .finish()
    }
}
