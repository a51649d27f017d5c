//! Structured commands submitted to a document.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use pagebridge_core_types::Generation;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verb {
    Install,
    Drain,
    ShowDatabases,
    ShowStores,
    Select,
    Clear,
    ApplyThrottle,
    Execute,
    Locate,
    Probe,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Install => "INSTALL",
            Verb::Drain => "DRAIN",
            Verb::ShowDatabases => "SHOW_DATABASES",
            Verb::ShowStores => "SHOW_STORES",
            Verb::Select => "SELECT",
            Verb::Clear => "CLEAR",
            Verb::ApplyThrottle => "APPLY_THROTTLE",
            Verb::Execute => "EXECUTE",
            Verb::Locate => "LOCATE",
            Verb::Probe => "PROBE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named, idempotently installable page-side observer or wrapper.
///
/// [`Capability::ALL`] is the arming order: the throttle gate wraps the
/// network primitives first so the network observer, installed on top of it,
/// measures simulated latency.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    ThrottleGate,
    NetworkObserver,
    ConsoleObserver,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::ThrottleGate,
        Capability::NetworkObserver,
        Capability::ConsoleObserver,
    ];

    /// Page-side flag key.
    pub fn flag_name(&self) -> &'static str {
        match self {
            Capability::ThrottleGate => "throttle",
            Capability::NetworkObserver => "network",
            Capability::ConsoleObserver => "console",
        }
    }

    pub fn from_flag_name(name: &str) -> Option<Self> {
        Capability::ALL
            .into_iter()
            .find(|cap| cap.flag_name() == name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag_name())
    }
}

/// Knobs baked into observer install fragments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallOptions {
    pub pending_cap: usize,
    pub max_body_bytes: usize,
    pub console_levels: Vec<String>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            pending_cap: 1_000,
            max_body_bytes: 64 * 1024,
            console_levels: ["log", "info", "warn", "error", "debug"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// `{verb, target, parameters}` as submitted to a document.
///
/// `parameters` is the only channel for dynamic data: it reaches the page
/// through the literal encoder, never by splicing into script text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub verb: Verb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Command {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            target: None,
            parameters: Map::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(Value::as_u64)
    }

    /// Capability named by an INSTALL or APPLY_THROTTLE command.
    pub fn capability(&self) -> Option<Capability> {
        self.param_str("capability")
            .and_then(Capability::from_flag_name)
    }

    pub fn install(cap: Capability, generation: Generation, options: &InstallOptions) -> Self {
        let cmd = Command::new(Verb::Install)
            .with_target(cap.flag_name())
            .with_param("capability", cap.flag_name())
            .with_param("generation", generation.value());
        match cap {
            Capability::ThrottleGate => cmd,
            Capability::NetworkObserver => cmd
                .with_param("pendingCap", options.pending_cap as u64)
                .with_param("maxBodyBytes", options.max_body_bytes as u64),
            Capability::ConsoleObserver => cmd
                .with_param("pendingCap", options.pending_cap as u64)
                .with_param(
                    "levels",
                    options
                        .console_levels
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect::<Vec<_>>(),
                ),
        }
    }

    pub fn drain() -> Self {
        Command::new(Verb::Drain)
    }

    pub fn locate() -> Self {
        Command::new(Verb::Locate)
    }

    /// `profile` is the serialized throttle profile (camelCase fields).
    pub fn apply_throttle(profile_id: &str, profile: Value) -> Self {
        Command::new(Verb::ApplyThrottle)
            .with_target(profile_id)
            .with_param("capability", Capability::ThrottleGate.flag_name())
            .with_param("profile", profile)
    }

    pub fn execute(source: impl Into<String>) -> Self {
        Command::new(Verb::Execute).with_param("source", source.into())
    }

    pub fn probe(url: impl Into<String>, timeout_ms: u64) -> Self {
        let url = url.into();
        Command::new(Verb::Probe)
            .with_target(url.clone())
            .with_param("url", url)
            .with_param("timeoutMs", timeout_ms)
    }

    pub fn show_databases() -> Self {
        Command::new(Verb::ShowDatabases)
    }

    pub fn show_stores(db: &str) -> Self {
        Command::new(Verb::ShowStores)
            .with_target(db)
            .with_param("db", db)
    }

    pub fn select(db: &str, store: &str, limit: usize) -> Self {
        Command::new(Verb::Select)
            .with_target(format!("{db}.{store}"))
            .with_param("db", db)
            .with_param("store", store)
            .with_param("limit", limit as u64)
    }

    pub fn clear(db: &str, store: &str) -> Self {
        Command::new(Verb::Clear)
            .with_target(format!("{db}.{store}"))
            .with_param("db", db)
            .with_param("store", store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_names_round_trip() {
        for cap in Capability::ALL {
            assert_eq!(Capability::from_flag_name(cap.flag_name()), Some(cap));
        }
        assert_eq!(Capability::from_flag_name("cookies"), None);
    }

    #[test]
    fn install_command_carries_generation_and_options() {
        let options = InstallOptions {
            pending_cap: 10,
            ..InstallOptions::default()
        };
        let cmd = Command::install(Capability::NetworkObserver, Generation(3), &options);
        assert_eq!(cmd.verb, Verb::Install);
        assert_eq!(cmd.capability(), Some(Capability::NetworkObserver));
        assert_eq!(cmd.param_u64("generation"), Some(3));
        assert_eq!(cmd.param_u64("pendingCap"), Some(10));
        assert_eq!(cmd.param_u64("maxBodyBytes"), Some(64 * 1024));
    }

    #[test]
    fn verbs_serialize_screaming_snake() {
        let text = serde_json::to_string(&Verb::ShowDatabases).unwrap();
        assert_eq!(text, "\"SHOW_DATABASES\"");
        assert_eq!(Verb::ApplyThrottle.to_string(), "APPLY_THROTTLE");
    }
}
