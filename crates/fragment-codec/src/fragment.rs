//! Compilation of [`Command`]s into self-contained fragments.
//!
//! Every fragment has the same shape: the encoded parameter literal, the
//! page-side registry prelude, and a static body, all inside an async wrapper
//! that converts the body's outcome (or its exception) into the
//! `{ok, data|error, errorKind}` envelope before it leaves the document.

use pagebridge_core_types::{BridgeError, BridgeResult};

use crate::command::{Capability, Command, Verb};
use crate::literal::encode_literal;

const PRELUDE: &str = include_str!("scripts/prelude.js");
const INSTALL_GUARD: &str = include_str!("scripts/install_guard.js");
const INSTALL_THROTTLE: &str = include_str!("scripts/install_throttle.js");
const INSTALL_NETWORK: &str = include_str!("scripts/install_network.js");
const INSTALL_CONSOLE: &str = include_str!("scripts/install_console.js");
const DRAIN: &str = include_str!("scripts/drain.js");
const APPLY_THROTTLE: &str = include_str!("scripts/apply_throttle.js");
const LOCATE: &str = include_str!("scripts/locate.js");
const EXECUTE: &str = include_str!("scripts/execute.js");
const PROBE: &str = include_str!("scripts/probe.js");
const IDB_HELPERS: &str = include_str!("scripts/idb.js");
const LIST_DATABASES: &str = include_str!("scripts/list_databases.js");
const LIST_STORES: &str = include_str!("scripts/list_stores.js");
const SELECT_ALL: &str = include_str!("scripts/select_all.js");
const CLEAR_STORE: &str = include_str!("scripts/clear_store.js");

/// A compiled unit of code plus the command it was compiled from.
#[derive(Clone, Debug, PartialEq)]
pub struct Fragment {
    command: Command,
    source: String,
}

impl Fragment {
    pub fn compile(command: Command) -> BridgeResult<Self> {
        let body = body_for(&command)?;
        let params = encode_literal(&command.parameters)?;
        let mut source = String::with_capacity(
            PRELUDE.len() + params.len() + body.iter().map(|part| part.len()).sum::<usize>() + 512,
        );
        source.push_str("(async () => {\nconst params = ");
        source.push_str(&params);
        source.push_str(";\ntry {\n");
        source.push_str(PRELUDE);
        source.push_str("const data = await (async () => {\n");
        for part in body {
            source.push_str(part);
        }
        source.push_str(
            "})();\n\
             return { ok: true, data: data === undefined ? null : data };\n\
             } catch (err) {\n\
             return {\n\
             ok: false,\n\
             error: String((err && err.message) || err),\n\
             errorKind: (err && err.bridgeKind) || \"ExecutionFailed\",\n\
             };\n\
             }\n\
             })()",
        );
        Ok(Self { command, source })
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn verb(&self) -> Verb {
        self.command.verb
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

fn body_for(command: &Command) -> BridgeResult<Vec<&'static str>> {
    let parts = match command.verb {
        Verb::Install => {
            let cap = command.capability().ok_or_else(|| {
                BridgeError::unsupported(format!(
                    "unknown capability {:?}",
                    command.param_str("capability").unwrap_or_default()
                ))
            })?;
            let body = match cap {
                Capability::ThrottleGate => INSTALL_THROTTLE,
                Capability::NetworkObserver => INSTALL_NETWORK,
                Capability::ConsoleObserver => INSTALL_CONSOLE,
            };
            vec![INSTALL_GUARD, body]
        }
        Verb::Drain => vec![DRAIN],
        Verb::ApplyThrottle => {
            require(command, &["capability", "profile"])?;
            vec![APPLY_THROTTLE]
        }
        Verb::Locate => vec![LOCATE],
        Verb::Execute => {
            require(command, &["source"])?;
            vec![EXECUTE]
        }
        Verb::Probe => {
            require(command, &["url", "timeoutMs"])?;
            vec![PROBE]
        }
        Verb::ShowDatabases => vec![IDB_HELPERS, LIST_DATABASES],
        Verb::ShowStores => {
            require(command, &["db"])?;
            vec![IDB_HELPERS, LIST_STORES]
        }
        Verb::Select => {
            require(command, &["db", "store", "limit"])?;
            vec![IDB_HELPERS, SELECT_ALL]
        }
        Verb::Clear => {
            require(command, &["db", "store"])?;
            vec![IDB_HELPERS, CLEAR_STORE]
        }
    };
    Ok(parts)
}

fn require(command: &Command, keys: &[&str]) -> BridgeResult<()> {
    match keys.iter().find(|key| command.param(key).is_none()) {
        Some(missing) => Err(BridgeError::internal(format!(
            "{} command missing parameter `{missing}`",
            command.verb
        ))),
        None => Ok(()),
    }
}
