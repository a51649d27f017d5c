use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use cdp_adapter::{InjectionChannel, SharedChannel};
use fragment_codec::Command;
use pagebridge_core_types::{BridgeResult, DocumentHandle, Envelope};

use crate::grammar::{parse, ParsedQuery};

/// Rows returned by one SELECT at most.
pub const SELECT_LIMIT: usize = 50;

impl ParsedQuery {
    pub fn compile(&self) -> Command {
        match self {
            ParsedQuery::ListDatabases => Command::show_databases(),
            ParsedQuery::ListStores { db } => Command::show_stores(db),
            ParsedQuery::SelectAll { db, store } => Command::select(db, store, SELECT_LIMIT),
            ParsedQuery::ClearStore { db, store } => Command::clear(db, store),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: Value,
    pub value: Value,
}

/// Decoded page reply for each query form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryOutput {
    Databases(Vec<DatabaseInfo>),
    Stores {
        db: String,
        #[serde(default)]
        version: Option<u64>,
        stores: Vec<String>,
    },
    Records {
        db: String,
        store: String,
        records: Vec<StoredRecord>,
        count: usize,
        /// Records in the store; larger than `count` when the scan was capped.
        total: usize,
    },
    Cleared {
        db: String,
        store: String,
        cleared: bool,
    },
}

impl QueryOutput {
    fn decode(query: &ParsedQuery, raw: Value) -> BridgeResult<Self> {
        #[derive(Deserialize)]
        struct Stores {
            db: String,
            #[serde(default)]
            version: Option<u64>,
            stores: Vec<String>,
        }
        #[derive(Deserialize)]
        struct Records {
            db: String,
            store: String,
            records: Vec<StoredRecord>,
            count: usize,
            total: usize,
        }
        #[derive(Deserialize)]
        struct Cleared {
            db: String,
            store: String,
            cleared: bool,
        }

        Ok(match query {
            ParsedQuery::ListDatabases => QueryOutput::Databases(serde_json::from_value(raw)?),
            ParsedQuery::ListStores { .. } => {
                let Stores { db, version, stores } = serde_json::from_value(raw)?;
                QueryOutput::Stores { db, version, stores }
            }
            ParsedQuery::SelectAll { .. } => {
                let Records {
                    db,
                    store,
                    records,
                    count,
                    total,
                } = serde_json::from_value(raw)?;
                QueryOutput::Records {
                    db,
                    store,
                    records,
                    count,
                    total,
                }
            }
            ParsedQuery::ClearStore { .. } => {
                let Cleared { db, store, cleared } = serde_json::from_value(raw)?;
                QueryOutput::Cleared { db, store, cleared }
            }
        })
    }

    /// Plain-text rendering for terminals.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self {
            QueryOutput::Databases(dbs) if dbs.is_empty() => out.push_str("(no databases)"),
            QueryOutput::Databases(dbs) => {
                for db in dbs {
                    match db.version {
                        Some(version) => {
                            let _ = writeln!(out, "{}  (v{version})", db.name);
                        }
                        None => {
                            let _ = writeln!(out, "{}", db.name);
                        }
                    }
                }
            }
            QueryOutput::Stores { db, stores, .. } => {
                let _ = writeln!(out, "{db}: {} store(s)", stores.len());
                for store in stores {
                    let _ = writeln!(out, "  {store}");
                }
            }
            QueryOutput::Records {
                db,
                store,
                records,
                count,
                total,
            } => {
                let _ = writeln!(out, "{db}.{store}: showing {count} of {total}");
                for record in records {
                    let _ = writeln!(out, "  {} => {}", record.key, record.value);
                }
            }
            QueryOutput::Cleared { db, store, .. } => {
                let _ = write!(out, "{db}.{store} cleared");
            }
        }
        out.trim_end().to_string()
    }
}

/// Parses query lines and runs them against a document. Each query is one
/// fragment that opens and closes its own database connection.
#[derive(Clone)]
pub struct StorageQueryInterpreter {
    channel: SharedChannel,
}

impl StorageQueryInterpreter {
    pub fn new(channel: SharedChannel) -> Self {
        Self { channel }
    }

    pub async fn execute(&self, handle: DocumentHandle, line: &str) -> BridgeResult<QueryOutput> {
        let query = parse(line)?;
        debug!(target: "storage-query", %handle, query = %query, "running storage query");
        let raw = self.channel.run(handle, query.compile()).await?;
        QueryOutput::decode(&query, raw)
    }

    /// Same as [`StorageQueryInterpreter::execute`], folded into the uniform
    /// envelope.
    pub async fn run(&self, handle: DocumentHandle, line: &str) -> Envelope {
        Envelope::from_typed(self.execute(handle, line).await)
    }
}
