//! Durable storage for the host-side history.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::errors::TelemetryError;
use crate::model::HistorySnapshot;

pub trait SnapshotStore: Send + Sync {
    fn load(&self) -> Result<Option<HistorySnapshot>, TelemetryError>;
    fn save(&self, snapshot: &HistorySnapshot) -> Result<(), TelemetryError>;
    fn clear(&self) -> Result<(), TelemetryError>;
}

const DOCUMENT_SEPARATOR: &str = "--";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// One pretty-printed JSON file per history key, replaced atomically.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>, key: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{key}.json")),
        }
    }

    /// History of one document under `key`; `document` should outlive the
    /// process (a target id, or a handle when nothing stabler exists).
    pub fn for_document(dir: impl AsRef<Path>, key: &str, document: &str) -> Self {
        Self::new(
            dir,
            &format!("{key}{DOCUMENT_SEPARATOR}{}", file_safe(document)),
        )
    }

    /// Every per-document store under `key` in `dir`, sorted by file name.
    pub fn documents(dir: impl AsRef<Path>, key: &str) -> Result<Vec<Self>, TelemetryError> {
        let dir = dir.as_ref();
        let prefix = format!("{key}{DOCUMENT_SEPARATOR}");
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut stores = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(&prefix) && name.ends_with(".json"))
                .unwrap_or(false);
            if matches {
                stores.push(Self { path });
            }
        }
        stores.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(stores)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unique per call so concurrent writers never share a temp file.
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("history");
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.path
            .with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()))
    }
}

fn file_safe(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<Option<HistorySnapshot>, TelemetryError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&self.path)?;
        let snapshot: HistorySnapshot = serde_json::from_slice(&raw)?;
        if snapshot.version != HistorySnapshot::VERSION {
            return Err(TelemetryError::Version(snapshot.version));
        }
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &HistorySnapshot) -> Result<(), TelemetryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp = self.temp_path();
        let written = (|| -> Result<(), TelemetryError> {
            let file = fs::File::create(&temp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, snapshot)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            fs::rename(&temp, &self.path)?;
            Ok(())
        })();
        if written.is_err() {
            let _ = fs::remove_file(&temp);
        }
        written
    }

    fn clear(&self) -> Result<(), TelemetryError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Keeps the snapshot in memory; history ends with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<HistorySnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<HistorySnapshot>, TelemetryError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, snapshot: &HistorySnapshot) -> Result<(), TelemetryError> {
        *self.slot.lock() = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), TelemetryError> {
        self.slot.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConsoleRecord;

    fn sample() -> HistorySnapshot {
        HistorySnapshot {
            version: HistorySnapshot::VERSION,
            requests: Vec::new(),
            console: vec![ConsoleRecord {
                id: "log-1".into(),
                level: "info".into(),
                text: "ready".into(),
                at: 7,
            }],
        }
    }

    #[test]
    fn file_store_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("history"), "default");
        assert!(store.load().unwrap().is_none());

        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample()));
        let leftovers = std::fs::read_dir(dir.path().join("history"))
            .unwrap()
            .filter(|entry| {
                entry.as_ref().unwrap().path().extension() == Some("tmp".as_ref())
            })
            .count();
        assert_eq!(leftovers, 0);

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn foreign_versions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path(), "old");
        let mut snapshot = sample();
        snapshot.version = 99;
        store.save(&snapshot).unwrap();
        assert!(matches!(store.load(), Err(TelemetryError::Version(99))));
    }

    #[test]
    fn documents_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = JsonFileStore::for_document(dir.path(), "default", "TARGET/A");
        let b = JsonFileStore::for_document(dir.path(), "default", "target-b");
        assert_ne!(a.path(), b.path());
        assert!(a.path().ends_with("default--TARGET_A.json"));

        a.save(&sample()).unwrap();
        assert!(b.load().unwrap().is_none());
        b.save(&HistorySnapshot {
            version: HistorySnapshot::VERSION,
            ..HistorySnapshot::default()
        })
        .unwrap();
        JsonFileStore::new(dir.path(), "other").save(&sample()).unwrap();

        let listed: Vec<PathBuf> = JsonFileStore::documents(dir.path(), "default")
            .unwrap()
            .into_iter()
            .map(|store| store.path().to_path_buf())
            .collect();
        assert_eq!(listed, vec![a.path().to_path_buf(), b.path().to_path_buf()]);
        assert!(JsonFileStore::documents(dir.path().join("missing"), "default")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn concurrent_saves_use_distinct_temp_files() {
        let store = JsonFileStore::new("/tmp", "default");
        assert_ne!(store.temp_path(), store.temp_path());
    }
}
