use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::settings::Settings;
use crate::types::{NoteId, UsageRecord};

/// Key under which the whole state blob is stored.
pub const STATE_KEY: &str = "note-link-suggest";

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub settings: Settings,
    pub usage_stats: HashMap<NoteId, UsageRecord>,
}

impl PersistedState {
    /// Decode a stored blob. Never fails: a corrupted blob yields defaults,
    /// corrupted usage entries are dropped, out-of-range settings are reset.
    pub fn decode(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Persisted state is not valid JSON, starting fresh: {e}");
                return Self::default();
            }
        };

        let settings = match value.get("settings") {
            Some(raw_settings) => match Settings::deserialize(raw_settings) {
                Ok(s) => s.sanitized(),
                Err(e) => {
                    tracing::warn!("Persisted settings unreadable, using defaults: {e}");
                    Settings::default()
                }
            },
            None => Settings::default(),
        };

        let usage_stats = match value.get("usageStats") {
            Some(Value::Object(entries)) => entries
                .iter()
                .filter_map(|(id, entry)| match decode_usage_record(entry) {
                    Some(record) => Some((id.clone(), record)),
                    None => {
                        tracing::warn!("Skipping malformed usage entry for {id}");
                        None
                    }
                })
                .collect(),
            Some(_) => {
                tracing::warn!("Persisted usage stats are not an object, ignoring them");
                HashMap::new()
            }
            None => HashMap::new(),
        };

        Self {
            settings,
            usage_stats,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Read the blob from `store`; any failure yields defaults.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        match store.load(STATE_KEY) {
            Ok(Some(raw)) => Self::decode(&raw),
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!("Failed to read persisted state, starting fresh: {e}");
                Self::default()
            }
        }
    }
}

/// Counts that are negative, fractional or missing read as zero. A
/// `lastUsed` that is non-numeric, negative or outside the `i64` range
/// reads as unset.
fn decode_usage_record(entry: &Value) -> Option<UsageRecord> {
    let fields = entry.as_object()?;
    let count = fields
        .get("count")
        .and_then(|c| c.as_u64().or_else(|| c.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)))
        .unwrap_or(0);
    let last_used = fields
        .get("lastUsed")
        .and_then(|t| t.as_i64().or_else(|| t.as_f64().and_then(timestamp_from_f64)))
        .filter(|at| *at >= 0);
    Some(UsageRecord { count, last_used })
}

fn timestamp_from_f64(f: f64) -> Option<i64> {
    // `as` saturates, so the bound check has to happen first.
    (f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64).then(|| f as i64)
}

/// The host's persistent key-value store.
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// SQLite-backed store: one `kv` table in a single file.
#[derive(Debug, Clone)]
pub struct SqliteKvStore {
    path: PathBuf,
}

impl SqliteKvStore {
    /// Create the database (and its parent directory) if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { path: path.into() };
        if let Some(parent) = store.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        store.connect()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                 key   TEXT PRIMARY KEY NOT NULL,
                 value TEXT NOT NULL
             );",
        )?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(conn)
    }
}

impl KeyValueStore for SqliteKvStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }
}

/// In-process store for tests and hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    data: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryKvStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let data = self
            .data
            .lock()
            .map_err(|e| anyhow::anyhow!("kv lock poisoned: {e}"))?;
        Ok(data.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| anyhow::anyhow!("kv lock poisoned: {e}"))?;
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug)]
enum PersistUpdate {
    Settings(Settings),
    Usage(HashMap<NoteId, UsageRecord>),
}

/// Handle to the background writer.
///
/// Saves are at most once and best effort: they are queued without
/// waiting, coalesced with anything else pending, and written on the
/// blocking pool. Failures are logged and dropped. The writer drains its
/// queue and exits once every handle is dropped.
#[derive(Debug, Clone)]
pub struct Persister {
    tx: mpsc::UnboundedSender<PersistUpdate>,
}

impl Persister {
    /// Start the writer task. Must be called within a tokio runtime.
    pub fn spawn(store: Arc<dyn KeyValueStore>, initial: PersistedState) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_loop(store, initial, rx));
        (Self { tx }, handle)
    }

    pub fn save_settings(&self, settings: Settings) {
        self.send(PersistUpdate::Settings(settings));
    }

    pub fn save_usage(&self, usage: HashMap<NoteId, UsageRecord>) {
        self.send(PersistUpdate::Usage(usage));
    }

    fn send(&self, update: PersistUpdate) {
        if self.tx.send(update).is_err() {
            tracing::warn!("Persistence task has stopped; dropping write");
        }
    }
}

async fn write_loop(
    store: Arc<dyn KeyValueStore>,
    mut state: PersistedState,
    mut rx: mpsc::UnboundedReceiver<PersistUpdate>,
) {
    while let Some(update) = rx.recv().await {
        merge(&mut state, update);
        while let Ok(more) = rx.try_recv() {
            merge(&mut state, more);
        }

        let encoded = match state.encode() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to encode state: {e}");
                continue;
            }
        };

        let store = store.clone();
        match tokio::task::spawn_blocking(move || store.save(STATE_KEY, &encoded)).await {
            Ok(Ok(())) => tracing::debug!("Persisted state"),
            Ok(Err(e)) => tracing::warn!("Failed to persist state: {e}"),
            Err(e) => tracing::warn!("Persistence write panicked: {e}"),
        }
    }
}

fn merge(state: &mut PersistedState, update: PersistUpdate) {
    match update {
        PersistUpdate::Settings(settings) => state.settings = settings,
        PersistUpdate::Usage(usage) => state.usage_stats = usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn load(&self, _key: &str) -> Result<Option<String>> {
            anyhow::bail!("disk on fire")
        }
        fn save(&self, _key: &str, _value: &str) -> Result<()> {
            anyhow::bail!("disk on fire")
        }
    }

    #[test]
    fn decode_defaults_missing_fields() {
        let state = PersistedState::decode(r#"{"usageStats": {"a.md": {"count": 3}}}"#);
        assert_eq!(state.settings, Settings::default());
        assert_eq!(
            state.usage_stats["a.md"],
            UsageRecord {
                count: 3,
                last_used: None,
            }
        );
    }

    #[test]
    fn decode_tolerates_corruption() {
        assert_eq!(PersistedState::decode("not json {"), PersistedState::default());
        assert_eq!(PersistedState::decode("[1, 2]"), PersistedState::default());

        let state = PersistedState::decode(
            r#"{
                "settings": {"recencyWeight": 999, "maxSuggestions": 4},
                "usageStats": {
                    "ok.md": {"count": 2, "lastUsed": 1700000000000},
                    "neg.md": {"count": -5, "lastUsed": "yesterday"},
                    "junk.md": "oops"
                }
            }"#,
        );
        assert_eq!(state.settings.recency_weight, 30);
        assert_eq!(state.settings.max_suggestions, 4);
        assert_eq!(state.usage_stats["ok.md"].count, 2);
        assert_eq!(state.usage_stats["ok.md"].last_used, Some(1_700_000_000_000));
        assert_eq!(
            state.usage_stats["neg.md"],
            UsageRecord {
                count: 0,
                last_used: None,
            }
        );
        assert!(!state.usage_stats.contains_key("junk.md"));
    }

    #[test]
    fn out_of_range_timestamps_read_as_unset() {
        let state = PersistedState::decode(
            r#"{"usageStats": {
                "huge.md": {"count": 3, "lastUsed": -1e30},
                "far.md": {"count": 1, "lastUsed": 1e300},
                "min.md": {"count": 1, "lastUsed": -9223372036854775808},
                "float.md": {"count": 1, "lastUsed": 1700000000000.5}
            }}"#,
        );
        assert_eq!(state.usage_stats["huge.md"].count, 3);
        assert_eq!(state.usage_stats["huge.md"].last_used, None);
        assert_eq!(state.usage_stats["far.md"].last_used, None);
        assert_eq!(state.usage_stats["min.md"].last_used, None);
        assert_eq!(state.usage_stats["float.md"].last_used, Some(1_700_000_000_000));
    }

    #[test]
    fn encoded_layout_uses_documented_field_names() {
        let mut state = PersistedState::default();
        state.usage_stats.insert(
            "n.md".into(),
            UsageRecord {
                count: 1,
                last_used: Some(5),
            },
        );
        let value: Value = serde_json::from_str(&state.encode().unwrap()).unwrap();
        assert_eq!(value["usageStats"]["n.md"]["count"], 1);
        assert_eq!(value["usageStats"]["n.md"]["lastUsed"], 5);
        assert_eq!(value["settings"]["minTriggerLength"], 3);
    }

    #[test]
    fn sqlite_store_round_trips_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteKvStore::open(dir.path().join("nested/state.sqlite")).unwrap();
        assert_eq!(store.load("k").unwrap(), None);
        store.save("k", "one").unwrap();
        store.save("k", "two").unwrap();
        assert_eq!(store.load("k").unwrap().as_deref(), Some("two"));

        let reopened = SqliteKvStore::open(store.path().to_path_buf()).unwrap();
        assert_eq!(reopened.load("k").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn load_falls_back_to_defaults_on_store_error() {
        assert_eq!(PersistedState::load(&FailingStore), PersistedState::default());
    }

    #[tokio::test]
    async fn writer_persists_latest_state_and_drains_on_drop() {
        let store = Arc::new(MemoryKvStore::default());
        let (persister, handle) = Persister::spawn(store.clone(), PersistedState::default());

        let mut usage = HashMap::new();
        usage.insert(
            "a.md".to_string(),
            UsageRecord {
                count: 1,
                last_used: Some(10),
            },
        );
        persister.save_usage(usage.clone());
        usage.get_mut("a.md").unwrap().count = 2;
        persister.save_usage(usage);
        let settings = Settings {
            max_suggestions: 3,
            ..Settings::default()
        };
        persister.save_settings(settings.clone());
        drop(persister);
        handle.await.unwrap();

        let saved = PersistedState::load(store.as_ref());
        assert_eq!(saved.usage_stats["a.md"].count, 2);
        assert_eq!(saved.settings, settings);
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let (persister, handle) = Persister::spawn(Arc::new(FailingStore), PersistedState::default());
        persister.save_settings(Settings::default());
        drop(persister);
        handle.await.unwrap();
    }
}
