pub mod extractor;
pub mod index;
pub mod matcher;
pub mod persist;
pub mod scoring;
pub mod settings;
pub mod suggest;
pub mod types;
pub mod usage;
pub mod vault;
pub mod watcher;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::index::{TitleIndex, DEFAULT_NOTE_EXTENSION};
use crate::persist::{KeyValueStore, PersistedState, Persister};
use crate::settings::{SettingUpdate, Settings, SettingsError};
use crate::suggest::LinkSuggester;
use crate::types::CorpusEvent;
use crate::usage::UsageStatsStore;
use crate::vault::FsVault;

/// Capacity of the corpus event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// All runtime state shared by the suggester and the index maintainer.
/// Held behind one mutex so index mutation and ranking never interleave.
#[derive(Debug)]
pub struct SuggestState {
    pub index: TitleIndex,
    pub usage: UsageStatsStore,
    pub settings: Settings,
    persister: Option<Persister>,
}

impl SuggestState {
    pub fn new(index: TitleIndex, persisted: PersistedState, persister: Option<Persister>) -> Self {
        Self {
            index,
            usage: UsageStatsStore::new(persisted.usage_stats, persister.clone()),
            settings: persisted.settings,
            persister,
        }
    }

    /// Apply one corpus notification to the index, then carry usage stats
    /// along: renames re-key them, deletions prune them.
    pub fn apply_event(&mut self, event: &CorpusEvent) {
        match event {
            CorpusEvent::Created(_) | CorpusEvent::AliasesChanged { .. } => {
                self.index.apply(event);
            }
            CorpusEvent::Renamed { old_id, note } => {
                if !self.index.apply(event) {
                    return;
                }
                if self.index.get(&note.id).is_some() {
                    self.usage.rekey(old_id, &note.id);
                } else {
                    self.usage.remove(old_id);
                }
            }
            CorpusEvent::Deleted(id) => {
                self.index.apply(event);
                if self.index.is_note(id) {
                    self.usage.remove(id);
                }
            }
        }
    }

    /// Validate and apply one settings write; persisted only when accepted.
    pub fn update_setting(&mut self, update: SettingUpdate) -> Result<(), SettingsError> {
        if let Err(e) = self.settings.apply(update) {
            tracing::warn!("Rejected settings write: {e}");
            return Err(e);
        }
        if let Some(persister) = &self.persister {
            persister.save_settings(self.settings.clone());
        }
        Ok(())
    }
}

/// Type alias used by the suggester and background tasks.
pub type SuggestMutex = Mutex<SuggestState>;

/// Where the vault lives and how it is watched.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub root: PathBuf,
    pub extension: String,
    pub poll_interval: Duration,
}

impl VaultConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: DEFAULT_NOTE_EXTENSION.to_string(),
            poll_interval: watcher::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// A running suggestion session: the suggester plus its background tasks.
pub struct Session {
    pub suggester: LinkSuggester,
    events: mpsc::Sender<CorpusEvent>,
    watcher: JoinHandle<()>,
    maintainer: JoinHandle<()>,
    persister: JoinHandle<()>,
}

impl Session {
    /// Sender for corpus notifications from the host, processed in order
    /// after any the watcher has already queued.
    pub fn events(&self) -> mpsc::Sender<CorpusEvent> {
        self.events.clone()
    }

    /// Stop watching and wait for queued events and pending writes.
    /// Returns only once every clone of the suggester and of `events()` has
    /// been dropped.
    pub async fn shutdown(self) {
        let Session {
            suggester,
            events,
            watcher,
            maintainer,
            persister,
        } = self;
        watcher.abort();
        drop(events);
        let _ = watcher.await;
        if let Err(e) = maintainer.await {
            tracing::warn!("Index maintainer ended abnormally: {e}");
        }
        drop(suggester);
        if let Err(e) = persister.await {
            tracing::warn!("Persistence task ended abnormally: {e}");
        }
    }
}

/// Load persisted state, scan the vault, build the index and start the
/// watcher, index maintainer and persistence tasks.
pub async fn start_session(config: VaultConfig, store: Arc<dyn KeyValueStore>) -> Result<Session> {
    let vault = Arc::new(FsVault::new(config.root.clone(), config.extension.clone()));

    let load_store = store.clone();
    let persisted = tokio::task::spawn_blocking(move || PersistedState::load(load_store.as_ref())).await?;

    let scan_vault = vault.clone();
    let scanned = tokio::task::spawn_blocking(move || scan_vault.scan()).await??;
    let mut index = TitleIndex::build(
        config.extension.clone(),
        scanned.iter().map(|s| s.note.clone()),
    );
    for s in &scanned {
        index.set_aliases(&s.note.id, s.aliases.clone());
    }
    tracing::info!(
        notes = index.len(),
        usage_records = persisted.usage_stats.len(),
        "Index built"
    );

    let (persister, persister_task) = Persister::spawn(store, persisted.clone());
    let state = Arc::new(Mutex::new(SuggestState::new(index, persisted, Some(persister))));

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let maintainer = watcher::spawn_index_maintainer(state.clone(), rx);
    let watcher = watcher::start_watcher(vault, scanned, tx.clone(), config.poll_interval);

    Ok(Session {
        suggester: LinkSuggester::new(state),
        events: tx,
        watcher,
        maintainer,
        persister: persister_task,
    })
}

/// Install the fmt subscriber. Debug builds honour `RUST_LOG` (default
/// `info`); release builds log WARN and above only, to avoid leaking note
/// titles.
pub fn init_logging() {
    #[cfg(debug_assertions)]
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    #[cfg(not(debug_assertions))]
    let filter = tracing_subscriber::EnvFilter::new("warn");

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NoteMetadata;

    fn note(id: &str) -> NoteMetadata {
        NoteMetadata {
            id: id.into(),
            title: id.trim_end_matches(".md").into(),
            created_time: 0,
        }
    }

    fn state_with(ids: &[&str]) -> SuggestState {
        SuggestState::new(
            TitleIndex::build("md", ids.iter().map(|id| note(id))),
            PersistedState::default(),
            None,
        )
    }

    #[test]
    fn rename_moves_usage_with_the_note() {
        let mut state = state_with(&["old.md"]);
        state.usage.record_selection_at("old.md", 7);
        state.apply_event(&CorpusEvent::Renamed {
            old_id: "old.md".into(),
            note: note("new.md"),
        });

        assert!(state.index.get("old.md").is_none());
        assert!(state.index.get("new.md").is_some());
        assert!(state.usage.get("old.md").is_none());
        assert_eq!(state.usage.get("new.md").unwrap().count, 1);
    }

    #[test]
    fn delete_prunes_usage() {
        let mut state = state_with(&["gone.md", "kept.md"]);
        state.usage.record_selection_at("gone.md", 1);
        state.usage.record_selection_at("kept.md", 1);
        state.apply_event(&CorpusEvent::Deleted("gone.md".into()));

        assert!(state.usage.get("gone.md").is_none());
        assert!(state.usage.get("kept.md").is_some());
        assert_eq!(state.index.len(), 1);
    }

    #[test]
    fn rename_to_non_note_drops_usage() {
        let mut state = state_with(&["a.md"]);
        state.usage.record_selection_at("a.md", 1);
        state.apply_event(&CorpusEvent::Renamed {
            old_id: "a.md".into(),
            note: note("a.txt"),
        });
        assert!(state.index.is_empty());
        assert!(state.usage.is_empty());
    }

    #[test]
    fn non_note_events_leave_state_alone() {
        let mut state = state_with(&["a.md"]);
        state.apply_event(&CorpusEvent::Created(note("pic.png")));
        state.apply_event(&CorpusEvent::Deleted("pic.png".into()));
        assert_eq!(state.index.len(), 1);
    }

    #[tokio::test]
    async fn rename_is_never_half_visible() {
        let state = Arc::new(Mutex::new(state_with(&["before.md"])));
        let (tx, rx) = mpsc::channel(8);
        let maintainer = watcher::spawn_index_maintainer(state.clone(), rx);

        tx.send(CorpusEvent::Renamed {
            old_id: "before.md".into(),
            note: note("after.md"),
        })
        .await
        .unwrap();
        drop(tx);
        maintainer.await.unwrap();

        let s = state.lock().await;
        assert!(s.index.get("before.md").is_none());
        assert!(s.index.get("after.md").is_some());
        assert_eq!(s.index.len(), 1);
    }
}
