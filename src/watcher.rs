use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::{Aliases, CorpusEvent, NoteId};
use crate::vault::{FsVault, ScannedNote};
use crate::SuggestMutex;

/// How often to rescan the vault for created, renamed, or deleted notes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub type Snapshot = BTreeMap<NoteId, ScannedNote>;

pub fn snapshot(notes: Vec<ScannedNote>) -> Snapshot {
    notes
        .into_iter()
        .map(|scanned| (scanned.note.id.clone(), scanned))
        .collect()
}

/// Start the background vault watcher. Polls the vault, diffs each scan
/// against the previous one and sends the resulting events on `events`.
/// Stops when the receiving side is dropped.
pub fn start_watcher(
    vault: Arc<FsVault>,
    initial: Vec<ScannedNote>,
    events: mpsc::Sender<CorpusEvent>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(watch_loop(vault, Arc::new(snapshot(initial)), events, interval))
}

/// Aliases parsed on an earlier scan, as long as the file is unchanged.
fn known_aliases(previous: &Snapshot, scanned: &ScannedNote) -> Option<Aliases> {
    previous
        .get(&scanned.note.id)
        .filter(|known| known.fingerprint == scanned.fingerprint)
        .map(|known| known.aliases.clone())
}

async fn watch_loop(
    vault: Arc<FsVault>,
    mut previous: Arc<Snapshot>,
    events: mpsc::Sender<CorpusEvent>,
    interval: Duration,
) {
    tracing::info!("Watching {} every {:?}", vault.root().display(), interval);
    loop {
        tokio::time::sleep(interval).await;

        let scan_vault = vault.clone();
        let known = previous.clone();
        let scan = move || scan_vault.scan_with(|scanned| known_aliases(&known, scanned));
        let current = match tokio::task::spawn_blocking(scan).await {
            Ok(Ok(notes)) => snapshot(notes),
            Ok(Err(e)) => {
                tracing::warn!("Vault scan failed: {e}");
                continue;
            }
            Err(e) => {
                tracing::warn!("Vault scan task failed: {e}");
                continue;
            }
        };

        for event in diff_scans(&previous, &current) {
            tracing::debug!(?event, "corpus change");
            if events.send(event).await.is_err() {
                tracing::info!("Index maintainer gone, stopping watcher");
                return;
            }
        }
        previous = Arc::new(current);
    }
}

/// Events turning `previous` into `current`: renames first, then deletions,
/// then creations, then alias changes.
///
/// A note that disappeared and a note that appeared with the same
/// fingerprint are reported as one rename. Ambiguous fingerprints pair in
/// identity order.
///
/// A file renamed and edited within one poll no longer matches its old
/// fingerprint, so it comes out as a deletion plus a creation and its usage
/// stats are dropped. Hosts that see renames directly should send
/// `Renamed` through the session's event channel instead.
pub fn diff_scans(previous: &Snapshot, current: &Snapshot) -> Vec<CorpusEvent> {
    let removed: Vec<&ScannedNote> = previous
        .iter()
        .filter(|(id, _)| !current.contains_key(*id))
        .map(|(_, scanned)| scanned)
        .collect();
    let added: Vec<&ScannedNote> = current
        .iter()
        .filter(|(id, _)| !previous.contains_key(*id))
        .map(|(_, scanned)| scanned)
        .collect();

    let mut claimed: HashSet<&str> = HashSet::new();
    let mut renames = Vec::new();
    let mut deletions = Vec::new();
    let mut alias_changes = Vec::new();

    for old in removed {
        let target = added
            .iter()
            .find(|new| new.fingerprint == old.fingerprint && !claimed.contains(new.note.id.as_str()));
        match target {
            Some(new) => {
                claimed.insert(new.note.id.as_str());
                renames.push(CorpusEvent::Renamed {
                    old_id: old.note.id.clone(),
                    note: new.note.clone(),
                });
                if new.aliases != old.aliases {
                    alias_changes.push(aliases_changed(new));
                }
            }
            None => deletions.push(CorpusEvent::Deleted(old.note.id.clone())),
        }
    }

    let mut creations = Vec::new();
    for new in added.iter().filter(|new| !claimed.contains(new.note.id.as_str())) {
        creations.push(CorpusEvent::Created(new.note.clone()));
        if new.aliases != Aliases::Absent {
            alias_changes.push(aliases_changed(new));
        }
    }

    for (id, scanned) in current {
        if previous.get(id).is_some_and(|old| old.aliases != scanned.aliases) {
            alias_changes.push(aliases_changed(scanned));
        }
    }

    renames
        .into_iter()
        .chain(deletions)
        .chain(creations)
        .chain(alias_changes)
        .collect()
}

fn aliases_changed(scanned: &ScannedNote) -> CorpusEvent {
    CorpusEvent::AliasesChanged {
        id: scanned.note.id.clone(),
        aliases: scanned.aliases.clone(),
    }
}

/// Consume corpus events in order, applying each to the index and usage
/// stats under a single lock acquisition.
pub fn spawn_index_maintainer(
    state: Arc<SuggestMutex>,
    mut events: mpsc::Receiver<CorpusEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let mut s = state.lock().await;
            s.apply_event(&event);
        }
        tracing::debug!("Corpus event channel closed");
    })
}
