use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::types::{AliasSource, Aliases, CorpusEvent, NoteId, NoteMetadata};

/// Default content extension for notes.
pub const DEFAULT_NOTE_EXTENSION: &str = "md";

/// In-memory map from note identity to its current title and aliases.
///
/// Only files carrying the corpus's note extension are indexed. Every
/// mutation is a single `&mut self` call, so a reader holding the shared
/// lock never sees a rename half-applied. Aliases travel with their note
/// through renames and leave with it on removal.
#[derive(Debug, Clone)]
pub struct TitleIndex {
    extension: String,
    entries: BTreeMap<NoteId, NoteMetadata>,
    aliases: HashMap<NoteId, Aliases>,
}

impl TitleIndex {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            entries: BTreeMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Build from a full corpus scan. Non-note files are skipped.
    pub fn build(extension: impl Into<String>, notes: impl IntoIterator<Item = NoteMetadata>) -> Self {
        let mut index = Self::new(extension);
        for note in notes {
            index.upsert(note);
        }
        index
    }

    /// True if `id` names a file this index tracks.
    pub fn is_note(&self, id: &str) -> bool {
        Path::new(id)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }

    /// Insert or replace the entry for `note.id`. Returns false when ignored.
    pub fn upsert(&mut self, note: NoteMetadata) -> bool {
        if !self.is_note(&note.id) {
            return false;
        }
        self.entries.insert(note.id.clone(), note);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<NoteMetadata> {
        self.aliases.remove(id);
        self.entries.remove(id)
    }

    /// Replace the cached aliases of an indexed note. Returns false when
    /// `id` is not indexed.
    pub fn set_aliases(&mut self, id: &str, aliases: Aliases) -> bool {
        if !self.entries.contains_key(id) {
            return false;
        }
        match aliases {
            Aliases::Absent => self.aliases.remove(id),
            aliases => self.aliases.insert(id.to_string(), aliases),
        };
        true
    }

    /// Move `old_id` to `note.id` in one step.
    ///
    /// A rename onto a non-note path drops the old entry; a rename of a file
    /// that was not a note into one inserts it. Renames between two non-note
    /// paths are ignored. Returns false when nothing changed.
    pub fn rekey(&mut self, old_id: &str, note: NoteMetadata) -> bool {
        let removed = self.entries.remove(old_id).is_some();
        let aliases = self.aliases.remove(old_id);
        let new_id = note.id.clone();
        let inserted = self.upsert(note);
        if let (true, Some(aliases)) = (inserted, aliases) {
            self.aliases.insert(new_id, aliases);
        }
        removed || inserted
    }

    pub fn get(&self, id: &str) -> Option<&NoteMetadata> {
        self.entries.get(id)
    }

    /// Snapshot of every entry, in identity order. Later mutations do not
    /// affect the returned vector.
    pub fn all_entries(&self) -> Vec<NoteMetadata> {
        self.entries.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NoteMetadata> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply one corpus notification. Returns false for events about
    /// non-note files (and deletes of unknown identities).
    pub fn apply(&mut self, event: &CorpusEvent) -> bool {
        match event {
            CorpusEvent::Created(note) => self.upsert(note.clone()),
            CorpusEvent::Renamed { old_id, note } => self.rekey(old_id, note.clone()),
            CorpusEvent::Deleted(id) => self.remove(id).is_some(),
            CorpusEvent::AliasesChanged { id, aliases } => self.set_aliases(id, aliases.clone()),
        }
    }
}

impl AliasSource for TitleIndex {
    fn aliases(&self, id: &str) -> Aliases {
        self.aliases.get(id).cloned().unwrap_or_default()
    }
}

impl Default for TitleIndex {
    fn default() -> Self {
        Self::new(DEFAULT_NOTE_EXTENSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: &str, title: &str) -> NoteMetadata {
        NoteMetadata {
            id: id.to_string(),
            title: title.to_string(),
            created_time: 0,
        }
    }

    #[test]
    fn build_skips_non_note_files() {
        let index = TitleIndex::build(
            "md",
            vec![
                note("a.md", "a"),
                note("img/cat.png", "cat"),
                note("b.MD", "b"),
            ],
        );
        assert_eq!(index.len(), 2);
        assert!(index.get("img/cat.png").is_none());
    }

    #[test]
    fn rename_replaces_old_key_in_one_step() {
        let mut index = TitleIndex::build("md", vec![note("old.md", "old")]);
        let applied = index.apply(&CorpusEvent::Renamed {
            old_id: "old.md".into(),
            note: note("dir/new.md", "new"),
        });

        assert!(applied);
        assert!(index.get("old.md").is_none());
        assert_eq!(index.get("dir/new.md").map(|n| n.title.as_str()), Some("new"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn rename_away_from_note_extension_drops_entry() {
        let mut index = TitleIndex::build("md", vec![note("draft.md", "draft")]);
        index.rekey("draft.md", note("draft.txt", "draft"));
        assert!(index.is_empty());
    }

    #[test]
    fn non_note_events_are_ignored() {
        let mut index = TitleIndex::default();
        assert!(!index.apply(&CorpusEvent::Created(note("data.csv", "data"))));
        assert!(!index.apply(&CorpusEvent::Renamed {
            old_id: "a.csv".into(),
            note: note("b.csv", "b"),
        }));
        assert!(!index.apply(&CorpusEvent::Deleted("missing.md".into())));
        assert!(index.is_empty());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let mut index = TitleIndex::build("md", vec![note("a.md", "a"), note("b.md", "b")]);
        let snapshot = index.all_entries();
        index.remove("a.md");
        index.upsert(note("c.md", "c"));

        let ids: Vec<_> = snapshot.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a.md", "b.md"]);
    }

    #[test]
    fn aliases_follow_renames_and_leave_with_the_note() {
        let mut index = TitleIndex::build("md", vec![note("ai.md", "AI notes")]);
        let ai = Aliases::List(vec!["AI".into()]);
        assert!(!index.set_aliases("unknown.md", ai.clone()));
        assert!(index.apply(&CorpusEvent::AliasesChanged {
            id: "ai.md".into(),
            aliases: ai.clone(),
        }));

        index.rekey("ai.md", note("topics/ai.md", "AI notes"));
        assert_eq!(index.aliases("ai.md"), Aliases::Absent);
        assert_eq!(index.aliases("topics/ai.md"), ai);

        index.upsert(note("topics/ai.md", "Artificial Intelligence"));
        assert_eq!(index.aliases("topics/ai.md"), ai);

        index.remove("topics/ai.md");
        index.upsert(note("topics/ai.md", "Back again"));
        assert_eq!(index.aliases("topics/ai.md"), Aliases::Absent);
    }

    #[test]
    fn upsert_updates_title_without_duplicating() {
        let mut index = TitleIndex::default();
        index.upsert(note("a.md", "first"));
        index.upsert(note("a.md", "second"));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a.md").unwrap().title, "second");
    }
}
