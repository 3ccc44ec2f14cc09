use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Result;
use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::index::DEFAULT_NOTE_EXTENSION;
use crate::types::{Aliases, NoteId, NoteMetadata};

/// Front-matter keys holding aliases, in lookup order.
const ALIAS_KEYS: [&str; 2] = ["aliases", "alias"];

/// Change-detection fingerprint: size plus modification time (Unix ms).
/// A rename keeps both, which is how the watcher pairs a deletion with a
/// creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub len: u64,
    pub modified: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedNote {
    pub note: NoteMetadata,
    pub fingerprint: Fingerprint,
    pub aliases: Aliases,
}

/// A directory of note files.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
    extension: String,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn with_default_extension(root: impl Into<PathBuf>) -> Self {
        Self::new(root, DEFAULT_NOTE_EXTENSION)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Walk the vault and return every note file with its aliases parsed.
    /// Hidden directories are skipped; unreadable entries are logged and
    /// skipped.
    pub fn scan(&self) -> Result<Vec<ScannedNote>> {
        self.scan_with(|_| None)
    }

    /// Like [`FsVault::scan`], but only reads front matter for notes where
    /// `known` has no aliases to offer, typically because the file changed.
    pub fn scan_with(&self, known: impl Fn(&ScannedNote) -> Option<Aliases>) -> Result<Vec<ScannedNote>> {
        if !self.root.is_dir() {
            anyhow::bail!("vault root is not a directory: {}", self.root.display());
        }

        let notes = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
            .filter_map(|entry| {
                entry
                    .map_err(|e| tracing::warn!("Skipping unreadable vault entry: {e}"))
                    .ok()
            })
            .filter(|entry| entry.file_type().is_file() && self.has_note_extension(entry.path()))
            .filter_map(|entry| {
                let metadata = entry
                    .metadata()
                    .map_err(|e| tracing::warn!("Skipping {}: {e}", entry.path().display()))
                    .ok()?;
                self.scanned_note(entry.path(), &metadata)
            })
            .map(|mut scanned| {
                scanned.aliases = known(&scanned).unwrap_or_else(|| self.read_aliases(&scanned.note.id));
                scanned
            })
            .collect();

        Ok(notes)
    }

    /// Identity of `path`: relative to the root, `/`-separated.
    pub fn note_id(&self, path: &Path) -> Option<NoteId> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }

    pub fn path_of(&self, id: &str) -> PathBuf {
        id.split('/').fold(self.root.clone(), |path, part| path.join(part))
    }

    fn has_note_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }

    fn scanned_note(&self, path: &Path, metadata: &Metadata) -> Option<ScannedNote> {
        let id = self.note_id(path)?;
        let title = path.file_stem()?.to_string_lossy().into_owned();
        let modified = metadata.modified().ok().map(unix_ms).unwrap_or(0);
        let created = metadata.created().ok().map(unix_ms).unwrap_or(modified);
        Some(ScannedNote {
            note: NoteMetadata {
                id,
                title,
                created_time: created,
            },
            fingerprint: Fingerprint {
                len: metadata.len(),
                modified,
            },
            aliases: Aliases::Absent,
        })
    }

    /// Parse the front-matter aliases of `id` from disk.
    pub fn read_aliases(&self, id: &str) -> Aliases {
        match std::fs::read_to_string(self.path_of(id)) {
            Ok(content) => parse_aliases(&content),
            Err(e) => {
                tracing::debug!("No aliases for {id}: {e}");
                Aliases::Absent
            }
        }
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

fn unix_ms(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp_millis()
}

/// The YAML block between a leading `---` line and the next `---` or `...`.
pub fn front_matter(content: &str) -> Option<&str> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content.split_inclusive('\n');
    if lines.next()?.trim_end() != "---" {
        return None;
    }
    let start = content.find('\n')? + 1;
    let mut offset = start;
    for line in lines {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            return Some(&content[start..offset]);
        }
        offset += line.len();
    }
    None
}

/// Read the alias field from a note's front matter. Anything other than a
/// string or a list is treated as absent; non-string list items are skipped.
pub fn parse_aliases(content: &str) -> Aliases {
    let Some(yaml) = front_matter(content) else {
        return Aliases::Absent;
    };
    let value: serde_yaml::Value = match serde_yaml::from_str(yaml) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("Unparseable front matter: {e}");
            return Aliases::Absent;
        }
    };

    let field = ALIAS_KEYS.iter().find_map(|key| value.get(*key));
    match field {
        Some(serde_yaml::Value::String(alias)) => Aliases::Single(alias.clone()),
        Some(serde_yaml::Value::Sequence(items)) => Aliases::List(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        ),
        _ => Aliases::Absent,
    }
}
