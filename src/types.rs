use serde::{Deserialize, Serialize};

/// Stable key for a note: its path relative to the vault root, `/`-separated.
pub type NoteId = String;

/// Milliseconds per day, used to turn timestamp differences into ages.
pub const DAY_MS: f64 = 86_400_000.0;

/// Lightweight note metadata held by the title index.
/// Body is never stored; parsed aliases are cached beside it in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteMetadata {
    pub id: NoteId,
    pub title: String,
    pub created_time: i64, // Unix timestamp in ms
}

/// One proposed suggestion: the text to insert and the note it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub display_text: String,
    pub target: NoteId,
    /// True when `display_text` came from the note's aliases rather than its title.
    pub is_alias: bool,
}

/// Result of a successful trigger: the token under the cursor and where it sits.
/// Columns are character offsets on `line`; `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerInfo {
    pub line: usize,
    pub start: usize,
    pub end: usize,
    pub query: String,
}

/// Per-note selection statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub count: u64,
    #[serde(rename = "lastUsed", default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>, // Unix timestamp in ms
}

/// A change in the note corpus, delivered in order to the index maintainer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusEvent {
    Created(NoteMetadata),
    Renamed { old_id: NoteId, note: NoteMetadata },
    Deleted(NoteId),
    /// The note's front-matter aliases were parsed anew.
    AliasesChanged { id: NoteId, aliases: Aliases },
}

/// The front-matter alias field as the corpus reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Aliases {
    #[default]
    Absent,
    Single(String),
    List(Vec<String>),
}

impl Aliases {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let items: &[String] = match self {
            Aliases::Absent => &[],
            Aliases::Single(alias) => std::slice::from_ref(alias),
            Aliases::List(list) => list,
        };
        items.iter().map(String::as_str)
    }
}

/// Front-matter accessor consulted by the matcher on every query, so
/// implementations must answer from memory. They degrade to
/// `Aliases::Absent` instead of failing.
pub trait AliasSource: Send + Sync {
    fn aliases(&self, id: &str) -> Aliases;
}

/// An alias source for corpora without front matter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAliases;

impl AliasSource for NoAliases {
    fn aliases(&self, _id: &str) -> Aliases {
        Aliases::Absent
    }
}
