use std::sync::Arc;

use crate::extractor::{extract_trigger, link_token};
use crate::matcher::find_candidates;
use crate::scoring::rank;
use crate::settings::{SettingUpdate, Settings, SettingsError};
use crate::types::{Candidate, TriggerInfo};
use crate::SuggestMutex;

/// The host editor's text buffer, as far as suggestions need it.
/// Columns are character offsets.
pub trait Editor {
    fn line_text(&self, line: usize) -> Option<String>;
    fn replace_range(&mut self, line: usize, start: usize, end: usize, text: &str);
    fn set_cursor(&mut self, line: usize, column: usize);
}

/// Plain in-memory buffer implementing [`Editor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBuffer {
    pub lines: Vec<String>,
    pub cursor: (usize, usize),
}

impl TextBuffer {
    pub fn new(text: &str) -> Self {
        Self {
            lines: text.split('\n').map(str::to_string).collect(),
            cursor: (0, 0),
        }
    }
}

fn byte_offset(text: &str, column: usize) -> usize {
    text.char_indices()
        .nth(column)
        .map_or(text.len(), |(offset, _)| offset)
}

impl Editor for TextBuffer {
    fn line_text(&self, line: usize) -> Option<String> {
        self.lines.get(line).cloned()
    }

    fn replace_range(&mut self, line: usize, start: usize, end: usize, text: &str) {
        if let Some(current) = self.lines.get_mut(line) {
            let from = byte_offset(current, start);
            let to = byte_offset(current, end.max(start));
            current.replace_range(from..to, text);
        }
    }

    fn set_cursor(&mut self, line: usize, column: usize) {
        self.cursor = (line, column);
    }
}

/// Trigger, suggest, render and select, composed over the shared state.
///
/// Cheap to clone. Each call takes the state lock once, so index
/// maintenance can only land between calls, never inside a ranking pass.
/// Nothing done under the lock touches the disk.
#[derive(Clone)]
pub struct LinkSuggester {
    state: Arc<SuggestMutex>,
}

impl LinkSuggester {
    pub fn new(state: Arc<SuggestMutex>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<SuggestMutex> {
        &self.state
    }

    /// Re-evaluated on every cursor or content change.
    pub async fn on_trigger(&self, editor: &dyn Editor, line: usize, column: usize) -> Option<TriggerInfo> {
        let min_len = self.state.lock().await.settings.min_trigger_length;
        let text = editor.line_text(line)?;
        extract_trigger(line, &text, column, min_len)
    }

    /// Ranked, truncated suggestions for `query` as of now.
    pub async fn get_suggestions(&self, query: &str) -> Vec<Candidate> {
        self.get_suggestions_at(query, chrono::Utc::now().timestamp_millis())
            .await
    }

    pub async fn get_suggestions_at(&self, query: &str, now: i64) -> Vec<Candidate> {
        let s = self.state.lock().await;
        let candidates = find_candidates(query, &s.index, &s.index, &s.settings);
        let matched = candidates.len();
        let mut ranked = rank(candidates, &s.index, &s.usage, now, &s.settings);
        ranked.truncate(s.settings.max_suggestions);
        tracing::debug!(matched, returned = ranked.len(), "suggestions");
        ranked
    }

    /// Display row for a candidate. Alias rows name the note they point to.
    pub async fn render(&self, candidate: &Candidate) -> String {
        if !candidate.is_alias {
            return candidate.display_text.clone();
        }
        let s = self.state.lock().await;
        match s.index.get(&candidate.target) {
            Some(note) => format!("{} → {}", candidate.display_text, note.title),
            None => candidate.display_text.clone(),
        }
    }

    /// Replace the trigger span with a link to `candidate`, move the cursor
    /// after it and count the selection when usage ranking is on.
    pub async fn on_select(&self, editor: &mut dyn Editor, trigger: &TriggerInfo, candidate: &Candidate) {
        let token = link_token(&candidate.display_text);
        editor.replace_range(trigger.line, trigger.start, trigger.end, &token);
        editor.set_cursor(trigger.line, trigger.start + token.chars().count());

        let mut s = self.state.lock().await;
        if s.settings.use_usage_ranking {
            let record = s.usage.record_selection(&candidate.target);
            tracing::debug!(target_note = %candidate.target, count = record.count, "selection recorded");
        }
    }

    pub async fn settings(&self) -> Settings {
        self.state.lock().await.settings.clone()
    }

    /// Validate and apply one settings write, persisting on success.
    pub async fn update_setting(&self, update: SettingUpdate) -> Result<(), SettingsError> {
        let mut s = self.state.lock().await;
        s.update_setting(update)
    }
}
