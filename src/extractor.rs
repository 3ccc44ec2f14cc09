use crate::types::TriggerInfo;

pub const LINK_OPEN: &str = "[[";
pub const LINK_CLOSE: &str = "]]";

/// Decide whether the cursor at `column` (a character offset) on `text`
/// should open the suggestion list, and extract the token to replace.
///
/// The token is the run of non-whitespace characters immediately left of the
/// cursor. Triggering is suppressed for tokens shorter than
/// `min_trigger_length` and whenever the line prefix holds more link openers
/// than closers.
pub fn extract_trigger(
    line: usize,
    text: &str,
    column: usize,
    min_trigger_length: usize,
) -> Option<TriggerInfo> {
    let chars: Vec<char> = text.chars().collect();
    let end = column.min(chars.len());

    let start = chars[..end]
        .iter()
        .rposition(|c| c.is_whitespace())
        .map_or(0, |pos| pos + 1);
    let token_len = end - start;
    if token_len == 0 || token_len < min_trigger_length {
        return None;
    }

    let prefix: String = chars[..end].iter().collect();
    if inside_open_link(&prefix) {
        return None;
    }

    Some(TriggerInfo {
        line,
        start,
        end,
        query: chars[start..end].iter().collect(),
    })
}

/// True if `prefix` leaves a link token unterminated.
pub fn inside_open_link(prefix: &str) -> bool {
    prefix.matches(LINK_OPEN).count() > prefix.matches(LINK_CLOSE).count()
}

/// The literal text inserted for a selected suggestion.
pub fn link_token(display_text: &str) -> String {
    format!("{LINK_OPEN}{display_text}{LINK_CLOSE}")
}
