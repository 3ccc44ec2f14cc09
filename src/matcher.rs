use std::borrow::Cow;

use crate::index::TitleIndex;
use crate::settings::Settings;
use crate::types::{AliasSource, Candidate};

/// Case folding plus prefix or substring test.
///
/// The query is folded once when the matcher is built, not per title.
struct MatchPolicy {
    query: String,
    case_sensitive: bool,
    match_start: bool,
}

impl MatchPolicy {
    fn new(query: &str, settings: &Settings) -> Self {
        Self {
            query: fold(query, settings.case_sensitive).into_owned(),
            case_sensitive: settings.case_sensitive,
            match_start: settings.match_start,
        }
    }

    fn matches(&self, text: &str) -> bool {
        let text = fold(text, self.case_sensitive);
        if self.match_start {
            text.starts_with(&self.query)
        } else {
            text.contains(&self.query)
        }
    }
}

fn fold(text: &str, case_sensitive: bool) -> Cow<'_, str> {
    if case_sensitive {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.to_lowercase())
    }
}

/// Every (title or alias, note) pair matching `query`, in index order.
///
/// Not truncated: ranking has to see the full candidate set before the
/// caller cuts it down to `max_suggestions`.
pub fn find_candidates(
    query: &str,
    index: &TitleIndex,
    aliases: &dyn AliasSource,
    settings: &Settings,
) -> Vec<Candidate> {
    let policy = MatchPolicy::new(query, settings);
    let mut candidates = Vec::new();

    for note in index.iter() {
        if policy.matches(&note.title) {
            candidates.push(Candidate {
                display_text: note.title.clone(),
                target: note.id.clone(),
                is_alias: false,
            });
        }

        if settings.include_aliases {
            let note_aliases = aliases.aliases(&note.id);
            for alias in note_aliases.iter().filter(|a| policy.matches(a)) {
                candidates.push(Candidate {
                    display_text: alias.to_string(),
                    target: note.id.clone(),
                    is_alias: true,
                });
            }
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::types::{Aliases, NoAliases, NoteMetadata};

    struct MapAliases(HashMap<String, Aliases>);

    impl AliasSource for MapAliases {
        fn aliases(&self, id: &str) -> Aliases {
            self.0.get(id).cloned().unwrap_or_default()
        }
    }

    fn index(titles: &[(&str, &str)]) -> TitleIndex {
        TitleIndex::build(
            "md",
            titles.iter().map(|(id, title)| NoteMetadata {
                id: id.to_string(),
                title: title.to_string(),
                created_time: 0,
            }),
        )
    }

    fn displays(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.display_text.as_str()).collect()
    }

    #[test]
    fn substring_match_is_case_insensitive_by_default() {
        let idx = index(&[("a.md", "Rust Ownership"), ("b.md", "Trusty"), ("c.md", "Go")]);
        let found = find_candidates("RUST", &idx, &NoAliases, &Settings::default());
        assert_eq!(displays(&found), vec!["Rust Ownership", "Trusty"]);
    }

    #[test]
    fn start_anchored_mode_requires_prefix() {
        let idx = index(&[("a.md", "Rust Ownership"), ("b.md", "Trusty")]);
        let settings = Settings {
            match_start: true,
            ..Settings::default()
        };
        let found = find_candidates("rust", &idx, &NoAliases, &settings);
        assert_eq!(displays(&found), vec!["Rust Ownership"]);
    }

    #[test]
    fn case_sensitive_mode_skips_folding() {
        let idx = index(&[("a.md", "Rust"), ("b.md", "rusty")]);
        let settings = Settings {
            case_sensitive: true,
            ..Settings::default()
        };
        let found = find_candidates("Rus", &idx, &NoAliases, &settings);
        assert_eq!(displays(&found), vec!["Rust"]);
    }

    #[test]
    fn matching_alias_becomes_its_own_candidate() {
        let idx = index(&[("ai.md", "Artificial Intelligence")]);
        let aliases = MapAliases(HashMap::from([(
            "ai.md".to_string(),
            Aliases::List(vec!["AI".into(), "ML".into()]),
        )]));

        let found = find_candidates("AI", &idx, &aliases, &Settings::default());
        assert!(found.contains(&Candidate {
            display_text: "AI".into(),
            target: "ai.md".into(),
            is_alias: true,
        }));
        assert!(!found.iter().any(|c| c.display_text == "ML"));
    }

    #[test]
    fn aliases_ignored_when_disabled() {
        let idx = index(&[("ai.md", "Artificial Intelligence")]);
        let aliases = MapAliases(HashMap::from([(
            "ai.md".to_string(),
            Aliases::Single("Smart machines".into()),
        )]));
        let settings = Settings {
            include_aliases: false,
            ..Settings::default()
        };
        assert!(find_candidates("smart", &idx, &aliases, &settings).is_empty());
        assert_eq!(
            find_candidates("smart", &idx, &aliases, &Settings::default()).len(),
            1
        );
    }

    #[test]
    fn no_false_positives() {
        let idx = index(&[
            ("1.md", "Alpha"),
            ("2.md", "alphabet soup"),
            ("3.md", "Beta"),
            ("4.md", "ALPINE"),
        ]);
        for settings in [
            Settings::default(),
            Settings {
                match_start: true,
                ..Settings::default()
            },
        ] {
            for candidate in find_candidates("alp", &idx, &NoAliases, &settings) {
                let folded = candidate.display_text.to_lowercase();
                if settings.match_start {
                    assert!(folded.starts_with("alp"));
                } else {
                    assert!(folded.contains("alp"));
                }
            }
        }
    }
}
