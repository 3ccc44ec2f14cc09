use std::cmp::Ordering;

use crate::index::TitleIndex;
use crate::settings::Settings;
use crate::types::{Candidate, NoteMetadata, UsageRecord, DAY_MS};
use crate::usage::UsageStatsStore;

/// Score given to candidates with no usage so the newness boost still has
/// something to multiply.
pub const NEVER_USED_FLOOR: f64 = 0.01;

/// Lowest factor decay can bring a score down to.
pub const DECAY_FLOOR: f64 = 0.5;

/// Normalisation bounds for one ranking pass, computed over the candidates
/// being ranked rather than the whole corpus. Scores from different queries
/// are therefore not comparable.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CorpusMaxima {
    pub max_count: u64,
    pub max_recency: f64,
}

impl CorpusMaxima {
    pub fn compute<'a>(records: impl IntoIterator<Item = Option<&'a UsageRecord>>, now: i64) -> Self {
        records
            .into_iter()
            .flatten()
            .fold(Self::default(), |acc, record| Self {
                max_count: acc.max_count.max(record.count),
                max_recency: record
                    .last_used
                    .map_or(acc.max_recency, |at| acc.max_recency.max(recency_value(now, at))),
            })
    }
}

/// `1 / (elapsed_ms + 1)`; closer to 1 the more recent the selection.
pub fn recency_value(now: i64, last_used: i64) -> f64 {
    1.0 / (elapsed_ms(now, last_used) as f64 + 1.0)
}

/// Never negative, and never overflows on extreme timestamps.
fn elapsed_ms(now: i64, then: i64) -> i64 {
    now.saturating_sub(then).max(0)
}

fn age_days(now: i64, then: i64) -> f64 {
    elapsed_ms(now, then) as f64 / DAY_MS
}

/// Every intermediate factor of a candidate's score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub frequency: f64,
    pub recency: f64,
    pub base: f64,
    pub decay: f64,
    pub effective_base: f64,
    pub newness: f64,
    pub total: f64,
}

pub fn score_breakdown(
    note: Option<&NoteMetadata>,
    usage: Option<&UsageRecord>,
    now: i64,
    maxima: &CorpusMaxima,
    settings: &Settings,
) -> ScoreBreakdown {
    let frequency = match usage {
        Some(record) if maxima.max_count > 0 => record.count as f64 / maxima.max_count as f64,
        _ => 0.0,
    };

    let last_used = usage.and_then(|record| record.last_used);
    let recency = match last_used {
        Some(at) if settings.enable_recency_boost && maxima.max_recency > 0.0 => {
            recency_value(now, at) / maxima.max_recency
        }
        _ => 0.0,
    };

    let base = if settings.enable_recency_boost {
        let w = settings.recency_fraction();
        frequency * (1.0 - w) + recency * w
    } else {
        frequency
    };

    let decay = match last_used {
        Some(at) => {
            let threshold = f64::from(settings.decay_threshold_days);
            let age = age_days(now, at);
            if age <= threshold {
                1.0
            } else {
                1.0 - (1.0 - DECAY_FLOOR) * ((age - threshold) / threshold).min(1.0)
            }
        }
        None => 1.0,
    };

    let effective_base = if base > 0.0 { base } else { NEVER_USED_FLOOR };

    let newness = match note {
        Some(note) if settings.enable_newness_boost => {
            let window = f64::from(settings.newness_boost_days);
            let age = age_days(now, note.created_time);
            if age <= window {
                1.0 + (1.0 - age / window) * settings.newness_boost_strength
            } else {
                1.0
            }
        }
        _ => 1.0,
    };

    ScoreBreakdown {
        frequency,
        recency,
        base,
        decay,
        effective_base,
        newness,
        total: effective_base * decay * newness,
    }
}

/// Sort key for one candidate; higher ranks first.
pub fn score(
    note: Option<&NoteMetadata>,
    usage: Option<&UsageRecord>,
    now: i64,
    maxima: &CorpusMaxima,
    settings: &Settings,
) -> f64 {
    score_breakdown(note, usage, now, maxima, settings).total
}

/// Order `candidates` by descending score. Equal scores keep their input
/// order. Returns the input untouched when usage ranking is disabled.
pub fn rank(
    candidates: Vec<Candidate>,
    index: &TitleIndex,
    usage: &UsageStatsStore,
    now: i64,
    settings: &Settings,
) -> Vec<Candidate> {
    if !settings.use_usage_ranking {
        return candidates;
    }

    let maxima = CorpusMaxima::compute(candidates.iter().map(|c| usage.get(&c.target)), now);
    let mut scored: Vec<(f64, Candidate)> = candidates
        .into_iter()
        .map(|c| {
            let s = score(index.get(&c.target), usage.get(&c.target), now, &maxima, settings);
            (s, c)
        })
        .collect();

    // Vec::sort_by is stable.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored.into_iter().map(|(_, c)| c).collect()
}
