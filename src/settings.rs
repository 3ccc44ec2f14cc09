use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted `recencyWeight`.
pub const MAX_RECENCY_WEIGHT: u32 = 100;
/// Accepted `newnessBoostStrength` range.
pub const MIN_BOOST_STRENGTH: f64 = 0.0;
pub const MAX_BOOST_STRENGTH: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("{field} must be at most {max}, got {value}")]
    AboveMax {
        field: &'static str,
        max: u32,
        value: u32,
    },

    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
}

/// Suggestion settings. Immutable for the duration of a query; every write
/// goes through [`Settings::apply`] so the scoring code never sees an
/// out-of-range value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub min_trigger_length: usize,
    pub max_suggestions: usize,
    pub include_aliases: bool,
    pub match_start: bool,
    pub case_sensitive: bool,
    pub use_usage_ranking: bool,
    pub enable_recency_boost: bool,
    pub recency_weight: u32,
    pub decay_threshold_days: u32,
    pub enable_newness_boost: bool,
    pub newness_boost_days: u32,
    pub newness_boost_strength: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_trigger_length: 3,
            max_suggestions: 10,
            include_aliases: true,
            match_start: false,
            case_sensitive: false,
            use_usage_ranking: true,
            enable_recency_boost: true,
            recency_weight: 30,
            decay_threshold_days: 30,
            enable_newness_boost: true,
            newness_boost_days: 7,
            newness_boost_strength: 0.5,
        }
    }
}

/// A single settings write coming from the host's settings form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingUpdate {
    MinTriggerLength(usize),
    MaxSuggestions(usize),
    IncludeAliases(bool),
    MatchStart(bool),
    CaseSensitive(bool),
    UseUsageRanking(bool),
    EnableRecencyBoost(bool),
    RecencyWeight(u32),
    DecayThresholdDays(u32),
    EnableNewnessBoost(bool),
    NewnessBoostDays(u32),
    NewnessBoostStrength(f64),
}

impl SettingUpdate {
    /// Check the value against its documented range without applying it.
    pub fn validate(&self) -> Result<(), SettingsError> {
        match *self {
            SettingUpdate::MinTriggerLength(v) => positive("minTriggerLength", v as u64),
            SettingUpdate::MaxSuggestions(v) => positive("maxSuggestions", v as u64),
            SettingUpdate::DecayThresholdDays(v) => positive("decayThresholdDays", v as u64),
            SettingUpdate::NewnessBoostDays(v) => positive("newnessBoostDays", v as u64),
            SettingUpdate::RecencyWeight(v) if v > MAX_RECENCY_WEIGHT => {
                Err(SettingsError::AboveMax {
                    field: "recencyWeight",
                    max: MAX_RECENCY_WEIGHT,
                    value: v,
                })
            }
            // NaN fails the range check too.
            SettingUpdate::NewnessBoostStrength(v)
                if !(MIN_BOOST_STRENGTH..=MAX_BOOST_STRENGTH).contains(&v) =>
            {
                Err(SettingsError::OutOfRange {
                    field: "newnessBoostStrength",
                    min: MIN_BOOST_STRENGTH,
                    max: MAX_BOOST_STRENGTH,
                    value: v,
                })
            }
            _ => Ok(()),
        }
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), SettingsError> {
    if value == 0 {
        Err(SettingsError::NotPositive { field })
    } else {
        Ok(())
    }
}

impl Settings {
    /// Validate and apply one write. On error the prior value is retained.
    pub fn apply(&mut self, update: SettingUpdate) -> Result<(), SettingsError> {
        update.validate()?;
        match update {
            SettingUpdate::MinTriggerLength(v) => self.min_trigger_length = v,
            SettingUpdate::MaxSuggestions(v) => self.max_suggestions = v,
            SettingUpdate::IncludeAliases(v) => self.include_aliases = v,
            SettingUpdate::MatchStart(v) => self.match_start = v,
            SettingUpdate::CaseSensitive(v) => self.case_sensitive = v,
            SettingUpdate::UseUsageRanking(v) => self.use_usage_ranking = v,
            SettingUpdate::EnableRecencyBoost(v) => self.enable_recency_boost = v,
            SettingUpdate::RecencyWeight(v) => self.recency_weight = v,
            SettingUpdate::DecayThresholdDays(v) => self.decay_threshold_days = v,
            SettingUpdate::EnableNewnessBoost(v) => self.enable_newness_boost = v,
            SettingUpdate::NewnessBoostDays(v) => self.newness_boost_days = v,
            SettingUpdate::NewnessBoostStrength(v) => self.newness_boost_strength = v,
        }
        Ok(())
    }

    /// Replace any out-of-range field with its default. Used after loading a
    /// persisted blob, which bypasses `apply`.
    pub fn sanitized(self) -> Self {
        let mut clean = Settings::default();
        let updates = [
            SettingUpdate::MinTriggerLength(self.min_trigger_length),
            SettingUpdate::MaxSuggestions(self.max_suggestions),
            SettingUpdate::IncludeAliases(self.include_aliases),
            SettingUpdate::MatchStart(self.match_start),
            SettingUpdate::CaseSensitive(self.case_sensitive),
            SettingUpdate::UseUsageRanking(self.use_usage_ranking),
            SettingUpdate::EnableRecencyBoost(self.enable_recency_boost),
            SettingUpdate::RecencyWeight(self.recency_weight),
            SettingUpdate::DecayThresholdDays(self.decay_threshold_days),
            SettingUpdate::EnableNewnessBoost(self.enable_newness_boost),
            SettingUpdate::NewnessBoostDays(self.newness_boost_days),
            SettingUpdate::NewnessBoostStrength(self.newness_boost_strength),
        ];
        for update in updates {
            if let Err(e) = clean.apply(update) {
                tracing::warn!("Persisted setting rejected, using default: {e}");
            }
        }
        clean
    }

    /// Recency weight as a fraction in [0, 1].
    pub fn recency_fraction(&self) -> f64 {
        f64::from(self.recency_weight) / 100.0
    }
}
