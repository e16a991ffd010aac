//! Run configuration.
//!
//! Loaded from a JSON mapping (the control panel writes `app_config.json`)
//! and immutable for the duration of a harvest. Keys the panel used before
//! the current names (`max_notes`, `use_qwen_filter`, `use_quality_check`)
//! are accepted as aliases.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

pub const DEFAULT_MEDIA_CAP: usize = 18;
pub const DEFAULT_MAX_EMPTY_ATTEMPTS: u32 = 100;

const DEFAULT_PROMPT: &str = "Decide strictly whether this image is a typical six-panel comic: \
one complete image divided into exactly 6 rectangular (or near-rectangular) comic panels, \
usually arranged 2x3 or 3x2, each panel holding its own scene. If any condition fails, it is not. \
Answer with exactly one word and nothing else: yes or no";

/// Which characters count toward the minimum text length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMetric {
    /// CJK unified ideographs (U+4E00..=U+9FA5).
    #[default]
    Cjk,
    /// Any alphanumeric character, in any script.
    Alphanumeric,
}

impl TextMetric {
    pub fn count(self, text: &str) -> usize {
        match self {
            TextMetric::Cjk => text
                .chars()
                .filter(|c| ('\u{4e00}'..='\u{9fa5}').contains(c))
                .count(),
            TextMetric::Alphanumeric => text.chars().filter(|c| c.is_alphanumeric()).count(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Search keyword driving the feed.
    #[serde(alias = "query")]
    pub keyword: String,

    /// Stop once this many records have been committed.
    #[serde(alias = "max_notes", deserialize_with = "lenient::u64")]
    pub target_count: u64,

    #[serde(alias = "use_qwen_filter")]
    pub use_classification_filter: bool,

    /// Enables both the text-length and resolution stages unless overridden.
    #[serde(alias = "use_quality_check")]
    pub use_quality_filter: bool,

    pub use_text_filter: Option<bool>,
    pub use_resolution_filter: Option<bool>,

    #[serde(deserialize_with = "lenient::u32")]
    pub min_resolution: u32,

    #[serde(deserialize_with = "lenient::usize")]
    pub min_text_len: usize,

    pub text_metric: TextMetric,

    #[serde(deserialize_with = "lenient::usize")]
    pub media_cap: usize,

    #[serde(deserialize_with = "lenient::u32")]
    pub max_empty_attempts: u32,

    pub classification_prompt: String,

    /// Token whose presence in the verdict (case-insensitive) means "accept".
    pub affirmative_token: String,

    /// Referer sent with every media request.
    pub referer: String,

    pub fetch_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub classify_timeout_secs: u64,
    pub navigation_timeout_secs: u64,
    pub reveal_pause_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            keyword: String::new(),
            target_count: 10,
            use_classification_filter: false,
            use_quality_filter: false,
            use_text_filter: None,
            use_resolution_filter: None,
            min_resolution: 500,
            min_text_len: 10,
            text_metric: TextMetric::Cjk,
            media_cap: DEFAULT_MEDIA_CAP,
            max_empty_attempts: DEFAULT_MAX_EMPTY_ATTEMPTS,
            classification_prompt: DEFAULT_PROMPT.to_string(),
            affirmative_token: "yes".to_string(),
            referer: "https://www.xiaohongshu.com/".to_string(),
            fetch_timeout_secs: 10,
            probe_timeout_secs: 5,
            classify_timeout_secs: 60,
            navigation_timeout_secs: 8,
            reveal_pause_ms: 2000,
        }
    }
}

impl RunConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let config: RunConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.target_count == 0 {
            return Err(AppError::ConfigError("target_count must be > 0".into()));
        }
        if self.media_cap == 0 {
            return Err(AppError::ConfigError("media_cap must be > 0".into()));
        }
        if self.max_empty_attempts == 0 {
            return Err(AppError::ConfigError(
                "max_empty_attempts must be > 0".into(),
            ));
        }
        if self.use_classification_filter && self.affirmative_token.trim().is_empty() {
            return Err(AppError::ConfigError(
                "affirmative_token must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn text_filter_enabled(&self) -> bool {
        self.use_text_filter.unwrap_or(self.use_quality_filter)
    }

    pub fn resolution_filter_enabled(&self) -> bool {
        self.use_resolution_filter.unwrap_or(self.use_quality_filter)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classify_timeout_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn reveal_pause(&self) -> Duration {
        Duration::from_millis(self.reveal_pause_ms)
    }
}

/// The control panel stores numeric fields as strings (`"max_notes": "10"`),
/// so integers are accepted in either form.
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Str(String),
    }

    fn parse<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match NumOrString::deserialize(d)? {
            NumOrString::Num(n) => Ok(n),
            NumOrString::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("expected an integer, got {s:?}"))),
        }
    }

    pub fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        parse(d)
    }

    pub fn u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        let n = parse(d)?;
        u32::try_from(n).map_err(|_| D::Error::custom(format!("{n} is out of range")))
    }

    pub fn usize<'de, D: Deserializer<'de>>(d: D) -> Result<usize, D::Error> {
        let n = parse(d)?;
        usize::try_from(n).map_err(|_| D::Error::custom(format!("{n} is out of range")))
    }
}
