//! Configuration structures for the NMCK pricing system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Statistics configuration.
    pub aggregation: AggregationConfig,
    /// Request lifecycle configuration.
    pub lifecycle: LifecycleConfig,
    /// Result quality advisories.
    pub advisory: AdvisoryConfig,
    /// Storage configuration.
    pub store: StoreConfig,
    /// Mock analog matcher configuration.
    pub matcher: MatcherConfig,
}

impl Config {
    /// Parse a (possibly partial) JSON document over the defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a (possibly partial) JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Reject values the rest of the system cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.advisory.wide_spread_pct < 0.0 || !self.advisory.wide_spread_pct.is_finite() {
            return Err(Error::config("advisory.wide_spread_pct must be a non-negative number"));
        }
        if self.matcher.analogs_per_request == 0 {
            return Err(Error::config("matcher.analogs_per_request must be at least 1"));
        }
        if !(self.matcher.price_floor >= 0.0 && self.matcher.price_floor.is_finite()) {
            return Err(Error::config("matcher.price_floor must be a non-negative number"));
        }
        if !(self.matcher.price_span >= 1.0 && self.matcher.price_span.is_finite()) {
            return Err(Error::config("matcher.price_span must be at least 1"));
        }
        if self.matcher.currency.trim().is_empty() {
            return Err(Error::config("matcher.currency must not be empty"));
        }
        Ok(())
    }
}

/// Rule for the median of an even number of prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedianRule {
    /// Mean of the two central values.
    #[default]
    Interpolated,
    /// The upper of the two central values (element at `floor(n / 2)`).
    UpperMiddle,
}

/// Statistics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Median rule for even-sized price sets.
    pub median_rule: MedianRule,
    /// Extra attempts when the store reports a concurrent writer.
    pub write_retries: u32,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            median_rule: MedianRule::Interpolated,
            write_retries: 3,
        }
    }
}

/// What the first aggregation does to status when no prices are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsufficientDataPolicy {
    /// Stay in `draft`; a result exists iff status is calculated/approved.
    #[default]
    KeepDraft,
    /// Move to `calculated` without a result attached.
    MarkCalculated,
}

/// Request lifecycle configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub insufficient_data: InsufficientDataPolicy,
}

/// Thresholds for non-fatal quality notes on a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisoryConfig {
    /// Fewer admitted prices than this is flagged.
    pub min_prices: u32,
    /// Fewer distinct sources than this is flagged.
    pub min_sources: u32,
    /// `max_over_min_pct` above this is flagged.
    pub wide_spread_pct: f64,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            min_prices: 3,
            min_sources: 2,
            wide_spread_pct: 50.0,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. In-memory when absent.
    pub path: Option<PathBuf>,
    /// How long a writer waits on a locked database (ms).
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Mock analog matcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Analogs produced per request.
    pub analogs_per_request: u32,
    /// Active sources each analog is priced on.
    pub sources_per_analog: u32,
    /// Lowest generated price.
    pub price_floor: f64,
    /// Width of the generated price range.
    pub price_span: f64,
    /// Currency of generated prices.
    pub currency: String,
    /// RNG seed; identical seeds give identical prices.
    pub seed: u64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            analogs_per_request: 3,
            sources_per_analog: 2,
            price_floor: 10_000.0,
            price_span: 5_000.0,
            currency: "RUB".to_string(),
            seed: 42,
        }
    }
}
