//! Quality advisories on a finished result.
//!
//! Advisories never block a result; they tell the reviewer where the sample
//! is thin or the market is too dispersed for the number to be trusted as-is.

use nmck_core::config::AdvisoryConfig;
use nmck_core::AggregatedResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-fatal note about a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    /// Fewer admitted prices than recommended.
    TooFewPrices { count: u32, minimum: u32 },
    /// Prices come from too few distinct sources.
    FewSources { count: u32, minimum: u32 },
    /// Max is too far above min; analog criteria may need revisiting.
    WideSpread { pct: f64, threshold: f64 },
    /// Minimum price is zero, so percentage spreads are undefined.
    RatioUnavailable,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::TooFewPrices { count, minimum } => {
                write!(f, "only {count} prices used, at least {minimum} recommended")
            }
            Advisory::FewSources { count, minimum } => {
                write!(f, "prices from {count} source(s), at least {minimum} recommended")
            }
            Advisory::WideSpread { pct, threshold } => {
                write!(f, "max exceeds min by {pct:.1}% (threshold {threshold:.1}%)")
            }
            Advisory::RatioUnavailable => write!(f, "minimum price is zero; spread ratios unavailable"),
        }
    }
}

/// Collect advisories for a result built from `source_count` distinct sources.
pub fn assess(result: &AggregatedResult, source_count: usize, config: &AdvisoryConfig) -> Vec<Advisory> {
    let mut notes = Vec::new();

    if result.prices_total_count < config.min_prices {
        notes.push(Advisory::TooFewPrices {
            count: result.prices_total_count,
            minimum: config.min_prices,
        });
    }

    let sources = source_count as u32;
    if sources < config.min_sources {
        notes.push(Advisory::FewSources {
            count: sources,
            minimum: config.min_sources,
        });
    }

    match result.max_over_min_pct {
        Some(pct) if pct > config.wide_spread_pct => notes.push(Advisory::WideSpread {
            pct,
            threshold: config.wide_spread_pct,
        }),
        Some(_) => {}
        None => notes.push(Advisory::RatioUnavailable),
    }

    notes
}
