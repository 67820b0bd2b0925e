//! Aggregated price summary.
//!
//! Turns the admitted prices of one request into the full statistic set:
//! extrema, mean, median, P10/P90, the recommended price and spread ratios.

use nmck_core::config::{AggregationConfig, MedianRule};
use nmck_core::{AggregatedResult, Error, RequestId, Result};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::debug;

use crate::outlier::{OutlierFilter, PercentileWindow};
use crate::percentile::{median, sorted};

/// Statistic set for one price sample, not yet tied to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub p10: f64,
    pub p90: f64,
    pub recommended: f64,
    pub max_over_min_abs: f64,
    pub max_over_min_pct: Option<f64>,
    pub avg_over_min_abs: f64,
    pub avg_over_min_pct: Option<f64>,
    pub used_count: u32,
    pub total_count: u32,
}

impl PriceSummary {
    /// Attach the summary to a request.
    pub fn into_result(self, request_id: RequestId) -> AggregatedResult {
        AggregatedResult {
            request_id,
            min_price: self.min,
            max_price: self.max,
            avg_price: self.avg,
            median_price: self.median,
            p10_price: self.p10,
            p90_price: self.p90,
            recommended_nmck: self.recommended,
            max_over_min_abs: self.max_over_min_abs,
            max_over_min_pct: self.max_over_min_pct,
            avg_over_min_abs: self.avg_over_min_abs,
            avg_over_min_pct: self.avg_over_min_pct,
            prices_used_count: self.used_count,
            prices_total_count: self.total_count,
        }
    }
}

/// `(value / min - 1) * 100`, or `None` when the ratio is undefined.
#[inline]
pub fn pct_over_min(value: f64, min: f64) -> Option<f64> {
    if min > 0.0 {
        Some((value / min - 1.0) * 100.0)
    } else {
        None
    }
}

/// Statistics engine.
pub struct StatisticsEngine<F = PercentileWindow> {
    median_rule: MedianRule,
    filter: F,
}

impl StatisticsEngine<PercentileWindow> {
    /// Create an engine with the P10-P90 window.
    pub fn new(config: &AggregationConfig) -> Self {
        Self::with_filter(config.median_rule, PercentileWindow::default())
    }
}

impl Default for StatisticsEngine<PercentileWindow> {
    fn default() -> Self {
        Self::new(&AggregationConfig::default())
    }
}

impl<F: OutlierFilter> StatisticsEngine<F> {
    /// Create an engine with a custom outlier policy.
    pub fn with_filter(median_rule: MedianRule, filter: F) -> Self {
        Self {
            median_rule,
            filter,
        }
    }

    /// Compute the summary of admitted price amounts (input order is irrelevant).
    ///
    /// Empty input is `InsufficientData`; negative or non-finite amounts are
    /// `Data` errors.
    pub fn compute(&self, amounts: &[f64]) -> Result<PriceSummary> {
        if amounts.is_empty() {
            return Err(Error::insufficient_data("no admitted prices"));
        }
        if let Some(bad) = amounts.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(Error::data(format!("price amount {bad} is not a non-negative number")));
        }

        let prices = sorted(amounts);
        let min = prices[0];
        let max = prices[prices.len() - 1];
        // Summing in sorted order keeps the mean independent of fetch order.
        let avg = prices.iter().mean();
        let median = median(&prices, self.median_rule)
            .ok_or_else(|| Error::insufficient_data("no admitted prices"))?;

        let partition = self
            .filter
            .partition(&prices)
            .ok_or_else(|| Error::insufficient_data("no admitted prices"))?;
        if partition.used.is_empty() {
            return Err(Error::insufficient_data("no prices inside the percentile window"));
        }
        let recommended = partition.used.iter().mean().round();

        debug!(
            total = prices.len(),
            used = partition.used.len(),
            p10 = partition.lower,
            p90 = partition.upper,
            recommended,
            "computed price summary"
        );

        Ok(PriceSummary {
            min,
            max,
            avg,
            median,
            p10: partition.lower,
            p90: partition.upper,
            recommended,
            max_over_min_abs: max - min,
            max_over_min_pct: pct_over_min(max, min),
            avg_over_min_abs: avg - min,
            avg_over_min_pct: pct_over_min(avg, min),
            used_count: partition.used.len() as u32,
            total_count: prices.len() as u32,
        })
    }
}
