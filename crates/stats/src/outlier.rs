//! Outlier filtering for the recommended price.
//!
//! The filter only decides which prices feed the recommendation. Extremes are
//! still reported through min/max/mean/median.

use crate::percentile::{nearest_rank, P10, P90};

/// Split of an ascending price set into used and rejected values.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Lower window bound (inclusive).
    pub lower: f64,
    /// Upper window bound (inclusive).
    pub upper: f64,
    /// Values inside the window, ascending.
    pub used: Vec<f64>,
    /// Values outside the window, ascending.
    pub excluded: Vec<f64>,
}

/// Policy deciding which prices the recommendation admits.
pub trait OutlierFilter {
    /// Partition an ascending, non-empty sequence. `None` for empty input.
    fn partition(&self, sorted: &[f64]) -> Option<Partition>;
}

/// Keep values within `[P_lower, P_upper]`, both bounds inclusive.
#[derive(Debug, Clone, Copy)]
pub struct PercentileWindow {
    lower_fraction: f64,
    upper_fraction: f64,
}

impl PercentileWindow {
    /// Window between two rank fractions.
    pub fn new(lower_fraction: f64, upper_fraction: f64) -> Self {
        Self {
            lower_fraction,
            upper_fraction,
        }
    }
}

impl Default for PercentileWindow {
    fn default() -> Self {
        Self::new(P10, P90)
    }
}

impl OutlierFilter for PercentileWindow {
    fn partition(&self, sorted: &[f64]) -> Option<Partition> {
        let lower = nearest_rank(sorted, self.lower_fraction)?;
        let upper = nearest_rank(sorted, self.upper_fraction)?;

        let (used, excluded): (Vec<f64>, Vec<f64>) = sorted
            .iter()
            .copied()
            .partition(|p| *p >= lower && *p <= upper);

        Some(Partition {
            lower,
            upper,
            used,
            excluded,
        })
    }
}
