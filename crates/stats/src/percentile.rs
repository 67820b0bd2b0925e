//! Order statistics over a price set.
//!
//! Percentiles use the nearest-rank method on the ascending sequence:
//! `index = floor(n * fraction)`, clamped to `[0, n - 1]`.

use nmck_core::config::MedianRule;
use ordered_float::OrderedFloat;

/// Rank fraction of the lower bound of the outlier window.
pub const P10: f64 = 0.10;
/// Rank fraction of the upper bound of the outlier window.
pub const P90: f64 = 0.90;

/// Return the values in ascending order.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut keyed: Vec<OrderedFloat<f64>> = values.iter().copied().map(OrderedFloat).collect();
    keyed.sort();
    keyed.into_iter().map(|v| v.0).collect()
}

/// Index of the nearest-rank percentile in a sequence of length `n`.
#[inline]
pub fn rank_index(n: usize, fraction: f64) -> Option<usize> {
    if n == 0 {
        return None;
    }
    // Negative products saturate to 0 on the cast.
    let idx = (n as f64 * fraction).floor() as usize;
    Some(idx.min(n - 1))
}

/// Nearest-rank percentile of an ascending sequence.
pub fn nearest_rank(sorted: &[f64], fraction: f64) -> Option<f64> {
    rank_index(sorted.len(), fraction).map(|i| sorted[i])
}

/// Median of an ascending sequence under the given rule.
pub fn median(sorted: &[f64], rule: MedianRule) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    if n % 2 == 1 {
        return Some(sorted[mid]);
    }
    match rule {
        MedianRule::Interpolated => Some((sorted[mid - 1] + sorted[mid]) / 2.0),
        MedianRule::UpperMiddle => Some(sorted[mid]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted() {
        assert_eq!(sorted(&[3.0, 1.0, 2.0]), vec![1.0, 2.0, 3.0]);
        assert!(sorted(&[]).is_empty());
    }

    #[test]
    fn test_rank_index_clamps() {
        assert_eq!(rank_index(0, 0.5), None);
        assert_eq!(rank_index(9, P10), Some(0));
        assert_eq!(rank_index(9, P90), Some(8));
        assert_eq!(rank_index(10, P10), Some(1));
        assert_eq!(rank_index(10, P90), Some(9));
        assert_eq!(rank_index(3, 1.0), Some(2));
        assert_eq!(rank_index(3, -0.5), Some(0));
    }

    #[test]
    fn test_nearest_rank_single_value() {
        assert_eq!(nearest_rank(&[42.0], P10), Some(42.0));
        assert_eq!(nearest_rank(&[42.0], P90), Some(42.0));
        assert_eq!(nearest_rank(&[], P90), None);
    }

    #[test]
    fn test_median_odd() {
        let values = [1.0, 2.0, 7.0];
        assert_eq!(median(&values, MedianRule::Interpolated), Some(2.0));
        assert_eq!(median(&values, MedianRule::UpperMiddle), Some(2.0));
    }

    #[test]
    fn test_median_even_rules_differ() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(median(&values, MedianRule::Interpolated), Some(25.0));
        assert_eq!(median(&values, MedianRule::UpperMiddle), Some(30.0));
    }

    #[test]
    fn test_median_empty() {
        assert_eq!(median(&[], MedianRule::Interpolated), None);
    }
}
