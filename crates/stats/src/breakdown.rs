//! Per-source breakdown of admitted prices.

use nmck_core::PriceObservation;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Price range seen on one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source_name: String,
    pub count: u32,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

/// Group observations by source name, ordered by name.
pub fn breakdown(observations: &[PriceObservation]) -> Vec<SourceSummary> {
    let mut by_source: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for obs in observations {
        by_source
            .entry(obs.source_name.as_str())
            .or_default()
            .push(obs.amount);
    }

    by_source
        .into_iter()
        .map(|(name, amounts)| {
            SourceSummary {
                source_name: name.to_string(),
                count: amounts.len() as u32,
                min: Statistics::min(amounts.iter()),
                avg: amounts.iter().mean(),
                max: Statistics::max(amounts.iter()),
            }
        })
        .collect()
}

/// Number of distinct sources among the observations.
pub fn distinct_sources(observations: &[PriceObservation]) -> usize {
    let mut names: Vec<&str> = observations.iter().map(|o| o.source_name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    names.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nmck_core::PriceId;

    fn obs(id: i64, source: &str, amount: f64) -> PriceObservation {
        PriceObservation {
            price_id: PriceId(id),
            amount,
            currency: "RUB".to_string(),
            source_name: source.to_string(),
        }
    }

    #[test]
    fn test_groups_by_source() {
        let observations = vec![
            obs(1, "Marketplace B", 15000.0),
            obs(2, "Marketplace A", 13500.0),
            obs(3, "Marketplace A", 14200.0),
            obs(4, "Marketplace B", 14800.0),
        ];
        let rows = breakdown(&observations);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].source_name, "Marketplace A");
        assert_eq!(rows[0].count, 2);
        assert_eq!(rows[0].min, 13500.0);
        assert_eq!(rows[0].max, 14200.0);
        assert_relative_eq!(rows[0].avg, 13850.0);

        assert_eq!(rows[1].source_name, "Marketplace B");
        assert_relative_eq!(rows[1].avg, 14900.0);
    }

    #[test]
    fn test_single_source_matches_engine() {
        let amounts = [10000.0, 12000.0, 12500.0, 14000.0, 14800.0];
        let observations: Vec<_> = amounts
            .iter()
            .enumerate()
            .map(|(i, a)| obs(i as i64, "Marketplace A", *a))
            .collect();
        let row = &breakdown(&observations)[0];
        let summary = crate::StatisticsEngine::default().compute(&amounts).unwrap();

        assert_eq!(row.count, summary.total_count);
        assert_eq!(row.min, summary.min);
        assert_eq!(row.max, summary.max);
        assert_eq!(row.avg, summary.avg);
    }

    #[test]
    fn test_empty() {
        assert!(breakdown(&[]).is_empty());
        assert_eq!(distinct_sources(&[]), 0);
    }

    #[test]
    fn test_distinct_sources() {
        let observations = vec![obs(1, "A", 1.0), obs(2, "B", 2.0), obs(3, "A", 3.0)];
        assert_eq!(distinct_sources(&observations), 2);
    }
}
