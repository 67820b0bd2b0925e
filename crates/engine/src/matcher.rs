//! Analog matching seam.
//!
//! Real matching against external catalogs lives outside this workspace; the
//! service only needs something that turns a request into analogs with
//! prices. [`MockMatcher`] fills that role with reproducible data.

use chrono::Utc;
use nmck_core::config::MatcherConfig;
use nmck_core::{Characteristic, MatchedAnalog, NewAnalog, NewPrice, Request, Result, Source};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};

/// Produces candidate analogs and their observed prices for a request.
pub trait AnalogMatcher {
    /// Match analogs for `request`, pricing them only on `sources`.
    fn match_analogs(
        &self,
        request: &Request,
        characteristics: &[Characteristic],
        sources: &[Source],
    ) -> Result<Vec<MatchedAnalog>>;
}

/// Seeded stand-in matcher.
///
/// Produces `analogs_per_request` analogs, each priced on the first
/// `sources_per_analog` sources with whole amounts in
/// `[price_floor, price_floor + price_span)`.
pub struct MockMatcher {
    config: MatcherConfig,
}

impl MockMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    fn params(request: &Request, characteristics: &[Characteristic]) -> Value {
        let mut map = Map::new();
        for c in characteristics {
            map.insert(c.name.clone(), Value::String(c.value.clone()));
        }
        map.insert(
            "search_mode".to_string(),
            Value::String(request.search_mode.as_str().to_string()),
        );
        Value::Object(map)
    }
}

impl Default for MockMatcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

impl AnalogMatcher for MockMatcher {
    fn match_analogs(
        &self,
        request: &Request,
        characteristics: &[Characteristic],
        sources: &[Source],
    ) -> Result<Vec<MatchedAnalog>> {
        // Same seed and request id always give the same prices.
        let mut rng = StdRng::seed_from_u64(self.config.seed ^ request.id.0 as u64);
        let span = (self.config.price_span.floor() as u64).max(1);
        let params = Self::params(request, characteristics);
        let collected_at = Utc::now();

        let analogs = (0..self.config.analogs_per_request)
            .map(|i| {
                let prices = sources
                    .iter()
                    .take(self.config.sources_per_analog as usize)
                    .map(|source| NewPrice {
                        amount: self.config.price_floor.floor() + rng.gen_range(0..span) as f64,
                        currency: self.config.currency.clone(),
                        source_name: source.name.clone(),
                        source_url: None,
                        source_id: Some(source.id),
                        collected_at,
                    })
                    .collect();

                MatchedAnalog {
                    analog: NewAnalog {
                        name: format!("{} (analog {})", request.title, i + 1),
                        supplier_or_brand: Some(format!("Supplier {}", (b'A' + (i % 26) as u8) as char)),
                        normalized_params: Some(params.clone()),
                        matched_by: "mock".to_string(),
                    },
                    prices,
                }
            })
            .collect();

        Ok(analogs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmck_core::{RequestId, RequestStatus, SearchMode, SourceId};

    fn request(id: i64) -> Request {
        Request {
            id: RequestId(id),
            title: "Costume".to_string(),
            unit: "pcs".to_string(),
            quantity: 1,
            description: String::new(),
            category: None,
            search_mode: SearchMode::Strict,
            status: RequestStatus::Draft,
            source_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sources(n: i64) -> Vec<Source> {
        (1..=n)
            .map(|i| Source {
                id: SourceId(i),
                name: format!("Source {i}"),
                kind: "marketplace".to_string(),
                is_active: true,
            })
            .collect()
    }

    fn amounts(analogs: &[MatchedAnalog]) -> Vec<f64> {
        analogs
            .iter()
            .flat_map(|a| a.prices.iter().map(|p| p.amount))
            .collect()
    }

    #[test]
    fn test_shape_and_range() {
        let matcher = MockMatcher::default();
        let chars = [Characteristic::new("size", "128")];
        let analogs = matcher.match_analogs(&request(1), &chars, &sources(3)).unwrap();

        assert_eq!(analogs.len(), 3);
        for a in &analogs {
            assert_eq!(a.prices.len(), 2);
            assert_eq!(a.analog.matched_by, "mock");
            assert_eq!(a.analog.normalized_params.as_ref().unwrap()["size"], "128");
            for p in &a.prices {
                assert!(p.amount >= 10_000.0 && p.amount < 15_000.0);
                assert_eq!(p.amount.fract(), 0.0);
                assert_eq!(p.currency, "RUB");
            }
        }
        assert_eq!(analogs[1].analog.supplier_or_brand.as_deref(), Some("Supplier B"));
    }

    #[test]
    fn test_deterministic_per_request() {
        let matcher = MockMatcher::default();
        let a = matcher.match_analogs(&request(7), &[], &sources(2)).unwrap();
        let b = matcher.match_analogs(&request(7), &[], &sources(2)).unwrap();
        assert_eq!(amounts(&a), amounts(&b));
    }

    #[test]
    fn test_no_sources_means_no_prices() {
        let analogs = MockMatcher::default()
            .match_analogs(&request(1), &[], &[])
            .unwrap();
        assert_eq!(analogs.len(), 3);
        assert!(amounts(&analogs).is_empty());
    }
}
