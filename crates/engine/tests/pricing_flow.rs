//! End-to-end pricing flows over an in-memory SQLite store.

use std::cell::Cell;
use std::sync::Arc;
use std::thread;

use approx::assert_relative_eq;
use chrono::Utc;
use nmck_core::config::InsufficientDataPolicy;
use nmck_core::{
    AggregatedResult, AnalogWithPrices, Characteristic, Config, Error, MatchedAnalog, NewAnalog,
    NewPrice, PriceId, PriceObservation, Request, RequestDraft, RequestId, RequestStatus, Result,
    SearchMode, Source, SourceId,
};
use nmck_engine::{AnalogMatcher, NmckService};
use nmck_store::{
    PriceStore, Replaced, RequestRepository, ResultStore, SourceRepository, SqliteStore,
};

/// Matcher that returns one analog per amount list, priced on the first source.
struct FixedMatcher {
    analogs: Vec<Vec<f64>>,
}

impl AnalogMatcher for FixedMatcher {
    fn match_analogs(
        &self,
        request: &Request,
        _characteristics: &[Characteristic],
        sources: &[Source],
    ) -> Result<Vec<MatchedAnalog>> {
        let Some(source) = sources.first() else {
            return Ok(vec![]);
        };
        Ok(self
            .analogs
            .iter()
            .enumerate()
            .map(|(i, amounts)| MatchedAnalog {
                analog: NewAnalog {
                    name: format!("{} #{}", request.title, i + 1),
                    supplier_or_brand: None,
                    normalized_params: None,
                    matched_by: "fixed".to_string(),
                },
                prices: amounts
                    .iter()
                    .map(|amount| NewPrice {
                        amount: *amount,
                        currency: "RUB".to_string(),
                        source_name: source.name.clone(),
                        source_url: Some("https://market.example/item".to_string()),
                        source_id: Some(source.id),
                        collected_at: Utc::now(),
                    })
                    .collect(),
            })
            .collect())
    }
}

fn draft() -> RequestDraft {
    RequestDraft {
        title: "Children's costume".to_string(),
        unit: "pcs".to_string(),
        quantity: 10,
        description: "for a school play".to_string(),
        category: Some("apparel".to_string()),
        search_mode: SearchMode::Strict,
        source_ids: vec![],
        characteristics: vec![Characteristic::new("size", "128")],
    }
}

fn service(config: Config, analogs: Vec<Vec<f64>>) -> NmckService<SqliteStore, FixedMatcher> {
    let store = SqliteStore::open_in_memory().unwrap();
    store.upsert_source("Marketplace A", "marketplace", true).unwrap();
    NmckService::new(store, FixedMatcher { analogs }, config)
}

const NINE_PRICES: [f64; 9] = [
    10000.0, 12000.0, 12500.0, 14000.0, 14800.0, 15000.0, 16200.0, 17500.0, 18900.0,
];

#[test]
fn test_nine_prices_end_to_end() {
    let service = service(Config::default(), vec![NINE_PRICES.to_vec()]);
    let outcome = service.create_and_aggregate(&draft(), None).unwrap();
    assert_eq!(outcome.status, RequestStatus::Calculated);

    let result = service
        .store()
        .aggregated_result(outcome.request_id)
        .unwrap()
        .unwrap();
    assert_eq!(result.min_price, 10000.0);
    assert_eq!(result.max_price, 18900.0);
    assert_relative_eq!(result.avg_price, 130900.0 / 9.0, epsilon = 1e-9);
    assert_eq!(result.median_price, 14800.0);
    assert_eq!(result.p10_price, 10000.0);
    assert_eq!(result.p90_price, 18900.0);
    assert_eq!(result.recommended_nmck, 14544.0);
    assert_eq!(result.max_over_min_abs, 8900.0);
    assert_relative_eq!(result.max_over_min_pct.unwrap(), 89.0, epsilon = 1e-9);
    assert_eq!(result.prices_used_count, 9);
    assert_eq!(result.prices_total_count, 9);
}

#[test]
fn test_no_prices_writes_nothing() {
    let service = service(Config::default(), vec![]);
    let outcome = service.create_and_aggregate(&draft(), None).unwrap();
    assert!(outcome.result.is_none());
    assert_eq!(outcome.status, RequestStatus::Draft);
    assert!(service
        .store()
        .aggregated_result(outcome.request_id)
        .unwrap()
        .is_none());

    // Recalculating still reports the gap.
    let err = service.recalculate(outcome.request_id).unwrap_err();
    assert!(err.is_insufficient_data());
}

#[test]
fn test_no_prices_mark_calculated() {
    let mut config = Config::default();
    config.lifecycle.insufficient_data = InsufficientDataPolicy::MarkCalculated;
    let service = service(config, vec![]);
    let outcome = service.create_and_aggregate(&draft(), None).unwrap();
    assert_eq!(outcome.status, RequestStatus::Calculated);
    assert!(service
        .store()
        .aggregated_result(outcome.request_id)
        .unwrap()
        .is_none());
}

#[test]
fn test_excluded_price_is_ignored() {
    let service = service(Config::default(), vec![vec![100.0, 100.0, 100.0]]);
    let id = service.create_and_aggregate(&draft(), None).unwrap().request_id;

    let analogs = service.store().analogs(id).unwrap();
    let flagged = analogs[0].prices[1].id;
    service.set_price_excluded(flagged, true).unwrap();

    let result = service.recalculate(id).unwrap();
    assert_eq!(result.prices_total_count, 2);
    assert_eq!(result.min_price, 100.0);
    assert_eq!(result.max_price, 100.0);
    assert_eq!(result.avg_price, 100.0);
    assert_eq!(result.median_price, 100.0);
    assert_eq!(result.max_over_min_pct, Some(0.0));

    // Excluded prices stay visible on the analog.
    let detail = service.request_detail(id).unwrap();
    assert_eq!(detail.analogs[0].prices.len(), 3);
    assert!(detail.analogs[0].prices[1].is_excluded);
}

#[test]
fn test_exclusion_flip_changes_result() {
    let service = service(Config::default(), vec![vec![100.0, 200.0, 900.0]]);
    let id = service.create_and_aggregate(&draft(), None).unwrap().request_id;
    let before = service.store().aggregated_result(id).unwrap().unwrap();
    assert_eq!(before.max_price, 900.0);

    let top = service.store().analogs(id).unwrap()[0].prices[2].id;
    service.set_price_excluded(top, true).unwrap();
    // Nothing changes until the next run.
    assert_eq!(service.store().aggregated_result(id).unwrap(), Some(before.clone()));

    let excluded = service.recalculate(id).unwrap();
    assert_eq!(excluded.max_price, 200.0);

    service.set_price_excluded(top, false).unwrap();
    let restored = service.recalculate(id).unwrap();
    assert_eq!(restored, before);
}

#[test]
fn test_recalculation_is_idempotent() {
    let service = service(Config::default(), vec![NINE_PRICES.to_vec()]);
    let id = service.create_and_aggregate(&draft(), None).unwrap().request_id;
    let first = service.recalculate(id).unwrap();
    let second = service.recalculate(id).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        service.store().request(id).unwrap().status,
        RequestStatus::Calculated
    );
}

#[test]
fn test_approval_round_trip_keeps_result() {
    let service = service(Config::default(), vec![NINE_PRICES.to_vec()]);
    let id = service.create_and_aggregate(&draft(), None).unwrap().request_id;
    let result = service.store().aggregated_result(id).unwrap();

    assert_eq!(service.approve(id).unwrap().status, RequestStatus::Approved);
    assert!(matches!(
        service.approve(id),
        Err(Error::TransitionRejected { .. })
    ));
    assert!(matches!(
        service.recalculate(id),
        Err(Error::TransitionRejected { .. })
    ));

    assert_eq!(service.unapprove(id).unwrap().status, RequestStatus::Calculated);
    assert_eq!(service.store().aggregated_result(id).unwrap(), result);
}

#[test]
fn test_draft_cannot_be_approved() {
    let service = service(Config::default(), vec![NINE_PRICES.to_vec()]);
    let saved = service.save_draft(&draft(), None).unwrap();
    let err = service.approve(saved.id).unwrap_err();
    assert!(matches!(
        err,
        Error::TransitionRejected {
            from: RequestStatus::Draft,
            to: RequestStatus::Approved
        }
    ));
    assert_eq!(
        service.store().request(saved.id).unwrap().status,
        RequestStatus::Draft
    );
}

#[test]
fn test_insufficient_recalc_keeps_previous_result() {
    let service = service(Config::default(), vec![vec![500.0]]);
    let id = service.create_and_aggregate(&draft(), None).unwrap().request_id;
    let before = service.store().aggregated_result(id).unwrap();

    let only = service.store().analogs(id).unwrap()[0].prices[0].id;
    service.set_price_excluded(only, true).unwrap();
    assert!(service.recalculate(id).unwrap_err().is_insufficient_data());

    assert_eq!(service.store().aggregated_result(id).unwrap(), before);
    assert_eq!(
        service.store().request(id).unwrap().status,
        RequestStatus::Calculated
    );
}

#[test]
fn test_delete_removes_everything() {
    let service = service(Config::default(), vec![NINE_PRICES.to_vec()]);
    let id = service.create_and_aggregate(&draft(), None).unwrap().request_id;
    service.delete_request(id).unwrap();

    assert!(matches!(service.request_detail(id), Err(Error::NotFound(_))));
    assert!(service.store().aggregated_result(id).unwrap().is_none());
    assert!(service.store().admitted_prices(id).unwrap().is_empty());
    assert!(service.list_requests(None).unwrap().is_empty());
}

#[test]
fn test_concurrent_recalculation_single_row() {
    let service = Arc::new(service(Config::default(), vec![NINE_PRICES.to_vec()]));
    let id = service.create_and_aggregate(&draft(), None).unwrap().request_id;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            thread::spawn(move || service.recalculate(id))
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    assert!(results.windows(2).all(|w| w[0] == w[1]));

    let stored = service.store().aggregated_result(id).unwrap().unwrap();
    assert_eq!(stored, results[0]);
    assert_eq!(service.list_requests(Some(RequestStatus::Calculated)).unwrap().len(), 1);
}

#[test]
fn test_unknown_request() {
    let service = service(Config::default(), vec![]);
    assert!(matches!(
        service.recalculate(RequestId(99)),
        Err(Error::NotFound(_))
    ));
}

/// SQLite store that lets another caller change a request's status right
/// before the next result write takes the lock.
struct InterleavedStore {
    inner: SqliteStore,
    pending: Cell<Option<(RequestStatus, RequestStatus)>>,
}

impl InterleavedStore {
    fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            pending: Cell::new(None),
        }
    }
}

impl SourceRepository for InterleavedStore {
    fn upsert_source(&self, name: &str, kind: &str, is_active: bool) -> Result<Source> {
        self.inner.upsert_source(name, kind, is_active)
    }

    fn set_source_active(&self, id: SourceId, is_active: bool) -> Result<()> {
        self.inner.set_source_active(id, is_active)
    }

    fn active_sources(&self) -> Result<Vec<Source>> {
        self.inner.active_sources()
    }
}

impl RequestRepository for InterleavedStore {
    fn insert_request(&self, draft: &RequestDraft) -> Result<Request> {
        self.inner.insert_request(draft)
    }

    fn reset_draft(&self, id: RequestId, draft: &RequestDraft) -> Result<Request> {
        self.inner.reset_draft(id, draft)
    }

    fn request(&self, id: RequestId) -> Result<Request> {
        self.inner.request(id)
    }

    fn list_requests(&self, status: Option<RequestStatus>) -> Result<Vec<Request>> {
        self.inner.list_requests(status)
    }

    fn characteristics(&self, id: RequestId) -> Result<Vec<Characteristic>> {
        self.inner.characteristics(id)
    }

    fn update_status(&self, id: RequestId, expected: RequestStatus, next: RequestStatus) -> Result<()> {
        self.inner.update_status(id, expected, next)
    }

    fn delete_request(&self, id: RequestId) -> Result<()> {
        self.inner.delete_request(id)
    }
}

impl PriceStore for InterleavedStore {
    fn insert_analogs(&self, request_id: RequestId, analogs: &[MatchedAnalog]) -> Result<Vec<AnalogWithPrices>> {
        self.inner.insert_analogs(request_id, analogs)
    }

    fn analogs(&self, request_id: RequestId) -> Result<Vec<AnalogWithPrices>> {
        self.inner.analogs(request_id)
    }

    fn admitted_prices(&self, request_id: RequestId) -> Result<Vec<PriceObservation>> {
        self.inner.admitted_prices(request_id)
    }

    fn set_price_excluded(&self, price_id: PriceId, excluded: bool) -> Result<()> {
        self.inner.set_price_excluded(price_id, excluded)
    }
}

impl ResultStore for InterleavedStore {
    fn aggregated_result(&self, request_id: RequestId) -> Result<Option<AggregatedResult>> {
        self.inner.aggregated_result(request_id)
    }

    fn replace_result_with<A, F>(&self, request_id: RequestId, advance: A, compute: F) -> Result<Replaced>
    where
        A: FnOnce(RequestStatus) -> Result<RequestStatus>,
        F: FnOnce(&[PriceObservation]) -> Result<AggregatedResult>,
    {
        if let Some((expected, next)) = self.pending.take() {
            self.inner.update_status(request_id, expected, next)?;
        }
        self.inner.replace_result_with(request_id, advance, compute)
    }
}

#[test]
fn test_approval_during_recalculation_wins() {
    let store = InterleavedStore::new(SqliteStore::open_in_memory().unwrap());
    store.upsert_source("Marketplace A", "marketplace", true).unwrap();
    let matcher = FixedMatcher {
        analogs: vec![vec![100.0, 200.0, 300.0]],
    };
    let service = NmckService::new(store, matcher, Config::default());

    let id = service.create_and_aggregate(&draft(), None).unwrap().request_id;
    let before = service.store().aggregated_result(id).unwrap();
    let first = service.store().analogs(id).unwrap()[0].prices[0].id;
    service.set_price_excluded(first, true).unwrap();

    // The request is approved after recalculate read it as calculated.
    service
        .store()
        .pending
        .set(Some((RequestStatus::Calculated, RequestStatus::Approved)));
    let err = service.recalculate(id).unwrap_err();
    assert!(matches!(
        err,
        Error::TransitionRejected {
            from: RequestStatus::Approved,
            to: RequestStatus::Calculated
        }
    ));

    assert_eq!(service.store().aggregated_result(id).unwrap(), before);
    assert_eq!(
        service.store().request(id).unwrap().status,
        RequestStatus::Approved
    );
}

#[test]
fn test_first_aggregation_sets_status_with_result() {
    let store = InterleavedStore::new(SqliteStore::open_in_memory().unwrap());
    store.upsert_source("Marketplace A", "marketplace", true).unwrap();
    let matcher = FixedMatcher {
        analogs: vec![vec![100.0, 200.0]],
    };
    let service = NmckService::new(store, matcher, Config::default());

    let outcome = service.create_and_aggregate(&draft(), None).unwrap();
    assert_eq!(outcome.status, RequestStatus::Calculated);
    let request = service.store().request(outcome.request_id).unwrap();
    assert_eq!(request.status, RequestStatus::Calculated);
    assert_eq!(
        service.store().aggregated_result(outcome.request_id).unwrap(),
        outcome.result
    );
}
