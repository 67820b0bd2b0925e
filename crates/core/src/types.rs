//! Core data types for the NMCK pricing system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a procurement request.
    RequestId
);
id_type!(
    /// Identifier of a matched analog.
    AnalogId
);
id_type!(
    /// Identifier of a single observed price.
    PriceId
);
id_type!(
    /// Identifier of a price-collection source.
    SourceId
);

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Incomplete, not yet aggregated, editable.
    Draft,
    /// Aggregation has run for this request.
    Calculated,
    /// Result accepted as final.
    Approved,
}

impl RequestStatus {
    /// Storage / wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::Calculated => "calculated",
            RequestStatus::Approved => "approved",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(RequestStatus::Draft),
            "calculated" => Ok(RequestStatus::Calculated),
            "approved" => Ok(RequestStatus::Approved),
            other => Err(Error::data(format!("unknown request status '{other}'"))),
        }
    }
}

/// How strictly analogs must match the requested characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchMode {
    /// Every characteristic must match.
    #[default]
    Strict,
    /// Close-enough analogs are admitted.
    Extended,
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Strict => "STRICT",
            SearchMode::Extended => "EXTENDED",
        }
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STRICT" => Ok(SearchMode::Strict),
            "EXTENDED" => Ok(SearchMode::Extended),
            other => Err(Error::data(format!("unknown search mode '{other}'"))),
        }
    }
}

/// A named requirement attached to a request (e.g. "size" = "128").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristic {
    pub name: String,
    pub value: String,
}

impl Characteristic {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Caller-supplied contents of a request before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDraft {
    pub title: String,
    /// Unit of measure (e.g. "pcs").
    pub unit: String,
    pub quantity: u32,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub search_mode: SearchMode,
    /// Sources the caller wants prices from. Empty means every active source.
    #[serde(default)]
    pub source_ids: Vec<SourceId>,
    #[serde(default)]
    pub characteristics: Vec<Characteristic>,
}

impl RequestDraft {
    /// Check required fields before anything is written.
    pub fn validate(&self) -> crate::Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::data("request title must not be empty"));
        }
        if self.unit.trim().is_empty() {
            return Err(Error::data("unit of measure must not be empty"));
        }
        if self.quantity == 0 {
            return Err(Error::data("quantity must be a positive integer"));
        }
        if let Some(c) = self.characteristics.iter().find(|c| c.name.trim().is_empty()) {
            return Err(Error::data(format!(
                "characteristic with value '{}' has an empty name",
                c.value
            )));
        }
        Ok(())
    }
}

/// A stored procurement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub title: String,
    pub unit: String,
    pub quantity: u32,
    pub description: String,
    pub category: Option<String>,
    pub search_mode: SearchMode,
    pub status: RequestStatus,
    pub source_ids: Vec<SourceId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A price-collection channel (marketplace, internal database, catalog).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    /// Channel kind, e.g. "marketplace" or "catalog".
    pub kind: String,
    pub is_active: bool,
}

/// A candidate product matched to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analog {
    pub id: AnalogId,
    pub request_id: RequestId,
    pub name: String,
    pub supplier_or_brand: Option<String>,
    /// Normalized parameter bag produced by the matching step.
    pub normalized_params: Option<serde_json::Value>,
    /// Matching method tag.
    pub matched_by: String,
}

/// Analog contents produced by a matcher, before insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnalog {
    pub name: String,
    pub supplier_or_brand: Option<String>,
    pub normalized_params: Option<serde_json::Value>,
    pub matched_by: String,
}

/// A single observed price for an analog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub id: PriceId,
    pub analog_id: AnalogId,
    /// Amount in currency units (not cents).
    pub amount: f64,
    pub currency: String,
    pub source_name: String,
    pub source_url: Option<String>,
    pub source_id: Option<SourceId>,
    pub collected_at: DateTime<Utc>,
    /// Omits the price from aggregation without deleting it.
    pub is_excluded: bool,
}

/// Price contents produced by a matcher, before insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPrice {
    pub amount: f64,
    pub currency: String,
    pub source_name: String,
    pub source_url: Option<String>,
    pub source_id: Option<SourceId>,
    pub collected_at: DateTime<Utc>,
}

/// An analog together with the prices collected for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedAnalog {
    pub analog: NewAnalog,
    pub prices: Vec<NewPrice>,
}

/// A stored analog together with its stored prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalogWithPrices {
    pub analog: Analog,
    pub prices: Vec<Price>,
}

/// The slice of a price the aggregation reads: amount plus provenance.
///
/// Only admitted (non-excluded) prices are ever turned into observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub price_id: PriceId,
    pub amount: f64,
    pub currency: String,
    pub source_name: String,
}

/// Computed price summary for a request.
///
/// Exactly one per request, replaced wholesale on every aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub request_id: RequestId,
    pub min_price: f64,
    pub max_price: f64,
    pub avg_price: f64,
    pub median_price: f64,
    pub p10_price: f64,
    pub p90_price: f64,
    /// Rounded mean of the prices inside [P10, P90].
    pub recommended_nmck: f64,
    pub max_over_min_abs: f64,
    /// `None` when `min_price` is zero.
    pub max_over_min_pct: Option<f64>,
    pub avg_over_min_abs: f64,
    /// `None` when `min_price` is zero.
    pub avg_over_min_pct: Option<f64>,
    pub prices_used_count: u32,
    pub prices_total_count: u32,
}
