//! SQLite-backed store.
//!
//! One connection behind a mutex; multi-statement writes run in transactions.
//! The result replace checks the request status, reads prices, upserts the
//! result and moves the status inside a single `IMMEDIATE` transaction, so a
//! stored result always matches exactly one price snapshot and readers never
//! see a half-written row.

use chrono::{DateTime, Utc};
use nmck_core::config::StoreConfig;
use nmck_core::{
    AggregatedResult, Analog, AnalogId, AnalogWithPrices, Characteristic, Error, MatchedAnalog,
    Price, PriceId, PriceObservation, Request, RequestDraft, RequestId, RequestStatus, Result,
    SearchMode, Source, SourceId,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::schema;
use crate::{PriceStore, Replaced, RequestRepository, ResultStore, SourceRepository};

/// Map a driver error, keeping lock contention distinguishable.
fn db(err: rusqlite::Error) -> Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            Error::concurrent_write(err.to_string())
        }
        _ => Error::database(err.to_string()),
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::data(format!("bad timestamp '{raw}': {e}")))
}

/// SQLite implementation of every repository trait.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open the database named in the config, or an in-memory one.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = match &config.path {
            Some(path) => {
                let conn = Connection::open(path).map_err(db)?;
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
                    .map_err(db)?;
                info!(path = %path.display(), "opened SQLite store");
                conn
            }
            None => Connection::open_in_memory().map_err(db)?,
        };
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(db)?;
        Self::from_connection(conn)
    }

    /// Fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&StoreConfig::default())
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        schema::migrate(&conn).map_err(db)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::database("connection mutex poisoned"))
    }
}

// ----------------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------------

const REQUEST_COLUMNS: &str = "id, title, unit, quantity, description, category, search_mode, \
                               status, sources_selected, created_at, updated_at";

struct RequestRow {
    id: i64,
    title: String,
    unit: String,
    quantity: u32,
    description: String,
    category: Option<String>,
    search_mode: String,
    status: String,
    sources_selected: String,
    created_at: String,
    updated_at: String,
}

impl RequestRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            unit: row.get(2)?,
            quantity: row.get(3)?,
            description: row.get(4)?,
            category: row.get(5)?,
            search_mode: row.get(6)?,
            status: row.get(7)?,
            sources_selected: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_request(self) -> Result<Request> {
        Ok(Request {
            id: RequestId(self.id),
            title: self.title,
            unit: self.unit,
            quantity: self.quantity,
            description: self.description,
            category: self.category,
            search_mode: self.search_mode.parse::<SearchMode>()?,
            status: self.status.parse::<RequestStatus>()?,
            source_ids: serde_json::from_str(&self.sources_selected)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

const PRICE_COLUMNS: &str = "p.id, p.analog_id, p.source_id, p.source_name, p.source_url, \
                             p.price, p.currency, p.collected_at, p.is_excluded";

struct PriceRow {
    id: i64,
    analog_id: i64,
    source_id: Option<i64>,
    source_name: String,
    source_url: Option<String>,
    amount: f64,
    currency: String,
    collected_at: String,
    is_excluded: bool,
}

impl PriceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            analog_id: row.get(1)?,
            source_id: row.get(2)?,
            source_name: row.get(3)?,
            source_url: row.get(4)?,
            amount: row.get(5)?,
            currency: row.get(6)?,
            collected_at: row.get(7)?,
            is_excluded: row.get(8)?,
        })
    }

    fn into_price(self) -> Result<Price> {
        Ok(Price {
            id: PriceId(self.id),
            analog_id: AnalogId(self.analog_id),
            amount: self.amount,
            currency: self.currency,
            source_name: self.source_name,
            source_url: self.source_url,
            source_id: self.source_id.map(SourceId),
            collected_at: parse_ts(&self.collected_at)?,
            is_excluded: self.is_excluded,
        })
    }
}

const RESULT_COLUMNS: &str = "request_id, min_price, max_price, avg_price, median_price, \
                              p10_price, p90_price, recommended_nmck, max_over_min_abs, \
                              max_over_min_pct, avg_over_min_abs, avg_over_min_pct, \
                              prices_used_count, prices_total_count";

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<AggregatedResult> {
    Ok(AggregatedResult {
        request_id: RequestId(row.get(0)?),
        min_price: row.get(1)?,
        max_price: row.get(2)?,
        avg_price: row.get(3)?,
        median_price: row.get(4)?,
        p10_price: row.get(5)?,
        p90_price: row.get(6)?,
        recommended_nmck: row.get(7)?,
        max_over_min_abs: row.get(8)?,
        max_over_min_pct: row.get(9)?,
        avg_over_min_abs: row.get(10)?,
        avg_over_min_pct: row.get(11)?,
        prices_used_count: row.get(12)?,
        prices_total_count: row.get(13)?,
    })
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<Source> {
    Ok(Source {
        id: SourceId(row.get(0)?),
        name: row.get(1)?,
        kind: row.get(2)?,
        is_active: row.get(3)?,
    })
}

// ----------------------------------------------------------------------------
// Shared queries (usable inside a transaction)
// ----------------------------------------------------------------------------

fn load_request(conn: &Connection, id: RequestId) -> Result<Request> {
    let sql = format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1");
    conn.query_row(&sql, params![id.0], RequestRow::from_row)
        .optional()
        .map_err(db)?
        .ok_or_else(|| Error::not_found(format!("request {id}")))?
        .into_request()
}

fn request_exists(conn: &Connection, id: RequestId) -> Result<bool> {
    conn.query_row("SELECT 1 FROM requests WHERE id = ?1", params![id.0], |_| Ok(()))
        .optional()
        .map(|found| found.is_some())
        .map_err(db)
}

fn insert_characteristics(conn: &Connection, id: RequestId, items: &[Characteristic]) -> Result<()> {
    let mut stmt = conn
        .prepare(
            "INSERT INTO characteristics (request_id, name, value, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .map_err(db)?;
    let ts = now();
    for c in items {
        stmt.execute(params![id.0, c.name, c.value, ts]).map_err(db)?;
    }
    Ok(())
}

fn load_admitted(conn: &Connection, id: RequestId) -> Result<Vec<PriceObservation>> {
    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.price, p.currency, p.source_name
             FROM prices p JOIN analogs a ON a.id = p.analog_id
             WHERE a.request_id = ?1 AND p.is_excluded = 0
             ORDER BY p.id",
        )
        .map_err(db)?;
    let rows = stmt
        .query_map(params![id.0], |row| {
            Ok(PriceObservation {
                price_id: PriceId(row.get(0)?),
                amount: row.get(1)?,
                currency: row.get(2)?,
                source_name: row.get(3)?,
            })
        })
        .map_err(db)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db)
}

fn upsert_result(conn: &Connection, result: &AggregatedResult) -> Result<()> {
    conn.execute(
        "INSERT INTO aggregated_results (
             request_id, min_price, max_price, avg_price, median_price, p10_price, p90_price,
             recommended_nmck, max_over_min_abs, max_over_min_pct, avg_over_min_abs,
             avg_over_min_pct, prices_used_count, prices_total_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT(request_id) DO UPDATE SET
             min_price = excluded.min_price,
             max_price = excluded.max_price,
             avg_price = excluded.avg_price,
             median_price = excluded.median_price,
             p10_price = excluded.p10_price,
             p90_price = excluded.p90_price,
             recommended_nmck = excluded.recommended_nmck,
             max_over_min_abs = excluded.max_over_min_abs,
             max_over_min_pct = excluded.max_over_min_pct,
             avg_over_min_abs = excluded.avg_over_min_abs,
             avg_over_min_pct = excluded.avg_over_min_pct,
             prices_used_count = excluded.prices_used_count,
             prices_total_count = excluded.prices_total_count,
             created_at = excluded.created_at",
        params![
            result.request_id.0,
            result.min_price,
            result.max_price,
            result.avg_price,
            result.median_price,
            result.p10_price,
            result.p90_price,
            result.recommended_nmck,
            result.max_over_min_abs,
            result.max_over_min_pct,
            result.avg_over_min_abs,
            result.avg_over_min_pct,
            result.prices_used_count,
            result.prices_total_count,
            now(),
        ],
    )
    .map_err(db)?;
    Ok(())
}

// ----------------------------------------------------------------------------
// Trait implementations
// ----------------------------------------------------------------------------

impl SourceRepository for SqliteStore {
    fn upsert_source(&self, name: &str, kind: &str, is_active: bool) -> Result<Source> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sources (name, kind, is_active, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET kind = excluded.kind, is_active = excluded.is_active",
            params![name, kind, is_active, now()],
        )
        .map_err(db)?;
        conn.query_row(
            "SELECT id, name, kind, is_active FROM sources WHERE name = ?1",
            params![name],
            source_from_row,
        )
        .map_err(db)
    }

    fn set_source_active(&self, id: SourceId, is_active: bool) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE sources SET is_active = ?1 WHERE id = ?2",
                params![is_active, id.0],
            )
            .map_err(db)?;
        if changed == 0 {
            return Err(Error::not_found(format!("source {id}")));
        }
        Ok(())
    }

    fn active_sources(&self) -> Result<Vec<Source>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, name, kind, is_active FROM sources WHERE is_active = 1 ORDER BY id")
            .map_err(db)?;
        let rows = stmt.query_map([], source_from_row).map_err(db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db)
    }
}

impl RequestRepository for SqliteStore {
    fn insert_request(&self, draft: &RequestDraft) -> Result<Request> {
        draft.validate()?;
        let selected = serde_json::to_string(&draft.source_ids)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db)?;
        let ts = now();
        tx.execute(
            "INSERT INTO requests (title, unit, quantity, description, category, search_mode,
                                   status, sources_selected, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                draft.title,
                draft.unit,
                draft.quantity,
                draft.description,
                draft.category,
                draft.search_mode.as_str(),
                RequestStatus::Draft.as_str(),
                selected,
                ts,
            ],
        )
        .map_err(db)?;
        let id = RequestId(tx.last_insert_rowid());
        insert_characteristics(&tx, id, &draft.characteristics)?;
        let request = load_request(&tx, id)?;
        tx.commit().map_err(db)?;

        debug!(request_id = %id, "inserted draft request");
        Ok(request)
    }

    fn reset_draft(&self, id: RequestId, draft: &RequestDraft) -> Result<Request> {
        draft.validate()?;
        let selected = serde_json::to_string(&draft.source_ids)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db)?;
        let current = load_request(&tx, id)?;
        if current.status != RequestStatus::Draft {
            return Err(Error::transition_rejected(current.status, RequestStatus::Draft));
        }

        tx.execute(
            "UPDATE requests
             SET title = ?1, unit = ?2, quantity = ?3, description = ?4, category = ?5,
                 search_mode = ?6, sources_selected = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                draft.title,
                draft.unit,
                draft.quantity,
                draft.description,
                draft.category,
                draft.search_mode.as_str(),
                selected,
                now(),
                id.0,
            ],
        )
        .map_err(db)?;
        tx.execute("DELETE FROM characteristics WHERE request_id = ?1", params![id.0])
            .map_err(db)?;
        tx.execute("DELETE FROM analogs WHERE request_id = ?1", params![id.0])
            .map_err(db)?;
        tx.execute("DELETE FROM aggregated_results WHERE request_id = ?1", params![id.0])
            .map_err(db)?;
        insert_characteristics(&tx, id, &draft.characteristics)?;
        let request = load_request(&tx, id)?;
        tx.commit().map_err(db)?;

        debug!(request_id = %id, "reset draft request");
        Ok(request)
    }

    fn request(&self, id: RequestId) -> Result<Request> {
        let conn = self.lock()?;
        load_request(&conn, id)
    }

    fn list_requests(&self, status: Option<RequestStatus>) -> Result<Vec<Request>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM requests
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = conn.prepare(&sql).map_err(db)?;
        let rows = stmt
            .query_map(params![status.map(RequestStatus::as_str)], RequestRow::from_row)
            .map_err(db)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db)?;
        rows.into_iter().map(RequestRow::into_request).collect()
    }

    fn characteristics(&self, id: RequestId) -> Result<Vec<Characteristic>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT name, value FROM characteristics WHERE request_id = ?1 ORDER BY id")
            .map_err(db)?;
        let rows = stmt
            .query_map(params![id.0], |row| {
                Ok(Characteristic {
                    name: row.get(0)?,
                    value: row.get(1)?,
                })
            })
            .map_err(db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db)
    }

    fn update_status(&self, id: RequestId, expected: RequestStatus, next: RequestStatus) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE requests SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![next.as_str(), now(), id.0, expected.as_str()],
            )
            .map_err(db)?;
        if changed == 0 {
            if request_exists(&conn, id)? {
                return Err(Error::concurrent_write(format!(
                    "request {id} is no longer {expected}"
                )));
            }
            return Err(Error::not_found(format!("request {id}")));
        }
        Ok(())
    }

    fn delete_request(&self, id: RequestId) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute("DELETE FROM requests WHERE id = ?1", params![id.0])
            .map_err(db)?;
        if changed == 0 {
            return Err(Error::not_found(format!("request {id}")));
        }
        info!(request_id = %id, "deleted request");
        Ok(())
    }
}

impl PriceStore for SqliteStore {
    fn insert_analogs(&self, request_id: RequestId, analogs: &[MatchedAnalog]) -> Result<Vec<AnalogWithPrices>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db)?;
        if !request_exists(&tx, request_id)? {
            return Err(Error::not_found(format!("request {request_id}")));
        }

        let mut stored = Vec::with_capacity(analogs.len());
        {
            let mut analog_stmt = tx
                .prepare(
                    "INSERT INTO analogs (request_id, name, supplier_or_brand, normalized_params,
                                          matched_by, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(db)?;
            let mut price_stmt = tx
                .prepare(
                    "INSERT INTO prices (analog_id, source_id, source_name, source_url, price,
                                         currency, collected_at, is_excluded)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
                )
                .map_err(db)?;

            for matched in analogs {
                let a = &matched.analog;
                let params_json = a
                    .normalized_params
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                let analog_id = AnalogId(
                    analog_stmt
                        .insert(params![
                            request_id.0,
                            a.name,
                            a.supplier_or_brand,
                            params_json,
                            a.matched_by,
                            now(),
                        ])
                        .map_err(db)?,
                );

                let mut prices = Vec::with_capacity(matched.prices.len());
                for p in &matched.prices {
                    if !(p.amount.is_finite() && p.amount >= 0.0) {
                        return Err(Error::data(format!(
                            "price amount {} for analog '{}' is not a non-negative number",
                            p.amount, a.name
                        )));
                    }
                    let price_id = price_stmt
                        .insert(params![
                            analog_id.0,
                            p.source_id.map(|s| s.0),
                            p.source_name,
                            p.source_url,
                            p.amount,
                            p.currency,
                            p.collected_at.to_rfc3339(),
                        ])
                        .map_err(db)?;
                    prices.push(Price {
                        id: PriceId(price_id),
                        analog_id,
                        amount: p.amount,
                        currency: p.currency.clone(),
                        source_name: p.source_name.clone(),
                        source_url: p.source_url.clone(),
                        source_id: p.source_id,
                        collected_at: p.collected_at,
                        is_excluded: false,
                    });
                }

                stored.push(AnalogWithPrices {
                    analog: Analog {
                        id: analog_id,
                        request_id,
                        name: a.name.clone(),
                        supplier_or_brand: a.supplier_or_brand.clone(),
                        normalized_params: a.normalized_params.clone(),
                        matched_by: a.matched_by.clone(),
                    },
                    prices,
                });
            }
        }
        tx.commit().map_err(db)?;

        debug!(
            request_id = %request_id,
            analogs = stored.len(),
            prices = stored.iter().map(|a| a.prices.len()).sum::<usize>(),
            "stored matched analogs"
        );
        Ok(stored)
    }

    fn analogs(&self, request_id: RequestId) -> Result<Vec<AnalogWithPrices>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, request_id, name, supplier_or_brand, normalized_params, matched_by
                 FROM analogs WHERE request_id = ?1 ORDER BY id",
            )
            .map_err(db)?;
        let raw = stmt
            .query_map(params![request_id.0], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(db)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db)?;

        let sql = format!(
            "SELECT {PRICE_COLUMNS} FROM prices p JOIN analogs a ON a.id = p.analog_id
             WHERE a.request_id = ?1 ORDER BY p.id"
        );
        let mut price_stmt = conn.prepare(&sql).map_err(db)?;
        let price_rows = price_stmt
            .query_map(params![request_id.0], PriceRow::from_row)
            .map_err(db)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db)?;

        let mut by_analog: HashMap<AnalogId, Vec<Price>> = HashMap::new();
        for row in price_rows {
            let price = row.into_price()?;
            by_analog.entry(price.analog_id).or_default().push(price);
        }

        raw.into_iter()
            .map(|(id, req, name, supplier, params_json, matched_by)| -> Result<AnalogWithPrices> {
                let normalized_params: Option<serde_json::Value> = params_json
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?;
                let id = AnalogId(id);
                Ok(AnalogWithPrices {
                    analog: Analog {
                        id,
                        request_id: RequestId(req),
                        name,
                        supplier_or_brand: supplier,
                        normalized_params,
                        matched_by,
                    },
                    prices: by_analog.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    fn admitted_prices(&self, request_id: RequestId) -> Result<Vec<PriceObservation>> {
        let conn = self.lock()?;
        load_admitted(&conn, request_id)
    }

    fn set_price_excluded(&self, price_id: PriceId, excluded: bool) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE prices SET is_excluded = ?1 WHERE id = ?2",
                params![excluded, price_id.0],
            )
            .map_err(db)?;
        if changed == 0 {
            return Err(Error::not_found(format!("price {price_id}")));
        }
        debug!(price_id = %price_id, excluded, "updated price exclusion");
        Ok(())
    }
}

impl ResultStore for SqliteStore {
    fn aggregated_result(&self, request_id: RequestId) -> Result<Option<AggregatedResult>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {RESULT_COLUMNS} FROM aggregated_results WHERE request_id = ?1");
        conn.query_row(&sql, params![request_id.0], result_from_row)
            .optional()
            .map_err(db)
    }

    fn replace_result_with<A, F>(&self, request_id: RequestId, advance: A, compute: F) -> Result<Replaced>
    where
        A: FnOnce(RequestStatus) -> Result<RequestStatus>,
        F: FnOnce(&[PriceObservation]) -> Result<AggregatedResult>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db)?;
        let from = load_request(&tx, request_id)?.status;
        // On error the transaction is dropped and rolled back.
        let status = advance(from)?;

        let observations = load_admitted(&tx, request_id)?;
        let result = compute(&observations)?;
        if result.request_id != request_id {
            return Err(Error::data(format!(
                "result for request {} cannot replace result of request {request_id}",
                result.request_id
            )));
        }
        upsert_result(&tx, &result)?;
        if status != from {
            tx.execute(
                "UPDATE requests SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now(), request_id.0],
            )
            .map_err(db)?;
        }
        tx.commit().map_err(db)?;

        info!(
            request_id = %request_id,
            recommended_nmck = result.recommended_nmck,
            used = result.prices_used_count,
            total = result.prices_total_count,
            %from,
            %status,
            "replaced aggregated result"
        );
        Ok(Replaced { result, from, status })
    }
}
