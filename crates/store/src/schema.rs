//! SQLite schema.
//!
//! Every statement is idempotent so the schema can be applied on each open.

use rusqlite::Connection;

/// Table definitions. Child rows cascade with their request.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id          INTEGER PRIMARY KEY,
    name        TEXT    NOT NULL UNIQUE,
    kind        TEXT    NOT NULL,
    is_active   INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS requests (
    id               INTEGER PRIMARY KEY,
    title            TEXT    NOT NULL,
    unit             TEXT    NOT NULL,
    quantity         INTEGER NOT NULL CHECK (quantity > 0),
    description      TEXT    NOT NULL,
    category         TEXT,
    search_mode      TEXT    NOT NULL DEFAULT 'STRICT',
    status           TEXT    NOT NULL DEFAULT 'draft'
                     CHECK (status IN ('draft', 'calculated', 'approved')),
    sources_selected TEXT    NOT NULL DEFAULT '[]',
    created_at       TEXT    NOT NULL,
    updated_at       TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS characteristics (
    id          INTEGER PRIMARY KEY,
    request_id  INTEGER NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
    name        TEXT    NOT NULL,
    value       TEXT    NOT NULL,
    created_at  TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS analogs (
    id                INTEGER PRIMARY KEY,
    request_id        INTEGER NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
    name              TEXT    NOT NULL,
    supplier_or_brand TEXT,
    normalized_params TEXT,
    matched_by        TEXT    NOT NULL,
    created_at        TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS prices (
    id           INTEGER PRIMARY KEY,
    analog_id    INTEGER NOT NULL REFERENCES analogs(id) ON DELETE CASCADE,
    source_id    INTEGER REFERENCES sources(id) ON DELETE SET NULL,
    source_name  TEXT    NOT NULL,
    source_url   TEXT,
    price        REAL    NOT NULL CHECK (price >= 0),
    currency     TEXT    NOT NULL,
    collected_at TEXT    NOT NULL,
    is_excluded  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS aggregated_results (
    id                 INTEGER PRIMARY KEY,
    request_id         INTEGER NOT NULL UNIQUE REFERENCES requests(id) ON DELETE CASCADE,
    min_price          REAL    NOT NULL,
    max_price          REAL    NOT NULL,
    avg_price          REAL    NOT NULL,
    median_price       REAL    NOT NULL,
    p10_price          REAL    NOT NULL,
    p90_price          REAL    NOT NULL,
    recommended_nmck   REAL    NOT NULL,
    max_over_min_abs   REAL    NOT NULL,
    max_over_min_pct   REAL,
    avg_over_min_abs   REAL    NOT NULL,
    avg_over_min_pct   REAL,
    prices_used_count  INTEGER NOT NULL,
    prices_total_count INTEGER NOT NULL,
    created_at         TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_characteristics_request ON characteristics(request_id);
CREATE INDEX IF NOT EXISTS idx_analogs_request ON analogs(request_id);
CREATE INDEX IF NOT EXISTS idx_prices_analog ON prices(analog_id);
CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status);
"#;

/// Apply connection pragmas and the schema.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA)
}
