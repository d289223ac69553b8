//! SQL migration definitions for the courtlink database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: courts, court_counties, normalized_addresses, facilities, pipeline_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Judicial district courts
CREATE TABLE IF NOT EXISTS courts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    name         TEXT NOT NULL,
    abbreviation TEXT NOT NULL UNIQUE,
    url          TEXT,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

-- County/state pairs per court. court_id has no foreign key; dangling ids
-- are reported by verification.
CREATE TABLE IF NOT EXISTS court_counties (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    court_id    INTEGER NOT NULL,
    county_name TEXT NOT NULL,
    state       TEXT NOT NULL,
    UNIQUE(court_id, county_name, state)
);

CREATE INDEX IF NOT EXISTS idx_court_counties_state ON court_counties(state);
CREATE INDEX IF NOT EXISTS idx_court_counties_court ON court_counties(court_id);

-- Immutable geocoding snapshots
CREATE TABLE IF NOT EXISTS normalized_addresses (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    api_source        TEXT NOT NULL,
    original_query    TEXT NOT NULL,
    street            TEXT,
    city              TEXT,
    state             TEXT,
    zip_code          TEXT,
    county            TEXT,
    latitude          REAL,
    longitude         REAL,
    label             TEXT,
    api_response_json TEXT NOT NULL,
    created_at        TEXT NOT NULL
);

-- Facilities keyed by name. The address and court links carry no foreign
-- keys; dangling ids are reported by verification and re-geocoded on import.
CREATE TABLE IF NOT EXISTS facilities (
    id                       INTEGER PRIMARY KEY AUTOINCREMENT,
    name                     TEXT NOT NULL UNIQUE COLLATE NOCASE,
    original_address         TEXT,
    city                     TEXT,
    state                    TEXT,
    zip_code                 TEXT,
    aor                      TEXT,
    facility_type            TEXT,
    gender_capacity          TEXT,
    mandatory                INTEGER,
    guaranteed_minimum       INTEGER,
    last_inspection_type     TEXT,
    last_inspection_end_date TEXT,
    pending_fy25_inspection  TEXT,
    last_inspection_standard TEXT,
    last_final_rating        TEXT,
    normalized_address_id    INTEGER,
    court_id                 INTEGER,
    created_at               TEXT NOT NULL,
    updated_at               TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_facilities_court ON facilities(court_id);

-- Pipeline run history
CREATE TABLE IF NOT EXISTS pipeline_runs (
    id          TEXT PRIMARY KEY,
    command     TEXT NOT NULL,
    input_path  TEXT,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
