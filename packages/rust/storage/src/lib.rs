//! libSQL storage layer for facilities, normalized addresses and courts.
//!
//! The [`Storage`] struct wraps a local libSQL database.
//!
//! **Access rules:**
//! - Pipeline commands: read-write, single writer, via [`Storage::open`]
//! - Verification: read-only via [`Storage::open_readonly`], never migrates

mod migrations;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use courtlink_shared::{
    AddressFields, Court, CourtCounty, CourtLinkError, Facility, FacilityField, FacilityRecord,
    FieldValue, NewNormalizedAddress, NormalizedAddress, Result,
};
use libsql::params::Params;
use libsql::{Connection, Database, Value, params};
use tracing::warn;
use uuid::Uuid;

/// Tables the verification stage knows about.
pub const AUDITED_TABLES: [&str; 4] = [
    "courts",
    "court_counties",
    "facilities",
    "normalized_addresses",
];

/// How long a statement waits on another connection's lock before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const FACILITY_COLUMNS: &str = "id, name, original_address, city, state, zip_code, aor, \
     facility_type, gender_capacity, mandatory, guaranteed_minimum, last_inspection_type, \
     last_inspection_end_date, pending_fy25_inspection, last_inspection_standard, \
     last_final_rating, normalized_address_id, court_id";

const ADDRESS_COLUMNS: &str = "id, api_source, original_query, street, city, state, zip_code, \
     county, latitude, longitude, label, api_response_json, created_at";

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Inserted,
    Updated,
    Unchanged,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    in_transaction: AtomicBool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    ///
    /// An unusable location is a configuration error.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CourtLinkError::config(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let storage = Self::connect(path, false).await?;
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` without migrating or writing.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CourtLinkError::config(format!(
                "database not found: {}",
                path.display()
            )));
        }
        Self::connect(path, true).await
    }

    async fn connect(path: &Path, readonly: bool) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| {
                CourtLinkError::config(format!("cannot open database {}: {e}", path.display()))
            })?;

        let conn = db.connect().map_err(|e| {
            CourtLinkError::config(format!("cannot connect to {}: {e}", path.display()))
        })?;

        let storage = Self {
            db,
            conn,
            readonly,
            in_transaction: AtomicBool::new(false),
        };
        storage.set_busy_timeout(DEFAULT_BUSY_TIMEOUT).await?;
        Ok(storage)
    }

    /// Set how long statements wait for a lock held by another connection.
    pub async fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn
            .execute_batch(&format!("PRAGMA busy_timeout = {}", timeout.as_millis()))
            .await
            .map(|_| ())
            .map_err(|e| CourtLinkError::Storage(format!("busy_timeout: {e}")))
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CourtLinkError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    pub async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(CourtLinkError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Start a transaction covering one record's writes.
    ///
    /// Every write made through this handle until `commit`/`rollback` belongs
    /// to the transaction.
    pub async fn begin(&self) -> Result<RecordTransaction<'_>> {
        self.check_writable()?;
        if self.in_transaction.load(Ordering::SeqCst) || !self.conn.is_autocommit() {
            warn!("previous record transaction was left open, rolling it back");
            self.force_rollback().await?;
        }
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .await
            .map_err(|e| CourtLinkError::Storage(format!("begin failed: {e}")))?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(RecordTransaction { storage: self })
    }

    /// Run COMMIT or ROLLBACK. On failure, any transaction SQLite kept open
    /// is rolled back so the next record starts clean.
    async fn finish_transaction(&self, statement: &str) -> Result<()> {
        let result = self.conn.execute_batch(statement).await;
        if let Err(e) = &result {
            if !self.conn.is_autocommit() {
                warn!(statement, error = %e, "transaction still open after failure, rolling back");
                if let Err(rb) = self.force_rollback().await {
                    warn!(error = %rb, "rollback after failed {statement} also failed");
                }
            }
        }
        self.in_transaction
            .store(!self.conn.is_autocommit(), Ordering::SeqCst);
        result
            .map(|_| ())
            .map_err(|e| CourtLinkError::Storage(format!("{statement} failed: {e}")))
    }

    async fn force_rollback(&self) -> Result<()> {
        self.conn
            .execute_batch("ROLLBACK")
            .await
            .map_err(|e| CourtLinkError::Storage(format!("ROLLBACK failed: {e}")))?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Court operations
    // -----------------------------------------------------------------------

    /// Insert or update a court keyed by abbreviation. Returns its id.
    pub async fn upsert_court(
        &self,
        name: &str,
        abbreviation: &str,
        url: Option<&str>,
    ) -> Result<(i64, UpsertKind)> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();

        if let Some(existing) = self.court_by_abbreviation(abbreviation).await? {
            if existing.name == name && existing.url.as_deref() == url {
                return Ok((existing.id, UpsertKind::Unchanged));
            }
            self.conn
                .execute(
                    "UPDATE courts SET name = ?1, url = ?2, updated_at = ?3 WHERE id = ?4",
                    params![name, url, now.as_str(), existing.id],
                )
                .await
                .map_err(|e| CourtLinkError::Storage(e.to_string()))?;
            return Ok((existing.id, UpsertKind::Updated));
        }

        let mut rows = self
            .conn
            .query(
                "INSERT INTO courts (name, abbreviation, url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 RETURNING id",
                params![name, abbreviation, url, now.as_str()],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;
        let id = returned_id(&mut rows).await?;
        Ok((id, UpsertKind::Inserted))
    }

    /// Get a court by id.
    pub async fn get_court(&self, id: i64) -> Result<Option<Court>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, abbreviation, url FROM courts WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_court(&row, 0)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(CourtLinkError::Storage(e.to_string())),
        }
    }

    /// Get a court by its unique abbreviation.
    pub async fn court_by_abbreviation(&self, abbreviation: &str) -> Result<Option<Court>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, abbreviation, url FROM courts WHERE abbreviation = ?1",
                params![abbreviation],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_court(&row, 0)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(CourtLinkError::Storage(e.to_string())),
        }
    }

    /// Attach a county to a court. Returns `false` if the pair already existed.
    pub async fn insert_court_county(
        &self,
        court_id: i64,
        county_name: &str,
        state: &str,
    ) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "INSERT INTO court_counties (court_id, county_name, state)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(court_id, county_name, state) DO NOTHING",
                params![court_id, county_name, state],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;
        Ok(affected > 0)
    }

    /// First county row (in insertion order) whose name contains, or is
    /// contained in, `county`, case-insensitively, within `state`.
    ///
    /// Rows pointing at a missing court never match.
    pub async fn find_court_for_county(
        &self,
        county: &str,
        state: &str,
    ) -> Result<Option<(CourtCounty, Court)>> {
        let county = county.trim().to_lowercase();
        let state = state.trim().to_uppercase();
        if county.is_empty() || state.is_empty() {
            return Ok(None);
        }

        let mut rows = self
            .conn
            .query(
                "SELECT cc.id, cc.court_id, cc.county_name, cc.state,
                        c.id, c.name, c.abbreviation, c.url
                 FROM court_counties cc
                 JOIN courts c ON c.id = cc.court_id
                 WHERE UPPER(TRIM(cc.state)) = ?2
                   AND LENGTH(TRIM(cc.county_name)) > 0
                   AND (INSTR(LOWER(cc.county_name), ?1) > 0
                        OR INSTR(?1, LOWER(TRIM(cc.county_name))) > 0)
                 ORDER BY cc.id
                 LIMIT 1",
                params![county.as_str(), state.as_str()],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some((row_to_court_county(&row)?, row_to_court(&row, 4)?))),
            Ok(None) => Ok(None),
            Err(e) => Err(CourtLinkError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Facility operations
    // -----------------------------------------------------------------------

    /// Look a facility up by its natural key (case-insensitive name).
    pub async fn get_facility_by_name(&self, name: &str) -> Result<Option<Facility>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {FACILITY_COLUMNS} FROM facilities WHERE name = ?1"),
                params![name],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_facility(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(CourtLinkError::Storage(e.to_string())),
        }
    }

    /// All facilities ordered by name.
    pub async fn list_facilities(&self) -> Result<Vec<Facility>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {FACILITY_COLUMNS} FROM facilities ORDER BY name"),
                params![],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_facility(&row)?);
        }
        Ok(results)
    }

    /// Insert a new facility. Returns its id.
    pub async fn insert_facility(&self, record: &FacilityRecord) -> Result<i64> {
        self.check_writable()?;
        if record.name.is_none() {
            return Err(CourtLinkError::validation("facility name is required"));
        }
        let now = Utc::now().to_rfc3339();

        let columns: Vec<&str> = FacilityField::ALL.iter().map(|f| f.column()).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let n = columns.len();
        let sql = format!(
            "INSERT INTO facilities ({}, created_at, updated_at)
             VALUES ({}, ?{}, ?{})
             RETURNING id",
            columns.join(", "),
            placeholders.join(", "),
            n + 1,
            n + 1,
        );

        let mut values: Vec<Value> = FacilityField::ALL
            .iter()
            .map(|f| field_to_value(&record.value(*f)))
            .collect();
        values.push(Value::Text(now));

        let mut rows = self
            .conn
            .query(&sql, Params::Positional(values))
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;
        returned_id(&mut rows).await
    }

    /// Update only the given columns of a facility.
    pub async fn update_facility_fields(
        &self,
        id: i64,
        changes: &[(FacilityField, FieldValue)],
    ) -> Result<()> {
        self.check_writable()?;
        if changes.is_empty() {
            return Ok(());
        }

        let assignments: Vec<String> = changes
            .iter()
            .enumerate()
            .map(|(i, (field, _))| format!("{} = ?{}", field.column(), i + 1))
            .collect();
        let n = changes.len();
        let sql = format!(
            "UPDATE facilities SET {}, updated_at = ?{} WHERE id = ?{}",
            assignments.join(", "),
            n + 1,
            n + 2,
        );

        let mut values: Vec<Value> = changes.iter().map(|(_, v)| field_to_value(v)).collect();
        values.push(Value::Text(Utc::now().to_rfc3339()));
        values.push(Value::Integer(id));

        self.conn
            .execute(&sql, Params::Positional(values))
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Point a facility at a normalized address (or clear the reference).
    pub async fn set_facility_address(&self, id: i64, address_id: Option<i64>) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE facilities SET normalized_address_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![address_id, now.as_str(), id],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Assign a facility to a court.
    pub async fn set_facility_court(&self, id: i64, court_id: i64) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE facilities SET court_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![court_id, now.as_str(), id],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Normalized address operations
    // -----------------------------------------------------------------------

    /// Insert an immutable normalized address snapshot. Returns its id.
    pub async fn insert_normalized_address(&self, address: &NewNormalizedAddress) -> Result<i64> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let raw = serde_json::to_string(&address.raw_payload)
            .map_err(|e| CourtLinkError::Storage(format!("payload serialization: {e}")))?;
        let f = &address.fields;

        let mut rows = self
            .conn
            .query(
                "INSERT INTO normalized_addresses
                   (api_source, original_query, street, city, state, zip_code, county,
                    latitude, longitude, label, api_response_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 RETURNING id",
                params![
                    address.source.as_str(),
                    address.query.as_str(),
                    f.street.as_deref(),
                    f.city.as_deref(),
                    f.state.as_deref(),
                    f.zip.as_deref(),
                    f.county.as_deref(),
                    f.latitude,
                    f.longitude,
                    f.label.as_deref(),
                    raw,
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;
        returned_id(&mut rows).await
    }

    /// Get a normalized address by id.
    pub async fn get_normalized_address(&self, id: i64) -> Result<Option<NormalizedAddress>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ADDRESS_COLUMNS} FROM normalized_addresses WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_address(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(CourtLinkError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Pipeline run history
    // -----------------------------------------------------------------------

    /// Record the start of a run. Returns the generated run id.
    pub async fn insert_run(&self, command: &str, input_path: Option<&str>) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO pipeline_runs (id, command, input_path, started_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.as_str(), command, input_path, now.as_str()],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Store the final counters of a run.
    pub async fn finish_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE pipeline_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Stored counters of a finished run.
    pub async fn run_stats(&self, run_id: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stats_json FROM pipeline_runs WHERE id = ?1",
                params![run_id],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(CourtLinkError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Audit queries
    // -----------------------------------------------------------------------

    /// Names of all user tables.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
                params![],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(
                row.get::<String>(0)
                    .map_err(|e| CourtLinkError::Storage(e.to_string()))?,
            );
        }
        Ok(results)
    }

    /// Row count of `table`. Only plain identifiers are accepted.
    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CourtLinkError::validation(format!(
                "invalid table name '{table}'"
            )));
        }
        self.scalar(&format!("SELECT COUNT(*) FROM {table}")).await
    }

    /// County rows whose court id references no court.
    pub async fn orphaned_court_counties(&self) -> Result<Vec<CourtCounty>> {
        let mut rows = self
            .conn
            .query(
                "SELECT cc.id, cc.court_id, cc.county_name, cc.state
                 FROM court_counties cc
                 LEFT JOIN courts c ON c.id = cc.court_id
                 WHERE c.id IS NULL
                 ORDER BY cc.id",
                params![],
            )
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_court_county(&row)?);
        }
        Ok(results)
    }

    /// Courts with at least one county, and all courts.
    pub async fn court_coverage(&self) -> Result<(i64, i64)> {
        let covered = self
            .scalar(
                "SELECT COUNT(DISTINCT cc.court_id)
                 FROM court_counties cc
                 JOIN courts c ON c.id = cc.court_id",
            )
            .await?;
        let total = self.scalar("SELECT COUNT(*) FROM courts").await?;
        Ok((covered, total))
    }

    /// Facility linkage counts for the integrity audit.
    pub async fn facility_links(&self) -> Result<FacilityLinks> {
        Ok(FacilityLinks {
            total: self.scalar("SELECT COUNT(*) FROM facilities").await?,
            with_address: self
                .scalar("SELECT COUNT(*) FROM facilities WHERE normalized_address_id IS NOT NULL")
                .await?,
            with_court: self
                .scalar("SELECT COUNT(*) FROM facilities WHERE court_id IS NOT NULL")
                .await?,
            addresses_without_coordinates: self
                .scalar(
                    "SELECT COUNT(*) FROM facilities f
                     JOIN normalized_addresses na ON na.id = f.normalized_address_id
                     WHERE na.latitude IS NULL OR na.longitude IS NULL",
                )
                .await?,
            dangling_address_refs: self
                .scalar(
                    "SELECT COUNT(*) FROM facilities f
                     LEFT JOIN normalized_addresses na ON na.id = f.normalized_address_id
                     WHERE f.normalized_address_id IS NOT NULL AND na.id IS NULL",
                )
                .await?,
            dangling_court_refs: self
                .scalar(
                    "SELECT COUNT(*) FROM facilities f
                     LEFT JOIN courts c ON c.id = f.court_id
                     WHERE f.court_id IS NOT NULL AND c.id IS NULL",
                )
                .await?,
        })
    }

    async fn scalar(&self, sql: &str) -> Result<i64> {
        let mut rows = self
            .conn
            .query(sql, params![])
            .await
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?;
        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| CourtLinkError::Storage(e.to_string())),
            Ok(None) => Ok(0),
            Err(e) => Err(CourtLinkError::Storage(e.to_string())),
        }
    }
}

/// Handle for one record's transaction. Close it with `commit` or `rollback`.
#[must_use = "a record transaction must be committed or rolled back"]
pub struct RecordTransaction<'a> {
    storage: &'a Storage,
}

impl RecordTransaction<'_> {
    pub async fn commit(self) -> Result<()> {
        self.storage.finish_transaction("COMMIT").await
    }

    pub async fn rollback(self) -> Result<()> {
        self.storage.finish_transaction("ROLLBACK").await
    }
}

/// Facility linkage counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FacilityLinks {
    pub total: i64,
    pub with_address: i64,
    pub with_court: i64,
    /// Linked addresses lacking latitude or longitude.
    pub addresses_without_coordinates: i64,
    pub dangling_address_refs: i64,
    pub dangling_court_refs: i64,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn field_to_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(Some(s)) => Value::Text(s.clone()),
        FieldValue::Integer(Some(n)) => Value::Integer(*n),
        FieldValue::Text(None) | FieldValue::Integer(None) => Value::Null,
    }
}

/// Read the id produced by an `INSERT ... RETURNING id`.
async fn returned_id(rows: &mut libsql::Rows) -> Result<i64> {
    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| CourtLinkError::Storage(e.to_string())),
        Ok(None) => Err(CourtLinkError::Storage("insert returned no id".into())),
        Err(e) => Err(CourtLinkError::Storage(e.to_string())),
    }
}

fn row_to_court(row: &libsql::Row, offset: i32) -> Result<Court> {
    Ok(Court {
        id: row
            .get::<i64>(offset)
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?,
        name: row
            .get::<String>(offset + 1)
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?,
        abbreviation: row
            .get::<String>(offset + 2)
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?,
        url: row.get::<String>(offset + 3).ok(),
    })
}

fn row_to_court_county(row: &libsql::Row) -> Result<CourtCounty> {
    Ok(CourtCounty {
        id: row
            .get::<i64>(0)
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?,
        court_id: row
            .get::<i64>(1)
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?,
        county_name: row
            .get::<String>(2)
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?,
        state: row
            .get::<String>(3)
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?,
    })
}

fn row_to_facility(row: &libsql::Row) -> Result<Facility> {
    let mut record = FacilityRecord::default();
    for (i, field) in FacilityField::ALL.iter().enumerate() {
        let idx = i as i32 + 1;
        if field.is_integer() {
            let value = row.get::<i64>(idx).ok();
            match field {
                FacilityField::Mandatory => record.mandatory = value,
                _ => record.guaranteed_minimum = value,
            }
        } else if let Ok(text) = row.get::<String>(idx) {
            record.set_raw(*field, &text);
        }
    }

    Ok(Facility {
        id: row
            .get::<i64>(0)
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?,
        record,
        normalized_address_id: row.get::<i64>(16).ok(),
        court_id: row.get::<i64>(17).ok(),
    })
}

fn row_to_address(row: &libsql::Row) -> Result<NormalizedAddress> {
    Ok(NormalizedAddress {
        id: row
            .get::<i64>(0)
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?,
        source: row
            .get::<String>(1)
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?,
        query: row
            .get::<String>(2)
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?,
        fields: AddressFields {
            street: row.get::<String>(3).ok(),
            city: row.get::<String>(4).ok(),
            state: row.get::<String>(5).ok(),
            zip: row.get::<String>(6).ok(),
            county: row.get::<String>(7).ok(),
            latitude: row.get::<f64>(8).ok(),
            longitude: row.get::<f64>(9).ok(),
            label: row.get::<String>(10).ok(),
        },
        raw_payload: row
            .get::<String>(11)
            .map_err(|e| CourtLinkError::Storage(e.to_string()))?,
        created_at: {
            let s: String = row
                .get(12)
                .map_err(|e| CourtLinkError::Storage(e.to_string()))?;
            chrono::DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| CourtLinkError::Storage(format!("invalid date: {e}")))?
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtlink_shared::ProviderKind;
    use serde_json::json;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("cl_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn facility(name: &str) -> FacilityRecord {
        FacilityRecord {
            name: Some(name.into()),
            address: Some("1 Sheriffs Plaza".into()),
            city: Some("Springfield".into()),
            state: Some("IL".into()),
            mandatory: Some(1200),
            ..Default::default()
        }
    }

    fn address(county: Option<&str>) -> NewNormalizedAddress {
        NewNormalizedAddress {
            source: ProviderKind::Positionstack,
            query: "1 Sheriffs Plaza, Springfield, IL".into(),
            fields: AddressFields {
                street: Some("1 Sheriffs Plaza".into()),
                city: Some("Springfield".into()),
                state: Some("IL".into()),
                zip: Some("62701".into()),
                county: county.map(String::from),
                latitude: Some(39.8017),
                longitude: Some(-89.6437),
                label: Some("1 Sheriffs Plaza, Springfield, IL, USA".into()),
            },
            raw_payload: json!({"county": county}),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
        let tables = storage.list_tables().await.expect("tables");
        for table in AUDITED_TABLES {
            assert!(tables.iter().any(|t| t == table), "missing {table}");
        }
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("cl_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn facility_insert_lookup_and_partial_update() {
        let storage = test_storage().await;
        let id = storage
            .insert_facility(&facility("Sangamon County Detention Center"))
            .await
            .expect("insert");

        let found = storage
            .get_facility_by_name("sangamon county detention center")
            .await
            .expect("get")
            .expect("case-insensitive hit");
        assert_eq!(found.id, id);
        assert_eq!(found.record.mandatory, Some(1200));
        assert_eq!(found.normalized_address_id, None);

        storage
            .update_facility_fields(
                id,
                &[
                    (FacilityField::Mandatory, FieldValue::Integer(Some(1300))),
                    (FacilityField::Aor, FieldValue::Text(Some("CHI".into()))),
                ],
            )
            .await
            .expect("update");
        let found = storage
            .get_facility_by_name("Sangamon County Detention Center")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.record.mandatory, Some(1300));
        assert_eq!(found.record.aor.as_deref(), Some("CHI"));
        assert_eq!(found.record.city.as_deref(), Some("Springfield"));
    }

    #[tokio::test]
    async fn duplicate_facility_name_is_rejected() {
        let storage = test_storage().await;
        storage.insert_facility(&facility("Lake County Jail")).await.unwrap();
        assert!(storage.insert_facility(&facility("LAKE COUNTY JAIL")).await.is_err());
    }

    #[tokio::test]
    async fn normalized_address_snapshot() {
        let storage = test_storage().await;
        let id = storage
            .insert_normalized_address(&address(Some("Sangamon")))
            .await
            .expect("insert address");
        let stored = storage
            .get_normalized_address(id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(stored.source, "Positionstack");
        assert_eq!(stored.fields.county.as_deref(), Some("Sangamon"));
        assert_eq!(stored.fields.latitude, Some(39.8017));
        assert!(stored.raw_payload.contains("Sangamon"));
        assert!(storage.get_normalized_address(id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn court_upsert_reports_changes() {
        let storage = test_storage().await;
        let (id, kind) = storage
            .upsert_court("Central District of Illinois", "ilcd", None)
            .await
            .unwrap();
        assert_eq!(kind, UpsertKind::Inserted);

        let (same, kind) = storage
            .upsert_court("Central District of Illinois", "ilcd", None)
            .await
            .unwrap();
        assert_eq!((same, kind), (id, UpsertKind::Unchanged));

        let (_, kind) = storage
            .upsert_court(
                "Central District of Illinois",
                "ilcd",
                Some("https://www.ilcd.uscourts.gov"),
            )
            .await
            .unwrap();
        assert_eq!(kind, UpsertKind::Updated);
        let court = storage.get_court(id).await.unwrap().unwrap();
        assert_eq!(court.url.as_deref(), Some("https://www.ilcd.uscourts.gov"));
    }

    #[tokio::test]
    async fn county_lookup_substring_and_state() {
        let storage = test_storage().await;
        let (ilcd, _) = storage.upsert_court("Central IL", "ilcd", None).await.unwrap();
        let (mssd, _) = storage.upsert_court("Southern MS", "mssd", None).await.unwrap();
        assert!(storage.insert_court_county(ilcd, "Sangamon", "IL").await.unwrap());
        assert!(!storage.insert_court_county(ilcd, "Sangamon", "IL").await.unwrap());
        storage.insert_court_county(mssd, "Adams", "MS").await.unwrap();

        let (county, court) = storage
            .find_court_for_county("Sangamon County", "il")
            .await
            .unwrap()
            .expect("query containing stored name");
        assert_eq!(county.county_name, "Sangamon");
        assert_eq!(court.id, ilcd);

        let (_, court) = storage
            .find_court_for_county("ADAMS", "MS")
            .await
            .unwrap()
            .expect("case-insensitive");
        assert_eq!(court.id, mssd);

        assert!(storage.find_court_for_county("Adams", "IL").await.unwrap().is_none());
        assert!(storage.find_court_for_county("", "IL").await.unwrap().is_none());
        assert!(storage.find_court_for_county("Sangamon", "").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn substring_match_takes_first_inserted_county() {
        let storage = test_storage().await;
        let (woods, _) = storage
            .upsert_court("District of Minnesota A", "mna", None)
            .await
            .unwrap();
        let (lake, _) = storage.upsert_court("District of Minnesota B", "mnb", None).await.unwrap();
        storage.insert_court_county(woods, "Lake of the Woods", "MN").await.unwrap();
        storage.insert_court_county(lake, "Lake", "MN").await.unwrap();

        // Known limitation: "Lake" is contained in "Lake of the Woods".
        let (county, _) = storage
            .find_court_for_county("Lake", "MN")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(county.county_name, "Lake of the Woods");
    }

    #[tokio::test]
    async fn orphaned_counties_are_reported_and_never_matched() {
        let storage = test_storage().await;
        let (ilcd, _) = storage.upsert_court("Central IL", "ilcd", None).await.unwrap();
        storage.upsert_court("Northern IL", "ilnd", None).await.unwrap();
        storage.insert_court_county(ilcd, "Sangamon", "IL").await.unwrap();
        storage.insert_court_county(999, "Nowhere", "ZZ").await.unwrap();

        let orphans = storage.orphaned_court_counties().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].court_id, 999);
        assert!(storage.find_court_for_county("Nowhere", "ZZ").await.unwrap().is_none());

        assert_eq!(storage.court_coverage().await.unwrap(), (1, 2));
    }

    #[tokio::test]
    async fn rollback_discards_record_writes() {
        let storage = test_storage().await;
        let tx = storage.begin().await.expect("begin");
        storage.insert_facility(&facility("Rolled Back")).await.unwrap();
        tx.rollback().await.expect("rollback");
        assert!(storage.get_facility_by_name("Rolled Back").await.unwrap().is_none());

        let tx = storage.begin().await.expect("begin again");
        storage.insert_facility(&facility("Committed")).await.unwrap();
        tx.commit().await.expect("commit");
        assert_eq!(storage.count_rows("facilities").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_commit_leaves_connection_usable() {
        let path = std::env::temp_dir().join(format!("cl_test_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&path).await.unwrap();
        storage.set_busy_timeout(Duration::ZERO).await.unwrap();

        // A second connection holding a read transaction blocks COMMIT.
        let reader = Storage::open(&path).await.unwrap();
        reader.conn.execute_batch("BEGIN").await.unwrap();
        let mut rows = reader
            .conn
            .query("SELECT COUNT(*) FROM facilities", params![])
            .await
            .unwrap();
        rows.next().await.unwrap();
        drop(rows);

        let tx = storage.begin().await.unwrap();
        storage.insert_facility(&facility("Blocked")).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert!(storage.conn.is_autocommit());

        reader.conn.execute_batch("COMMIT").await.unwrap();

        let tx = storage.begin().await.expect("begin after failed commit");
        storage.insert_facility(&facility("Next")).await.unwrap();
        tx.commit().await.expect("commit");
        assert!(storage.get_facility_by_name("Blocked").await.unwrap().is_none());
        assert!(storage.get_facility_by_name("Next").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn facility_link_audit() {
        let storage = test_storage().await;
        let id = storage.insert_facility(&facility("Linked")).await.unwrap();
        let addr = storage.insert_normalized_address(&address(None)).await.unwrap();
        storage.set_facility_address(id, Some(addr)).await.unwrap();
        let other = storage.insert_facility(&facility("Dangling")).await.unwrap();
        storage.set_facility_address(other, Some(addr + 50)).await.unwrap();
        storage.set_facility_court(other, 4242).await.unwrap();

        let links = storage.facility_links().await.unwrap();
        assert_eq!(links.total, 2);
        assert_eq!(links.with_address, 2);
        assert_eq!(links.with_court, 1);
        assert_eq!(links.dangling_address_refs, 1);
        assert_eq!(links.dangling_court_refs, 1);
        assert_eq!(links.addresses_without_coordinates, 0);
    }

    #[tokio::test]
    async fn count_rows_rejects_injection() {
        let storage = test_storage().await;
        assert_eq!(storage.count_rows("courts").await.unwrap(), 0);
        assert!(storage.count_rows("courts; DROP TABLE courts").await.is_err());
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let storage = test_storage().await;
        let run_id = storage
            .insert_run("import", Some("fixtures/facilities.csv"))
            .await
            .expect("insert run");
        assert!(!run_id.is_empty());
        storage
            .finish_run(&run_id, r#"{"records_added": 4}"#)
            .await
            .expect("finish run");
        let stats = storage.run_stats(&run_id).await.unwrap();
        assert!(stats.unwrap().contains("records_added"));
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("cl_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_facility(&facility("A")).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro.insert_facility(&facility("B")).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
        assert!(ro.begin().await.is_err());
        assert_eq!(ro.count_rows("facilities").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn readonly_open_requires_existing_file() {
        let tmp = std::env::temp_dir().join(format!("cl_test_{}.db", Uuid::now_v7()));
        let err = Storage::open_readonly(&tmp).await.err().expect("missing db");
        assert!(err.is_config());
        assert!(!tmp.exists());
    }
}
