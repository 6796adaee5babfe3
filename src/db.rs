// 🗄️ Store (SQLite) - Raw batches, entities, processed outputs
//
// Raw rows are append-only: a re-imported file is skipped via UNIQUE
// constraints. Entity and processed tables are written to `stg_*` copies
// first and swapped into the live tables in one transaction once the run has
// been validated.

use crate::entities::{Address, Geocode, Individual, IndividualAddressLink, LinkRole};
use crate::error::{LinkageError, Result};
use crate::identity::{MemoEntry, ResolutionLogEntry, ResolutionMemo, ReviewItem};
use crate::linker::{ProcessedDonation, ProcessedVoter};
use crate::matching::MatchMethod;
use crate::normalizer::NormalizedName;
use crate::parser::{RawBatch, RawRow, SourceSystem};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// SCHEMA
// ============================================================================

/// Tables regenerated on every run. Each exists live and as `stg_<name>`.
const RUN_TABLES: &[(&str, &str)] = &[
    (
        "individuals",
        "individual_id TEXT PRIMARY KEY,
         first_name TEXT NOT NULL,
         middle_name TEXT NOT NULL,
         last_name TEXT NOT NULL,
         suffix TEXT NOT NULL,
         full_name TEXT NOT NULL,
         created_at TEXT NOT NULL,
         updated_at TEXT NOT NULL",
    ),
    (
        "addresses",
        "address_id TEXT PRIMARY KEY,
         canonical_key TEXT NOT NULL UNIQUE,
         number TEXT NOT NULL,
         street TEXT NOT NULL,
         unit TEXT NOT NULL,
         city TEXT NOT NULL,
         state TEXT NOT NULL,
         zip TEXT,
         zip_raw TEXT NOT NULL DEFAULT '',
         county TEXT NOT NULL,
         latitude REAL,
         longitude REAL,
         geocode_source TEXT,
         geocode_date TEXT,
         created_at TEXT NOT NULL,
         updated_at TEXT NOT NULL",
    ),
    (
        "individual_addresses",
        "individual_id TEXT NOT NULL,
         address_id TEXT NOT NULL,
         role TEXT NOT NULL,
         valid_from TEXT NOT NULL,
         valid_to TEXT,
         source TEXT NOT NULL,
         is_current INTEGER NOT NULL",
    ),
    (
        "voters",
        "voter_id TEXT PRIMARY KEY,
         batch_id TEXT NOT NULL,
         row_number INTEGER NOT NULL,
         individual_id TEXT,
         address_id TEXT,
         match_method TEXT NOT NULL,
         match_confidence REAL NOT NULL,
         review_flag INTEGER NOT NULL,
         first_name TEXT NOT NULL,
         middle_name TEXT NOT NULL,
         last_name TEXT NOT NULL,
         suffix TEXT NOT NULL,
         street_address TEXT NOT NULL,
         city TEXT NOT NULL,
         state TEXT NOT NULL,
         zip TEXT NOT NULL,
         county TEXT NOT NULL,
         party TEXT NOT NULL,
         status TEXT NOT NULL,
         registration_date TEXT NOT NULL,
         birth_year TEXT NOT NULL,
         extra_fields TEXT NOT NULL",
    ),
    (
        "donations",
        "donation_id TEXT PRIMARY KEY,
         batch_id TEXT NOT NULL,
         row_number INTEGER NOT NULL,
         individual_id TEXT,
         address_id TEXT,
         match_method TEXT NOT NULL,
         match_confidence REAL NOT NULL,
         review_flag INTEGER NOT NULL,
         contributor_name TEXT NOT NULL,
         street_address TEXT NOT NULL,
         city TEXT NOT NULL,
         state TEXT NOT NULL,
         zip TEXT NOT NULL,
         employer TEXT NOT NULL,
         occupation TEXT NOT NULL,
         amount TEXT NOT NULL,
         contribution_date TEXT NOT NULL,
         recipient TEXT NOT NULL,
         election_year TEXT NOT NULL,
         extra_fields TEXT NOT NULL",
    ),
    (
        "record_resolutions",
        "source TEXT NOT NULL,
         record_key TEXT NOT NULL,
         fingerprint TEXT NOT NULL,
         individual_id TEXT,
         match_method TEXT NOT NULL,
         match_confidence REAL NOT NULL,
         review_flag INTEGER NOT NULL,
         PRIMARY KEY (source, record_key)",
    ),
];

/// Which copy of the run tables to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSet {
    Live,
    Staging,
}

impl TableSet {
    fn table(&self, name: &str) -> String {
        match self {
            TableSet::Live => name.to_string(),
            TableSet::Staging => format!("stg_{}", name),
        }
    }
}

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Raw extracts (append-only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS raw_batches (
            batch_id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            source_file TEXT NOT NULL,
            imported_at TEXT NOT NULL,
            headers TEXT NOT NULL,
            unknown_columns TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            ragged_rows TEXT NOT NULL DEFAULT '[]'
        )",
        [],
    )?;

    for source in [SourceSystem::Voter, SourceSystem::Donation] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    batch_id TEXT NOT NULL,
                    row_number INTEGER NOT NULL,
                    fields TEXT NOT NULL,
                    UNIQUE (batch_id, row_number)
                )",
                raw_table(source)
            ),
            [],
        )?;
    }

    // ==========================================================================
    // Run tables: live + staging
    // ==========================================================================
    for (name, columns) in RUN_TABLES {
        for set in [TableSet::Live, TableSet::Staging] {
            conn.execute(
                &format!("CREATE TABLE IF NOT EXISTS {} ({})", set.table(name), columns),
                [],
            )?;
        }
    }

    // ==========================================================================
    // Run history, resolution log, review queue
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            as_of TEXT NOT NULL,
            batch_ids TEXT NOT NULL,
            status TEXT NOT NULL,
            report TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS resolution_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            source TEXT NOT NULL,
            record_key TEXT NOT NULL,
            candidate TEXT NOT NULL,
            match_method TEXT NOT NULL,
            match_confidence REAL NOT NULL,
            individual_id TEXT,
            ambiguous INTEGER NOT NULL,
            candidate_count INTEGER NOT NULL,
            reused INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS review_queue (
            source TEXT NOT NULL,
            record_key TEXT NOT NULL,
            run_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            competing TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (source, record_key)
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_resolution_log_run ON resolution_log(run_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_links_individual ON individual_addresses(individual_id)",
        [],
    )?;

    Ok(())
}

fn raw_table(source: SourceSystem) -> &'static str {
    match source {
        SourceSystem::Voter => "raw_voters",
        SourceSystem::Donation => "raw_donations",
    }
}

// ============================================================================
// RAW BATCHES
// ============================================================================

/// Import summary for one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInfo {
    pub batch_id: String,
    pub source: SourceSystem,
    pub source_file: String,
    pub imported_at: DateTime<Utc>,
    pub unknown_columns: Vec<String>,
    pub row_count: usize,

    /// Row numbers whose width differed from the header
    pub ragged_rows: Vec<usize>,
}

/// Store a raw batch. Returns the number of rows inserted (0 for a re-import).
pub fn insert_raw_batch(conn: &mut Connection, batch: &RawBatch) -> Result<usize> {
    let tx = conn.transaction()?;

    let result = tx.execute(
        "INSERT INTO raw_batches (
            batch_id, source, source_file, imported_at, headers, unknown_columns, row_count,
            ragged_rows
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            batch.batch_id,
            batch.source.code(),
            batch.source_file,
            batch.imported_at.to_rfc3339(),
            serde_json::to_string(&batch.headers)?,
            serde_json::to_string(&batch.unknown_columns)?,
            batch.rows.len() as i64,
            serde_json::to_string(&batch.ragged_rows)?,
        ],
    );
    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            info!(batch_id = %batch.batch_id, file = %batch.source_file, "batch already imported, skipping");
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    }

    let mut inserted = 0;
    let mut duplicates = 0;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} (batch_id, row_number, fields) VALUES (?1, ?2, ?3)",
            raw_table(batch.source)
        ))?;
        for row in &batch.rows {
            let fields = serde_json::to_string(&row.fields)?;
            match stmt.execute(params![batch.batch_id, row.row_number as i64, fields]) {
                Ok(_) => inserted += 1,
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    duplicates += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    tx.commit()?;

    info!(
        batch_id = %batch.batch_id,
        source = %batch.source,
        inserted,
        duplicates,
        "raw batch stored"
    );
    Ok(inserted)
}

fn batch_info_from_row(row: &Row) -> rusqlite::Result<BatchInfo> {
    let source: String = row.get(1)?;
    let unknown: String = row.get(4)?;
    let row_count: i64 = row.get(5)?;
    let ragged: String = row.get(6)?;
    Ok(BatchInfo {
        batch_id: row.get(0)?,
        source: source_from_sql(1, &source)?,
        source_file: row.get(2)?,
        imported_at: timestamp_from_sql(3, &row.get::<_, String>(3)?)?,
        unknown_columns: json_from_sql(4, &unknown)?,
        row_count: row_count as usize,
        ragged_rows: json_from_sql(6, &ragged)?,
    })
}

/// Most recently imported batch for a source
pub fn latest_batch(conn: &Connection, source: SourceSystem) -> Result<Option<BatchInfo>> {
    let info = conn
        .query_row(
            "SELECT batch_id, source, source_file, imported_at, unknown_columns, row_count, ragged_rows
             FROM raw_batches
             WHERE source = ?1
             ORDER BY rowid DESC
             LIMIT 1",
            params![source.code()],
            batch_info_from_row,
        )
        .optional()?;
    Ok(info)
}

pub fn list_batches(conn: &Connection) -> Result<Vec<BatchInfo>> {
    let mut stmt = conn.prepare(
        "SELECT batch_id, source, source_file, imported_at, unknown_columns, row_count, ragged_rows
         FROM raw_batches
         ORDER BY rowid",
    )?;
    let batches = stmt
        .query_map([], batch_info_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(batches)
}

/// Reassemble a stored batch, rows in extract order
pub fn load_batch(conn: &Connection, batch_id: &str) -> Result<RawBatch> {
    let info = conn
        .query_row(
            "SELECT batch_id, source, source_file, imported_at, unknown_columns, row_count, ragged_rows
             FROM raw_batches WHERE batch_id = ?1",
            params![batch_id],
            batch_info_from_row,
        )
        .optional()?
        .ok_or_else(|| LinkageError::NotFound(format!("batch {}", batch_id)))?;

    let headers_json: String = conn.query_row(
        "SELECT headers FROM raw_batches WHERE batch_id = ?1",
        params![batch_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT row_number, fields FROM {} WHERE batch_id = ?1 ORDER BY row_number",
        raw_table(info.source)
    ))?;
    let rows = stmt
        .query_map(params![batch_id], |row| {
            let row_number: i64 = row.get(0)?;
            let fields: String = row.get(1)?;
            Ok(RawRow {
                row_number: row_number as usize,
                fields: json_from_sql(1, &fields)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(RawBatch {
        batch_id: info.batch_id,
        source: info.source,
        source_file: info.source_file,
        imported_at: info.imported_at,
        headers: serde_json::from_str(&headers_json)?,
        unknown_columns: info.unknown_columns,
        ragged_rows: info.ragged_rows,
        rows,
    })
}

// ============================================================================
// ENTITIES
// ============================================================================

pub fn load_individuals(conn: &Connection, set: TableSet) -> Result<Vec<Individual>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT individual_id, first_name, middle_name, last_name, suffix, created_at, updated_at
         FROM {} ORDER BY individual_id",
        set.table("individuals")
    ))?;
    let individuals = stmt
        .query_map([], |row| {
            let first: String = row.get(1)?;
            Ok(Individual {
                id: row.get(0)?,
                name: NormalizedName {
                    first_canonical: first.clone(),
                    first,
                    middle: row.get(2)?,
                    last: row.get(3)?,
                    suffix: row.get(4)?,
                },
                created_at: timestamp_from_sql(5, &row.get::<_, String>(5)?)?,
                updated_at: timestamp_from_sql(6, &row.get::<_, String>(6)?)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(individuals)
}

pub fn load_addresses(conn: &Connection, set: TableSet) -> Result<Vec<Address>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT address_id, canonical_key, number, street, unit, city, state, zip, county,
                latitude, longitude, geocode_source, geocode_date, created_at, updated_at, zip_raw
         FROM {} ORDER BY address_id",
        set.table("addresses")
    ))?;
    let addresses = stmt
        .query_map([], |row| {
            let latitude: Option<f64> = row.get(9)?;
            let longitude: Option<f64> = row.get(10)?;
            let source: Option<String> = row.get(11)?;
            let date: Option<String> = row.get(12)?;
            let geocode = match (latitude, longitude, source) {
                (Some(lat), Some(lon), Some(source)) => {
                    let geocode = Geocode::new(lat, lon, &source);
                    Some(match date {
                        Some(d) => geocode.with_date(date_from_sql(12, &d)?),
                        None => geocode,
                    })
                }
                _ => None,
            };
            Ok(Address {
                id: row.get(0)?,
                canonical_key: row.get(1)?,
                number: row.get(2)?,
                street: row.get(3)?,
                unit: row.get(4)?,
                city: row.get(5)?,
                state: row.get(6)?,
                zip: row.get(7)?,
                zip_raw: row.get(15)?,
                county: row.get(8)?,
                geocode,
                created_at: timestamp_from_sql(13, &row.get::<_, String>(13)?)?,
                updated_at: timestamp_from_sql(14, &row.get::<_, String>(14)?)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(addresses)
}

pub fn load_links(conn: &Connection, set: TableSet) -> Result<Vec<IndividualAddressLink>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT individual_id, address_id, role, valid_from, valid_to, source
         FROM {} ORDER BY rowid",
        set.table("individual_addresses")
    ))?;
    let links = stmt
        .query_map([], |row| {
            let role: String = row.get(2)?;
            let valid_to: Option<String> = row.get(4)?;
            let source: String = row.get(5)?;
            Ok(IndividualAddressLink {
                individual_id: row.get(0)?,
                address_id: row.get(1)?,
                role: LinkRole::parse(&role).ok_or_else(|| invalid_text(2, &role))?,
                valid_from: date_from_sql(3, &row.get::<_, String>(3)?)?,
                valid_to: valid_to.map(|d| date_from_sql(4, &d)).transpose()?,
                source: source_from_sql(5, &source)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(links)
}

pub fn load_memo(conn: &Connection) -> Result<ResolutionMemo> {
    let mut stmt = conn.prepare(
        "SELECT source, record_key, fingerprint, individual_id, match_method,
                match_confidence, review_flag
         FROM record_resolutions",
    )?;
    let entries = stmt
        .query_map([], |row| {
            let source: String = row.get(0)?;
            let method: String = row.get(4)?;
            Ok((
                (source_from_sql(0, &source)?, row.get::<_, String>(1)?),
                MemoEntry {
                    fingerprint: row.get(2)?,
                    individual_id: row.get(3)?,
                    method: method_from_sql(4, &method)?,
                    confidence: row.get(5)?,
                    review: row.get(6)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<ResolutionMemo>>()?;
    Ok(entries)
}

// ============================================================================
// PROCESSED TABLES
// ============================================================================

pub fn load_processed_voters(conn: &Connection, set: TableSet) -> Result<Vec<ProcessedVoter>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT voter_id, batch_id, row_number, individual_id, address_id, match_method,
                match_confidence, review_flag, first_name, middle_name, last_name, suffix,
                street_address, city, state, zip, county, party, status, registration_date,
                birth_year, extra_fields
         FROM {} ORDER BY row_number, voter_id",
        set.table("voters")
    ))?;
    let voters = stmt
        .query_map([], |row| {
            let row_number: i64 = row.get(2)?;
            let method: String = row.get(5)?;
            let extra: String = row.get(21)?;
            Ok(ProcessedVoter {
                voter_id: row.get(0)?,
                batch_id: row.get(1)?,
                row_number: row_number as usize,
                individual_id: row.get(3)?,
                address_id: row.get(4)?,
                match_method: method_from_sql(5, &method)?,
                match_confidence: row.get(6)?,
                review_flag: row.get(7)?,
                first_name: row.get(8)?,
                middle_name: row.get(9)?,
                last_name: row.get(10)?,
                suffix: row.get(11)?,
                street_address: row.get(12)?,
                city: row.get(13)?,
                state: row.get(14)?,
                zip: row.get(15)?,
                county: row.get(16)?,
                party: row.get(17)?,
                status: row.get(18)?,
                registration_date: row.get(19)?,
                birth_year: row.get(20)?,
                extra_fields: json_from_sql(21, &extra)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(voters)
}

pub fn load_processed_donations(conn: &Connection, set: TableSet) -> Result<Vec<ProcessedDonation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT donation_id, batch_id, row_number, individual_id, address_id, match_method,
                match_confidence, review_flag, contributor_name, street_address, city, state,
                zip, employer, occupation, amount, contribution_date, recipient, election_year,
                extra_fields
         FROM {} ORDER BY row_number, donation_id",
        set.table("donations")
    ))?;
    let donations = stmt
        .query_map([], |row| {
            let row_number: i64 = row.get(2)?;
            let method: String = row.get(5)?;
            let extra: String = row.get(19)?;
            Ok(ProcessedDonation {
                donation_id: row.get(0)?,
                batch_id: row.get(1)?,
                row_number: row_number as usize,
                individual_id: row.get(3)?,
                address_id: row.get(4)?,
                match_method: method_from_sql(5, &method)?,
                match_confidence: row.get(6)?,
                review_flag: row.get(7)?,
                contributor_name: row.get(8)?,
                street_address: row.get(9)?,
                city: row.get(10)?,
                state: row.get(11)?,
                zip: row.get(12)?,
                employer: row.get(13)?,
                occupation: row.get(14)?,
                amount: row.get(15)?,
                contribution_date: row.get(16)?,
                recipient: row.get(17)?,
                election_year: row.get(18)?,
                extra_fields: json_from_sql(19, &extra)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(donations)
}

pub fn count_rows(conn: &Connection, set: TableSet, name: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", set.table(name)),
        [],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

// ============================================================================
// STAGING + ATOMIC SWAP
// ============================================================================

/// Everything a run produces, borrowed from the in-memory stores
pub struct RunOutput<'a> {
    pub individuals: Vec<&'a Individual>,
    pub addresses: Vec<&'a Address>,
    pub links: Vec<&'a IndividualAddressLink>,
    pub voters: &'a [ProcessedVoter],
    pub donations: &'a [ProcessedDonation],
    pub memo: &'a ResolutionMemo,
}

/// Replace the staging tables with this run's output
pub fn write_staging(conn: &mut Connection, output: &RunOutput) -> Result<()> {
    let tx = conn.transaction()?;
    for (name, _) in RUN_TABLES {
        tx.execute(&format!("DELETE FROM {}", TableSet::Staging.table(name)), [])?;
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO stg_individuals (
                individual_id, first_name, middle_name, last_name, suffix, full_name,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for individual in &output.individuals {
            stmt.execute(params![
                individual.id,
                individual.name.first,
                individual.name.middle,
                individual.name.last,
                individual.name.suffix,
                individual.full_name(),
                individual.created_at.to_rfc3339(),
                individual.updated_at.to_rfc3339(),
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO stg_addresses (
                address_id, canonical_key, number, street, unit, city, state, zip, county,
                latitude, longitude, geocode_source, geocode_date, created_at, updated_at, zip_raw
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )?;
        for address in &output.addresses {
            let geocode = address.geocode.as_ref();
            stmt.execute(params![
                address.id,
                address.canonical_key,
                address.number,
                address.street,
                address.unit,
                address.city,
                address.state,
                address.zip,
                address.county,
                geocode.map(|g| g.latitude),
                geocode.map(|g| g.longitude),
                geocode.map(|g| g.source.clone()),
                geocode.and_then(|g| g.geocoded_on).map(|d| d.to_string()),
                address.created_at.to_rfc3339(),
                address.updated_at.to_rfc3339(),
                address.zip_raw,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO stg_individual_addresses (
                individual_id, address_id, role, valid_from, valid_to, source, is_current
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for link in &output.links {
            stmt.execute(params![
                link.individual_id,
                link.address_id,
                link.role.as_str(),
                link.valid_from.to_string(),
                link.valid_to.map(|d| d.to_string()),
                link.source.code(),
                link.is_current(),
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO stg_voters (
                voter_id, batch_id, row_number, individual_id, address_id, match_method,
                match_confidence, review_flag, first_name, middle_name, last_name, suffix,
                street_address, city, state, zip, county, party, status, registration_date,
                birth_year, extra_fields
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                      ?17, ?18, ?19, ?20, ?21, ?22)",
        )?;
        for v in output.voters {
            stmt.execute(params![
                v.voter_id,
                v.batch_id,
                v.row_number as i64,
                v.individual_id,
                v.address_id,
                v.match_method.as_str(),
                v.match_confidence,
                v.review_flag,
                v.first_name,
                v.middle_name,
                v.last_name,
                v.suffix,
                v.street_address,
                v.city,
                v.state,
                v.zip,
                v.county,
                v.party,
                v.status,
                v.registration_date,
                v.birth_year,
                serde_json::to_string(&v.extra_fields)?,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO stg_donations (
                donation_id, batch_id, row_number, individual_id, address_id, match_method,
                match_confidence, review_flag, contributor_name, street_address, city, state,
                zip, employer, occupation, amount, contribution_date, recipient, election_year,
                extra_fields
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                      ?17, ?18, ?19, ?20)",
        )?;
        for d in output.donations {
            stmt.execute(params![
                d.donation_id,
                d.batch_id,
                d.row_number as i64,
                d.individual_id,
                d.address_id,
                d.match_method.as_str(),
                d.match_confidence,
                d.review_flag,
                d.contributor_name,
                d.street_address,
                d.city,
                d.state,
                d.zip,
                d.employer,
                d.occupation,
                d.amount,
                d.contribution_date,
                d.recipient,
                d.election_year,
                serde_json::to_string(&d.extra_fields)?,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO stg_record_resolutions (
                source, record_key, fingerprint, individual_id, match_method,
                match_confidence, review_flag
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for ((source, record_key), entry) in output.memo {
            stmt.execute(params![
                source.code(),
                record_key,
                entry.fingerprint,
                entry.individual_id,
                entry.method.as_str(),
                entry.confidence,
                entry.review,
            ])?;
        }
    }

    tx.commit()?;
    debug!(
        voters = output.voters.len(),
        donations = output.donations.len(),
        "staging tables written"
    );
    Ok(())
}

/// Swap staging into live in a single transaction
pub fn commit_staging(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    for (name, _) in RUN_TABLES {
        let live = TableSet::Live.table(name);
        let staging = TableSet::Staging.table(name);
        tx.execute(&format!("DELETE FROM {}", live), [])?;
        tx.execute(&format!("INSERT INTO {} SELECT * FROM {}", live, staging), [])?;
        tx.execute(&format!("DELETE FROM {}", staging), [])?;
    }
    tx.commit()?;
    Ok(())
}

pub fn discard_staging(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    for (name, _) in RUN_TABLES {
        tx.execute(&format!("DELETE FROM {}", TableSet::Staging.table(name)), [])?;
    }
    tx.commit()?;
    Ok(())
}

// ============================================================================
// RUN HISTORY, LOG, REVIEW QUEUE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Committed,
    Rejected,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Committed => "committed",
            RunStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub as_of: NaiveDate,
    pub batch_ids: Vec<String>,
    pub status: RunStatus,

    /// Validation report, as JSON
    pub report: String,
}

pub fn insert_run(conn: &Connection, run: &RunRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO pipeline_runs (
            run_id, started_at, finished_at, as_of, batch_ids, status, report
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            run.run_id,
            run.started_at.to_rfc3339(),
            run.finished_at.to_rfc3339(),
            run.as_of.to_string(),
            serde_json::to_string(&run.batch_ids)?,
            run.status.as_str(),
            run.report,
        ],
    )?;
    Ok(())
}

/// Most recent run, optionally only committed ones
pub fn last_run(conn: &Connection, committed_only: bool) -> Result<Option<RunRecord>> {
    let sql = if committed_only {
        "SELECT run_id, started_at, finished_at, as_of, batch_ids, status, report
         FROM pipeline_runs WHERE status = 'committed'
         ORDER BY rowid DESC LIMIT 1"
    } else {
        "SELECT run_id, started_at, finished_at, as_of, batch_ids, status, report
         FROM pipeline_runs ORDER BY rowid DESC LIMIT 1"
    };
    let run = conn
        .query_row(sql, [], |row| {
            let batch_ids: String = row.get(4)?;
            let status: String = row.get(5)?;
            Ok(RunRecord {
                run_id: row.get(0)?,
                started_at: timestamp_from_sql(1, &row.get::<_, String>(1)?)?,
                finished_at: timestamp_from_sql(2, &row.get::<_, String>(2)?)?,
                as_of: date_from_sql(3, &row.get::<_, String>(3)?)?,
                batch_ids: json_from_sql(4, &batch_ids)?,
                status: match status.as_str() {
                    "committed" => RunStatus::Committed,
                    "rejected" => RunStatus::Rejected,
                    _ => return Err(invalid_text(5, &status)),
                },
                report: row.get(6)?,
            })
        })
        .optional()?;
    Ok(run)
}

pub fn insert_resolution_log(conn: &mut Connection, run_id: &str, entries: &[ResolutionLogEntry]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO resolution_log (
                run_id, source, record_key, candidate, match_method, match_confidence,
                individual_id, ambiguous, candidate_count, reused
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for entry in entries {
            stmt.execute(params![
                run_id,
                entry.source.code(),
                entry.record_key,
                entry.candidate,
                entry.method.as_str(),
                entry.confidence,
                entry.individual_id,
                entry.ambiguous,
                entry.candidate_count as i64,
                entry.reused,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Queue ambiguous resolutions. A record already queued keeps its first entry.
pub fn insert_reviews(conn: &mut Connection, run_id: &str, items: &[ReviewItem]) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO review_queue (
                source, record_key, run_id, reason, competing, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        let now = Utc::now().to_rfc3339();
        for item in items {
            inserted += stmt.execute(params![
                item.source.code(),
                item.record_key,
                run_id,
                item.reason,
                serde_json::to_string(&item.competing)?,
                now,
            ])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRow {
    pub source: SourceSystem,
    pub record_key: String,
    pub run_id: String,
    pub reason: String,
    pub competing: Vec<String>,
}

pub fn list_reviews(conn: &Connection) -> Result<Vec<ReviewRow>> {
    let mut stmt = conn.prepare(
        "SELECT source, record_key, run_id, reason, competing
         FROM review_queue ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let source: String = row.get(0)?;
            let competing: String = row.get(4)?;
            Ok(ReviewRow {
                source: source_from_sql(0, &source)?,
                record_key: row.get(1)?,
                run_id: row.get(2)?,
                reason: row.get(3)?,
                competing: json_from_sql(4, &competing)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ============================================================================
// COLUMN CONVERSIONS
// ============================================================================

fn invalid_text(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unexpected value '{}'", value).into(),
    )
}

fn source_from_sql(idx: usize, value: &str) -> rusqlite::Result<SourceSystem> {
    SourceSystem::parse(value).ok_or_else(|| invalid_text(idx, value))
}

fn method_from_sql(idx: usize, value: &str) -> rusqlite::Result<MatchMethod> {
    MatchMethod::parse(value).ok_or_else(|| invalid_text(idx, value))
}

fn timestamp_from_sql(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn date_from_sql(idx: usize, value: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_from_sql<T: serde::de::DeserializeOwned>(idx: usize, value: &str) -> rusqlite::Result<T> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// TESTS
// ============================================================================
