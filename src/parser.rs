// 🏗️ Extract Parsers - One parser per source system
// Reads a CSV extract into an immutable raw batch (every column kept), then
// projects raw rows into typed voter/donation records.

use crate::entities::Geocode;
use crate::error::{LinkageError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

// ============================================================================
// CORE TYPES
// ============================================================================

/// Which external extract a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    Voter,
    Donation,
}

impl SourceSystem {
    /// Human-readable name for display
    pub fn name(&self) -> &'static str {
        match self {
            SourceSystem::Voter => "Voter registration file",
            SourceSystem::Donation => "Campaign donation file",
        }
    }

    /// Short code used in tables and on the command line
    pub fn code(&self) -> &'static str {
        match self {
            SourceSystem::Voter => "voter",
            SourceSystem::Donation => "donation",
        }
    }

    pub fn parse(code: &str) -> Option<SourceSystem> {
        match code.trim().to_lowercase().as_str() {
            "voter" | "voters" => Some(SourceSystem::Voter),
            "donation" | "donations" => Some(SourceSystem::Donation),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// One unmodified extract row: normalized header → value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    /// Line in the original file (header is line 1)
    pub row_number: usize,
    pub fields: BTreeMap<String, String>,
}

impl RawRow {
    /// Trimmed value of a column, empty if absent
    pub fn get(&self, column: &str) -> &str {
        self.fields.get(column).map(|v| v.trim()).unwrap_or("")
    }
}

/// An imported extract. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBatch {
    /// SHA-256 of source system + file content
    pub batch_id: String,
    pub source: SourceSystem,
    pub source_file: String,
    pub imported_at: DateTime<Utc>,

    /// Headers as found, lowercased and trimmed
    pub headers: Vec<String>,

    /// Headers outside the column contract (schema drift)
    pub unknown_columns: Vec<String>,

    /// Rows whose cell count differs from the header's
    #[serde(default)]
    pub ragged_rows: Vec<usize>,

    pub rows: Vec<RawRow>,
}

// ============================================================================
// PARSER TRAIT
// ============================================================================

pub trait ExtractParser: Send + Sync {
    /// Source system this parser handles
    fn source_system(&self) -> SourceSystem;

    /// Column contract, lowercase
    fn known_columns(&self) -> &'static [&'static str];

    /// Key fields a row cannot be processed without
    fn required_columns(&self) -> &'static [&'static str];

    fn parse(&self, file_path: &Path) -> Result<RawBatch> {
        let bytes = fs::read(file_path)?;
        let filename = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.csv");
        self.parse_bytes(&bytes, filename)
    }

    fn parse_bytes(&self, bytes: &[u8], source_file: &str) -> Result<RawBatch> {
        let source = self.source_system();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let mut headers: Vec<String> = Vec::new();
        for raw in reader.headers()?.iter() {
            let header = raw.trim().trim_start_matches('\u{feff}').to_lowercase();
            if header.is_empty() || !headers.contains(&header) {
                headers.push(header);
                continue;
            }
            // Repeated column: keep its values under a numbered name
            let renamed = (2..)
                .map(|n| format!("{}_{}", header, n))
                .find(|candidate| !headers.contains(candidate))
                .unwrap_or_default();
            warn!(source = %source, file = source_file, column = %header, renamed = %renamed, "duplicate column header");
            headers.push(renamed);
        }

        let unknown_columns: Vec<String> = headers
            .iter()
            .filter(|h| !h.is_empty() && !self.known_columns().contains(&h.as_str()))
            .cloned()
            .collect();
        for column in &unknown_columns {
            warn!(source = %source, file = source_file, column = %column, "unrecognized column, passing through");
        }
        for required in self.required_columns() {
            if !headers.iter().any(|h| h == required) {
                warn!(source = %source, file = source_file, column = *required, "required column missing from header");
            }
        }

        let mut rows = Vec::new();
        let mut ragged_rows = Vec::new();
        for (index, result) in reader.records().enumerate() {
            let record = result?;
            let row_number = index + 2; // +2 because: 1-indexed + header row

            if record.len() != headers.len() {
                warn!(
                    source = %source,
                    file = source_file,
                    row = row_number,
                    cells = record.len(),
                    expected = headers.len(),
                    "row width differs from header"
                );
                ragged_rows.push(row_number);
            }

            let mut fields: BTreeMap<String, String> = headers
                .iter()
                .zip(record.iter())
                .filter(|(header, _)| !header.is_empty())
                .map(|(header, value)| (header.clone(), value.to_string()))
                .collect();
            // Cells past the last header are kept by position
            for (position, value) in record.iter().enumerate().skip(headers.len()) {
                if !value.trim().is_empty() {
                    fields.insert(format!("column_{}", position + 1), value.to_string());
                }
            }

            rows.push(RawRow { row_number, fields });
        }

        debug!(source = %source, file = source_file, rows = rows.len(), "parsed extract");

        Ok(RawBatch {
            batch_id: batch_id(source, bytes),
            source,
            source_file: source_file.to_string(),
            imported_at: Utc::now(),
            headers,
            unknown_columns,
            ragged_rows,
            rows,
        })
    }
}

/// Content-derived batch identifier: the same file always gets the same id
pub fn batch_id(source: SourceSystem, bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.code().as_bytes());
    hasher.update(b"\n");
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Get appropriate parser for a source system
pub fn get_parser(source: SourceSystem) -> Box<dyn ExtractParser> {
    match source {
        SourceSystem::Voter => Box::new(VoterExtractParser),
        SourceSystem::Donation => Box::new(DonationExtractParser),
    }
}

// ============================================================================
// VOTER EXTRACT
// ============================================================================

pub const VOTER_COLUMNS: &[&str] = &[
    "voter_id",
    "first_name",
    "middle_name",
    "last_name",
    "suffix",
    "street_address",
    "city",
    "state",
    "zip",
    "county",
    "party",
    "status",
    "registration_date",
    "birth_year",
    "latitude",
    "longitude",
    "geocode_source",
    "geocode_date",
];

pub struct VoterExtractParser;

impl ExtractParser for VoterExtractParser {
    fn source_system(&self) -> SourceSystem {
        SourceSystem::Voter
    }

    fn known_columns(&self) -> &'static [&'static str] {
        VOTER_COLUMNS
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["voter_id", "last_name"]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoterRecord {
    pub row_number: usize,
    pub voter_id: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub suffix: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub county: String,
    pub party: String,
    pub status: String,
    pub registration_date: String,
    pub birth_year: String,
    pub latitude: String,
    pub longitude: String,
    pub geocode_source: String,
    pub geocode_date: String,

    /// Columns outside the contract, carried unchanged
    pub extra: BTreeMap<String, String>,
}

impl VoterRecord {
    pub fn from_row(row: &RawRow) -> Result<Self> {
        require(row, SourceSystem::Voter, &["voter_id", "last_name"])?;
        Ok(VoterRecord {
            row_number: row.row_number,
            voter_id: row.get("voter_id").to_string(),
            first_name: row.get("first_name").to_string(),
            middle_name: row.get("middle_name").to_string(),
            last_name: row.get("last_name").to_string(),
            suffix: row.get("suffix").to_string(),
            street_address: row.get("street_address").to_string(),
            city: row.get("city").to_string(),
            state: row.get("state").to_string(),
            zip: row.get("zip").to_string(),
            county: row.get("county").to_string(),
            party: row.get("party").to_string(),
            status: row.get("status").to_string(),
            registration_date: row.get("registration_date").to_string(),
            birth_year: row.get("birth_year").to_string(),
            latitude: row.get("latitude").to_string(),
            longitude: row.get("longitude").to_string(),
            geocode_source: row.get("geocode_source").to_string(),
            geocode_date: row.get("geocode_date").to_string(),
            extra: extra_fields(row, VOTER_COLUMNS),
        })
    }

    /// Geocode carried on the extract row, if both coordinates parse.
    /// Rows without a source tag are ranked as `voter_file`.
    pub fn geocode(&self) -> Option<Geocode> {
        let latitude = self.latitude.parse::<f64>().ok()?;
        let longitude = self.longitude.parse::<f64>().ok()?;
        let source = if self.geocode_source.is_empty() {
            "voter_file"
        } else {
            self.geocode_source.as_str()
        };
        let geocode = Geocode::new(latitude, longitude, source);
        Some(match parse_date(&self.geocode_date) {
            Some(date) => geocode.with_date(date),
            None => geocode,
        })
    }
}

// ============================================================================
// DONATION EXTRACT
// ============================================================================

pub const DONATION_COLUMNS: &[&str] = &[
    "donation_id",
    "contributor_name",
    "street_address",
    "city",
    "state",
    "zip",
    "employer",
    "occupation",
    "amount",
    "contribution_date",
    "recipient",
    "election_year",
];

pub struct DonationExtractParser;

impl ExtractParser for DonationExtractParser {
    fn source_system(&self) -> SourceSystem {
        SourceSystem::Donation
    }

    fn known_columns(&self) -> &'static [&'static str] {
        DONATION_COLUMNS
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["donation_id", "contributor_name"]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationRecord {
    pub row_number: usize,
    pub donation_id: String,
    pub contributor_name: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub employer: String,
    pub occupation: String,
    pub amount: String,
    pub contribution_date: String,
    pub recipient: String,
    pub election_year: String,
    pub extra: BTreeMap<String, String>,
}

impl DonationRecord {
    pub fn from_row(row: &RawRow) -> Result<Self> {
        require(row, SourceSystem::Donation, &["donation_id", "contributor_name"])?;
        Ok(DonationRecord {
            row_number: row.row_number,
            donation_id: row.get("donation_id").to_string(),
            contributor_name: row.get("contributor_name").to_string(),
            street_address: row.get("street_address").to_string(),
            city: row.get("city").to_string(),
            state: row.get("state").to_string(),
            zip: row.get("zip").to_string(),
            employer: row.get("employer").to_string(),
            occupation: row.get("occupation").to_string(),
            amount: row.get("amount").to_string(),
            contribution_date: row.get("contribution_date").to_string(),
            recipient: row.get("recipient").to_string(),
            election_year: row.get("election_year").to_string(),
            extra: extra_fields(row, DONATION_COLUMNS),
        })
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn require(row: &RawRow, source: SourceSystem, columns: &[&str]) -> Result<()> {
    match columns.iter().find(|c| row.get(c).is_empty()) {
        Some(missing) => Err(LinkageError::MalformedRecord {
            source_system: source.code().to_string(),
            row: row.row_number,
            reason: format!("missing {}", missing),
        }),
        None => Ok(()),
    }
}

fn extra_fields(row: &RawRow, known: &[&str]) -> BTreeMap<String, String> {
    row.fields
        .iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Parse date from string (supports YYYY-MM-DD and MM/DD/YYYY)
pub fn parse_date(date_str: &str) -> Option<NaiveDate> {
    let date_str = date_str.trim();
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_str, "%m/%d/%Y"))
        .ok()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const VOTER_CSV: &str = "\
Voter_ID , First_Name,Last_Name,Street_Address,City,State,Zip,Precinct
V1,John,Smith,12 Main St,Springfield,NJ,07081,P-12
V2,Mary,,4 Oak Ave,Newark,NJ,07102,P-3
";

    #[test]
    fn test_source_system_codes() {
        assert_eq!(SourceSystem::Voter.code(), "voter");
        assert_eq!(SourceSystem::parse("Donations"), Some(SourceSystem::Donation));
        assert_eq!(SourceSystem::parse("bank"), None);
    }

    #[test]
    fn test_get_parser() {
        assert_eq!(get_parser(SourceSystem::Voter).source_system(), SourceSystem::Voter);
        assert_eq!(
            get_parser(SourceSystem::Donation).source_system(),
            SourceSystem::Donation
        );
    }

    #[test]
    fn test_headers_case_insensitive_and_drift_detected() {
        let batch = VoterExtractParser
            .parse_bytes(VOTER_CSV.as_bytes(), "voters.csv")
            .unwrap();

        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.unknown_columns, vec!["precinct".to_string()]);
        assert_eq!(batch.rows[0].row_number, 2);
        assert_eq!(batch.rows[0].get("voter_id"), "V1");

        let voter = VoterRecord::from_row(&batch.rows[0]).unwrap();
        assert_eq!(voter.first_name, "John");
        assert_eq!(voter.extra.get("precinct").map(String::as_str), Some("P-12"));
    }

    #[test]
    fn test_ragged_rows_and_duplicate_headers_are_reported() {
        let csv = "voter_id,last_name,city,city\n\
                   V1,SMITH,Newark,Trenton\n\
                   V2,JONES\n\
                   V3,LEE,Camden,Camden,P-7\n";
        let batch = VoterExtractParser.parse_bytes(csv.as_bytes(), "v.csv").unwrap();

        assert_eq!(batch.headers, vec!["voter_id", "last_name", "city", "city_2"]);
        assert_eq!(batch.unknown_columns, vec!["city_2".to_string()]);
        assert_eq!(batch.ragged_rows, vec![3, 4]);

        // Second "city" is not lost
        assert_eq!(batch.rows[0].get("city"), "Newark");
        assert_eq!(batch.rows[0].get("city_2"), "Trenton");
        // Short row: missing cells read as empty
        assert_eq!(batch.rows[1].get("city"), "");
        // Long row: the extra cell is kept by position
        assert_eq!(batch.rows[2].get("column_5"), "P-7");
    }

    #[test]
    fn test_missing_key_field_is_malformed() {
        let batch = VoterExtractParser
            .parse_bytes(VOTER_CSV.as_bytes(), "voters.csv")
            .unwrap();

        let err = VoterRecord::from_row(&batch.rows[1]).unwrap_err();
        match err {
            LinkageError::MalformedRecord { row, reason, .. } => {
                assert_eq!(row, 3);
                assert!(reason.contains("last_name"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_batch_id_is_content_derived() {
        let a = VoterExtractParser.parse_bytes(VOTER_CSV.as_bytes(), "a.csv").unwrap();
        let b = VoterExtractParser.parse_bytes(VOTER_CSV.as_bytes(), "b.csv").unwrap();
        let donation = DonationExtractParser
            .parse_bytes(VOTER_CSV.as_bytes(), "a.csv")
            .unwrap();

        assert_eq!(a.batch_id, b.batch_id);
        assert_ne!(a.batch_id, donation.batch_id);
        assert_eq!(a.batch_id.len(), 64);
    }

    #[test]
    fn test_voter_geocode() {
        let csv = "voter_id,last_name,latitude,longitude,geocode_source,geocode_date\n\
                   V1,SMITH,40.70,-74.30,Census,2024-03-01\n\
                   V2,JONES,,,,\n";
        let batch = VoterExtractParser.parse_bytes(csv.as_bytes(), "v.csv").unwrap();

        let geocode = VoterRecord::from_row(&batch.rows[0]).unwrap().geocode().unwrap();
        assert_eq!(geocode.latitude, 40.70);
        assert_eq!(geocode.source, "census");
        assert_eq!(geocode.geocoded_on, parse_date("2024-03-01"));

        assert!(VoterRecord::from_row(&batch.rows[1]).unwrap().geocode().is_none());
    }

    #[test]
    fn test_donation_record() {
        let csv = "donation_id,contributor_name,city,state,zip,amount\n\
                   D1,\"JONES, MICHAEL\",Newark,NJ,99999999,250.00\n\
                   D2,,Newark,NJ,07102,10\n";
        let batch = DonationExtractParser.parse_bytes(csv.as_bytes(), "d.csv").unwrap();
        assert!(batch.unknown_columns.is_empty());

        let donation = DonationRecord::from_row(&batch.rows[0]).unwrap();
        assert_eq!(donation.contributor_name, "JONES, MICHAEL");
        assert_eq!(donation.zip, "99999999");
        assert!(DonationRecord::from_row(&batch.rows[1]).is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2024-01-05"), NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(parse_date("01/05/2024"), NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(parse_date("Jan 5"), None);
    }
}
