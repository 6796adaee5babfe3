// 🔁 Pipeline Orchestrator - import, then normalize → resolve → link → validate → commit
//
// Strict three-stage barrier: every address is resolved before any identity,
// and every identity before the linker projects processed rows. Output goes to
// staging and is swapped into the live tables only when the Reporter passes.

use crate::config::PipelineConfig;
use crate::db::{self, BatchInfo, RunOutput, RunRecord, RunStatus, TableSet};
use crate::entities::{AddressStore, GeocodeStats, IndividualStore, LinkStore};
use crate::error::{LinkageError, Result};
use crate::identity::{IdentityResolver, Resolution};
use crate::linker::{link_donation, link_voter, ProcessedDonation, ProcessedVoter};
use crate::matching::PersonCandidate;
use crate::normalizer::{AddressInput, Normalizer};
use crate::parser::{get_parser, DonationRecord, RawBatch, SourceSystem, VoterRecord};
use crate::validation::{Reporter, RunDiagnostics, RunSnapshot, ValidationReport};
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

// ============================================================================
// IMPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub batch_id: String,
    pub source: SourceSystem,
    pub rows: usize,

    /// 0 when the same file was already imported
    pub inserted: usize,
    pub unknown_columns: Vec<String>,

    /// Rows whose width differed from the header
    pub ragged_rows: usize,
}

/// Parse an extract and store it as a raw batch
pub fn import_extract(conn: &mut Connection, source: SourceSystem, path: &Path) -> Result<ImportSummary> {
    let parser = get_parser(source);
    let batch = parser.parse(path)?;
    let inserted = db::insert_raw_batch(conn, &batch)?;

    Ok(ImportSummary {
        batch_id: batch.batch_id,
        source,
        rows: batch.rows.len(),
        inserted,
        unknown_columns: batch.unknown_columns,
        ragged_rows: batch.ragged_rows.len(),
    })
}

// ============================================================================
// RUN
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub voters: usize,
    pub donations: usize,
    pub malformed_rows: usize,
    pub geocodes: GeocodeStats,
    pub report: ValidationReport,
}

/// Stage-1 output for one voter row
struct StagedVoter {
    batch_id: String,
    record: VoterRecord,
    address_id: Option<String>,
    candidate: PersonCandidate,
}

struct StagedDonation {
    batch_id: String,
    record: DonationRecord,
    address_id: Option<String>,
    candidate: PersonCandidate,
}

/// Run the full pipeline over the latest voter and donation batches.
///
/// Returns `GeocodeRegression` (after recording the rejected run) when the
/// Reporter fails the gate; nothing is committed in that case.
pub fn run_pipeline(conn: &mut Connection, config: &PipelineConfig, as_of: NaiveDate) -> Result<RunSummary> {
    config.validate()?;
    let started_at = Utc::now();
    let run_id = uuid::Uuid::new_v4().to_string();

    let mut batches: Vec<BatchInfo> = Vec::new();
    for source in [SourceSystem::Voter, SourceSystem::Donation] {
        if let Some(batch) = db::latest_batch(conn, source)? {
            batches.push(batch);
        }
    }
    if batches.is_empty() {
        return Err(LinkageError::NotFound("no imported batches; run `import` first".to_string()));
    }

    info!(run_id = %run_id, as_of = %as_of, batches = batches.len(), "pipeline run started");

    // Previous committed state: baseline for the Reporter, seed for the stores
    let previous = match db::last_run(conn, true)? {
        Some(_) => Some(live_snapshot(conn)?),
        None => None,
    };

    let lexicon = Arc::new(config.build_lexicon());
    let normalizer = Normalizer::new(lexicon.clone());
    let mut addresses = AddressStore::from_existing(
        db::load_addresses(conn, TableSet::Live)?,
        config.geocode.clone(),
    );
    let individuals = IndividualStore::from_existing(db::load_individuals(conn, TableSet::Live)?, &lexicon);
    let links = LinkStore::from_existing(db::load_links(conn, TableSet::Live)?);
    let memo = db::load_memo(conn)?;

    let mut diagnostics = RunDiagnostics::default();
    let mut voter_batch: Option<RawBatch> = None;
    let mut donation_batch: Option<RawBatch> = None;
    for info in &batches {
        let batch = db::load_batch(conn, &info.batch_id)?;
        diagnostics.unknown_columns.extend(
            batch
                .unknown_columns
                .iter()
                .map(|c| format!("{}:{}", batch.source.code(), c)),
        );
        diagnostics.ragged_rows += batch.ragged_rows.len();
        match batch.source {
            SourceSystem::Voter => voter_batch = Some(batch),
            SourceSystem::Donation => donation_batch = Some(batch),
        }
    }

    // ==========================================================================
    // Stage 1: normalize + resolve addresses
    // ==========================================================================
    let now = Utc::now();
    let mut staged_voters = Vec::new();
    if let Some(batch) = &voter_batch {
        for row in &batch.rows {
            let record = match VoterRecord::from_row(row) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "skipping voter row");
                    diagnostics.malformed_rows += 1;
                    continue;
                }
            };
            let name = normalizer.normalize_name_parts(
                &record.first_name,
                &record.middle_name,
                &record.last_name,
                &record.suffix,
            );
            if !name.has_last() {
                warn!(row = record.row_number, voter_id = %record.voter_id, "skipping voter row: empty last name after normalization");
                diagnostics.malformed_rows += 1;
                continue;
            }

            let address = normalizer.normalize_address(AddressInput {
                street_address: &record.street_address,
                city: &record.city,
                state: &record.state,
                zip: &record.zip,
                county: &record.county,
            });
            let address_id = if address.is_absent() {
                None
            } else {
                Some(addresses.resolve(&address, record.geocode(), now)?)
            };

            staged_voters.push(StagedVoter {
                batch_id: batch.batch_id.clone(),
                candidate: PersonCandidate {
                    source: SourceSystem::Voter,
                    record_key: record.voter_id.clone(),
                    name,
                    address_id: address_id.clone(),
                    locality: address.locality(),
                },
                address_id,
                record,
            });
        }
    }

    let mut staged_donations = Vec::new();
    if let Some(batch) = &donation_batch {
        for row in &batch.rows {
            let record = match DonationRecord::from_row(row) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "skipping donation row");
                    diagnostics.malformed_rows += 1;
                    continue;
                }
            };
            let name = normalizer.normalize_full_name(&record.contributor_name);
            if !name.has_last() {
                warn!(row = record.row_number, donation_id = %record.donation_id, "skipping donation row: no usable name");
                diagnostics.malformed_rows += 1;
                continue;
            }

            let address = normalizer.normalize_address(AddressInput {
                street_address: &record.street_address,
                city: &record.city,
                state: &record.state,
                zip: &record.zip,
                county: "",
            });
            let address_id = if address.is_absent() {
                None
            } else {
                Some(addresses.resolve(&address, None, now)?)
            };

            staged_donations.push(StagedDonation {
                batch_id: batch.batch_id.clone(),
                candidate: PersonCandidate {
                    source: SourceSystem::Donation,
                    record_key: record.donation_id.clone(),
                    name,
                    address_id: address_id.clone(),
                    locality: address.locality(),
                },
                address_id,
                record,
            });
        }
    }

    info!(
        voters = staged_voters.len(),
        donations = staged_donations.len(),
        addresses = addresses.count(),
        malformed = diagnostics.malformed_rows,
        "stage 1 complete: addresses resolved"
    );

    // ==========================================================================
    // Stage 2: resolve identities (voters first)
    // ==========================================================================
    let mut resolver = IdentityResolver::new(&config.matching, individuals, links, memo);
    let voter_resolutions: Vec<Resolution> = staged_voters
        .iter()
        .map(|v| resolver.resolve(&v.candidate, &addresses, as_of, now))
        .collect();
    let donation_resolutions: Vec<Resolution> = staged_donations
        .iter()
        .map(|d| resolver.resolve(&d.candidate, &addresses, as_of, now))
        .collect();
    diagnostics.ambiguous = resolver.reviews().len();

    info!(
        individuals = resolver.individuals().count(),
        links = resolver.links().count(),
        ambiguous = diagnostics.ambiguous,
        "stage 2 complete: identities resolved"
    );

    // ==========================================================================
    // Stage 3: link
    // ==========================================================================
    let voters: Vec<ProcessedVoter> = staged_voters
        .iter()
        .zip(&voter_resolutions)
        .map(|(v, r)| link_voter(&v.batch_id, &v.record, v.address_id.as_deref(), r))
        .collect();
    let donations: Vec<ProcessedDonation> = staged_donations
        .iter()
        .zip(&donation_resolutions)
        .map(|(d, r)| link_donation(&d.batch_id, &d.record, d.address_id.as_deref(), r))
        .collect();

    info!(voters = voters.len(), donations = donations.len(), "stage 3 complete: records linked");

    // ==========================================================================
    // Validate, stage, commit or discard
    // ==========================================================================
    let current = RunSnapshot::capture(
        &voters,
        &donations,
        addresses.all(),
        resolver.individuals().count(),
        resolver.links().count(),
    );
    let report = Reporter::new(&config.validation, &config.geocode).compare(
        previous.as_ref(),
        &current,
        &diagnostics,
    );
    for finding in &report.findings {
        info!(severity = ?finding.severity, check = %finding.check, "{}", finding.message);
    }

    db::write_staging(
        conn,
        &RunOutput {
            individuals: resolver.individuals().all().collect(),
            addresses: addresses.all().collect(),
            links: resolver.links().all().collect(),
            voters: &voters,
            donations: &donations,
            memo: resolver.memo(),
        },
    )?;

    let status = if report.passed() {
        db::commit_staging(conn)?;
        RunStatus::Committed
    } else {
        db::discard_staging(conn)?;
        RunStatus::Rejected
    };

    db::insert_run(
        conn,
        &RunRecord {
            run_id: run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            as_of,
            batch_ids: batches.iter().map(|b| b.batch_id.clone()).collect(),
            status,
            report: serde_json::to_string(&report)?,
        },
    )?;
    db::insert_resolution_log(conn, &run_id, resolver.log())?;

    if let Some(err) = report.regression_error() {
        warn!(run_id = %run_id, "run rejected: {}", err);
        return Err(err);
    }

    let queued = db::insert_reviews(conn, &run_id, resolver.reviews())?;
    info!(run_id = %run_id, queued_for_review = queued, "{}", report.summary());

    Ok(RunSummary {
        run_id,
        status,
        voters: voters.len(),
        donations: donations.len(),
        malformed_rows: diagnostics.malformed_rows,
        geocodes: addresses.stats().clone(),
        report,
    })
}

/// Snapshot of what is currently committed
pub fn live_snapshot(conn: &Connection) -> Result<RunSnapshot> {
    let voters = db::load_processed_voters(conn, TableSet::Live)?;
    let donations = db::load_processed_donations(conn, TableSet::Live)?;
    let addresses = db::load_addresses(conn, TableSet::Live)?;
    Ok(RunSnapshot::capture(
        &voters,
        &donations,
        addresses.iter(),
        db::count_rows(conn, TableSet::Live, "individuals")?,
        db::count_rows(conn, TableSet::Live, "individual_addresses")?,
    ))
}

/// Report stored with the most recent run
pub fn last_report(conn: &Connection) -> Result<Option<(RunRecord, ValidationReport)>> {
    match db::last_run(conn, false)? {
        Some(run) => {
            let report = serde_json::from_str(&run.report)?;
            Ok(Some((run, report)))
        }
        None => Ok(None),
    }
}
