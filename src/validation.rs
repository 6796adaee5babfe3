// ✅ Validation/Diff Reporter - Compares a run against the previous one
//
// Read-only: takes snapshots of the previous and current run and produces a
// report. Critical findings (geocode loss) fail the gate and block the commit;
// warnings are surfaced but never block.

use crate::config::ValidationConfig;
use crate::entities::{Address, Geocode, GeocodePolicy};
use crate::error::LinkageError;
use crate::linker::{ProcessedDonation, ProcessedVoter};
use crate::matching::MatchMethod;
use crate::parser::SourceSystem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tables whose row counts are compared between runs
pub const TRACKED_TABLES: &[&str] = &[
    "voters",
    "donations",
    "individuals",
    "addresses",
    "individual_addresses",
];

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// Match outcome counts for one source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub total: usize,

    /// Rows with a non-null individual_id
    pub matched: usize,
    pub by_method: BTreeMap<MatchMethod, usize>,
    pub flagged_for_review: usize,
}

impl SourceMetrics {
    fn from_outcomes(outcomes: impl Iterator<Item = (bool, MatchMethod, bool)>) -> Self {
        let mut metrics = SourceMetrics::default();
        for (linked, method, review) in outcomes {
            metrics.total += 1;
            if linked {
                metrics.matched += 1;
            }
            if review {
                metrics.flagged_for_review += 1;
            }
            *metrics.by_method.entry(method).or_insert(0) += 1;
        }
        metrics
    }

    pub fn match_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.matched as f64 / self.total as f64
        }
    }
}

/// What the Reporter needs to know about one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub voters: SourceMetrics,
    pub donations: SourceMetrics,
    pub table_counts: BTreeMap<String, usize>,

    /// address_id → geocode, for geocoded addresses only
    pub geocodes: BTreeMap<String, Geocode>,
}

impl RunSnapshot {
    pub fn capture<'a>(
        voters: &[ProcessedVoter],
        donations: &[ProcessedDonation],
        addresses: impl Iterator<Item = &'a Address>,
        individual_count: usize,
        link_count: usize,
    ) -> Self {
        let mut address_count = 0;
        let mut geocodes = BTreeMap::new();
        for address in addresses {
            address_count += 1;
            if let Some(geocode) = &address.geocode {
                geocodes.insert(address.id.clone(), geocode.clone());
            }
        }

        let table_counts = [
            ("voters", voters.len()),
            ("donations", donations.len()),
            ("individuals", individual_count),
            ("addresses", address_count),
            ("individual_addresses", link_count),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();

        RunSnapshot {
            voters: SourceMetrics::from_outcomes(
                voters
                    .iter()
                    .map(|v| (v.individual_id.is_some(), v.match_method, v.review_flag)),
            ),
            donations: SourceMetrics::from_outcomes(
                donations
                    .iter()
                    .map(|d| (d.individual_id.is_some(), d.match_method, d.review_flag)),
            ),
            table_counts,
            geocodes,
        }
    }

    pub fn overall_match_rate(&self) -> f64 {
        let total = self.voters.total + self.donations.total;
        if total == 0 {
            0.0
        } else {
            (self.voters.matched + self.donations.matched) as f64 / total as f64
        }
    }

    fn metrics(&self, source: SourceSystem) -> &SourceMetrics {
        match source {
            SourceSystem::Voter => &self.voters,
            SourceSystem::Donation => &self.donations,
        }
    }
}

/// Per-run problems observed by the pipeline before the Reporter runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub malformed_rows: usize,
    pub ambiguous: usize,
    pub unknown_columns: Vec<String>,

    /// Rows with more or fewer cells than the header
    pub ragged_rows: usize,
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub check: String,
    pub message: String,
}

impl Finding {
    fn new(severity: Severity, check: &str, message: String) -> Self {
        Finding {
            severity,
            check: check.to_string(),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierBreakdown {
    pub source: SourceSystem,
    pub method: MatchMethod,
    pub count: usize,

    /// Share of this source's rows
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeLoss {
    pub address_id: String,
    pub previous: Geocode,

    /// None when the geocode vanished entirely
    pub current: Option<Geocode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDelta {
    pub table: String,
    pub previous: usize,
    pub current: usize,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub match_rate: f64,
    pub previous_match_rate: Option<f64>,
    pub tiers: Vec<TierBreakdown>,
    pub geocode_losses: Vec<GeocodeLoss>,
    pub table_deltas: Vec<TableDelta>,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    /// No critical findings
    pub fn passed(&self) -> bool {
        !self.findings.iter().any(|f| f.severity == Severity::Critical)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "Match rate {:.1}%{}, {} geocode loss(es), findings: {} critical, {} warning, {} info",
            self.match_rate * 100.0,
            match self.previous_match_rate {
                Some(prev) => format!(" (previous {:.1}%)", prev * 100.0),
                None => String::new(),
            },
            self.geocode_losses.len(),
            self.count(Severity::Critical),
            self.count(Severity::Warning),
            self.count(Severity::Info),
        )
    }

    /// The error a failed gate aborts the run with
    pub fn regression_error(&self) -> Option<LinkageError> {
        if self.geocode_losses.is_empty() {
            return None;
        }
        Some(LinkageError::GeocodeRegression {
            count: self.geocode_losses.len(),
            sample: self
                .geocode_losses
                .iter()
                .take(5)
                .map(|l| l.address_id.clone())
                .collect(),
        })
    }
}

// ============================================================================
// REPORTER
// ============================================================================

pub struct Reporter<'a> {
    config: &'a ValidationConfig,
    policy: &'a GeocodePolicy,
}

impl<'a> Reporter<'a> {
    pub fn new(config: &'a ValidationConfig, policy: &'a GeocodePolicy) -> Self {
        Reporter { config, policy }
    }

    pub fn compare(
        &self,
        previous: Option<&RunSnapshot>,
        current: &RunSnapshot,
        diagnostics: &RunDiagnostics,
    ) -> ValidationReport {
        let mut findings = Vec::new();

        let tiers = tier_breakdown(current);

        let geocode_losses = match previous {
            Some(prev) => self.geocode_losses(prev, current),
            None => Vec::new(),
        };
        if !geocode_losses.is_empty() {
            findings.push(Finding::new(
                Severity::Critical,
                "geocode_preservation",
                format!(
                    "{} address(es) lost or downgraded a previously present geocode",
                    geocode_losses.len()
                ),
            ));
        }

        let match_rate = current.overall_match_rate();
        let previous_match_rate = previous
            .filter(|p| p.voters.total + p.donations.total > 0)
            .map(RunSnapshot::overall_match_rate);
        match previous_match_rate {
            Some(prev) if prev - match_rate > self.config.max_match_rate_drop => {
                findings.push(Finding::new(
                    Severity::Warning,
                    "match_rate",
                    format!(
                        "match rate dropped from {:.1}% to {:.1}%",
                        prev * 100.0,
                        match_rate * 100.0
                    ),
                ));
            }
            Some(_) => {}
            None => findings.push(Finding::new(
                Severity::Info,
                "baseline",
                "no previous run to compare against".to_string(),
            )),
        }

        if diagnostics.ambiguous > 0 {
            findings.push(Finding::new(
                Severity::Warning,
                "ambiguous_matches",
                format!("{} record(s) queued for manual review", diagnostics.ambiguous),
            ));
        }
        if !diagnostics.unknown_columns.is_empty() {
            findings.push(Finding::new(
                Severity::Warning,
                "schema_drift",
                format!(
                    "unrecognized column(s) passed through: {}",
                    diagnostics.unknown_columns.join(", ")
                ),
            ));
        }
        if diagnostics.malformed_rows > 0 {
            findings.push(Finding::new(
                Severity::Warning,
                "malformed_rows",
                format!("{} malformed row(s) skipped", diagnostics.malformed_rows),
            ));
        }
        if diagnostics.ragged_rows > 0 {
            findings.push(Finding::new(
                Severity::Warning,
                "ragged_rows",
                format!(
                    "{} row(s) had a different number of cells than the header",
                    diagnostics.ragged_rows
                ),
            ));
        }

        let table_deltas = TRACKED_TABLES
            .iter()
            .map(|table| {
                let prev = previous
                    .and_then(|p| p.table_counts.get(*table).copied())
                    .unwrap_or(0);
                let curr = current.table_counts.get(*table).copied().unwrap_or(0);
                TableDelta {
                    table: table.to_string(),
                    previous: prev,
                    current: curr,
                    delta: curr as i64 - prev as i64,
                }
            })
            .collect();

        findings.sort_by_key(|f| f.severity);

        ValidationReport {
            match_rate,
            previous_match_rate,
            tiers,
            geocode_losses,
            table_deltas,
            findings,
        }
    }

    /// A geocode is lost when it disappears, or moves without a strictly
    /// higher-ranked source backing the move.
    fn geocode_losses(&self, previous: &RunSnapshot, current: &RunSnapshot) -> Vec<GeocodeLoss> {
        previous
            .geocodes
            .iter()
            .filter_map(|(id, prev)| match current.geocodes.get(id) {
                None => Some(GeocodeLoss {
                    address_id: id.clone(),
                    previous: prev.clone(),
                    current: None,
                }),
                Some(curr) if !curr.same_point(prev) && !self.policy.should_replace(prev, curr) => {
                    Some(GeocodeLoss {
                        address_id: id.clone(),
                        previous: prev.clone(),
                        current: Some(curr.clone()),
                    })
                }
                Some(_) => None,
            })
            .collect()
    }
}

fn tier_breakdown(snapshot: &RunSnapshot) -> Vec<TierBreakdown> {
    let mut tiers = Vec::new();
    for source in [SourceSystem::Voter, SourceSystem::Donation] {
        let metrics = snapshot.metrics(source);
        for (method, count) in &metrics.by_method {
            tiers.push(TierBreakdown {
                source,
                method: *method,
                count: *count,
                rate: *count as f64 / metrics.total as f64,
            });
        }
    }
    tiers
}

// ============================================================================
// TESTS
// ============================================================================
