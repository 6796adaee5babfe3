// 🪪 Identity Resolver - Clusters person records into individuals
//
// For each candidate: consult the memo, otherwise run the tier cascade over
// individuals sharing the last name. The first tier that fires wins. A tier
// that matches more than one individual (after the suffix tie-break) is never
// guessed at: the record falls through to "no match" and is queued for review.
//
// The resolver is the single writer for individual identity and
// individual-address links during a run.

use crate::config::MatchingConfig;
use crate::entities::{AddressStore, Individual, IndividualStore, LinkStore};
use crate::matching::{build_rules, suffix_conflict, IndividualProfile, MatchMethod, MatchRule, PersonCandidate};
use crate::parser::SourceSystem;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// OUTPUT TYPES
// ============================================================================

/// Outcome of resolving one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// None only for donations left unlinked
    pub individual_id: Option<String>,
    pub method: MatchMethod,
    pub confidence: f64,

    /// Ambiguous match, queued for manual review
    pub review: bool,

    /// Taken from the memo of a previous run
    pub reused: bool,
}

/// Prior outcome for a record, keyed by (source, record_key)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoEntry {
    pub fingerprint: String,
    pub individual_id: Option<String>,
    pub method: MatchMethod,
    pub confidence: f64,
    pub review: bool,
}

pub type ResolutionMemo = BTreeMap<(SourceSystem, String), MemoEntry>;

/// One line of the resolution log (every attempt, including no-match)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionLogEntry {
    pub source: SourceSystem,
    pub record_key: String,

    /// Normalized input, as JSON
    pub candidate: String,
    pub method: MatchMethod,
    pub confidence: f64,
    pub individual_id: Option<String>,
    pub ambiguous: bool,

    /// Individuals considered (same last name, no suffix conflict)
    pub candidate_count: usize,
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub source: SourceSystem,
    pub record_key: String,
    pub reason: String,

    /// Individual ids that tied
    pub competing: Vec<String>,
}

enum CascadeOutcome {
    Matched {
        individual_id: String,
        method: MatchMethod,
        confidence: f64,
    },
    Ambiguous {
        method: MatchMethod,
        competing: Vec<String>,
    },
    NoMatch,
}

// ============================================================================
// IDENTITY RESOLVER
// ============================================================================

pub struct IdentityResolver {
    rules: Vec<Box<dyn MatchRule>>,
    mint_unmatched_donations: bool,
    individuals: IndividualStore,
    links: LinkStore,
    memo: ResolutionMemo,
    log: Vec<ResolutionLogEntry>,
    reviews: Vec<ReviewItem>,
}

impl IdentityResolver {
    pub fn new(
        config: &MatchingConfig,
        individuals: IndividualStore,
        links: LinkStore,
        memo: ResolutionMemo,
    ) -> Self {
        IdentityResolver {
            rules: build_rules(config),
            mint_unmatched_donations: config.mint_unmatched_donations,
            individuals,
            links,
            memo,
            log: Vec::new(),
            reviews: Vec::new(),
        }
    }

    /// Resolve a candidate to an individual, recording links and log entries.
    ///
    /// `as_of` dates any link opened or closed; `now` stamps entity changes.
    pub fn resolve(
        &mut self,
        candidate: &PersonCandidate,
        addresses: &AddressStore,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> Resolution {
        let fingerprint = candidate_fingerprint(candidate);
        let key = (candidate.source, candidate.record_key.clone());

        // Unchanged record with a linked outcome: reuse it verbatim
        if let Some(prior) = self.memo.get(&key) {
            let still_valid = prior.fingerprint == fingerprint
                && prior
                    .individual_id
                    .as_deref()
                    .map_or(false, |id| self.individuals.contains(id));
            if still_valid {
                let resolution = Resolution {
                    individual_id: prior.individual_id.clone(),
                    method: prior.method,
                    confidence: prior.confidence,
                    review: prior.review,
                    reused: true,
                };
                self.push_log(candidate, &resolution, 0);
                return resolution;
            }
        }

        let considered = self.considered(candidate).len();
        let outcome = match self.same_registration(candidate) {
            Some(outcome) => outcome,
            None => self.cascade(candidate, addresses),
        };

        let resolution = match outcome {
            CascadeOutcome::Matched {
                individual_id,
                method,
                confidence,
            } => {
                if self
                    .individuals
                    .apply_name_correction(&individual_id, &candidate.name, now)
                {
                    debug!(individual_id = %individual_id, "name components filled from later record");
                }
                self.link(&individual_id, candidate, as_of);
                Resolution {
                    individual_id: Some(individual_id),
                    method,
                    confidence,
                    review: false,
                    reused: false,
                }
            }
            CascadeOutcome::Ambiguous { method, competing } => {
                self.reviews.push(ReviewItem {
                    source: candidate.source,
                    record_key: candidate.record_key.clone(),
                    reason: format!(
                        "{} matched {} individuals",
                        method.as_str(),
                        competing.len()
                    ),
                    competing,
                });
                self.no_match(candidate, as_of, now, true)
            }
            CascadeOutcome::NoMatch => self.no_match(candidate, as_of, now, false),
        };

        self.push_log(candidate, &resolution, considered);
        self.memo.insert(
            key,
            MemoEntry {
                fingerprint,
                individual_id: resolution.individual_id.clone(),
                method: resolution.method,
                confidence: resolution.confidence,
                review: resolution.review,
            },
        );

        resolution
    }

    /// Individuals sharing the candidate's last name that could be the same person
    fn considered(&self, candidate: &PersonCandidate) -> Vec<&Individual> {
        self.individuals
            .with_last_name(&candidate.name.last)
            .into_iter()
            .filter(|individual| !suffix_conflict(&candidate.name, &individual.name))
            .collect()
    }

    /// A changed voter record keeps the individual its voter_id resolved to
    /// before, as long as the name still agrees. Moves are followed this way
    /// rather than by the city/state tier.
    fn same_registration(&self, candidate: &PersonCandidate) -> Option<CascadeOutcome> {
        if candidate.source != SourceSystem::Voter {
            return None;
        }
        let prior = self
            .memo
            .get(&(candidate.source, candidate.record_key.clone()))?;
        let individual = self.individuals.get(prior.individual_id.as_deref()?)?;
        if individual.name.last != candidate.name.last
            || suffix_conflict(&candidate.name, &individual.name)
        {
            return None;
        }
        Some(CascadeOutcome::Matched {
            individual_id: individual.id.clone(),
            method: prior.method,
            confidence: prior.confidence,
        })
    }

    fn profile<'a>(&'a self, individual: &'a Individual, addresses: &'a AddressStore) -> IndividualProfile<'a> {
        let current: Vec<_> = self.links.current_links(&individual.id).collect();
        IndividualProfile {
            individual,
            residential: self.links.current_residential(&individual.id),
            current_addresses: current.iter().map(|l| l.address_id.as_str()).collect(),
            localities: current
                .iter()
                .filter_map(|l| addresses.locality(&l.address_id))
                .collect(),
        }
    }

    fn cascade(&self, candidate: &PersonCandidate, addresses: &AddressStore) -> CascadeOutcome {
        let profiles: Vec<IndividualProfile> = self
            .considered(candidate)
            .into_iter()
            .map(|individual| self.profile(individual, addresses))
            .collect();
        if profiles.is_empty() {
            return CascadeOutcome::NoMatch;
        }

        for rule in &self.rules {
            let mut hits: Vec<(&IndividualProfile, f64)> = profiles
                .iter()
                .filter_map(|p| rule.evaluate(candidate, p).map(|confidence| (p, confidence)))
                .collect();
            if hits.is_empty() {
                continue;
            }

            // Scores never pick a winner within a tier; only a matching suffix does
            if hits.len() > 1 && !candidate.name.suffix.is_empty() {
                let same_suffix: Vec<_> = hits
                    .iter()
                    .filter(|(p, _)| p.individual.name.suffix == candidate.name.suffix)
                    .copied()
                    .collect();
                if !same_suffix.is_empty() {
                    hits = same_suffix;
                }
            }

            if let [(profile, confidence)] = hits.as_slice() {
                return CascadeOutcome::Matched {
                    individual_id: profile.individual.id.clone(),
                    method: rule.method(),
                    confidence: *confidence,
                };
            }

            let mut competing: Vec<String> = hits.iter().map(|(p, _)| p.individual.id.clone()).collect();
            competing.sort();
            return CascadeOutcome::Ambiguous {
                method: rule.method(),
                competing,
            };
        }

        CascadeOutcome::NoMatch
    }

    /// Tier 4: voters (and optionally donations) mint, donations otherwise stay unlinked
    fn no_match(
        &mut self,
        candidate: &PersonCandidate,
        as_of: NaiveDate,
        now: DateTime<Utc>,
        review: bool,
    ) -> Resolution {
        let mint = candidate.source == SourceSystem::Voter || self.mint_unmatched_donations;
        if !mint {
            return Resolution {
                individual_id: None,
                method: MatchMethod::Unmatched,
                confidence: 0.0,
                review,
                reused: false,
            };
        }

        let individual_id = self.individuals.mint(candidate.name.clone(), now);
        self.link(&individual_id, candidate, as_of);
        Resolution {
            individual_id: Some(individual_id),
            method: MatchMethod::NewIndividual,
            confidence: 1.0,
            review,
            reused: false,
        }
    }

    fn link(&mut self, individual_id: &str, candidate: &PersonCandidate, as_of: NaiveDate) {
        if let Some(address_id) = candidate.address_id.as_deref() {
            self.links.record(individual_id, address_id, candidate.source, as_of);
        }
    }

    fn push_log(&mut self, candidate: &PersonCandidate, resolution: &Resolution, candidate_count: usize) {
        debug!(
            source = %candidate.source,
            record = %candidate.record_key,
            name = %candidate.name.full(),
            method = resolution.method.as_str(),
            confidence = resolution.confidence,
            individual_id = resolution.individual_id.as_deref().unwrap_or("-"),
            review = resolution.review,
            reused = resolution.reused,
            "resolved"
        );

        let summary = serde_json::json!({
            "name": candidate.name.full(),
            "address_id": candidate.address_id,
            "locality": candidate.locality,
        });
        self.log.push(ResolutionLogEntry {
            source: candidate.source,
            record_key: candidate.record_key.clone(),
            candidate: summary.to_string(),
            method: resolution.method,
            confidence: resolution.confidence,
            individual_id: resolution.individual_id.clone(),
            ambiguous: resolution.review,
            candidate_count,
            reused: resolution.reused,
        });
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn individuals(&self) -> &IndividualStore {
        &self.individuals
    }

    pub fn links(&self) -> &LinkStore {
        &self.links
    }

    pub fn memo(&self) -> &ResolutionMemo {
        &self.memo
    }

    pub fn log(&self) -> &[ResolutionLogEntry] {
        &self.log
    }

    pub fn reviews(&self) -> &[ReviewItem] {
        &self.reviews
    }
}

/// Hash of everything the cascade looks at for this record
pub fn candidate_fingerprint(candidate: &PersonCandidate) -> String {
    let name = &candidate.name;
    let (city, state) = candidate
        .locality
        .as_ref()
        .map(|(c, s)| (c.as_str(), s.as_str()))
        .unwrap_or(("", ""));

    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{}|{}|{}|{}|{}|{}",
        candidate.source.code(),
        name.first,
        name.middle,
        name.last,
        name.suffix,
        candidate.address_id.as_deref().unwrap_or(""),
        city,
        state
    ));
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
