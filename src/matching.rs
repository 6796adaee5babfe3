// 🔍 Matching Rules - Tiered person matching
// Three strategies in strict precedence: Exact Name+Address, Fuzzy Name at Same
// Address, Name + City/State (ZIP ignored). Each is a `MatchRule`; the Identity
// Resolver runs them in configured order and stops at the first that fires.

use crate::config::MatchingConfig;
use crate::entities::Individual;
use crate::normalizer::NormalizedName;
use crate::parser::SourceSystem;
use serde::{Deserialize, Serialize};

// ============================================================================
// MATCH METHOD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Tier 1: same first + last name at the same address
    ExactNameAddress,

    /// Tier 2: same last name, close or nickname-equivalent first name, same address
    FuzzyNameSameAddress,

    /// Tier 3 (donations): same last name, equivalent first name, same city/state
    NameCityStateNoZip,

    /// Tier 4 (voters): nobody matched, a new individual was minted
    NewIndividual,

    /// Tier 4 (donations): nobody matched, left unlinked
    Unmatched,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::ExactNameAddress => "exact_name_address",
            MatchMethod::FuzzyNameSameAddress => "fuzzy_name_same_address",
            MatchMethod::NameCityStateNoZip => "name_city_state_no_zip",
            MatchMethod::NewIndividual => "new_individual",
            MatchMethod::Unmatched => "unmatched",
        }
    }

    pub fn parse(s: &str) -> Option<MatchMethod> {
        match s {
            "exact_name_address" => Some(MatchMethod::ExactNameAddress),
            "fuzzy_name_same_address" => Some(MatchMethod::FuzzyNameSameAddress),
            "name_city_state_no_zip" => Some(MatchMethod::NameCityStateNoZip),
            "new_individual" => Some(MatchMethod::NewIndividual),
            "unmatched" => Some(MatchMethod::Unmatched),
            _ => None,
        }
    }

    /// Cascade tier number; None for the no-match outcomes
    pub fn tier(&self) -> Option<u8> {
        match self {
            MatchMethod::ExactNameAddress => Some(1),
            MatchMethod::FuzzyNameSameAddress => Some(2),
            MatchMethod::NameCityStateNoZip => Some(3),
            MatchMethod::NewIndividual | MatchMethod::Unmatched => None,
        }
    }
}

// ============================================================================
// MATCH INPUTS
// ============================================================================

/// A person-like record awaiting resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonCandidate {
    pub source: SourceSystem,

    /// voter_id / donation_id
    pub record_key: String,

    pub name: NormalizedName,

    /// Resolved address, if the record carried a street line
    pub address_id: Option<String>,

    /// (city, state), if both were present
    pub locality: Option<(String, String)>,
}

/// An existing individual plus their current address associations
#[derive(Debug, Clone)]
pub struct IndividualProfile<'a> {
    pub individual: &'a Individual,
    pub residential: Option<&'a str>,
    pub current_addresses: Vec<&'a str>,
    pub localities: Vec<(&'a str, &'a str)>,
}

impl IndividualProfile<'_> {
    fn shares_address(&self, candidate: &PersonCandidate) -> bool {
        let Some(address_id) = candidate.address_id.as_deref() else {
            return false;
        };
        match candidate.source {
            SourceSystem::Voter => self.residential == Some(address_id),
            SourceSystem::Donation => self.current_addresses.contains(&address_id),
        }
    }

    fn shares_locality(&self, candidate: &PersonCandidate) -> bool {
        match &candidate.locality {
            Some((city, state)) => self
                .localities
                .iter()
                .any(|(c, s)| *c == city.as_str() && *s == state.as_str()),
            None => false,
        }
    }
}

/// JR vs SR (both present, different) can never be the same person
pub fn suffix_conflict(a: &NormalizedName, b: &NormalizedName) -> bool {
    !a.suffix.is_empty() && !b.suffix.is_empty() && a.suffix != b.suffix
}

// ============================================================================
// MATCH RULE TRAIT
// ============================================================================

pub trait MatchRule: Send + Sync {
    /// Method tag recorded when this rule fires
    fn method(&self) -> MatchMethod;

    /// Confidence in (0, 1] if the candidate matches this individual
    fn evaluate(&self, candidate: &PersonCandidate, profile: &IndividualProfile) -> Option<f64>;
}

/// Rule objects in the configured cascade order
pub fn build_rules(config: &MatchingConfig) -> Vec<Box<dyn MatchRule>> {
    config
        .tier_order
        .iter()
        .filter_map(|method| -> Option<Box<dyn MatchRule>> {
            match method {
                MatchMethod::ExactNameAddress => Some(Box::new(ExactNameAddress)),
                MatchMethod::FuzzyNameSameAddress => Some(Box::new(FuzzyNameSameAddress {
                    max_edit_distance: config.max_edit_distance,
                    min_confidence: config.min_fuzzy_confidence,
                })),
                MatchMethod::NameCityStateNoZip => Some(Box::new(NameCityState {
                    exact_confidence: config.city_state_confidence,
                    nickname_confidence: config.city_state_nickname_confidence,
                })),
                MatchMethod::NewIndividual | MatchMethod::Unmatched => None,
            }
        })
        .collect()
}

// ============================================================================
// TIER 1: EXACT NAME + ADDRESS
// ============================================================================

pub struct ExactNameAddress;

impl MatchRule for ExactNameAddress {
    fn method(&self) -> MatchMethod {
        MatchMethod::ExactNameAddress
    }

    fn evaluate(&self, candidate: &PersonCandidate, profile: &IndividualProfile) -> Option<f64> {
        let existing = &profile.individual.name;
        if candidate.name.first.is_empty()
            || candidate.name.first != existing.first
            || candidate.name.last != existing.last
        {
            return None;
        }
        profile.shares_address(candidate).then_some(1.0)
    }
}

// ============================================================================
// TIER 2: FUZZY NAME AT SAME ADDRESS
// ============================================================================

pub struct FuzzyNameSameAddress {
    pub max_edit_distance: usize,
    pub min_confidence: f64,
}

impl MatchRule for FuzzyNameSameAddress {
    fn method(&self) -> MatchMethod {
        MatchMethod::FuzzyNameSameAddress
    }

    fn evaluate(&self, candidate: &PersonCandidate, profile: &IndividualProfile) -> Option<f64> {
        let a = &candidate.name;
        let b = &profile.individual.name;
        if a.last != b.last || a.first.is_empty() || b.first.is_empty() {
            return None;
        }
        if !profile.shares_address(candidate) {
            return None;
        }

        // Nickname equivalence counts as distance 0
        let distance = if a.first_canonical == b.first_canonical {
            0
        } else {
            levenshtein_distance(&a.first, &b.first)
        };
        if distance > self.max_edit_distance {
            return None;
        }

        let longest = a.first.chars().count().max(b.first.chars().count());
        let confidence = 1.0 - distance as f64 / longest as f64;
        (confidence >= self.min_confidence).then_some(confidence)
    }
}

// ============================================================================
// TIER 3: NAME + CITY/STATE, ZIP IGNORED
// ============================================================================
//
// Donations only. Two voter registrations at different addresses in one town
// are two people until proven otherwise.

pub struct NameCityState {
    pub exact_confidence: f64,
    pub nickname_confidence: f64,
}

impl MatchRule for NameCityState {
    fn method(&self) -> MatchMethod {
        MatchMethod::NameCityStateNoZip
    }

    fn evaluate(&self, candidate: &PersonCandidate, profile: &IndividualProfile) -> Option<f64> {
        if candidate.source == SourceSystem::Voter {
            return None;
        }
        let a = &candidate.name;
        let b = &profile.individual.name;
        if a.last != b.last || a.first.is_empty() || !profile.shares_locality(candidate) {
            return None;
        }

        if a.first == b.first {
            Some(self.exact_confidence)
        } else if a.first_canonical == b.first_canonical {
            Some(self.nickname_confidence)
        } else {
            None
        }
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Minimum number of single-character edits (insertions, deletions,
/// substitutions) to turn one string into the other
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::Lexicon;
    use chrono::Utc;

    fn create_test_name(first: &str, last: &str, suffix: &str) -> NormalizedName {
        let lexicon = Lexicon::builtin();
        NormalizedName {
            first: first.to_string(),
            middle: String::new(),
            last: last.to_string(),
            suffix: suffix.to_string(),
            first_canonical: lexicon.canonical_given_name(first).to_string(),
        }
    }

    fn create_test_candidate(
        source: SourceSystem,
        name: NormalizedName,
        address_id: Option<&str>,
        locality: Option<(&str, &str)>,
    ) -> PersonCandidate {
        PersonCandidate {
            source,
            record_key: "R1".to_string(),
            name,
            address_id: address_id.map(str::to_string),
            locality: locality.map(|(c, s)| (c.to_string(), s.to_string())),
        }
    }

    fn profile<'a>(individual: &'a Individual, residential: Option<&'a str>) -> IndividualProfile<'a> {
        IndividualProfile {
            individual,
            residential,
            current_addresses: residential.into_iter().collect(),
            localities: vec![("SPRINGFIELD", "NJ")],
        }
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("JON", "JOHN"), 1);
        assert_eq!(levenshtein_distance("STEVEN", "STEPHEN"), 2);
        assert_eq!(levenshtein_distance("", "ANN"), 3);
        assert_eq!(levenshtein_distance("JOSÉ", "JOSE"), 1);
    }

    #[test]
    fn test_exact_requires_same_address() {
        let individual = Individual::new(create_test_name("JOHN", "SMITH", ""), Utc::now());
        let p = profile(&individual, Some("addr-x"));
        let rule = ExactNameAddress;

        let here = create_test_candidate(
            SourceSystem::Voter,
            create_test_name("JOHN", "SMITH", ""),
            Some("addr-x"),
            None,
        );
        let elsewhere = create_test_candidate(
            SourceSystem::Voter,
            create_test_name("JOHN", "SMITH", ""),
            Some("addr-y"),
            None,
        );

        assert_eq!(rule.evaluate(&here, &p), Some(1.0));
        assert_eq!(rule.evaluate(&elsewhere, &p), None);
    }

    #[test]
    fn test_fuzzy_nickname_is_distance_zero() {
        let individual = Individual::new(create_test_name("GREGORY", "SMITH", ""), Utc::now());
        let p = profile(&individual, Some("addr-x"));
        let rule = FuzzyNameSameAddress {
            max_edit_distance: 2,
            min_confidence: 0.5,
        };

        let greg = create_test_candidate(
            SourceSystem::Voter,
            create_test_name("GREG", "SMITH", ""),
            Some("addr-x"),
            None,
        );
        assert_eq!(rule.evaluate(&greg, &p), Some(1.0));

        let jon = Individual::new(create_test_name("JOHN", "SMITH", ""), Utc::now());
        let p = profile(&jon, Some("addr-x"));
        let typo = create_test_candidate(
            SourceSystem::Voter,
            create_test_name("JON", "SMITH", ""),
            Some("addr-x"),
            None,
        );
        assert_eq!(rule.evaluate(&typo, &p), Some(0.75));
    }

    #[test]
    fn test_fuzzy_floor_blocks_short_names() {
        let individual = Individual::new(create_test_name("ANN", "LEE", ""), Utc::now());
        let p = profile(&individual, Some("addr-x"));
        let rule = FuzzyNameSameAddress {
            max_edit_distance: 2,
            min_confidence: 0.5,
        };

        // ANN → DAN: distance 2, confidence 0.33
        let dan = create_test_candidate(
            SourceSystem::Voter,
            create_test_name("DAN", "LEE", ""),
            Some("addr-x"),
            None,
        );
        assert_eq!(rule.evaluate(&dan, &p), None);

        // Default floor: edit distance alone decides
        let rule = FuzzyNameSameAddress {
            max_edit_distance: 2,
            min_confidence: MatchingConfig::default().min_fuzzy_confidence,
        };
        let confidence = rule.evaluate(&dan, &p).unwrap();
        assert!((confidence - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_city_state_ignores_address() {
        let individual = Individual::new(create_test_name("MIKE", "JONES", ""), Utc::now());
        let p = IndividualProfile {
            individual: &individual,
            residential: Some("addr-x"),
            current_addresses: vec!["addr-x"],
            localities: vec![("NEWARK", "NJ")],
        };
        let rule = NameCityState {
            exact_confidence: 0.85,
            nickname_confidence: 0.80,
        };

        let michael = create_test_candidate(
            SourceSystem::Donation,
            create_test_name("MICHAEL", "JONES", ""),
            None,
            Some(("NEWARK", "NJ")),
        );
        assert_eq!(rule.evaluate(&michael, &p), Some(0.80));

        let other_city = create_test_candidate(
            SourceSystem::Donation,
            create_test_name("MIKE", "JONES", ""),
            None,
            Some(("TRENTON", "NJ")),
        );
        assert_eq!(rule.evaluate(&other_city, &p), None);
    }

    #[test]
    fn test_city_state_skips_voter_records() {
        let individual = Individual::new(create_test_name("JOHN", "SMITH", ""), Utc::now());
        let p = profile(&individual, Some("addr-x"));
        let rule = NameCityState {
            exact_confidence: 0.85,
            nickname_confidence: 0.80,
        };

        let voter = create_test_candidate(
            SourceSystem::Voter,
            create_test_name("JOHN", "SMITH", ""),
            Some("addr-y"),
            Some(("SPRINGFIELD", "NJ")),
        );
        assert_eq!(rule.evaluate(&voter, &p), None);

        let donation = PersonCandidate {
            source: SourceSystem::Donation,
            ..voter
        };
        assert_eq!(rule.evaluate(&donation, &p), Some(0.85));
    }

    #[test]
    fn test_donation_matches_any_current_address() {
        let individual = Individual::new(create_test_name("JOHN", "SMITH", ""), Utc::now());
        let p = IndividualProfile {
            individual: &individual,
            residential: Some("addr-home"),
            current_addresses: vec!["addr-home", "addr-po-box"],
            localities: vec![],
        };
        let donation = create_test_candidate(
            SourceSystem::Donation,
            create_test_name("JOHN", "SMITH", ""),
            Some("addr-po-box"),
            None,
        );
        assert_eq!(ExactNameAddress.evaluate(&donation, &p), Some(1.0));

        // A voter record must agree with the residential address
        let voter = PersonCandidate {
            source: SourceSystem::Voter,
            ..donation
        };
        assert_eq!(ExactNameAddress.evaluate(&voter, &p), None);
    }

    #[test]
    fn test_suffix_conflict() {
        let jr = create_test_name("JOHN", "SMITH", "JR");
        let sr = create_test_name("JOHN", "SMITH", "SR");
        let none = create_test_name("JOHN", "SMITH", "");

        assert!(suffix_conflict(&jr, &sr));
        assert!(!suffix_conflict(&jr, &none));
        assert!(!suffix_conflict(&jr, &jr));
    }

    #[test]
    fn test_build_rules_follows_config_order() {
        let config = MatchingConfig {
            tier_order: vec![MatchMethod::NameCityStateNoZip, MatchMethod::ExactNameAddress],
            ..MatchingConfig::default()
        };
        let methods: Vec<_> = build_rules(&config).iter().map(|r| r.method()).collect();
        assert_eq!(
            methods,
            vec![MatchMethod::NameCityStateNoZip, MatchMethod::ExactNameAddress]
        );
    }

    #[test]
    fn test_method_names_round_trip() {
        for method in [
            MatchMethod::ExactNameAddress,
            MatchMethod::FuzzyNameSameAddress,
            MatchMethod::NameCityStateNoZip,
            MatchMethod::NewIndividual,
            MatchMethod::Unmatched,
        ] {
            assert_eq!(MatchMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(MatchMethod::NameCityStateNoZip.tier(), Some(3));
        assert_eq!(MatchMethod::Unmatched.tier(), None);
    }
}
