// 🧾 Raw-to-Processed Linker - Projects raw rows into the processed schema
// Domain fields are carried unchanged; resolved foreign keys and the match
// method/confidence are attached. Processed rows carry no run timestamps, so
// an unchanged input always projects to identical rows.

use crate::identity::Resolution;
use crate::matching::MatchMethod;
use crate::parser::{DonationRecord, VoterRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// PROCESSED RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedVoter {
    pub voter_id: String,
    pub batch_id: String,
    pub row_number: usize,

    pub individual_id: Option<String>,
    pub address_id: Option<String>,
    pub match_method: MatchMethod,
    pub match_confidence: f64,
    pub review_flag: bool,

    // As supplied
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

    /// Unrecognized columns, passed through
    pub extra_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDonation {
    pub donation_id: String,
    pub batch_id: String,
    pub row_number: usize,

    /// Both None when no confident match exists
    pub individual_id: Option<String>,
    pub address_id: Option<String>,
    pub match_method: MatchMethod,
    pub match_confidence: f64,
    pub review_flag: bool,

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
    pub extra_fields: BTreeMap<String, String>,
}

// ============================================================================
// LINKER
// ============================================================================

pub fn link_voter(
    batch_id: &str,
    record: &VoterRecord,
    address_id: Option<&str>,
    resolution: &Resolution,
) -> ProcessedVoter {
    ProcessedVoter {
        voter_id: record.voter_id.clone(),
        batch_id: batch_id.to_string(),
        row_number: record.row_number,
        individual_id: resolution.individual_id.clone(),
        address_id: address_id.map(str::to_string),
        match_method: resolution.method,
        match_confidence: resolution.confidence,
        review_flag: resolution.review,
        first_name: record.first_name.clone(),
        middle_name: record.middle_name.clone(),
        last_name: record.last_name.clone(),
        suffix: record.suffix.clone(),
        street_address: record.street_address.clone(),
        city: record.city.clone(),
        state: record.state.clone(),
        zip: record.zip.clone(),
        county: record.county.clone(),
        party: record.party.clone(),
        status: record.status.clone(),
        registration_date: record.registration_date.clone(),
        birth_year: record.birth_year.clone(),
        extra_fields: record.extra.clone(),
    }
}

/// An unlinked donation gets neither foreign key; its address still exists as an entity
pub fn link_donation(
    batch_id: &str,
    record: &DonationRecord,
    address_id: Option<&str>,
    resolution: &Resolution,
) -> ProcessedDonation {
    let address_id = resolution
        .individual_id
        .as_ref()
        .and(address_id)
        .map(str::to_string);

    ProcessedDonation {
        donation_id: record.donation_id.clone(),
        batch_id: batch_id.to_string(),
        row_number: record.row_number,
        individual_id: resolution.individual_id.clone(),
        address_id,
        match_method: resolution.method,
        match_confidence: resolution.confidence,
        review_flag: resolution.review,
        contributor_name: record.contributor_name.clone(),
        street_address: record.street_address.clone(),
        city: record.city.clone(),
        state: record.state.clone(),
        zip: record.zip.clone(),
        employer: record.employer.clone(),
        occupation: record.occupation.clone(),
        amount: record.amount.clone(),
        contribution_date: record.contribution_date.clone(),
        recipient: record.recipient.clone(),
        election_year: record.election_year.clone(),
        extra_fields: record.extra.clone(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{DonationExtractParser, ExtractParser};

    fn create_test_donation() -> DonationRecord {
        let csv = "donation_id,contributor_name,city,state,zip,amount,memo_code\n\
                   D1,MICHAEL JONES,Newark,NJ,99999999,250.00,X\n";
        let batch = DonationExtractParser.parse_bytes(csv.as_bytes(), "d.csv").unwrap();
        DonationRecord::from_row(&batch.rows[0]).unwrap()
    }

    #[test]
    fn test_unlinked_donation_drops_address() {
        let record = create_test_donation();
        let resolution = Resolution {
            individual_id: None,
            method: MatchMethod::Unmatched,
            confidence: 0.0,
            review: false,
            reused: false,
        };

        let processed = link_donation("batch-1", &record, Some("addr-1"), &resolution);
        assert_eq!(processed.individual_id, None);
        assert_eq!(processed.address_id, None);
        // Domain fields still carried
        assert_eq!(processed.amount, "250.00");
        assert_eq!(processed.zip, "99999999");
        assert_eq!(processed.extra_fields.get("memo_code").map(String::as_str), Some("X"));
    }

    #[test]
    fn test_linked_donation_keeps_keys() {
        let record = create_test_donation();
        let resolution = Resolution {
            individual_id: Some("ind-1".to_string()),
            method: MatchMethod::NameCityStateNoZip,
            confidence: 0.8,
            review: false,
            reused: false,
        };

        let processed = link_donation("batch-1", &record, Some("addr-1"), &resolution);
        assert_eq!(processed.individual_id.as_deref(), Some("ind-1"));
        assert_eq!(processed.address_id.as_deref(), Some("addr-1"));
        assert_eq!(processed.match_method, MatchMethod::NameCityStateNoZip);
        assert_eq!(processed.row_number, 2);
    }
}
