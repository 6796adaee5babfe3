//! End-to-end linkage scenarios: import CSV extracts, run the pipeline,
//! inspect the committed tables.

use chrono::NaiveDate;
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use voter_linkage::db::{load_addresses, load_individuals, load_links};
use voter_linkage::{
    import_extract, list_reviews, load_processed_donations, load_processed_voters, open_database,
    run_pipeline, MatchMethod, PipelineConfig, ProcessedDonation, ProcessedVoter, RunStatus,
    SourceSystem, TableSet,
};

const VOTER_HEADER: &str = "voter_id,first_name,middle_name,last_name,suffix,street_address,city,state,zip,county,party,status,latitude,longitude,geocode_source\n";
const DONATION_HEADER: &str = "donation_id,contributor_name,street_address,city,state,zip,employer,amount,contribution_date\n";

struct Workspace {
    dir: TempDir,
    conn: Connection,
    config: PipelineConfig,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let conn = open_database(&dir.path().join("linkage.db")).unwrap();
        Workspace {
            dir,
            conn,
            config: PipelineConfig::default(),
        }
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn import(&mut self, source: SourceSystem, name: &str, content: &str) {
        let path = self.write(name, content);
        import_extract(&mut self.conn, source, &path).unwrap();
    }

    fn run(&mut self) -> voter_linkage::RunSummary {
        run_pipeline(&mut self.conn, &self.config, as_of()).unwrap()
    }

    fn voters(&self) -> Vec<ProcessedVoter> {
        load_processed_voters(&self.conn, TableSet::Live).unwrap()
    }

    fn donations(&self) -> Vec<ProcessedDonation> {
        load_processed_donations(&self.conn, TableSet::Live).unwrap()
    }

    fn donation(&self, id: &str) -> ProcessedDonation {
        self.donations().into_iter().find(|d| d.donation_id == id).unwrap()
    }

    fn voter(&self, id: &str) -> ProcessedVoter {
        self.voters().into_iter().find(|v| v.voter_id == id).unwrap()
    }
}

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn voters_csv(rows: &[&str]) -> String {
    let mut csv = VOTER_HEADER.to_string();
    for row in rows {
        csv.push_str(row);
        csv.push('\n');
    }
    csv
}

fn donations_csv(rows: &[&str]) -> String {
    let mut csv = DONATION_HEADER.to_string();
    for row in rows {
        csv.push_str(row);
        csv.push('\n');
    }
    csv
}

#[test]
fn nickname_at_same_address_links_via_fuzzy_tier() {
    let mut ws = Workspace::new();
    ws.import(
        SourceSystem::Voter,
        "voters.csv",
        &voters_csv(&[
            "V1,Gregory,,Smith,,12 Main Street,Springfield,NJ,07081,Union,DEM,A,,,",
            "V2,John,A,Smith,,100 Elm St,Springfield,NJ,07081,Union,REP,A,,,",
        ]),
    );
    ws.import(
        SourceSystem::Donation,
        "donations.csv",
        &donations_csv(&["D1,GREG SMITH,12 MAIN ST,SPRINGFIELD,NJ,07081,Acme,100.00,2024-03-01"]),
    );

    let summary = ws.run();
    assert_eq!(summary.status, RunStatus::Committed);

    let voter = ws.voter("V1");
    let donation = ws.donation("D1");
    assert_eq!(donation.individual_id, voter.individual_id);
    assert_eq!(donation.address_id, voter.address_id);
    assert_eq!(donation.match_method, MatchMethod::FuzzyNameSameAddress);
    assert_eq!(voter.match_method, MatchMethod::NewIndividual);
}

#[test]
fn corrupted_zip_matches_on_name_city_state() {
    let mut ws = Workspace::new();
    ws.import(
        SourceSystem::Voter,
        "voters.csv",
        &voters_csv(&["V1,Mike,,Jones,,5 Oak Ave,Newark,NJ,07102,Essex,DEM,A,,,"]),
    );
    ws.import(
        SourceSystem::Donation,
        "donations.csv",
        &donations_csv(&["D1,MICHAEL JONES,,Newark,NJ,99999999,,250.00,2024-02-10"]),
    );

    ws.run();

    let voter = ws.voter("V1");
    let donation = ws.donation("D1");
    assert_eq!(donation.individual_id, voter.individual_id);
    assert_eq!(donation.match_method, MatchMethod::NameCityStateNoZip);
    assert!(donation.match_confidence < 1.0);
    assert!(donation.match_confidence > 0.0);
    // Raw value carried as supplied
    assert_eq!(donation.zip, "99999999");
}

#[test]
fn same_name_voters_in_one_city_are_not_merged() {
    let mut ws = Workspace::new();
    ws.import(
        SourceSystem::Voter,
        "voters.csv",
        &voters_csv(&[
            "V1,John,,Smith,,12 Main St,Newark,NJ,07102,Essex,DEM,A,,,",
            "V2,John,,Smith,,40 Oak Ave,Newark,NJ,07102,Essex,REP,A,,,",
        ]),
    );

    ws.run();

    let first = ws.voter("V1");
    let second = ws.voter("V2");
    assert_ne!(first.individual_id, second.individual_id);
    assert_ne!(first.address_id, second.address_id);
    assert_eq!(second.match_method, MatchMethod::NewIndividual);
}

#[test]
fn geocode_retained_when_later_extract_omits_it() {
    let mut ws = Workspace::new();
    ws.import(
        SourceSystem::Voter,
        "voters-jan.csv",
        &voters_csv(&["V1,JOHN,A,SMITH,,12 MAIN ST,Springfield,NJ,07081,Union,DEM,A,40.70,-74.30,census"]),
    );
    ws.run();
    let first = ws.voter("V1");

    ws.import(
        SourceSystem::Voter,
        "voters-feb.csv",
        &voters_csv(&["V1,John,A.,Smith,,12 Main Street,Springfield,NJ,07081,Union,DEM,A,,,"]),
    );
    let summary = ws.run();
    assert_eq!(summary.status, RunStatus::Committed);
    assert!(summary.report.geocode_losses.is_empty());

    let second = ws.voter("V1");
    assert_eq!(second.individual_id, first.individual_id);
    assert_eq!(second.address_id, first.address_id);

    let addresses = load_addresses(&ws.conn, TableSet::Live).unwrap();
    let address = addresses
        .iter()
        .find(|a| Some(&a.id) == second.address_id.as_ref())
        .unwrap();
    let geocode = address.geocode.as_ref().unwrap();
    assert_eq!(geocode.latitude, 40.7);
    assert_eq!(geocode.longitude, -74.3);
    assert_eq!(geocode.source, "census");
}

#[test]
fn geocode_only_replaced_by_higher_ranked_source() {
    let mut ws = Workspace::new();
    ws.import(
        SourceSystem::Voter,
        "v1.csv",
        &voters_csv(&["V1,Ann,,Lee,,9 Birch Ln,Trenton,NJ,08608,Mercer,DEM,A,40.2200,-74.7600,rooftop"]),
    );
    ws.run();

    // Lower-ranked source with different coordinates: ignored
    ws.import(
        SourceSystem::Voter,
        "v2.csv",
        &voters_csv(&["V1,Ann,,Lee,,9 Birch Ln,Trenton,NJ,08608,Mercer,DEM,A,40.3000,-74.9000,voter_file"]),
    );
    let summary = ws.run();
    assert_eq!(summary.status, RunStatus::Committed);
    assert_eq!(summary.geocodes.rejected, 1);
    let address = &load_addresses(&ws.conn, TableSet::Live).unwrap()[0];
    assert_eq!(address.geocode.as_ref().unwrap().source, "rooftop");
    assert_eq!(address.geocode.as_ref().unwrap().latitude, 40.22);

    // Higher-ranked source: accepted
    ws.import(
        SourceSystem::Voter,
        "v3.csv",
        &voters_csv(&["V1,Ann,,Lee,,9 Birch Ln,Trenton,NJ,08608,Mercer,DEM,A,40.2210,-74.7610,manual"]),
    );
    let summary = ws.run();
    assert_eq!(summary.geocodes.upgraded, 1);
    let address = &load_addresses(&ws.conn, TableSet::Live).unwrap()[0];
    assert_eq!(address.geocode.as_ref().unwrap().source, "manual");
}

#[test]
fn rerun_on_unchanged_input_is_identical() {
    let mut ws = Workspace::new();
    ws.import(
        SourceSystem::Voter,
        "voters.csv",
        &voters_csv(&[
            "V1,Gregory,,Smith,,12 Main Street,Springfield,NJ,07081,Union,DEM,A,40.7100,-74.3100,census",
            "V2,Michael,,Jones,,5 Oak Ave,Newark,NJ,07102,Essex,DEM,A,,,",
            "V3,Robert,,Brown,Jr,7 Pine Rd,Camden,NJ,08101,Camden,IND,A,,,",
        ]),
    );
    ws.import(
        SourceSystem::Donation,
        "donations.csv",
        &donations_csv(&[
            "D1,GREG SMITH,12 MAIN ST,SPRINGFIELD,NJ,07081,Acme,100.00,2024-03-01",
            "D2,MIKE JONES,,Newark,NJ,99999999,,250.00,2024-02-10",
            "D3,PAT NOBODY,1 Nowhere Way,Hoboken,NJ,07030,,5.00,2024-01-15",
        ]),
    );

    ws.run();
    let voters = ws.voters();
    let donations = ws.donations();
    let individuals = load_individuals(&ws.conn, TableSet::Live).unwrap();
    let addresses = load_addresses(&ws.conn, TableSet::Live).unwrap();
    let links = load_links(&ws.conn, TableSet::Live).unwrap();

    let summary = ws.run();
    assert_eq!(summary.status, RunStatus::Committed);
    assert_eq!(ws.voters(), voters);
    assert_eq!(ws.donations(), donations);
    assert_eq!(load_individuals(&ws.conn, TableSet::Live).unwrap(), individuals);
    assert_eq!(load_addresses(&ws.conn, TableSet::Live).unwrap(), addresses);
    assert_eq!(load_links(&ws.conn, TableSet::Live).unwrap(), links);

    // No record lost its link between runs
    assert_eq!(summary.report.previous_match_rate, Some(summary.report.match_rate));
    assert!(summary.report.table_deltas.iter().all(|d| d.delta == 0));
}

#[test]
fn reimporting_same_file_is_a_noop() {
    let mut ws = Workspace::new();
    let path = ws.write(
        "voters.csv",
        &voters_csv(&["V1,Ann,,Lee,,9 Birch Ln,Trenton,NJ,08608,Mercer,DEM,A,,,"]),
    );

    let first = import_extract(&mut ws.conn, SourceSystem::Voter, &path).unwrap();
    let second = import_extract(&mut ws.conn, SourceSystem::Voter, &path).unwrap();
    assert_eq!(first.inserted, 1);
    assert_eq!(second.inserted, 0);
    assert_eq!(first.batch_id, second.batch_id);
}

#[test]
fn junior_and_senior_are_never_merged() {
    let mut ws = Workspace::new();
    ws.import(
        SourceSystem::Voter,
        "voters.csv",
        &voters_csv(&[
            "V1,Robert,,Brown,Jr,7 Pine Rd,Camden,NJ,08101,Camden,IND,A,,,",
            "V2,Robert,,Brown,Sr,7 Pine Road,Camden,NJ,08101,Camden,IND,A,,,",
        ]),
    );
    ws.import(
        SourceSystem::Donation,
        "donations.csv",
        &donations_csv(&[
            "D1,ROBERT BROWN,7 PINE RD,CAMDEN,NJ,08101,,50.00,2024-04-01",
            "D2,\"BROWN JR, ROBERT\",7 PINE RD,CAMDEN,NJ,08101,,75.00,2024-04-02",
        ]),
    );

    ws.run();

    let jr = ws.voter("V1");
    let sr = ws.voter("V2");
    assert_ne!(jr.individual_id, sr.individual_id);
    assert_eq!(jr.address_id, sr.address_id);

    // No suffix: both fit equally, so nothing is guessed
    let ambiguous = ws.donation("D1");
    assert_eq!(ambiguous.individual_id, None);
    assert_eq!(ambiguous.match_method, MatchMethod::Unmatched);
    assert!(ambiguous.review_flag);

    let reviews = list_reviews(&ws.conn).unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].record_key, "D1");
    assert_eq!(reviews[0].competing.len(), 2);

    // Explicit suffix resolves the tie
    let junior = ws.donation("D2");
    assert_eq!(junior.individual_id, jr.individual_id);
}

#[test]
fn malformed_rows_are_skipped_and_counted() {
    let mut ws = Workspace::new();
    ws.import(
        SourceSystem::Voter,
        "voters.csv",
        &voters_csv(&[
            "V1,Ann,,Lee,,9 Birch Ln,Trenton,NJ,08608,Mercer,DEM,A,,,",
            ",Nobody,,Home,,1 Main St,Trenton,NJ,08608,Mercer,DEM,A,,,",
        ]),
    );

    let summary = ws.run();
    assert_eq!(summary.voters, 1);
    assert_eq!(summary.malformed_rows, 1);
    assert_eq!(summary.status, RunStatus::Committed);
    assert!(summary
        .report
        .findings
        .iter()
        .any(|f| f.check == "malformed_rows"));
}

#[test]
fn ragged_rows_are_reported() {
    let mut ws = Workspace::new();
    ws.import(
        SourceSystem::Voter,
        "voters.csv",
        &voters_csv(&[
            "V1,Ann,,Lee,,9 Birch Ln,Trenton,NJ,08608,Mercer,DEM,A,,,",
            "V2,Bo,,Park",
        ]),
    );

    let summary = ws.run();
    assert_eq!(summary.voters, 2);
    assert_eq!(summary.status, RunStatus::Committed);
    assert!(summary
        .report
        .findings
        .iter()
        .any(|f| f.check == "ragged_rows"));
}

#[test]
fn run_without_imports_is_an_error() {
    let mut ws = Workspace::new();
    assert!(run_pipeline(&mut ws.conn, &ws.config, as_of()).is_err());
}
