// Voter Linkage - Core Library
// Record linkage for voter-file and donation extracts: normalize, resolve
// addresses and individuals, link, validate, commit.

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod identity;
pub mod lexicon;
pub mod linker;
pub mod matching;
pub mod normalizer;
pub mod parser;
pub mod pipeline;
pub mod validation;

// Re-export commonly used types
pub use config::{MatchingConfig, PipelineConfig, ValidationConfig, CONFIG_ENV_VAR};
pub use db::{
    open_database, setup_database, list_batches, list_reviews, load_processed_donations,
    load_processed_voters, BatchInfo, ReviewRow, RunRecord, RunStatus, TableSet,
};
pub use entities::{
    address_id, Address, AddressStore, Geocode, GeocodePolicy, Individual, IndividualAddressLink,
    IndividualStore, LinkRole, LinkStore,
};
pub use error::{LinkageError, Result};
pub use identity::{IdentityResolver, Resolution};
pub use lexicon::{Lexicon, LexiconOverrides};
pub use linker::{ProcessedDonation, ProcessedVoter};
pub use matching::{MatchMethod, PersonCandidate};
pub use normalizer::{AddressInput, NormalizedAddress, NormalizedName, Normalizer};
pub use parser::{get_parser, ExtractParser, RawBatch, SourceSystem};
pub use pipeline::{import_extract, last_report, run_pipeline, ImportSummary, RunSummary};
pub use validation::{Finding, Reporter, RunSnapshot, Severity, ValidationReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
