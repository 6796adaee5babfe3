// ⚙️ Pipeline Configuration - Rules as Data
// Thresholds, tier precedence, lexicon additions and geocode ranks, loaded
// once per run from TOML and immutable for the rest of it.
//
// Resolution order:
// 1. --config command-line argument
// 2. VOTER_LINKAGE_CONFIG environment variable
// 3. Built-in defaults

use crate::entities::GeocodePolicy;
use crate::error::{LinkageError, Result};
use crate::lexicon::{Lexicon, LexiconOverrides};
use crate::matching::MatchMethod;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "VOTER_LINKAGE_CONFIG";

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Cascade order; the first tier that fires wins
    pub tier_order: Vec<MatchMethod>,

    /// Maximum Levenshtein distance between given names at the same address
    pub max_edit_distance: usize,

    /// Fuzzy matches scoring below this are discarded. 0 admits everything
    /// within `max_edit_distance`
    pub min_fuzzy_confidence: f64,

    /// Name + city/state match, exact given name
    pub city_state_confidence: f64,

    /// Name + city/state match, given names equal only after nickname resolution
    pub city_state_nickname_confidence: f64,

    /// Mint individuals for donations that match nobody
    pub mint_unmatched_donations: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            tier_order: vec![
                MatchMethod::ExactNameAddress,
                MatchMethod::FuzzyNameSameAddress,
                MatchMethod::NameCityStateNoZip,
            ],
            max_edit_distance: 2,
            min_fuzzy_confidence: 0.0,
            city_state_confidence: 0.85,
            city_state_nickname_confidence: 0.80,
            mint_unmatched_donations: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Largest tolerated drop in overall match rate between runs before warning
    pub max_match_rate_drop: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            max_match_rate_drop: 0.05,
        }
    }
}

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub matching: MatchingConfig,
    pub lexicon: LexiconOverrides,
    pub geocode: GeocodePolicy,
    pub validation: ValidationConfig,
}

impl PipelineConfig {
    /// Load configuration following the resolution order above
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) => Self::from_file(&path),
            None => {
                info!("No config file given, using built-in defaults");
                let config = PipelineConfig::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            LinkageError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.as_ref().display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in lexicon with the `[lexicon]` section merged on top
    pub fn build_lexicon(&self) -> Lexicon {
        Lexicon::with_overrides(&self.lexicon)
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.matching;

        if m.tier_order.is_empty() {
            return Err(LinkageError::Config("matching.tier_order is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for method in &m.tier_order {
            if method.tier().is_none() {
                return Err(LinkageError::Config(format!(
                    "matching.tier_order: '{}' is not a matching tier",
                    method.as_str()
                )));
            }
            if !seen.insert(*method) {
                return Err(LinkageError::Config(format!(
                    "matching.tier_order: '{}' listed twice",
                    method.as_str()
                )));
            }
        }

        if !(0.0..=1.0).contains(&m.min_fuzzy_confidence) {
            return Err(LinkageError::Config(
                "matching.min_fuzzy_confidence must be within [0, 1]".to_string(),
            ));
        }

        // City/state matches never reach exact-match confidence
        for (key, value) in [
            ("city_state_confidence", m.city_state_confidence),
            ("city_state_nickname_confidence", m.city_state_nickname_confidence),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(LinkageError::Config(format!(
                    "matching.{} must be within (0, 1), got {}",
                    key, value
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.validation.max_match_rate_drop) {
            return Err(LinkageError::Config(
                "validation.max_match_rate_drop must be within [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}

/// CLI argument first, then environment variable
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }
    std::env::var(CONFIG_ENV_VAR)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.matching.tier_order.len(), 3);
        assert_eq!(config.matching.min_fuzzy_confidence, 0.0);
        assert_eq!(config.geocode.rank("census"), 2);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [matching]
            mint_unmatched_donations = true

            [lexicon.nicknames]
            chuck = "charles"

            [geocode.source_rank]
            surveyed = 5
            "#,
        )
        .unwrap();

        assert!(config.matching.mint_unmatched_donations);
        assert_eq!(config.matching.max_edit_distance, 2);
        assert_eq!(config.geocode.rank("surveyed"), 5);
        assert_eq!(config.validation.max_match_rate_drop, 0.05);

        let lexicon = config.build_lexicon();
        assert_eq!(lexicon.canonical_given_name("CHUCK"), "CHARLES");
    }

    #[test]
    fn test_tier_order_from_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [matching]
            tier_order = ["exact_name_address", "name_city_state_no_zip"]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.matching.tier_order,
            vec![MatchMethod::ExactNameAddress, MatchMethod::NameCityStateNoZip]
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        let exact_city = PipelineConfig::from_toml_str(
            "[matching]\ncity_state_confidence = 1.0\n",
        );
        assert!(exact_city.is_err());

        let duplicate = PipelineConfig::from_toml_str(
            "[matching]\ntier_order = [\"exact_name_address\", \"exact_name_address\"]\n",
        );
        assert!(duplicate.is_err());

        let not_a_tier = PipelineConfig::from_toml_str(
            "[matching]\ntier_order = [\"new_individual\"]\n",
        );
        assert!(not_a_tier.is_err());

        let empty = PipelineConfig::from_toml_str("[matching]\ntier_order = []\n");
        assert!(empty.is_err());
    }

    #[test]
    fn test_from_file_and_cli_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[validation]\nmax_match_rate_drop = 0.1").unwrap();

        let config = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.validation.max_match_rate_drop, 0.1);

        assert_eq!(
            resolve_config_path(Some(file.path())),
            Some(file.path().to_path_buf())
        );
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = PipelineConfig::from_file("/nonexistent/voter-linkage.toml").unwrap_err();
        assert!(matches!(err, LinkageError::Config(_)));
    }
}
