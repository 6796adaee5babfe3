// 👤 Individual Entity - Stable identity for a real person
//
// "The name is a VALUE, the UUID is IDENTITY": an individual's id is generated
// once and never derived from its content, so name corrections never move it.
//
// Individuals are only ever created or updated, never deleted.

use crate::lexicon::Lexicon;
use crate::normalizer::NormalizedName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ============================================================================
// INDIVIDUAL ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    /// Stable identity (UUID v4) - NEVER changes
    pub id: String,

    /// Normalized name components (stored form keeps nicknames as given)
    pub name: NormalizedName,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Individual {
    pub fn new(name: NormalizedName, now: DateTime<Utc>) -> Self {
        Individual {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        self.name.full()
    }

    /// Late-arriving name components: fill empty middle/suffix, never overwrite.
    /// Returns true if anything changed.
    pub fn apply_name_correction(&mut self, observed: &NormalizedName, now: DateTime<Utc>) -> bool {
        let mut changed = false;

        if self.name.middle.is_empty() && !observed.middle.is_empty() {
            self.name.middle = observed.middle.clone();
            changed = true;
        }
        if self.name.suffix.is_empty() && !observed.suffix.is_empty() {
            self.name.suffix = observed.suffix.clone();
            changed = true;
        }

        if changed {
            self.updated_at = now;
        }
        changed
    }
}

// ============================================================================
// INDIVIDUAL STORE
// ============================================================================

/// Keyed store `individual_id → Individual`, indexed by last name for blocking.
pub struct IndividualStore {
    individuals: BTreeMap<String, Individual>,
    by_last_name: HashMap<String, BTreeSet<String>>,
}

impl IndividualStore {
    pub fn new() -> Self {
        IndividualStore {
            individuals: BTreeMap::new(),
            by_last_name: HashMap::new(),
        }
    }

    /// Store preloaded from previous runs. Nickname resolution is recomputed
    /// with this run's lexicon.
    pub fn from_existing(individuals: Vec<Individual>, lexicon: &Lexicon) -> Self {
        let mut store = IndividualStore::new();
        for mut individual in individuals {
            individual.name.first_canonical = lexicon
                .canonical_given_name(&individual.name.first)
                .to_string();
            store.insert(individual);
        }
        store
    }

    fn insert(&mut self, individual: Individual) {
        self.by_last_name
            .entry(individual.name.last.clone())
            .or_default()
            .insert(individual.id.clone());
        self.individuals.insert(individual.id.clone(), individual);
    }

    /// Create a brand-new individual and return its id
    pub fn mint(&mut self, name: NormalizedName, now: DateTime<Utc>) -> String {
        let individual = Individual::new(name, now);
        let id = individual.id.clone();
        self.insert(individual);
        id
    }

    pub fn get(&self, id: &str) -> Option<&Individual> {
        self.individuals.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.individuals.contains_key(id)
    }

    /// Individuals sharing an exact normalized last name, ordered by id
    pub fn with_last_name(&self, last: &str) -> Vec<&Individual> {
        self.by_last_name
            .get(last)
            .map(|ids| ids.iter().filter_map(|id| self.individuals.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn apply_name_correction(
        &mut self,
        id: &str,
        observed: &NormalizedName,
        now: DateTime<Utc>,
    ) -> bool {
        self.individuals
            .get_mut(id)
            .map(|individual| individual.apply_name_correction(observed, now))
            .unwrap_or(false)
    }

    pub fn all(&self) -> impl Iterator<Item = &Individual> {
        self.individuals.values()
    }

    pub fn count(&self) -> usize {
        self.individuals.len()
    }
}

impl Default for IndividualStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
