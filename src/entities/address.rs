// 🏠 Address Entity - Content-derived identity + geocode preservation
//
// "The address string is the identity": the id is a SHA-256 of the canonical
// key, so the same normalized input yields the same id in every run without a
// lookup table.
//
// Geocodes are expensive and never regress: an existing geocode is only
// replaced by one from a strictly higher-ranked source.

use crate::error::{LinkageError, Result};
use crate::normalizer::NormalizedAddress;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// GEOCODE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geocode {
    pub latitude: f64,
    pub longitude: f64,

    /// Where the coordinates came from ("census", "rooftop", "voter_file", ...)
    pub source: String,

    pub geocoded_on: Option<NaiveDate>,
}

impl Geocode {
    pub fn new(latitude: f64, longitude: f64, source: &str) -> Self {
        Geocode {
            latitude,
            longitude,
            source: source.trim().to_lowercase(),
            geocoded_on: None,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.geocoded_on = Some(date);
        self
    }

    /// Plausible WGS84 coordinates (0,0 is a common "unknown" placeholder)
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && !(self.latitude == 0.0 && self.longitude == 0.0)
    }

    pub fn same_point(&self, other: &Geocode) -> bool {
        (self.latitude - other.latitude).abs() < 1e-9
            && (self.longitude - other.longitude).abs() < 1e-9
    }
}

/// Confidence rank per geocode source tag. Higher wins; unknown tags rank 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodePolicy {
    pub source_rank: BTreeMap<String, u8>,
}

impl GeocodePolicy {
    pub fn rank(&self, source: &str) -> u8 {
        self.source_rank
            .get(&source.trim().to_lowercase())
            .copied()
            .unwrap_or(0)
    }

    /// May `incoming` replace `existing`? Only a strictly higher rank may.
    pub fn should_replace(&self, existing: &Geocode, incoming: &Geocode) -> bool {
        self.rank(&incoming.source) > self.rank(&existing.source)
    }
}

impl Default for GeocodePolicy {
    fn default() -> Self {
        let source_rank = [("manual", 4), ("rooftop", 3), ("census", 2), ("voter_file", 1)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        GeocodePolicy { source_rank }
    }
}

// ============================================================================
// ADDRESS ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    /// SHA-256 of canonical_key (hex) - never changes
    pub id: String,
    pub canonical_key: String,

    pub number: String,
    pub street: String,
    pub unit: String,
    pub city: String,
    pub state: String,
    pub zip: Option<String>,

    /// ZIP exactly as supplied, kept when it failed to normalize
    pub zip_raw: String,
    pub county: String,

    pub geocode: Option<Geocode>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Address {
    pub fn from_normalized(normalized: &NormalizedAddress, now: DateTime<Utc>) -> Self {
        let canonical_key = normalized.canonical_key();
        Address {
            id: address_id(&canonical_key),
            canonical_key,
            number: normalized.number.clone(),
            street: normalized.street.clone(),
            unit: normalized.unit.clone(),
            city: normalized.city.clone(),
            state: normalized.state.clone(),
            zip: normalized.zip.clone(),
            zip_raw: normalized.zip_raw.clone(),
            county: normalized.county.clone(),
            geocode: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Deterministic address identifier
pub fn address_id(canonical_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// GEOCODE OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeocodeStats {
    /// Address had none, now has one
    pub attached: usize,
    /// Existing geocode kept (incoming absent, equal, or lower-ranked)
    pub retained: usize,
    /// Existing geocode replaced by a strictly higher-ranked source
    pub upgraded: usize,
    /// Incoming geocode refused because it ranked lower or equal with different coordinates
    pub rejected: usize,
}

// ============================================================================
// ADDRESS STORE (the Address Resolver)
// ============================================================================

/// Keyed store `address_id → Address`. Single writer for address identity.
pub struct AddressStore {
    addresses: BTreeMap<String, Address>,
    policy: GeocodePolicy,
    stats: GeocodeStats,
}

impl AddressStore {
    pub fn new(policy: GeocodePolicy) -> Self {
        AddressStore {
            addresses: BTreeMap::new(),
            policy,
            stats: GeocodeStats::default(),
        }
    }

    /// Store preloaded with addresses from previous runs
    pub fn from_existing(addresses: Vec<Address>, policy: GeocodePolicy) -> Self {
        let mut store = AddressStore::new(policy);
        for address in addresses {
            store.addresses.insert(address.id.clone(), address);
        }
        store
    }

    /// Resolve a normalized address to its id, upserting the entity.
    ///
    /// Errors with `IdentifierCollision` if the id is already held by a
    /// different canonical key.
    pub fn resolve(
        &mut self,
        normalized: &NormalizedAddress,
        geocode: Option<Geocode>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let incoming = Address::from_normalized(normalized, now);
        let id = incoming.id.clone();
        let geocode = geocode.filter(Geocode::is_valid);

        match self.addresses.get_mut(&id) {
            Some(existing) => {
                if existing.canonical_key != incoming.canonical_key {
                    return Err(LinkageError::IdentifierCollision {
                        kind: "address".to_string(),
                        id,
                        existing: existing.canonical_key.clone(),
                        incoming: incoming.canonical_key,
                    });
                }

                let mut changed = false;

                // Fill gaps only; a known ZIP/county is never blanked
                if existing.zip.is_none() && incoming.zip.is_some() {
                    existing.zip = incoming.zip;
                    existing.zip_raw = incoming.zip_raw;
                    changed = true;
                } else if existing.zip_raw.is_empty() && !incoming.zip_raw.is_empty() {
                    existing.zip_raw = incoming.zip_raw;
                    changed = true;
                }
                if existing.county.is_empty() && !incoming.county.is_empty() {
                    existing.county = incoming.county;
                    changed = true;
                }

                match (existing.geocode.clone(), geocode) {
                    (None, Some(g)) => {
                        existing.geocode = Some(g);
                        self.stats.attached += 1;
                        changed = true;
                    }
                    (Some(_), None) => self.stats.retained += 1,
                    (Some(current), Some(g)) => {
                        if self.policy.should_replace(&current, &g) {
                            debug!(
                                address_id = %id,
                                from = %current.source,
                                to = %g.source,
                                "geocode upgraded"
                            );
                            existing.geocode = Some(g);
                            self.stats.upgraded += 1;
                            changed = true;
                        } else if current.same_point(&g) {
                            self.stats.retained += 1;
                        } else {
                            self.stats.rejected += 1;
                        }
                    }
                    (None, None) => {}
                }

                if changed {
                    existing.updated_at = now;
                }
            }
            None => {
                let mut address = incoming;
                if let Some(g) = geocode {
                    address.geocode = Some(g);
                    self.stats.attached += 1;
                }
                self.addresses.insert(id.clone(), address);
            }
        }

        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<&Address> {
        self.addresses.get(id)
    }

    /// (city, state) of an address, when both are known
    pub fn locality(&self, id: &str) -> Option<(&str, &str)> {
        self.addresses.get(id).and_then(|a| {
            if a.city.is_empty() || a.state.is_empty() {
                None
            } else {
                Some((a.city.as_str(), a.state.as_str()))
            }
        })
    }

    /// All addresses, ordered by id
    pub fn all(&self) -> impl Iterator<Item = &Address> {
        self.addresses.values()
    }

    pub fn count(&self) -> usize {
        self.addresses.len()
    }

    pub fn stats(&self) -> &GeocodeStats {
        &self.stats
    }
}

// ============================================================================
// TESTS
// ============================================================================
