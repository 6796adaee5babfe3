// 🔗 Individual-Address Links - Who lived/received mail where, and when
//
// "Time must be explicit": a link is never edited away. When a person moves,
// the old residential link is closed (valid_to set) and re-tagged `previous`,
// and a new one is opened.

use crate::parser::SourceSystem;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// LINK ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRole {
    /// Where the person is registered to vote
    Residential,

    /// Address given on a donation
    Mailing,

    /// A residential address that has since been replaced
    Previous,
}

impl LinkRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkRole::Residential => "residential",
            LinkRole::Mailing => "mailing",
            LinkRole::Previous => "previous",
        }
    }

    pub fn parse(s: &str) -> Option<LinkRole> {
        match s {
            "residential" => Some(LinkRole::Residential),
            "mailing" => Some(LinkRole::Mailing),
            "previous" => Some(LinkRole::Previous),
            _ => None,
        }
    }

    /// Role a source system's address implies
    pub fn for_source(source: SourceSystem) -> LinkRole {
        match source {
            SourceSystem::Voter => LinkRole::Residential,
            SourceSystem::Donation => LinkRole::Mailing,
        }
    }
}

// ============================================================================
// LINK ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualAddressLink {
    pub individual_id: String,
    pub address_id: String,
    pub role: LinkRole,

    pub valid_from: NaiveDate,

    /// None = still current
    pub valid_to: Option<NaiveDate>,

    pub source: SourceSystem,
}

impl IndividualAddressLink {
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Close this link as of `date`
    fn close(&mut self, date: NaiveDate) {
        self.valid_to = Some(date);
        if self.role == LinkRole::Residential {
            self.role = LinkRole::Previous;
        }
    }
}

// ============================================================================
// LINK STORE
// ============================================================================

/// Links grouped per individual, in insertion order
pub struct LinkStore {
    links: BTreeMap<String, Vec<IndividualAddressLink>>,
}

impl LinkStore {
    pub fn new() -> Self {
        LinkStore {
            links: BTreeMap::new(),
        }
    }

    pub fn from_existing(links: Vec<IndividualAddressLink>) -> Self {
        let mut store = LinkStore::new();
        for link in links {
            store
                .links
                .entry(link.individual_id.clone())
                .or_default()
                .push(link);
        }
        store
    }

    /// Record that `individual_id` is associated with `address_id` as of `as_of`.
    ///
    /// No-op if an identical current link exists. A new residential address
    /// closes the individual's previous current residential link.
    /// Returns true if a link was opened.
    pub fn record(
        &mut self,
        individual_id: &str,
        address_id: &str,
        source: SourceSystem,
        as_of: NaiveDate,
    ) -> bool {
        let role = LinkRole::for_source(source);
        let links = self.links.entry(individual_id.to_string()).or_default();

        let already_current = links
            .iter()
            .any(|l| l.is_current() && l.role == role && l.address_id == address_id);
        if already_current {
            return false;
        }

        if role == LinkRole::Residential {
            for link in links
                .iter_mut()
                .filter(|l| l.is_current() && l.role == LinkRole::Residential)
            {
                link.close(as_of);
            }
        }

        links.push(IndividualAddressLink {
            individual_id: individual_id.to_string(),
            address_id: address_id.to_string(),
            role,
            valid_from: as_of,
            valid_to: None,
            source,
        });
        true
    }

    pub fn current_links(&self, individual_id: &str) -> impl Iterator<Item = &IndividualAddressLink> {
        self.links
            .get(individual_id)
            .into_iter()
            .flatten()
            .filter(|l| l.is_current())
    }

    pub fn current_residential(&self, individual_id: &str) -> Option<&str> {
        self.current_links(individual_id)
            .find(|l| l.role == LinkRole::Residential)
            .map(|l| l.address_id.as_str())
    }

    /// All links ordered by individual, then insertion
    pub fn all(&self) -> impl Iterator<Item = &IndividualAddressLink> {
        self.links.values().flatten()
    }

    pub fn count(&self) -> usize {
        self.links.values().map(Vec::len).sum()
    }
}

impl Default for LinkStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
