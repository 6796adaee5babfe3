// 📚 Lexicon - Lookup tables as data
// Nicknames, street types, directionals, unit designators, name suffixes, states
//
// Built-in tables are the defaults; a run's configuration may add or override
// entries. A Lexicon is built once per run and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// BUILT-IN TABLES
// ============================================================================

/// Nickname → canonical given name
const NICKNAMES: &[(&str, &str)] = &[
    ("AL", "ALBERT"),
    ("ABE", "ABRAHAM"),
    ("ALEX", "ALEXANDER"),
    ("ANDY", "ANDREW"),
    ("ANNIE", "ANN"),
    ("BARB", "BARBARA"),
    ("BEN", "BENJAMIN"),
    ("BENNY", "BENJAMIN"),
    ("BETH", "ELIZABETH"),
    ("BETSY", "ELIZABETH"),
    ("BETTY", "ELIZABETH"),
    ("BILL", "WILLIAM"),
    ("BILLY", "WILLIAM"),
    ("BOB", "ROBERT"),
    ("BOBBY", "ROBERT"),
    ("CATHY", "CATHERINE"),
    ("CHARLIE", "CHARLES"),
    ("CHRIS", "CHRISTOPHER"),
    ("CHUCK", "CHARLES"),
    ("DAN", "DANIEL"),
    ("DANNY", "DANIEL"),
    ("DAVE", "DAVID"),
    ("DEB", "DEBORAH"),
    ("DEBBIE", "DEBORAH"),
    ("DICK", "RICHARD"),
    ("DON", "DONALD"),
    ("DOUG", "DOUGLAS"),
    ("ED", "EDWARD"),
    ("EDDIE", "EDWARD"),
    ("FRANK", "FRANCIS"),
    ("FRED", "FREDERICK"),
    ("GENE", "EUGENE"),
    ("GREG", "GREGORY"),
    ("HANK", "HENRY"),
    ("JACK", "JOHN"),
    ("JAKE", "JACOB"),
    ("JEFF", "JEFFREY"),
    ("JENNY", "JENNIFER"),
    ("JERRY", "GERALD"),
    ("JIM", "JAMES"),
    ("JIMMY", "JAMES"),
    ("JOE", "JOSEPH"),
    ("JOEY", "JOSEPH"),
    ("JOHNNY", "JOHN"),
    ("JON", "JONATHAN"),
    ("KATE", "KATHERINE"),
    ("KATHY", "KATHERINE"),
    ("KATIE", "KATHERINE"),
    ("KEN", "KENNETH"),
    ("KENNY", "KENNETH"),
    ("LARRY", "LAWRENCE"),
    ("LIZ", "ELIZABETH"),
    ("LIZZIE", "ELIZABETH"),
    ("MAGGIE", "MARGARET"),
    ("MATT", "MATTHEW"),
    ("MEG", "MARGARET"),
    ("MIKE", "MICHAEL"),
    ("MICKEY", "MICHAEL"),
    ("NATE", "NATHAN"),
    ("NICK", "NICHOLAS"),
    ("PAT", "PATRICIA"),
    ("PATTY", "PATRICIA"),
    ("PEGGY", "MARGARET"),
    ("PETE", "PETER"),
    ("PHIL", "PHILIP"),
    ("RAY", "RAYMOND"),
    ("RICH", "RICHARD"),
    ("RICK", "RICHARD"),
    ("RICKY", "RICHARD"),
    ("ROB", "ROBERT"),
    ("RON", "RONALD"),
    ("RONNIE", "RONALD"),
    ("SAM", "SAMUEL"),
    ("SANDY", "SANDRA"),
    ("STEVE", "STEPHEN"),
    ("SUE", "SUSAN"),
    ("SUSIE", "SUSAN"),
    ("TED", "THEODORE"),
    ("TERRY", "TERRENCE"),
    ("TIM", "TIMOTHY"),
    ("TOM", "THOMAS"),
    ("TOMMY", "THOMAS"),
    ("TONY", "ANTHONY"),
    ("VINNY", "VINCENT"),
    ("WALT", "WALTER"),
    ("WILL", "WILLIAM"),
];

/// Street type spelling → USPS abbreviation
const STREET_TYPES: &[(&str, &str)] = &[
    ("ALLEY", "ALY"),
    ("AVENUE", "AVE"),
    ("AV", "AVE"),
    ("AVEN", "AVE"),
    ("BOULEVARD", "BLVD"),
    ("BOUL", "BLVD"),
    ("CIRCLE", "CIR"),
    ("CIRC", "CIR"),
    ("COURT", "CT"),
    ("CRT", "CT"),
    ("COVE", "CV"),
    ("CRESCENT", "CRES"),
    ("DRIVE", "DR"),
    ("DRV", "DR"),
    ("EXPRESSWAY", "EXPY"),
    ("HIGHWAY", "HWY"),
    ("HIWAY", "HWY"),
    ("LANE", "LN"),
    ("PARKWAY", "PKWY"),
    ("PKY", "PKWY"),
    ("PLACE", "PL"),
    ("PLAZA", "PLZ"),
    ("ROAD", "RD"),
    ("SQUARE", "SQ"),
    ("STREET", "ST"),
    ("STR", "ST"),
    ("TERRACE", "TER"),
    ("TERR", "TER"),
    ("TRAIL", "TRL"),
    ("TURNPIKE", "TPKE"),
    ("WAY", "WAY"),
];

/// Directional spelling → abbreviation
const DIRECTIONALS: &[(&str, &str)] = &[
    ("NORTH", "N"),
    ("SOUTH", "S"),
    ("EAST", "E"),
    ("WEST", "W"),
    ("NORTHEAST", "NE"),
    ("NORTHWEST", "NW"),
    ("SOUTHEAST", "SE"),
    ("SOUTHWEST", "SW"),
];

/// Unit designator spelling → canonical designator
const UNIT_DESIGNATORS: &[(&str, &str)] = &[
    ("APT", "APT"),
    ("APARTMENT", "APT"),
    ("UNIT", "UNIT"),
    ("STE", "STE"),
    ("SUITE", "STE"),
    ("FL", "FL"),
    ("FLOOR", "FL"),
    ("RM", "RM"),
    ("ROOM", "RM"),
    ("BLDG", "BLDG"),
    ("BUILDING", "BLDG"),
    ("LOT", "LOT"),
];

/// Generational / professional suffix spelling → canonical suffix
const NAME_SUFFIXES: &[(&str, &str)] = &[
    ("JR", "JR"),
    ("JUNIOR", "JR"),
    ("SR", "SR"),
    ("SENIOR", "SR"),
    ("II", "II"),
    ("2ND", "II"),
    ("III", "III"),
    ("3RD", "III"),
    ("IV", "IV"),
    ("4TH", "IV"),
    ("V", "V"),
    ("ESQ", "ESQ"),
];

/// Courtesy titles dropped from the front of free-text names
const TITLES: &[&str] = &["MR", "MRS", "MS", "MISS", "DR", "REV", "HON", "PROF"];

/// Place-name words standardized inside city names
const PLACE_WORDS: &[(&str, &str)] = &[
    ("TOWNSHIP", "TWP"),
    ("SAINT", "ST"),
    ("MOUNT", "MT"),
    ("FORT", "FT"),
    ("HEIGHTS", "HTS"),
];

/// Full state name → USPS code
const STATES: &[(&str, &str)] = &[
    ("ALABAMA", "AL"),
    ("ALASKA", "AK"),
    ("ARIZONA", "AZ"),
    ("ARKANSAS", "AR"),
    ("CALIFORNIA", "CA"),
    ("COLORADO", "CO"),
    ("CONNECTICUT", "CT"),
    ("DELAWARE", "DE"),
    ("DISTRICT OF COLUMBIA", "DC"),
    ("FLORIDA", "FL"),
    ("GEORGIA", "GA"),
    ("HAWAII", "HI"),
    ("IDAHO", "ID"),
    ("ILLINOIS", "IL"),
    ("INDIANA", "IN"),
    ("IOWA", "IA"),
    ("KANSAS", "KS"),
    ("KENTUCKY", "KY"),
    ("LOUISIANA", "LA"),
    ("MAINE", "ME"),
    ("MARYLAND", "MD"),
    ("MASSACHUSETTS", "MA"),
    ("MICHIGAN", "MI"),
    ("MINNESOTA", "MN"),
    ("MISSISSIPPI", "MS"),
    ("MISSOURI", "MO"),
    ("MONTANA", "MT"),
    ("NEBRASKA", "NE"),
    ("NEVADA", "NV"),
    ("NEW HAMPSHIRE", "NH"),
    ("NEW JERSEY", "NJ"),
    ("NEW MEXICO", "NM"),
    ("NEW YORK", "NY"),
    ("NORTH CAROLINA", "NC"),
    ("NORTH DAKOTA", "ND"),
    ("OHIO", "OH"),
    ("OKLAHOMA", "OK"),
    ("OREGON", "OR"),
    ("PENNSYLVANIA", "PA"),
    ("RHODE ISLAND", "RI"),
    ("SOUTH CAROLINA", "SC"),
    ("SOUTH DAKOTA", "SD"),
    ("TENNESSEE", "TN"),
    ("TEXAS", "TX"),
    ("UTAH", "UT"),
    ("VERMONT", "VT"),
    ("VIRGINIA", "VA"),
    ("WASHINGTON", "WA"),
    ("WEST VIRGINIA", "WV"),
    ("WISCONSIN", "WI"),
    ("WYOMING", "WY"),
];

fn table(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ============================================================================
// OVERRIDES (from configuration)
// ============================================================================

/// Extra entries merged over the built-in tables.
/// Keys and values are uppercased on merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LexiconOverrides {
    pub nicknames: BTreeMap<String, String>,
    pub street_types: BTreeMap<String, String>,
    pub unit_designators: BTreeMap<String, String>,
    pub name_suffixes: BTreeMap<String, String>,
}

// ============================================================================
// LEXICON
// ============================================================================

/// Immutable lookup tables consumed by the Normalizer
#[derive(Debug, Clone)]
pub struct Lexicon {
    nicknames: BTreeMap<String, String>,
    street_types: BTreeMap<String, String>,
    directionals: BTreeMap<String, String>,
    unit_designators: BTreeMap<String, String>,
    name_suffixes: BTreeMap<String, String>,
    titles: BTreeSet<String>,
    place_words: BTreeMap<String, String>,
    states: BTreeMap<String, String>,
    state_codes: BTreeSet<String>,
}

impl Lexicon {
    /// Built-in tables only
    pub fn builtin() -> Self {
        let states = table(STATES);
        let state_codes = states.values().cloned().collect();
        Lexicon {
            nicknames: table(NICKNAMES),
            street_types: table(STREET_TYPES),
            directionals: table(DIRECTIONALS),
            unit_designators: table(UNIT_DESIGNATORS),
            name_suffixes: table(NAME_SUFFIXES),
            titles: TITLES.iter().map(|t| t.to_string()).collect(),
            place_words: table(PLACE_WORDS),
            states,
            state_codes,
        }
    }

    /// Built-in tables with configured entries merged on top
    pub fn with_overrides(overrides: &LexiconOverrides) -> Self {
        let mut lexicon = Lexicon::builtin();
        merge(&mut lexicon.nicknames, &overrides.nicknames);
        merge(&mut lexicon.street_types, &overrides.street_types);
        merge(&mut lexicon.unit_designators, &overrides.unit_designators);
        merge(&mut lexicon.name_suffixes, &overrides.name_suffixes);
        lexicon
    }

    /// Canonical given name for a nickname (the input itself if not a nickname)
    pub fn canonical_given_name<'a>(&'a self, first: &'a str) -> &'a str {
        self.nicknames.get(first).map(String::as_str).unwrap_or(first)
    }

    pub fn street_type(&self, token: &str) -> Option<&str> {
        self.street_types.get(token).map(String::as_str)
    }

    pub fn directional(&self, token: &str) -> Option<&str> {
        self.directionals.get(token).map(String::as_str)
    }

    pub fn unit_designator(&self, token: &str) -> Option<&str> {
        self.unit_designators.get(token).map(String::as_str)
    }

    pub fn name_suffix(&self, token: &str) -> Option<&str> {
        self.name_suffixes.get(token).map(String::as_str)
    }

    pub fn is_title(&self, token: &str) -> bool {
        self.titles.contains(token)
    }

    pub fn place_word(&self, token: &str) -> Option<&str> {
        self.place_words.get(token).map(String::as_str)
    }

    /// USPS code for a state given as a code or a full name
    pub fn state_code(&self, state: &str) -> Option<&str> {
        if let Some(code) = self.state_codes.get(state) {
            return Some(code.as_str());
        }
        self.states.get(state).map(String::as_str)
    }

    pub fn nickname_count(&self) -> usize {
        self.nicknames.len()
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::builtin()
    }
}

fn merge(target: &mut BTreeMap<String, String>, extra: &BTreeMap<String, String>) {
    for (k, v) in extra {
        target.insert(k.trim().to_uppercase(), v.trim().to_uppercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_given_name() {
        let lexicon = Lexicon::builtin();
        assert_eq!(lexicon.canonical_given_name("GREG"), "GREGORY");
        assert_eq!(lexicon.canonical_given_name("MIKE"), "MICHAEL");
        // Non-nicknames pass through unchanged
        assert_eq!(lexicon.canonical_given_name("GREGORY"), "GREGORY");
        assert_eq!(lexicon.canonical_given_name("ZEBULON"), "ZEBULON");
    }

    #[test]
    fn test_overrides_are_uppercased_and_win() {
        let mut overrides = LexiconOverrides::default();
        overrides
            .nicknames
            .insert("zeb".to_string(), "zebulon".to_string());
        overrides
            .nicknames
            .insert("Jack".to_string(), "Jackson".to_string());

        let lexicon = Lexicon::with_overrides(&overrides);
        assert_eq!(lexicon.canonical_given_name("ZEB"), "ZEBULON");
        assert_eq!(lexicon.canonical_given_name("JACK"), "JACKSON");
        assert_eq!(lexicon.nickname_count(), NICKNAMES.len() + 1);
    }

    #[test]
    fn test_state_code() {
        let lexicon = Lexicon::builtin();
        assert_eq!(lexicon.state_code("NJ"), Some("NJ"));
        assert_eq!(lexicon.state_code("NEW JERSEY"), Some("NJ"));
        assert_eq!(lexicon.state_code("ATLANTIS"), None);
    }
}
