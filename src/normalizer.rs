// 🧹 Name/Address Normalizer - Canonical forms for comparison
//
// Pure functions of (input, lexicon): the same input always normalizes to the
// same output, which is what makes content-derived address ids stable.
//
// Names: uppercase, punctuation stripped (hyphens survive only in surnames),
// split into first/middle/last/suffix, nickname resolved for matching only.
// Addresses: uppercase, street types/directionals abbreviated, unit split out,
// postal code kept but excluded from the comparison key.

use crate::lexicon::Lexicon;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// NORMALIZED NAME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NormalizedName {
    pub first: String,
    pub middle: String,
    pub last: String,
    pub suffix: String,

    /// Given name after nickname resolution (GREG → GREGORY). Matching only,
    /// never stored as the person's name.
    pub first_canonical: String,
}

impl NormalizedName {
    /// "FIRST MIDDLE LAST SUFFIX" with empty parts skipped
    pub fn full(&self) -> String {
        [&self.first, &self.middle, &self.last, &self.suffix]
            .iter()
            .filter(|part| !part.is_empty())
            .map(|part| part.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn has_last(&self) -> bool {
        !self.last.is_empty()
    }

    /// Same person by given name: exact, or equal after nickname resolution
    pub fn first_equivalent(&self, other: &NormalizedName) -> bool {
        !self.first.is_empty()
            && (self.first == other.first || self.first_canonical == other.first_canonical)
    }
}

// ============================================================================
// NORMALIZED ADDRESS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NormalizedAddress {
    pub number: String,
    pub street: String,
    pub unit: String,
    pub city: String,
    pub state: String,

    /// Five-digit ZIP when the input looked like one, otherwise None
    pub zip: Option<String>,

    /// ZIP exactly as supplied (trimmed)
    pub zip_raw: String,
    pub county: String,
}

impl NormalizedAddress {
    /// "NUMBER STREET"
    pub fn street_line(&self) -> String {
        match (self.number.is_empty(), self.street.is_empty()) {
            (false, false) => format!("{} {}", self.number, self.street),
            (false, true) => self.number.clone(),
            _ => self.street.clone(),
        }
    }

    /// Comparison key: street line, unit, city, state.
    /// ZIP and county are deliberately left out (donation ZIPs are unreliable).
    pub fn canonical_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.street_line(),
            self.unit,
            self.city,
            self.state
        )
    }

    /// No street line to resolve. City/state may still be present.
    pub fn is_absent(&self) -> bool {
        self.number.is_empty() && self.street.is_empty()
    }

    /// (city, state) when both are known
    pub fn locality(&self) -> Option<(String, String)> {
        if self.city.is_empty() || self.state.is_empty() {
            None
        } else {
            Some((self.city.clone(), self.state.clone()))
        }
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

/// Raw address fields as they arrive from an extract
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressInput<'a> {
    pub street_address: &'a str,
    pub city: &'a str,
    pub state: &'a str,
    pub zip: &'a str,
    pub county: &'a str,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    lexicon: Arc<Lexicon>,
}

impl Normalizer {
    pub fn new(lexicon: Arc<Lexicon>) -> Self {
        Normalizer { lexicon }
    }

    // ========================================================================
    // NAMES
    // ========================================================================

    /// Normalize a name supplied as separate columns (voter file)
    pub fn normalize_name_parts(
        &self,
        first: &str,
        middle: &str,
        last: &str,
        suffix: &str,
    ) -> NormalizedName {
        let first = clean_given(first);
        let middle = clean_given(middle);
        let mut last_tokens = tokens(&clean_text(last, true));

        let mut suffix = self.canonical_suffix(&clean_text(suffix, false));

        // "SMITH JR" typed into the last-name column
        if suffix.is_empty() && last_tokens.len() > 1 {
            if let Some(s) = last_tokens.last().and_then(|t| self.lexicon.name_suffix(t)) {
                suffix = s.to_string();
                last_tokens.pop();
            }
        }

        let last = last_tokens.join(" ").trim_matches('-').to_string();
        let first_canonical = self.lexicon.canonical_given_name(&first).to_string();

        NormalizedName {
            first,
            middle,
            last,
            suffix,
            first_canonical,
        }
    }

    /// Normalize a free-text full name (donation file).
    ///
    /// Accepts "FIRST MIDDLE LAST SUFFIX" and "LAST, FIRST MIDDLE SUFFIX".
    pub fn normalize_full_name(&self, raw: &str) -> NormalizedName {
        let upper = raw.to_uppercase();

        let (first, middle, last, suffix) = match upper.split_once(',') {
            // "JOHN SMITH, JR.": only a suffix after the comma
            Some((name, rest)) if self.only_suffixes_and_titles(rest) => {
                let (first, middle, last, suffix) = self.natural_order(name);
                let trailing = tokens(&clean_text(rest, false))
                    .iter()
                    .find_map(|t| self.lexicon.name_suffix(t))
                    .map(str::to_string);
                (first, middle, last, trailing.unwrap_or(suffix))
            }
            Some((last_part, rest)) => {
                let mut last_tokens = tokens(&clean_text(last_part, true));
                let mut given = self.strip_titles(tokens(&clean_text(rest, true)));

                let mut suffix = String::new();
                // Suffix may sit anywhere after the comma ("JONES, JR, MICHAEL" or "JONES, MICHAEL JR")
                given.retain(|t| match self.lexicon.name_suffix(t) {
                    Some(s) if suffix.is_empty() => {
                        suffix = s.to_string();
                        false
                    }
                    _ => true,
                });
                if suffix.is_empty() && last_tokens.len() > 1 {
                    if let Some(s) = last_tokens.last().and_then(|t| self.lexicon.name_suffix(t)) {
                        suffix = s.to_string();
                        last_tokens.pop();
                    }
                }

                let first = given.first().cloned().unwrap_or_default();
                let middle = given.iter().skip(1).cloned().collect::<Vec<_>>().join(" ");
                (first, middle, last_tokens.join(" "), suffix)
            }
            None => self.natural_order(&upper),
        };

        self.normalize_name_parts(&first, &middle, &last, &suffix)
    }

    /// "FIRST MIDDLE LAST SUFFIX" split into (first, middle, last, suffix)
    fn natural_order(&self, text: &str) -> (String, String, String, String) {
        let mut parts = self.strip_titles(tokens(&clean_text(text, true)));

        let mut suffix = String::new();
        if parts.len() > 1 {
            if let Some(s) = parts.last().and_then(|t| self.lexicon.name_suffix(t)) {
                suffix = s.to_string();
                parts.pop();
            }
        }

        match parts.len() {
            0 => (String::new(), String::new(), String::new(), suffix),
            1 => (String::new(), String::new(), parts[0].clone(), suffix),
            n => (
                parts[0].clone(),
                parts[1..n - 1].join(" "),
                parts[n - 1].clone(),
                suffix,
            ),
        }
    }

    fn only_suffixes_and_titles(&self, text: &str) -> bool {
        let parts = tokens(&clean_text(text, false));
        !parts.is_empty()
            && parts
                .iter()
                .all(|t| self.lexicon.name_suffix(t).is_some() || self.lexicon.is_title(t))
    }

    fn canonical_suffix(&self, cleaned: &str) -> String {
        match self.lexicon.name_suffix(cleaned) {
            Some(s) => s.to_string(),
            // Unknown suffix text is kept verbatim; it only ever blocks a match
            None => cleaned.to_string(),
        }
    }

    fn strip_titles(&self, mut parts: Vec<String>) -> Vec<String> {
        while parts.len() > 1 && self.lexicon.is_title(&parts[0]) {
            parts.remove(0);
        }
        parts
    }

    // ========================================================================
    // ADDRESSES
    // ========================================================================

    pub fn normalize_address(&self, input: AddressInput<'_>) -> NormalizedAddress {
        let (number, street, unit) = self.split_street_line(input.street_address);

        let city = tokens(&clean_text(&input.city.to_uppercase(), false))
            .into_iter()
            .map(|t| self.lexicon.place_word(&t).map(str::to_string).unwrap_or(t))
            .collect::<Vec<_>>()
            .join(" ");

        let state_clean = tokens(&clean_text(&input.state.to_uppercase(), false)).join(" ");
        let state = self
            .lexicon
            .state_code(&state_clean)
            .map(str::to_string)
            .unwrap_or(state_clean);

        let zip_raw = input.zip.trim().to_string();
        let zip = normalize_zip(&zip_raw);

        let mut county = tokens(&clean_text(&input.county.to_uppercase(), false));
        if county.len() > 1 && county.last().map(String::as_str) == Some("COUNTY") {
            county.pop();
        }

        NormalizedAddress {
            number,
            street,
            unit,
            city,
            state,
            zip,
            zip_raw,
            county: county.join(" "),
        }
    }

    /// Split "12 1/2 N MAIN STREET APT 4B" into ("12 1/2", "N MAIN ST", "APT 4B")
    fn split_street_line(&self, raw: &str) -> (String, String, String) {
        let upper = raw.to_uppercase().replace('#', " # ");
        let mut parts = tokens(&clean_address_text(&upper));

        // PO boxes come in many spellings
        let po_box = parts.len() >= 3
            && parts[2] == "BOX"
            && ((parts[0] == "P" && parts[1] == "O") || (parts[0] == "POST" && parts[1] == "OFFICE"));
        if po_box {
            parts.drain(0..2);
            parts.insert(0, "PO".to_string());
        }

        let mut idx = 0;
        let mut number = Vec::new();
        if parts.first().map_or(false, |t| starts_with_digit(t)) {
            number.push(parts[0].clone());
            idx = 1;
            // Fractional house numbers: "12 1/2"
            if parts.get(1).map_or(false, |t| t.contains('/') && starts_with_digit(t)) {
                number.push(parts[1].clone());
                idx = 2;
            }
        }

        let mut street = Vec::new();
        let mut unit = Vec::new();
        let mut in_unit = false;
        for token in &parts[idx..] {
            if in_unit {
                if token != "#" {
                    unit.push(token.clone());
                }
                continue;
            }
            // A designator only starts a unit once some street text has been seen
            if !street.is_empty() {
                if token == "#" {
                    unit.push("APT".to_string());
                    in_unit = true;
                    continue;
                }
                if let Some(designator) = self.lexicon.unit_designator(token) {
                    unit.push(designator.to_string());
                    in_unit = true;
                    continue;
                }
            }
            if token != "#" {
                street.push(token.clone());
            }
        }

        let last = street.len().saturating_sub(1);
        let street = street
            .iter()
            .enumerate()
            .map(|(i, token)| {
                if i == 0 || i == last {
                    if let Some(d) = self.lexicon.directional(token) {
                        return d.to_string();
                    }
                }
                if i > 0 {
                    if let Some(t) = self.lexicon.street_type(token) {
                        return t.to_string();
                    }
                }
                token.clone()
            })
            .collect::<Vec<_>>()
            .join(" ");

        (number.join(" "), street, unit.join(" "))
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Uppercase and drop punctuation. Hyphens survive only when asked (surnames).
fn clean_text(s: &str, keep_hyphen: bool) -> String {
    s.to_uppercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c.is_whitespace() || c == ',' {
                Some(' ')
            } else if c == '-' && keep_hyphen {
                Some('-')
            } else {
                None
            }
        })
        .collect()
}

/// Given names: no hyphens, single spaces
fn clean_given(s: &str) -> String {
    tokens(&clean_text(s, false)).join(" ")
}

/// Address text keeps '#', '/', '-' which carry meaning in house numbers and units
fn clean_address_text(s: &str) -> String {
    s.chars()
        .filter_map(|c| {
            if c.is_alphanumeric() || c == '#' || c == '/' || c == '-' {
                Some(c)
            } else if c.is_whitespace() || c == ',' {
                Some(' ')
            } else {
                None
            }
        })
        .collect()
}

fn tokens(s: &str) -> Vec<String> {
    s.split_whitespace()
        .map(|t| t.trim_matches('-').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn starts_with_digit(s: &str) -> bool {
    s.chars().next().map_or(false, |c| c.is_ascii_digit())
}

/// 5 digits → as-is, ZIP+4 → first five, 4 digits → leading zero restored
/// (spreadsheets drop it from NJ ZIPs). Anything else is not a ZIP.
fn normalize_zip(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let non_digits = raw
        .chars()
        .any(|c| !c.is_ascii_digit() && c != '-' && !c.is_whitespace());
    if non_digits {
        return None;
    }
    match digits.len() {
        5 => Some(digits),
        9 if raw.contains('-') || raw.trim().len() == 9 => Some(digits[..5].to_string()),
        4 => Some(format!("0{}", digits)),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new(Arc::new(Lexicon::builtin()))
    }

    fn addr<'a>(street: &'a str, city: &'a str, state: &'a str, zip: &'a str) -> AddressInput<'a> {
        AddressInput {
            street_address: street,
            city,
            state,
            zip,
            county: "",
        }
    }

    #[test]
    fn test_name_parts_punctuation_and_case() {
        let n = normalizer();
        let name = n.normalize_name_parts("John", "A.", "O'Brien-Smith", "Jr.");

        assert_eq!(name.first, "JOHN");
        assert_eq!(name.middle, "A");
        assert_eq!(name.last, "OBRIEN-SMITH");
        assert_eq!(name.suffix, "JR");
        assert_eq!(name.full(), "JOHN A OBRIEN-SMITH JR");
    }

    #[test]
    fn test_given_name_hyphen_removed() {
        let n = normalizer();
        let name = n.normalize_name_parts("Mary-Ann", "", "Lee", "");
        assert_eq!(name.first, "MARYANN");
    }

    #[test]
    fn test_suffix_in_last_name_column() {
        let n = normalizer();
        let name = n.normalize_name_parts("John", "", "Smith Sr", "");
        assert_eq!(name.last, "SMITH");
        assert_eq!(name.suffix, "SR");
    }

    #[test]
    fn test_nickname_kept_but_canonicalized() {
        let n = normalizer();
        let greg = n.normalize_name_parts("Greg", "", "Smith", "");
        let gregory = n.normalize_name_parts("Gregory", "", "Smith", "");

        // Stored form keeps the original
        assert_eq!(greg.first, "GREG");
        assert_eq!(greg.first_canonical, "GREGORY");
        assert!(greg.first_equivalent(&gregory));
    }

    #[test]
    fn test_full_name_natural_order() {
        let n = normalizer();
        let name = n.normalize_full_name("John A. Smith Jr.");
        assert_eq!(name.first, "JOHN");
        assert_eq!(name.middle, "A");
        assert_eq!(name.last, "SMITH");
        assert_eq!(name.suffix, "JR");
    }

    #[test]
    fn test_full_name_comma_before_suffix() {
        let n = normalizer();
        let name = n.normalize_full_name("John Smith, Jr.");
        assert_eq!(name.first, "JOHN");
        assert_eq!(name.middle, "");
        assert_eq!(name.last, "SMITH");
        assert_eq!(name.suffix, "JR");

        let name = n.normalize_full_name("Mary Ann Lee, III");
        assert_eq!(name.first, "MARY");
        assert_eq!(name.middle, "ANN");
        assert_eq!(name.last, "LEE");
        assert_eq!(name.suffix, "III");

        // A given name after the comma keeps the LAST, FIRST reading
        let name = n.normalize_full_name("BROWN JR, ROBERT");
        assert_eq!(name.first, "ROBERT");
        assert_eq!(name.last, "BROWN");
        assert_eq!(name.suffix, "JR");
    }

    #[test]
    fn test_full_name_comma_order_and_title() {
        let n = normalizer();
        let name = n.normalize_full_name("JONES, DR. MICHAEL R");
        assert_eq!(name.first, "MICHAEL");
        assert_eq!(name.middle, "R");
        assert_eq!(name.last, "JONES");

        let suffixed = n.normalize_full_name("Jones Jr, Michael");
        assert_eq!(suffixed.last, "JONES");
        assert_eq!(suffixed.suffix, "JR");
    }

    #[test]
    fn test_full_name_single_token_is_last_name() {
        let n = normalizer();
        let name = n.normalize_full_name("Cher");
        assert_eq!(name.first, "");
        assert_eq!(name.last, "CHER");
    }

    #[test]
    fn test_full_name_empty_has_no_last() {
        let n = normalizer();
        assert!(!n.normalize_full_name("  ,  ").has_last());
        assert!(!n.normalize_name_parts("John", "", "", "").has_last());
    }

    #[test]
    fn test_street_types_and_punctuation() {
        let n = normalizer();
        let a = n.normalize_address(addr("12 MAIN ST", "Springfield", "NJ", "07081"));
        let b = n.normalize_address(addr("12 Main Street.", "SPRINGFIELD", "New Jersey", ""));

        assert_eq!(a.street_line(), "12 MAIN ST");
        assert_eq!(a.canonical_key(), b.canonical_key());
        assert_eq!(b.state, "NJ");
    }

    #[test]
    fn test_unit_split_out() {
        let n = normalizer();
        let a = n.normalize_address(addr("45 Oak Avenue Apt. 4B", "Newark", "NJ", ""));
        let b = n.normalize_address(addr("45 OAK AVE #4B", "Newark", "NJ", ""));

        assert_eq!(a.street, "OAK AVE");
        assert_eq!(a.unit, "APT 4B");
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn test_directionals() {
        let n = normalizer();
        let a = n.normalize_address(addr("100 North Broad Street", "Trenton", "NJ", ""));
        assert_eq!(a.street, "N BROAD ST");

        let b = n.normalize_address(addr("7 Park Place West", "Trenton", "NJ", ""));
        assert_eq!(b.street, "PARK PL W");
    }

    #[test]
    fn test_fractional_number_and_po_box() {
        let n = normalizer();
        let a = n.normalize_address(addr("12 1/2 Elm St", "Camden", "NJ", ""));
        assert_eq!(a.number, "12 1/2");
        assert_eq!(a.street, "ELM ST");

        let b = n.normalize_address(addr("P.O. Box 55", "Camden", "NJ", ""));
        assert_eq!(b.street, "PO BOX 55");
    }

    #[test]
    fn test_zip_excluded_from_key() {
        let n = normalizer();
        let good = n.normalize_address(addr("9 Elm St", "Newark", "NJ", "07102"));
        let bad = n.normalize_address(addr("9 Elm St", "Newark", "NJ", "99999999"));

        assert_eq!(good.zip.as_deref(), Some("07102"));
        assert_eq!(bad.zip, None);
        assert_eq!(bad.zip_raw, "99999999");
        assert_eq!(good.canonical_key(), bad.canonical_key());
    }

    #[test]
    fn test_zip_shapes() {
        assert_eq!(normalize_zip("07102-1234").as_deref(), Some("07102"));
        assert_eq!(normalize_zip("071021234").as_deref(), Some("07102"));
        assert_eq!(normalize_zip("7102").as_deref(), Some("07102"));
        assert_eq!(normalize_zip("ABCDE"), None);
        assert_eq!(normalize_zip(""), None);
    }

    #[test]
    fn test_city_words_and_county() {
        let n = normalizer();
        let a = n.normalize_address(AddressInput {
            street_address: "1 Main St",
            city: "Springfield Township",
            state: "nj",
            zip: "",
            county: "Union County",
        });
        assert_eq!(a.city, "SPRINGFIELD TWP");
        assert_eq!(a.county, "UNION");
        assert_eq!(a.locality(), Some(("SPRINGFIELD TWP".to_string(), "NJ".to_string())));
    }

    #[test]
    fn test_absent_address() {
        let n = normalizer();
        let a = n.normalize_address(addr("", "", "NJ", "07102"));
        assert!(a.is_absent());
        assert_eq!(a.locality(), None);

        // City-only donations keep their locality for cross-source matching
        let b = n.normalize_address(addr("", "Newark", "NJ", ""));
        assert!(b.is_absent());
        assert_eq!(b.locality(), Some(("NEWARK".to_string(), "NJ".to_string())));
    }

    #[test]
    fn test_determinism() {
        let n = normalizer();
        let input = addr("12 Main Street, Apt 3", "Springfield", "NJ", "07081");
        assert_eq!(n.normalize_address(input), n.normalize_address(input));
    }
}
