//! US state canonicalization.
//!
//! Lead and user records carry operator-entered state text ("GA", "georgia",
//! " Georgia "). Everything that groups or matches on state goes through
//! [`state_variants`] so abbreviations and full names land on the same key.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Full name and USPS abbreviation for every state plus DC.
pub const US_STATES: &[(&str, &str)] = &[
    ("Alabama", "AL"),
    ("Alaska", "AK"),
    ("Arizona", "AZ"),
    ("Arkansas", "AR"),
    ("California", "CA"),
    ("Colorado", "CO"),
    ("Connecticut", "CT"),
    ("Delaware", "DE"),
    ("District of Columbia", "DC"),
    ("Florida", "FL"),
    ("Georgia", "GA"),
    ("Hawaii", "HI"),
    ("Idaho", "ID"),
    ("Illinois", "IL"),
    ("Indiana", "IN"),
    ("Iowa", "IA"),
    ("Kansas", "KS"),
    ("Kentucky", "KY"),
    ("Louisiana", "LA"),
    ("Maine", "ME"),
    ("Maryland", "MD"),
    ("Massachusetts", "MA"),
    ("Michigan", "MI"),
    ("Minnesota", "MN"),
    ("Mississippi", "MS"),
    ("Missouri", "MO"),
    ("Montana", "MT"),
    ("Nebraska", "NE"),
    ("Nevada", "NV"),
    ("New Hampshire", "NH"),
    ("New Jersey", "NJ"),
    ("New Mexico", "NM"),
    ("New York", "NY"),
    ("North Carolina", "NC"),
    ("North Dakota", "ND"),
    ("Ohio", "OH"),
    ("Oklahoma", "OK"),
    ("Oregon", "OR"),
    ("Pennsylvania", "PA"),
    ("Rhode Island", "RI"),
    ("South Carolina", "SC"),
    ("South Dakota", "SD"),
    ("Tennessee", "TN"),
    ("Texas", "TX"),
    ("Utah", "UT"),
    ("Vermont", "VT"),
    ("Virginia", "VA"),
    ("Washington", "WA"),
    ("West Virginia", "WV"),
    ("Wisconsin", "WI"),
    ("Wyoming", "WY"),
];

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lowercased full names and abbreviations -> index into [`US_STATES`].
static LOOKUP: Lazy<HashMap<String, usize>> = Lazy::new(|| {
    let mut map = HashMap::with_capacity(US_STATES.len() * 2);
    for (idx, (name, abbr)) in US_STATES.iter().enumerate() {
        map.insert(name.to_lowercase(), idx);
        map.insert(abbr.to_lowercase(), idx);
    }
    map
});

/// Canonical key plus every spelling that should match it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariants {
    /// Full state name for recognised states, otherwise the trimmed input.
    pub canonical: String,
    /// Always starts with `canonical`.
    pub variants: Vec<String>,
}

impl StateVariants {
    /// [`match_key`] of every variant, blanks dropped.
    pub fn match_keys(&self) -> impl Iterator<Item = String> + '_ {
        self.variants
            .iter()
            .map(|v| match_key(v))
            .filter(|k| !k.is_empty())
    }
}

/// Characters [`match_key`] removes. `db::repo` strips the same set in SQL.
pub const MATCH_KEY_STRIPPED: &[char] = &[' ', '\t', '\n', '\r', '\u{a0}', '.'];

/// Loose comparison form of state text: ASCII-lowercased with spaces and
/// dots removed. Two values with the same [`canonical_state`] always share
/// a match key with one of that state's variants. SQLite's `LOWER` folds
/// ASCII only, so neither does this.
pub fn match_key(text: &str) -> String {
    text.chars()
        .filter(|c| !MATCH_KEY_STRIPPED.contains(c))
        .collect::<String>()
        .to_ascii_lowercase()
}

fn lookup_key(trimmed: &str) -> String {
    // "N.Y." and "new   york" should still resolve
    WHITESPACE
        .replace_all(trimmed, " ")
        .replace('.', "")
        .to_lowercase()
}

/// Expand free-text state into its canonical key and equivalent spellings.
///
/// Returns `None` for empty or whitespace-only input. Unrecognised text is
/// passed through as its own canonical key.
pub fn state_variants(raw: &str) -> Option<StateVariants> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Some(&idx) = LOOKUP.get(&lookup_key(trimmed)) else {
        return Some(StateVariants {
            canonical: trimmed.to_string(),
            variants: vec![trimmed.to_string()],
        });
    };

    let (name, abbr) = US_STATES[idx];
    let mut variants = vec![name.to_string(), abbr.to_string()];
    if !variants.iter().any(|v| v.eq_ignore_ascii_case(trimmed)) {
        variants.push(trimmed.to_string());
    }
    Some(StateVariants {
        canonical: name.to_string(),
        variants,
    })
}

/// Canonical grouping key for a state value, `None` when blank.
pub fn canonical_state(raw: &str) -> Option<String> {
    state_variants(raw).map(|v| v.canonical)
}
