//! # Zone Matching
//!
//! Geographic rule matching shared by tax zones and shipping zones.
//!
//! ## Matching Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Inclusion-then-Exclusion Matching                       │
//! │                                                                         │
//! │  Address ──► every NON-EMPTY inclusion list must contain the field     │
//! │              (countries, states, postal patterns, cities)              │
//! │        └──► AND no exclusion list may contain the field                │
//! │                                                                         │
//! │  Empty inclusion list = "no constraint on that field"                  │
//! │  Postal patterns support glob wildcards: "902*", "SW1A ?AA"            │
//! │  All comparisons are ASCII-case-insensitive                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both `TaxZone` and `ShippingZone` embed a [`GeoRules`] value; the zone
//! orderings differ (tax: descending priority, all matches; shipping:
//! ascending sort order, first match) and live with their owning modules.

use serde::{Deserialize, Serialize};

use crate::types::Address;

// =============================================================================
// Geographic Rules
// =============================================================================

/// Inclusion and exclusion lists describing the geography a zone covers.
///
/// ## Invariants
/// - Empty inclusion lists place no constraint on that address field
/// - Exclusion lists always apply, even when the inclusion lists are empty
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoRules {
    /// Countries covered (ISO 3166-1 alpha-2 codes, e.g. "US", "DE").
    pub countries: Vec<String>,
    /// States/provinces covered.
    pub states: Vec<String>,
    /// Postal code glob patterns ("902*", "1000?").
    pub postal_patterns: Vec<String>,
    /// Cities covered.
    pub cities: Vec<String>,
    /// Countries explicitly carved out.
    pub excluded_countries: Vec<String>,
    /// States explicitly carved out.
    pub excluded_states: Vec<String>,
    /// Postal code glob patterns explicitly carved out.
    pub excluded_postal_codes: Vec<String>,
}

impl GeoRules {
    /// Checks whether an address falls inside these rules.
    ///
    /// An address matches when every non-empty inclusion list contains the
    /// corresponding field and none of the exclusion lists do.
    pub fn matches(&self, address: &Address) -> bool {
        if !list_allows(&self.countries, &address.country) {
            return false;
        }
        if !list_allows(&self.states, &address.state) {
            return false;
        }
        if !self.postal_patterns.is_empty()
            && !self
                .postal_patterns
                .iter()
                .any(|p| wildcard_match(p, &address.postal_code))
        {
            return false;
        }
        if !list_allows(&self.cities, &address.city) {
            return false;
        }

        if list_contains(&self.excluded_countries, &address.country) {
            return false;
        }
        if list_contains(&self.excluded_states, &address.state) {
            return false;
        }
        if self
            .excluded_postal_codes
            .iter()
            .any(|p| wildcard_match(p, &address.postal_code))
        {
            return false;
        }

        true
    }
}

/// Non-empty list must contain the value; empty list allows everything.
fn list_allows(list: &[String], value: &str) -> bool {
    list.is_empty() || list_contains(list, value)
}

fn list_contains(list: &[String], value: &str) -> bool {
    list.iter().any(|entry| entry.eq_ignore_ascii_case(value))
}

// =============================================================================
// Wildcard Matching
// =============================================================================

/// Glob match with `*` (any run) and `?` (any single char), case-insensitive.
///
/// Iterative two-pointer algorithm with backtracking on the last `*`; no
/// regex engine needed for postal patterns.
///
/// ## Example
/// ```rust
/// use meridian_core::zone::wildcard_match;
///
/// assert!(wildcard_match("902*", "90210"));
/// assert!(wildcard_match("SW1A ?AA", "sw1a 1aa"));
/// assert!(!wildcard_match("902*", "10001"));
/// ```
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let v: Vec<char> = value.chars().map(|c| c.to_ascii_lowercase()).collect();

    let (mut pi, mut vi) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_vi = 0usize;

    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            star_vi = vi;
            pi += 1;
        } else if let Some(s) = star {
            // Backtrack: let the last '*' swallow one more character.
            pi = s + 1;
            star_vi += 1;
            vi = star_vi;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

// =============================================================================
// Unit Tests
// =============================================================================
