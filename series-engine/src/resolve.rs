//! Request-time identifier resolution
//!
//! Callers do not always send an identifier that is present verbatim in the
//! alias index: frontends send display-formatted or re-encoded names. This
//! layer tries progressively looser strategies, first hit wins:
//! exact index lookup, lowercase lookup, lookup of every alias generated for
//! the requested string itself, then approximate matching against the
//! canonical names. Identifiers that survive all four are reported back as
//! unresolved, never conflated with empty-but-resolved series.

use crate::alias;
use similar::TextDiff;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Minimum sequence-similarity ratio for an approximate match
pub const SIMILARITY_CUTOFF: f32 = 0.6;

/// How many approximate candidates to consider before taking the best
pub const MAX_FUZZY_CANDIDATES: usize = 3;

/// Outcome of resolving a batch of requested identifiers
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Resolution {
    /// (requested id, canonical channel name), in request order
    pub resolved: Vec<(String, String)>,
    /// Requested ids with no acceptable mapping
    pub unresolved: Vec<String>,
}

/// Resolve requested ids against an alias index.
///
/// Duplicate requests are processed once. Two distinct requests may resolve
/// to the same canonical channel; each keeps its own entry so callers can key
/// results by the requested id.
pub fn resolve_ids(lookup: &HashMap<String, String>, ids: &[String]) -> Resolution {
    let canonicals: BTreeSet<&String> = lookup.values().collect();
    let mut result = Resolution::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for id in ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        match resolve_one(lookup, &canonicals, id) {
            Some(canonical) => result.resolved.push((id.clone(), canonical)),
            None => {
                log::debug!("Could not resolve requested id {:?}", id);
                result.unresolved.push(id.clone());
            }
        }
    }
    result
}

fn resolve_one(
    lookup: &HashMap<String, String>,
    canonicals: &BTreeSet<&String>,
    id: &str,
) -> Option<String> {
    if let Some(hit) = lookup.get(id) {
        return Some(hit.clone());
    }
    if let Some(hit) = lookup.get(&id.to_lowercase()) {
        return Some(hit.clone());
    }

    // Symmetric expansion: the request itself may be a cleaned/decoded
    // variant that was never registered under the canonical's alias set
    for candidate in alias::aliases_for(id) {
        if let Some(hit) = lookup.get(&candidate) {
            return Some(hit.clone());
        }
    }

    fuzzy_match(canonicals, id)
}

/// Closest canonical name by sequence-similarity ratio, comparing the
/// cleaned, lowercased forms of both sides so punctuation differences do not
/// depress the ratio. Accepted only above `SIMILARITY_CUTOFF`.
fn fuzzy_match(canonicals: &BTreeSet<&String>, id: &str) -> Option<String> {
    let needle = alias::clean_name(id).to_lowercase();
    if needle.is_empty() {
        return None;
    }

    let mut candidates: Vec<(f32, &str)> = Vec::new();
    for canonical in canonicals {
        let haystack = alias::clean_name(canonical).to_lowercase();
        let ratio = TextDiff::from_chars(needle.as_str(), haystack.as_str()).ratio();
        if ratio >= SIMILARITY_CUTOFF {
            candidates.push((ratio, canonical.as_str()));
        }
    }
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(MAX_FUZZY_CANDIDATES);

    let (ratio, best) = *candidates.first()?;
    log::debug!(
        "Fuzzy-resolved {:?} -> {:?} (ratio {:.2})",
        id,
        best,
        ratio
    );
    Some(best.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_for(names: &[&str]) -> HashMap<String, String> {
        let mut lookup = HashMap::new();
        for name in names {
            for a in alias::aliases_for(name) {
                lookup.entry(a).or_insert_with(|| name.to_string());
            }
        }
        lookup
    }

    fn single(resolution: &Resolution) -> &str {
        assert_eq!(resolution.resolved.len(), 1);
        &resolution.resolved[0].1
    }

    #[test]
    fn test_exact_lookup() {
        let lookup = lookup_for(&["VehicleSpeed"]);
        let r = resolve_ids(&lookup, &["VehicleSpeed".to_string()]);
        assert_eq!(single(&r), "VehicleSpeed");
        assert!(r.unresolved.is_empty());
    }

    #[test]
    fn test_lowercase_lookup() {
        let lookup = lookup_for(&["VehicleSpeed"]);
        let r = resolve_ids(&lookup, &["VEHICLESPEED".to_string()]);
        assert_eq!(single(&r), "VehicleSpeed");
    }

    #[test]
    fn test_array_notation_resolves_via_request_expansion() {
        let lookup = lookup_for(&["Veh.Spd"]);
        let r = resolve_ids(&lookup, &["Veh.Spd[0]".to_string()]);
        assert_eq!(single(&r), "Veh.Spd");
    }

    #[test]
    fn test_fuzzy_match_above_cutoff() {
        let lookup = lookup_for(&["VehicleSpeed", "EngineTorque"]);
        let r = resolve_ids(&lookup, &["VehicleSpeeed".to_string()]);
        assert_eq!(single(&r), "VehicleSpeed");
    }

    #[test]
    fn test_unresolvable_reported() {
        let lookup = lookup_for(&["VehicleSpeed"]);
        let r = resolve_ids(&lookup, &["zz".to_string()]);
        assert!(r.resolved.is_empty());
        assert_eq!(r.unresolved, vec!["zz".to_string()]);
    }

    #[test]
    fn test_duplicate_requests_processed_once() {
        let lookup = lookup_for(&["VehicleSpeed"]);
        let ids = vec!["VehicleSpeed".to_string(), "VehicleSpeed".to_string()];
        let r = resolve_ids(&lookup, &ids);
        assert_eq!(r.resolved.len(), 1);
        assert!(r.unresolved.is_empty());
    }

    #[test]
    fn test_two_aliases_of_same_channel_both_resolve() {
        let lookup = lookup_for(&["Veh.Spd"]);
        let ids = vec!["Veh.Spd".to_string(), "veh_spd".to_string()];
        let r = resolve_ids(&lookup, &ids);
        assert_eq!(
            r.resolved,
            vec![
                ("Veh.Spd".to_string(), "Veh.Spd".to_string()),
                ("veh_spd".to_string(), "Veh.Spd".to_string()),
            ]
        );
        assert!(r.unresolved.is_empty());
    }

    #[test]
    fn test_fuzzy_match_cleans_punctuated_canonicals() {
        let lookup = lookup_for(&["Veh.Spd (km/h)", "EngineTorque"]);
        // Typo keeps every exact and alias lookup from hitting
        let r = resolve_ids(&lookup, &["veh spdd km h".to_string()]);
        assert_eq!(single(&r), "Veh.Spd (km/h)");
    }
}
