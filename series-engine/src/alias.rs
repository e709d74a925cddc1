//! Channel-name alias generation and the alias -> canonical index
//!
//! Measurement tools disagree on how a signal is spelled: URL-encoded forms
//! from web frontends, punctuation swapped for underscores, vendor tag
//! suffixes (`Signal.EA.001`), array notation (`Signal[0]`), stray
//! non-breaking spaces from spreadsheet exports. Every canonical channel name
//! is expanded into its alias set here, and the per-request lookup maps any
//! alias back to the canonical name with first-writer-wins semantics.
//!
//! All generators are pure functions of their input string; no global state.

use crate::catalog::ChannelCatalog;
use percent_encoding::percent_decode_str;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Replace every run of non `[A-Za-z0-9_]` characters with a single `_`
pub fn clean_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// Unicode-normalize (NFKC), turn non-breaking spaces into normal spaces,
/// collapse internal whitespace runs and trim.
pub fn normalize_text(s: &str) -> String {
    let composed: String = s.nfkc().collect();
    let spaced = composed.replace('\u{00A0}', " ");
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// URL-decode, returning None when decoding does not change the string
fn url_decoded(s: &str) -> Option<String> {
    let decoded = percent_decode_str(s).decode_utf8().ok()?;
    if decoded != s {
        Some(decoded.into_owned())
    } else {
        None
    }
}

/// Push a form plus its cleaned and lowercased variants
fn push_variants(out: &mut BTreeSet<String>, form: &str) {
    if form.is_empty() {
        return;
    }
    out.insert(form.to_string());
    out.insert(form.to_lowercase());
    let cleaned = clean_name(form);
    if !cleaned.is_empty() {
        out.insert(cleaned.to_lowercase());
        out.insert(cleaned);
    }
}

/// Alias set for one canonical channel name.
///
/// Referentially transparent: the same name always yields the same set, and
/// the `BTreeSet` gives a deterministic registration order when the set is
/// walked during index construction.
pub fn aliases_for(name: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    if name.is_empty() {
        return out;
    }

    push_variants(&mut out, name);
    push_variants(&mut out, &normalize_text(name));
    push_variants(&mut out, &normalize_text(&clean_name(name)));

    if let Some(decoded) = url_decoded(name) {
        push_variants(&mut out, &decoded);
    }

    // Compact forms: substring after the last delimiter occurrence
    for delim in ['.', '/', '#'] {
        if let Some(idx) = name.rfind(delim) {
            push_variants(&mut out, &normalize_text(&name[idx + 1..]));
        }
    }

    // Array notation: Signal[0] -> Signal
    if name.contains('[') && name.contains(']') {
        if let Some(base) = name.split('[').next() {
            push_variants(&mut out, &normalize_text(base));
        }
    }

    // Dot/space swapped literals and quote-stripped literal
    out.insert(name.replace('.', " "));
    out.insert(name.replace(' ', "."));
    out.insert(name.trim_matches(|c| c == ' ' || c == '\'' || c == '"').to_string());

    out.retain(|a| !a.is_empty());
    out
}

/// Richer, ordered alias list used for per-file expansion diagnostics and
/// display-name selection. Adds progressive dot-suffix stripping for names
/// carrying trailing vendor/tag codes (`Signal.EA.001` -> `Signal.EA` ->
/// `Signal`). Agrees with `aliases_for` on the literal, cleaned, lowercase,
/// URL-decoded, array-stripped and delimiter-compacted forms.
pub fn expanded_aliases(name: &str) -> Vec<String> {
    fn push(out: &mut Vec<String>, s: String) {
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }

    let mut out: Vec<String> = Vec::new();
    if name.is_empty() {
        return out;
    }
    push(&mut out, name.to_string());

    if let Some(decoded) = url_decoded(name) {
        push(&mut out, decoded);
    }

    // Rightmost segment and everything after the first dot
    if let Some(idx) = name.rfind('.') {
        push(&mut out, name[idx + 1..].to_string());
    }
    if let Some(idx) = name.find('.') {
        push(&mut out, name[idx + 1..].to_string());
    }
    for delim in ['/', '#'] {
        if let Some(idx) = name.rfind(delim) {
            push(&mut out, name[idx + 1..].to_string());
        }
    }

    // Progressive suffix stripping: drop the last dot-segment repeatedly
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 1 {
        for i in (1..parts.len()).rev() {
            push(&mut out, parts[..i].join("."));
        }
    }

    // Array base
    if name.contains('[') && name.contains(']') {
        if let Some(base) = name.split('[').next() {
            push(&mut out, base.trim().to_string());
        }
    }

    // Lowercase and cleaned-lowercase of everything collected so far
    let snapshot: Vec<String> = out.clone();
    for a in snapshot {
        push(&mut out, a.to_lowercase());
        let cleaned = clean_name(&a);
        push(&mut out, cleaned.trim_matches('_').to_lowercase());
        push(&mut out, cleaned);
    }

    out
}

/// Expansion of every canonical channel of one file, canonical -> aliases.
/// Used by diagnostics and channel listings, not by the hot extraction path.
pub fn expanded_aliases_for_file(
    catalog: &ChannelCatalog,
    path: &Path,
) -> HashMap<String, Vec<String>> {
    let mut out = HashMap::new();
    for canonical in catalog.list_channels(path).iter() {
        let mut aliases = expanded_aliases(canonical);
        if aliases.first().map(|a| a.as_str()) != Some(canonical.as_str()) {
            aliases.insert(0, canonical.clone());
        }
        out.insert(canonical.clone(), aliases);
    }
    out
}

/// Extract a clean display name from a full signal path.
///
/// Recorded names often carry OEM/module prefixes
/// (`96D7124080_8128328U_FM77_nc_CAN_VITESSE_VEHICULE_ROUES`) or a dotted
/// qualifier whose last segment is the human-readable part.
pub fn display_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return String::new();
    }

    // Dotted names: last meaningful segment wins
    if name.contains('.') {
        for part in name.rsplit('.') {
            let part = part.trim();
            if part.len() > 2 {
                return part.to_string();
            }
        }
    }

    // Underscore-delimited names: skip leading module-identifier segments
    let parts: Vec<&str> = name.split('_').collect();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() || is_module_identifier(part) {
            continue;
        }
        let looks_like_signal = (part.chars().all(|c| !c.is_lowercase()) && part.len() >= 3)
            || (part.chars().next().is_some_and(|c| c.is_uppercase())
                && part.chars().skip(1).all(|c| c.is_lowercase()));
        if looks_like_signal && parts[..i].iter().all(|p| p.is_empty() || is_module_identifier(p)) {
            return parts[i..].join("_");
        }
    }

    // Fallback: strip a leading run of all-caps/digit code segments
    let prefix_len = parts
        .iter()
        .take_while(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()))
        .count();
    if prefix_len >= 2 && prefix_len < parts.len() {
        let remaining = parts[prefix_len..].join("_");
        if remaining.len() > 3 {
            return remaining;
        }
    }

    name.to_string()
}

/// Module/OEM identifier segments: numeric-led codes, very short tags, or
/// mixed alphanumerics with digits near the front (`MG1CS051`, `96D7124080`).
fn is_module_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    let Some(first) = chars.next() else {
        return true;
    };
    if first.is_ascii_digit() || part.len() <= 2 {
        return true;
    }
    part.chars().all(|c| c.is_ascii_alphanumeric())
        && first.is_uppercase()
        && part.chars().take(3).any(|c| c.is_ascii_digit())
}

/// Build the alias -> canonical index over a file set.
///
/// Registration order is file order, then catalog order, then the alias set's
/// deterministic iteration order; the first canonical to claim an alias keeps
/// it. Rebuilding over the same discovery order is idempotent.
pub fn build_lookup(catalog: &ChannelCatalog, files: &[PathBuf]) -> HashMap<String, String> {
    let mut lookup: HashMap<String, String> = HashMap::new();
    for file in files {
        for canonical in catalog.list_channels(file).iter() {
            for alias in aliases_for(canonical) {
                lookup.entry(alias).or_insert_with(|| canonical.clone());
            }
        }
    }
    log::debug!(
        "Alias index over {} file(s): {} alias(es)",
        files.len(),
        lookup.len()
    );
    lookup
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_clean_name_collapses_runs() {
        assert_eq!(clean_name("Veh.Spd (km/h)"), "Veh_Spd_km_h_");
        assert_eq!(clean_name("already_clean_1"), "already_clean_1");
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  a\u{00A0} b   c "), "a b c");
    }

    #[test]
    fn test_aliases_deterministic() {
        let name = "96D_CAN_VITESSE.EA%20X[0]";
        assert_eq!(aliases_for(name), aliases_for(name));
    }

    #[test]
    fn test_alias_core_forms() {
        let aliases = aliases_for("Veh.Spd");
        assert!(aliases.contains("Veh.Spd"));
        assert!(aliases.contains("Veh_Spd"));
        assert!(aliases.contains("veh_spd"));
        assert!(aliases.contains("Spd")); // compact after last '.'
        assert!(aliases.contains("spd"));
        assert!(aliases.contains("Veh Spd")); // dot -> space
    }

    #[test]
    fn test_alias_array_stripping() {
        let aliases = aliases_for("WheelSpeed[0]");
        assert!(aliases.contains("WheelSpeed"));
        assert!(aliases.contains("wheelspeed"));
    }

    #[test]
    fn test_alias_url_decoding() {
        let aliases = aliases_for("Eng%20Spd");
        assert!(aliases.contains("Eng Spd"));
        assert!(aliases.contains("eng spd"));
        assert!(aliases.contains("Eng_Spd"));
    }

    #[test]
    fn test_expanded_aliases_suffix_stripping() {
        let aliases = expanded_aliases("Signal.EA.001");
        assert!(aliases.contains(&"Signal.EA".to_string()));
        assert!(aliases.contains(&"Signal".to_string()));
        // Agreement with the light generator on the compact form
        assert!(aliases.contains(&"001".to_string()));
        assert!(aliases_for("Signal.EA.001").contains("001"));
    }

    #[test]
    fn test_expanded_aliases_agree_on_core_forms() {
        let name = "Veh.Spd[0]";
        let light = aliases_for(name);
        let rich = expanded_aliases(name);
        for form in [name.to_string(), clean_name(name), name.to_lowercase()] {
            assert!(light.contains(&form));
            assert!(rich.contains(&form));
        }
    }

    #[test]
    fn test_display_name_dotted() {
        assert_eq!(
            display_name("96D7124080_8128328U_FM77_nc_SG_.PENTE_STATIQUE"),
            "PENTE_STATIQUE"
        );
    }

    #[test]
    fn test_display_name_module_prefix() {
        assert_eq!(
            display_name("96D7124080_8128328U_FM77_nc_CAN_VITESSE_VEHICULE_ROUES"),
            "CAN_VITESSE_VEHICULE_ROUES"
        );
        assert_eq!(
            display_name("MG1CS051_H440_2F_EngM_facTranCorSlop_RTE"),
            "EngM_facTranCorSlop_RTE"
        );
    }

    #[test]
    fn test_display_name_passthrough() {
        assert_eq!(display_name("Speed"), "Speed");
    }

    fn write_csv(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_build_lookup_first_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        // Both canonical names share the cleaned alias "A_B"
        let f1 = write_csv(&dir, "one.csv", "Time,A.B\n0,1\n1,2\n");
        let f2 = write_csv(&dir, "two.csv", "Time,A_B\n0,3\n1,4\n");

        let catalog = ChannelCatalog::new();
        let files = vec![f1, f2];
        let lookup = build_lookup(&catalog, &files);

        // The canonical discovered first keeps the shared alias
        assert_eq!(lookup.get("A_B").map(String::as_str), Some("A.B"));
        // Rebuilding is idempotent for a fixed discovery order
        let again = build_lookup(&catalog, &files);
        assert_eq!(lookup, again);
    }
}
