// src/comparator.rs
//! Comparator canonicalizer & splitter.
//!
//! A record's comparator field may name one agent, a combination, a
//! physician-discretion menu or several true alternatives. `split_items` breaks
//! alternatives apart (never combinations, never menus) and `canonical_id`
//! maps each item onto a stable aggregation key:
//!
//! - `menu:<kind>`    physician-discretion / individualized therapy
//! - `passive:<kind>` best supportive care, watchful waiting
//! - `combo:<a>|<b>`  sorted, individually normalized components
//! - `mono:<text>`    everything else

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::text::{collapse_ws, contains_word, normalize, words};

static LINE_SEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n").expect("line regex"));
static SEMI_SEP: Lazy<Regex> = Lazy::new(|| Regex::new(r";").expect("semicolon regex"));
static OR_SEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\boder\b").expect("oder regex"));
static SLASH_SEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+/\s+").expect("slash regex"));

static PAREN_ABBR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((?:\s*[A-Za-z]{2,6}\s*)\)").expect("paren regex"));
// "+" needs surrounding spaces so biomarker notation like "HER2+" stays mono.
static COMBO_PLUS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s\+\s").expect("plus regex"));
static PLUS_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bplus\b").expect("plus regex"));
static COMBO_SPLIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s\+\s|\bplus\b|\bzusammen mit\b|\bin kombination mit\b|\bkombiniert mit\b")
        .expect("combo split regex")
});

/// Physician-discretion and explicit choice-list phrases (matched on the
/// normalized text, so umlaut and spelling variants are already folded).
const MENU_PHRASES: &[&str] = &[
    "nach arztlicher maßgabe",
    "patientenindividuelle therapie",
    "unter auswahl von",
    "auswahl aus",
    "unter berücksichtigung von",
    "unter beruecksichtigung von",
];

const COMBINATION_MARKERS: &[&str] = &[
    "kombination",
    "kombiniert",
    "zusätzlich",
    "zusaetzlich",
    "add-on",
    "zusammen mit",
];

/// Passive-care phrases beyond the `bsc` abbreviation.
const PASSIVE_PHRASES: &[&str] = &[
    "supportive care",
    "symptomatische therapie",
    "watchful waiting",
    "abwarten",
];

const MODIFIER_PREFIXES: &[&str] = &[
    "ohne ", "mit ", "unter ", "für ", "nur ", "inkl ", "inkl. ", "zzgl ", "zzgl. ",
];

const TRIM_CHARS: &[char] = &[' ', ';', ',', '.'];

/// Fragments at or above this size are checked by the near-menu guard.
const NEAR_MENU_MIN_ITEMS: usize = 6;

/// True for physician-discretion / individualized-therapy / choice-list text.
pub fn is_menu_text(text: &str) -> bool {
    let norm = normalize(text);
    contains_word(&norm, "pit") || MENU_PHRASES.iter().any(|m| norm.contains(m))
}

/// True if the text names a combination or add-on regimen.
pub fn is_combination_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    if lower.trim().is_empty() {
        return false;
    }
    COMBINATION_MARKERS.iter().any(|m| lower.contains(m))
        || COMBO_PLUS_RE.is_match(&lower)
        || PLUS_WORD_RE.is_match(&lower)
}

/// True if the text describes passive or supportive care. Menus are not passive.
pub fn is_passive_candidate_text(text: &str) -> bool {
    if is_menu_text(text) {
        return false;
    }
    let norm = normalize_candidate(text);
    contains_word(&norm, "bsc") || PASSIVE_PHRASES.iter().any(|p| norm.contains(p))
}

/// Normalized display form used for keys: folded synonyms, parenthesized
/// abbreviations removed, trailing punctuation trimmed.
pub fn normalize_candidate(text: &str) -> String {
    let folded = normalize(text);
    let stripped = PAREN_ABBR_RE.replace_all(&folded, "");
    collapse_ws(&stripped).trim_matches(TRIM_CHARS).to_string()
}

/// A dangling "ohne X" / "mit Y" style fragment that names no comparator.
fn is_modifier_fragment(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    MODIFIER_PREFIXES.iter().any(|p| lower.starts_with(p)) && words(&lower).count() < 4
}

fn has_partial_menu_marker(text: &str) -> bool {
    let norm = normalize(text);
    norm.contains("auswahl") || norm.contains("maßgabe") || contains_word(&norm, "pit")
}

/// Split comparator text into atomic alternatives.
///
/// Menus come back whole. Splits on line breaks, `;`, `oder` and ` / `, never
/// on `und`. If the split yields more than `max_items` fragments, or at least
/// six while the text still carries partial menu markers, the original text
/// is returned as a single item.
pub fn split_items(text: &str, max_items: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    if is_menu_text(text) {
        return vec![text.to_string()];
    }

    // line breaks first: whitespace is only collapsed per fragment
    let mut items = vec![text.to_string()];
    for sep in [&*LINE_SEP, &*SEMI_SEP, &*OR_SEP, &*SLASH_SEP] {
        items = items
            .iter()
            .flat_map(|it| sep.split(it).map(str::to_string).collect::<Vec<_>>())
            .collect();
    }

    let fragments: Vec<String> = items
        .iter()
        .map(|it| collapse_ws(it).trim_matches(TRIM_CHARS).to_string())
        .filter(|it| !it.is_empty() && !is_modifier_fragment(it))
        .collect();

    if fragments.len() > max_items
        || (fragments.len() >= NEAR_MENU_MIN_ITEMS && has_partial_menu_marker(text))
    {
        return vec![text.to_string()];
    }
    fragments
}

fn menu_kind(norm: &str) -> &'static str {
    if contains_word(norm, "pit") || norm.contains("patientenindividuelle") {
        "pit"
    } else if norm.contains("arztlicher maßgabe") {
        "arztliche_massgabe"
    } else if norm.contains("unter auswahl von") || norm.contains("auswahl aus") {
        "auswahl"
    } else {
        "unspecified"
    }
}

/// Aggregation key for one atomic comparator item; `""` means "skip".
pub fn canonical_id(item: &str) -> String {
    let norm = normalize_candidate(item);
    if norm.is_empty() || is_modifier_fragment(&norm) {
        return String::new();
    }

    // menus first: "BSC nach ärztlicher Maßgabe" is a menu, not passive care
    if is_menu_text(&norm) {
        return format!("menu:{}", menu_kind(&norm));
    }

    if contains_word(&norm, "bsc") {
        return "passive:bsc".to_string();
    }
    if norm.contains("watchful waiting") {
        return "passive:watchful_waiting".to_string();
    }

    if is_combination_text(&norm) {
        let components: BTreeSet<String> = COMBO_SPLIT_RE
            .split(&norm)
            .map(normalize_candidate)
            .filter(|c| !c.is_empty())
            .collect();
        if components.len() >= 2 {
            let joined: Vec<&str> = components.iter().map(String::as_str).collect();
            return format!("combo:{}", joined.join("|"));
        }
    }

    format!("mono:{norm}")
}
