// src/text.rs
//! Text normalizer: lower-casing, whitespace collapse, domain-phrase folding and
//! a conservative tokenizer (no stemming).
//!
//! Folding keeps query and corpus wording on the same spelling, e.g. every
//! "best supportive care" / "B.S.C." variant becomes `bsc` and the
//! physician-discretion phrasing becomes `nach arztlicher maßgabe`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-zÄÖÜäöüß0-9]+").expect("word regex"));
static BSC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bb\s*\.?\s*s\s*\.?\s*c\b").expect("bsc regex"));
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Small, fixed German stop-word set. Frequent domain terms are left to IDF.
const STOPWORDS: &[&str] = &[
    "mit", "und", "die", "der", "des", "den", "dem", "das", "in", "im", "an", "auf", "bei", "von",
    "zu", "zur", "zum", "oder", "sowie", "als", "nach", "für", "eine", "einer", "einem", "einen",
    "ein", "ist", "sind", "wird", "werden", "nicht", "kein", "keine", "ohne", "über", "unter",
    "dass", "da", "nur", "auch", "wie", "mehr", "weniger",
];

/// Short tokens that survive the length filter (treatment-line shorthands).
const KEEP_SHORT_TOKENS: &[&str] = &[
    "1l", "2l", "3l", "4l", "5l", "l1", "l2", "l3", "l4", "l5",
];

/// Phrase folds applied in order after lower-casing. Longer variants first so a
/// shorter pattern never eats into a longer one.
const PHRASE_FOLDS: &[(&str, &str)] = &[
    ("best supportive care", "bsc"),
    ("best supportive-care", "bsc"),
    ("patientenindividuelle therapie", "pit"),
    ("beobachtendes abwarten", "watchful waiting"),
    ("aerztlicher", "ärztlicher"),
    ("massgabe", "maßgabe"),
    ("nach ärztlicher maßgabe", "nach arztlicher maßgabe"),
    ("nach maßgabe des arztes", "nach arztlicher maßgabe"),
    ("nach maßgabe des arzt", "nach arztlicher maßgabe"),
    ("ärztlicher maßgabe", "arztlicher maßgabe"),
];

/// Collapse runs of whitespace into one space and trim.
pub fn collapse_ws(input: &str) -> String {
    WS_RE.replace_all(input.trim(), " ").into_owned()
}

/// Lower-case, collapse whitespace and fold the fixed domain synonyms.
pub fn normalize(text: &str) -> String {
    let mut cleaned = collapse_ws(&text.to_lowercase());
    if cleaned.is_empty() {
        return cleaned;
    }
    // The spelled-out forms go first so "best supportive care (bsc)" keeps a single bsc.
    for (from, to) in PHRASE_FOLDS.iter().take(2) {
        cleaned = cleaned.replace(from, to);
    }
    cleaned = BSC_RE.replace_all(&cleaned, "bsc").into_owned();
    for (from, to) in PHRASE_FOLDS.iter().skip(2) {
        cleaned = cleaned.replace(from, to);
    }
    cleaned
}

/// Word-ish pieces of `text` as written (no normalization, no filtering).
pub fn words(text: &str) -> impl Iterator<Item = &str> {
    WORD_RE.find_iter(text).map(|m| m.as_str())
}

/// Ordered tokens: normalized, stop words removed, tokens of <= 2 chars dropped
/// unless allow-listed.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    words(&normalized)
        .filter(|tok| !STOPWORDS.contains(tok))
        .filter(|tok| tok.chars().count() > 2 || KEEP_SHORT_TOKENS.contains(tok))
        .map(str::to_string)
        .collect()
}

/// Distinct tokens of `text`, used for query matching.
pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// True if `needle` occurs in `haystack` with no alphanumeric neighbour on either
/// side. Used for short abbreviations (`bsc`, `pit`, `2l`) that would otherwise
/// match inside unrelated words.
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        from = start + needle.chars().next().map_or(1, char::len_utf8);
    }
    false
}
