// src/rules.rs
//! Domain rule layer: red-flag detection on the top candidate and soft
//! multiplicative penalties/boosts applied during ranking.
//!
//! Query-side signals are computed once per request (`RuleContext`); the
//! candidate-side checks run per candidate.
//!
//! Phrase sets (case-insensitive, matched on the normalized query):
//! - post-platinum:   "progress nach platin", "post-platin", "platinrefraktär", ...
//! - therapy-eligible: "weitere systemtherapie", "therapiefähig", ...
//! - active intent:   relapse / refractory / progression / salvage / 2L-4L
//! - passive request: BSC comparator type, or bsc / watchful waiting / abwarten

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::comparator::{is_menu_text, is_passive_candidate_text};
use crate::domain::{ComparatorType, TherapyLine};
use crate::text::{contains_word, normalize};

const POST_PLATINUM_MARKERS: &[&str] = &[
    "progress nach platin",
    "post-platin",
    "platinrefraktär",
    "nach platinbasierter",
    "platinum-refractory",
];

const PLATINUM_AGENTS: &[&str] = &["cisplatin", "carboplatin", "oxaliplatin"];

const THERAPY_OK_MARKERS: &[&str] = &[
    "weitere systemtherapie",
    "weitere systemische therapie",
    "systemtherapie geeignet",
    "systemtherapiefähig",
    "systemtherapiefaehig",
    "geeignet für weitere systemische therapie",
    "geeignet fuer weitere systemische therapie",
    "standardtherapie kommt in frage",
    "standardtherapie möglich",
    "standardtherapie moeglich",
    "therapiefähig",
    "therapiefaehig",
    "geeignet für therapie",
];

const ACTIVE_INTENT_MARKERS: &[&str] = &[
    "rezidiv",
    "rezidivier",
    "refrakt",
    "progress",
    "metastas",
    "vorbehandelt",
    "nach versagen",
    "salvage",
    "second line",
];

/// Line abbreviations; matched on word boundaries.
const ACTIVE_LINE_TOKENS: &[&str] = &["2l", "3l", "4l"];

const POST_PROGRESSION_MARKERS: &[&str] = &["nach versagen", "nach progress", "vorbehandelt"];

const PASSIVE_REQUEST_PHRASES: &[&str] = &["watchful waiting", "abwarten"];

const PLATINUM_MISMATCH_FACTOR: f32 = 0.3;
const PASSIVE_MISMATCH_FACTOR: f32 = 0.15;
const PASSIVE_MISMATCH_LATE_LINE_FACTOR: f32 = 0.5;
const FIRST_LINE_MISMATCH_FACTOR: f32 = 0.5;
const LATE_LINE_PASSIVE_BOOST: f32 = 1.5;

/// Closed set of domain-level mismatches between query and top candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RedFlag {
    /// Post-platinum progression, yet the top candidate names a platinum agent.
    #[serde(rename = "SETTING_MISMATCH_PLATIN")]
    PlatinumRechallenge,
    /// Patient is treatment-eligible, yet the top candidate is passive care.
    #[serde(rename = "BSC_CONTRADICTION")]
    PassiveContradiction,
    /// First line requested, yet the top candidate is a post-progression option.
    #[serde(rename = "LINE_MISMATCH_1L")]
    FirstLineMismatch,
    /// Active treatment intent, yet the top candidate is passive care.
    #[serde(rename = "PASSIVE_TOP1_MISMATCH")]
    PassiveTopMismatch,
}

impl RedFlag {
    pub fn code(self) -> &'static str {
        match self {
            RedFlag::PlatinumRechallenge => "SETTING_MISMATCH_PLATIN",
            RedFlag::PassiveContradiction => "BSC_CONTRADICTION",
            RedFlag::FirstLineMismatch => "LINE_MISMATCH_1L",
            RedFlag::PassiveTopMismatch => "PASSIVE_TOP1_MISMATCH",
        }
    }

    /// Flags that force low reliability regardless of evidence strength.
    pub fn is_hard(self) -> bool {
        matches!(
            self,
            RedFlag::PassiveContradiction | RedFlag::PassiveTopMismatch
        )
    }
}

impl fmt::Display for RedFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Query-side signals, computed once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleContext {
    pub line: Option<TherapyLine>,
    pub post_platinum: bool,
    pub therapy_eligible: bool,
    pub active_intent: bool,
    pub passive_requested: bool,
}

impl RuleContext {
    pub fn new(query: &str, line: Option<TherapyLine>, comparator_type: Option<ComparatorType>) -> Self {
        let q = normalize(query);
        let therapy_eligible = THERAPY_OK_MARKERS.iter().any(|m| q.contains(m));
        // "später" alone is not active intent, otherwise the late-line boost would cancel out
        let active_intent = line == Some(TherapyLine::Second)
            || therapy_eligible
            || ACTIVE_INTENT_MARKERS.iter().any(|m| q.contains(m))
            || ACTIVE_LINE_TOKENS.iter().any(|t| contains_word(&q, t));
        let passive_requested = comparator_type == Some(ComparatorType::BestSupportiveCare)
            || contains_word(&q, "bsc")
            || PASSIVE_REQUEST_PHRASES.iter().any(|p| q.contains(p));

        Self {
            line,
            post_platinum: POST_PLATINUM_MARKERS.iter().any(|m| q.contains(m)),
            therapy_eligible,
            active_intent,
            passive_requested,
        }
    }

    fn is_late_line(&self) -> bool {
        self.line == Some(TherapyLine::Later)
    }

    fn is_first_line(&self) -> bool {
        self.line == Some(TherapyLine::First)
    }
}

fn names_platinum_agent(candidate_lower: &str) -> bool {
    PLATINUM_AGENTS.iter().any(|d| candidate_lower.contains(d))
}

fn is_post_progression(candidate_lower: &str) -> bool {
    POST_PROGRESSION_MARKERS.iter().any(|m| candidate_lower.contains(m))
}

/// Red flags for the top candidate; each rule fires independently.
pub fn detect_red_flags(ctx: &RuleContext, top_candidate_text: &str) -> Vec<RedFlag> {
    let cand = top_candidate_text.to_lowercase();
    let passive = is_passive_candidate_text(top_candidate_text);
    let mut flags = Vec::new();

    if ctx.post_platinum && names_platinum_agent(&cand) {
        flags.push(RedFlag::PlatinumRechallenge);
    }
    if ctx.therapy_eligible && passive && !ctx.passive_requested {
        flags.push(RedFlag::PassiveContradiction);
    }
    if ctx.is_first_line() && is_post_progression(&cand) {
        flags.push(RedFlag::FirstLineMismatch);
    }
    if ctx.active_intent && passive && !ctx.passive_requested {
        flags.push(RedFlag::PassiveTopMismatch);
    }
    flags
}

/// Soft demotion/boost of a candidate score. Multiplicative only; a positive
/// score stays positive.
pub fn apply_penalties(score: f32, ctx: &RuleContext, candidate_text: &str) -> f32 {
    let cand = candidate_text.to_lowercase();
    let passive = is_passive_candidate_text(candidate_text);
    let mut factor = 1.0f32;

    if ctx.post_platinum && names_platinum_agent(&cand) {
        factor *= PLATINUM_MISMATCH_FACTOR;
    }
    if ctx.active_intent && !ctx.passive_requested && passive {
        factor *= if ctx.is_late_line() {
            PASSIVE_MISMATCH_LATE_LINE_FACTOR
        } else {
            PASSIVE_MISMATCH_FACTOR
        };
    }
    if ctx.is_first_line() && is_post_progression(&cand) {
        factor *= FIRST_LINE_MISMATCH_FACTOR;
    }
    if ctx.is_late_line() && (passive || is_menu_text(candidate_text)) {
        factor *= LATE_LINE_PASSIVE_BOOST;
    }
    score * factor
}
