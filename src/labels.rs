// src/labels.rs
//! Outcome labeler: per-candidate confidence, batch ambiguity, advisory
//! notices and the final reliability verdict with up to three reasons.

use serde::{Serialize, Serializer};

use crate::corpus::AreaStats;
use crate::domain::{CandidateResult, Level, ResultStatus};
use crate::rules::RedFlag;

pub const MAX_RELIABILITY_REASONS: usize = 3;

const NO_RESULT_TEXT: &str = "Kein belastbares Ergebnis gefunden.";
const FEW_DECISIONS_TEXT: &str = "Sehr wenige ähnliche Entscheidungen vorhanden.";
const AREA_FALLBACK_TEXT: &str = "Wenig Daten im Therapiegebiet – Ergebnis basiert auf Analogfällen.";
const HIGH_AMBIGUITY_TEXT: &str = "Mehrere Comparatoren sind ähnlich plausibel.";
const MEDIUM_AMBIGUITY_TEXT: &str = "Trennschärfe ist nur mittel – mehrere Optionen bleiben möglich.";
const WEAK_MATCH_TEXT: &str = "Die Übereinstimmung ist nur schwach.";

/// Sparse-area notice thresholds.
const MIN_ROWS_WITH_COMPARATOR: u32 = 15;
const ORPHAN_MISSING_RATIO: f32 = 0.50;
const SPECIAL_ROWS_RATIO: f32 = 0.30;

/// Confidence relative to the best candidate of this request.
pub fn confidence_label(score: f32, top_score: f32, support_cases: usize) -> Level {
    if top_score <= 0.0 {
        return Level::Low;
    }
    let relative = score / top_score;
    if relative >= 0.80 && support_cases >= 3 {
        Level::High
    } else if relative >= 0.50 && support_cases >= 2 {
        Level::Medium
    } else {
        Level::Low
    }
}

/// Ambiguity from descending scores: 5th-best (or last) over best.
pub fn ambiguity_label(sorted_scores: &[f32]) -> Level {
    let Some(&best) = sorted_scores.first() else {
        return Level::Low;
    };
    if sorted_scores.len() < 2 || best <= 0.0 {
        return Level::Low;
    }
    let ratio = sorted_scores[4.min(sorted_scores.len() - 1)] / best;
    if ratio > 0.75 {
        Level::High
    } else if ratio > 0.45 {
        Level::Medium
    } else {
        Level::Low
    }
}

/// Advisory notices; serialized as their German display sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Many orphan/special decisions without an established comparator.
    SparseArea,
    /// High share of special-procedure decisions.
    SpecialProcedureHeavy,
    /// Records from other therapy areas were blended in.
    AreaFallback,
}

impl Notice {
    pub fn text(self) -> &'static str {
        match self {
            Notice::SparseArea => {
                "Für dieses Therapiegebiet liegen viele Orphan-/Sonderverfahren ohne festgelegte zVT vor. \
                 Ergebnisse basieren auf Analogfällen und können fachfremd sein."
            }
            Notice::SpecialProcedureHeavy => {
                "Hinweis: Hoher Sonderverfahren-Anteil in diesem Therapiegebiet – \
                 Ergebnisse basieren teilweise auf Orphan- oder ATMP-Entscheidungen."
            }
            Notice::AreaFallback => {
                "Hinweis: Es wurden ergänzend andere Therapiegebiete berücksichtigt (mit Abschlag), \
                 weil im gewählten Gebiet zu wenige passende Präzedenzfälle vorlagen."
            }
        }
    }
}

impl Serialize for Notice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.text())
    }
}

/// Notices for the requested area. The special-procedure notice is dropped
/// when the sparse-area notice already covers it.
pub fn area_notices(stats: Option<&AreaStats>, used_fallback: bool) -> Vec<Notice> {
    let mut notices = Vec::new();
    if let Some(s) = stats {
        let ratio = |n: u32| {
            if s.total_rows == 0 {
                0.0
            } else {
                n as f32 / s.total_rows as f32
            }
        };
        if s.with_comparator_rows < MIN_ROWS_WITH_COMPARATOR
            || ratio(s.orphan_missing_comparator_rows) >= ORPHAN_MISSING_RATIO
        {
            notices.push(Notice::SparseArea);
        } else if ratio(s.special_rows) >= SPECIAL_ROWS_RATIO {
            notices.push(Notice::SpecialProcedureHeavy);
        }
    }
    if used_fallback {
        notices.push(Notice::AreaFallback);
    }
    notices
}

/// Concrete reason behind a reliability verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReliabilityReason {
    RedFlag(RedFlag),
    TooGeneric,
    FewDecisions,
    AreaFallback,
    HighAmbiguity,
    WeakMatch,
}

/// Reason priority; lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReasonTier {
    RedFlag,
    Blocker,
    Warning,
    Info,
}

impl ReliabilityReason {
    pub fn tier(self) -> ReasonTier {
        match self {
            ReliabilityReason::RedFlag(_) => ReasonTier::RedFlag,
            ReliabilityReason::TooGeneric | ReliabilityReason::FewDecisions => ReasonTier::Blocker,
            ReliabilityReason::AreaFallback | ReliabilityReason::HighAmbiguity => ReasonTier::Warning,
            ReliabilityReason::WeakMatch => ReasonTier::Info,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            ReliabilityReason::RedFlag(RedFlag::PlatinumRechallenge) => {
                "Therapiesequenz-Matching unsicher (Platin-Rechallenge nach Progress)."
            }
            ReliabilityReason::RedFlag(RedFlag::PassiveContradiction) => {
                "Best Supportive Care unwahrscheinlich bei therapiefähigen Patienten."
            }
            ReliabilityReason::RedFlag(RedFlag::FirstLineMismatch) => {
                "Therapielinie stimmt möglicherweise nicht überein."
            }
            ReliabilityReason::RedFlag(RedFlag::PassiveTopMismatch) => {
                "Top-Comparator wirkt passiv (BSC/Abwarten) trotz aktiven Behandlungskontexts."
            }
            ReliabilityReason::TooGeneric => "Eingabe ist zu allgemein – bitte präzisieren.",
            ReliabilityReason::FewDecisions => FEW_DECISIONS_TEXT,
            ReliabilityReason::AreaFallback => AREA_FALLBACK_TEXT,
            ReliabilityReason::HighAmbiguity => HIGH_AMBIGUITY_TEXT,
            ReliabilityReason::WeakMatch => WEAK_MATCH_TEXT,
        }
    }
}

/// Everything the reliability cascade looks at.
#[derive(Debug, Clone, Copy)]
pub struct ReliabilitySignals<'a> {
    pub status: ResultStatus,
    pub top: Option<&'a CandidateResult>,
    pub ambiguity: Level,
    pub red_flags: &'a [RedFlag],
    /// The engine blended in other therapy areas.
    pub area_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reliability {
    pub level: Level,
    pub reasons: Vec<String>,
}

impl Reliability {
    fn no_result() -> Self {
        Self {
            level: Level::Low,
            reasons: vec![NO_RESULT_TEXT.to_string()],
        }
    }
}

pub fn derive_reliability(sig: &ReliabilitySignals<'_>) -> Reliability {
    let top = match sig.top {
        Some(top) if sig.status != ResultStatus::NoResult => top,
        _ => return Reliability::no_result(),
    };

    let cases = if top.support_cases_clean > 0 {
        top.support_cases_clean
    } else {
        top.support_cases
    };
    let conf = top.confidence;
    let too_generic = sig.status == ResultStatus::NeedsClarification;
    let high_amb = sig.ambiguity == Level::High;
    let low_conf = conf == Level::Low;
    let has_flags = !sig.red_flags.is_empty();
    let strong = cases >= 3;
    let weak = cases <= 1;

    let level = if sig.red_flags.iter().any(|f| f.is_hard())
        || (has_flags && cases <= 2)
        || too_generic
        || (weak && (low_conf || high_amb))
    {
        Level::Low
    } else if strong && !has_flags && conf == Level::High && !high_amb {
        Level::High
    } else if strong && !has_flags && sig.ambiguity == Level::Low && !sig.area_fallback {
        Level::High
    } else {
        Level::Medium
    };

    let mut reasons: Vec<ReliabilityReason> = sig
        .red_flags
        .iter()
        .map(|f| ReliabilityReason::RedFlag(*f))
        .collect();
    if too_generic {
        reasons.push(ReliabilityReason::TooGeneric);
    }
    if weak {
        reasons.push(ReliabilityReason::FewDecisions);
    }
    if sig.area_fallback {
        reasons.push(ReliabilityReason::AreaFallback);
    }
    if high_amb {
        reasons.push(ReliabilityReason::HighAmbiguity);
    }
    if low_conf {
        reasons.push(ReliabilityReason::WeakMatch);
    }
    reasons.sort_by_key(|r| r.tier());

    let mut texts: Vec<String> = reasons
        .iter()
        .take(MAX_RELIABILITY_REASONS)
        .map(|r| r.text().to_string())
        .collect();
    if texts.is_empty() {
        texts = fallback_bullets(level, cases, sig.ambiguity, conf, sig.area_fallback);
    }

    Reliability {
        level,
        reasons: texts,
    }
}

/// Generic bullets when no concrete reason applies.
fn fallback_bullets(
    level: Level,
    cases: usize,
    ambiguity: Level,
    conf: Level,
    area_fallback: bool,
) -> Vec<String> {
    let mut out = Vec::new();
    match level {
        Level::High => {
            if cases >= 3 {
                out.push(format!("{cases} vergleichbare Entscheidungen stützen die Top-Option."));
            }
            if ambiguity == Level::Low {
                out.push("Klare Trennschärfe zwischen Top-Option und Alternativen.".to_string());
            }
            if conf == Level::High {
                out.push("Hohe Modellsicherheit des Matchings.".to_string());
            }
        }
        Level::Medium => {
            if cases == 2 {
                out.push("Nur 2 ähnliche Entscheidungen vorhanden.".to_string());
            }
            match ambiguity {
                Level::High => out.push(HIGH_AMBIGUITY_TEXT.to_string()),
                Level::Medium => out.push(MEDIUM_AMBIGUITY_TEXT.to_string()),
                Level::Low => {}
            }
            if conf == Level::Low {
                out.push(WEAK_MATCH_TEXT.to_string());
            }
            if area_fallback {
                out.push(AREA_FALLBACK_TEXT.to_string());
            }
        }
        Level::Low => out.push(NO_RESULT_TEXT.to_string()),
    }
    out.truncate(2);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(cases: usize, clean: usize, confidence: Level) -> CandidateResult {
        CandidateResult {
            rank: 1,
            candidate_text: "Docetaxel".into(),
            support_score: 1.0,
            confidence,
            support_cases: cases,
            support_cases_clean: clean,
            support_cases_special: cases - clean,
            references: Vec::new(),
        }
    }

    fn signals<'a>(
        top: Option<&'a CandidateResult>,
        ambiguity: Level,
        red_flags: &'a [RedFlag],
    ) -> ReliabilitySignals<'a> {
        ReliabilitySignals {
            status: ResultStatus::Ok,
            top,
            ambiguity,
            red_flags,
            area_fallback: false,
        }
    }

    #[test]
    fn confidence_thresholds() {
        assert_eq!(confidence_label(0.9, 1.0, 3), Level::High);
        assert_eq!(confidence_label(0.9, 1.0, 2), Level::Medium);
        assert_eq!(confidence_label(0.5, 1.0, 2), Level::Medium);
        assert_eq!(confidence_label(0.49, 1.0, 5), Level::Low);
        assert_eq!(confidence_label(1.0, 0.0, 5), Level::Low);
    }

    #[test]
    fn ambiguity_uses_fifth_or_last() {
        assert_eq!(ambiguity_label(&[]), Level::Low);
        assert_eq!(ambiguity_label(&[1.0]), Level::Low);
        assert_eq!(ambiguity_label(&[1.0, 0.8]), Level::High);
        assert_eq!(ambiguity_label(&[1.0, 0.9, 0.9, 0.9, 0.5, 0.1]), Level::Medium);
        assert_eq!(ambiguity_label(&[1.0, 0.9, 0.3]), Level::Low);
        assert_eq!(ambiguity_label(&[0.0, 0.0]), Level::Low);
    }

    #[test]
    fn no_result_is_low_with_fixed_reason() {
        let r = derive_reliability(&signals(None, Level::Low, &[]));
        assert_eq!(r.level, Level::Low);
        assert_eq!(r.reasons, vec![NO_RESULT_TEXT]);
    }

    #[test]
    fn hard_flags_force_low_despite_strong_evidence() {
        let top = candidate(5, 5, Level::High);
        for flag in [RedFlag::PassiveContradiction, RedFlag::PassiveTopMismatch] {
            let flags = [flag];
            let r = derive_reliability(&signals(Some(&top), Level::Low, &flags));
            assert_eq!(r.level, Level::Low);
            assert_eq!(r.reasons[0], ReliabilityReason::RedFlag(flag).text());
        }
    }

    #[test]
    fn soft_flag_with_strong_evidence_is_medium() {
        let top = candidate(4, 4, Level::High);
        let flags = [RedFlag::PlatinumRechallenge];
        let r = derive_reliability(&signals(Some(&top), Level::Low, &flags));
        assert_eq!(r.level, Level::Medium);
        let flags_weak = [RedFlag::FirstLineMismatch];
        let weak = candidate(2, 2, Level::High);
        assert_eq!(
            derive_reliability(&signals(Some(&weak), Level::Low, &flags_weak)).level,
            Level::Low
        );
    }

    #[test]
    fn too_generic_is_low() {
        let top = candidate(5, 5, Level::High);
        let mut sig = signals(Some(&top), Level::Low, &[]);
        sig.status = ResultStatus::NeedsClarification;
        let r = derive_reliability(&sig);
        assert_eq!(r.level, Level::Low);
        assert_eq!(r.reasons, vec![ReliabilityReason::TooGeneric.text()]);
    }

    #[test]
    fn strong_evidence_paths_to_high() {
        let top = candidate(3, 3, Level::High);
        let r = derive_reliability(&signals(Some(&top), Level::Medium, &[]));
        assert_eq!(r.level, Level::High);
        assert_eq!(r.reasons[0], "3 vergleichbare Entscheidungen stützen die Top-Option.");
        assert_eq!(r.reasons.len(), 2);

        // medium confidence but clear separation
        let top = candidate(4, 4, Level::Medium);
        let r = derive_reliability(&signals(Some(&top), Level::Low, &[]));
        assert_eq!(r.level, Level::High);

        let mut sig = signals(Some(&top), Level::Low, &[]);
        sig.area_fallback = true;
        let r = derive_reliability(&sig);
        assert_eq!(r.level, Level::Medium);
        assert_eq!(r.reasons, vec![AREA_FALLBACK_TEXT]);
    }

    #[test]
    fn clean_cases_take_precedence() {
        // 3 total but only 1 clean: counts as weak evidence
        let top = candidate(3, 1, Level::Low);
        let r = derive_reliability(&signals(Some(&top), Level::Low, &[]));
        assert_eq!(r.level, Level::Low);
        assert_eq!(r.reasons[0], FEW_DECISIONS_TEXT);
    }

    #[test]
    fn reasons_are_prioritized_and_capped() {
        let top = candidate(1, 1, Level::Low);
        let flags = [RedFlag::FirstLineMismatch];
        let mut sig = signals(Some(&top), Level::High, &flags);
        sig.area_fallback = true;
        let r = derive_reliability(&sig);
        assert_eq!(r.reasons.len(), MAX_RELIABILITY_REASONS);
        assert_eq!(
            r.reasons,
            vec![
                ReliabilityReason::RedFlag(RedFlag::FirstLineMismatch).text(),
                FEW_DECISIONS_TEXT,
                AREA_FALLBACK_TEXT,
            ]
        );
    }

    #[test]
    fn medium_fallback_bullets() {
        let top = candidate(2, 2, Level::Medium);
        let r = derive_reliability(&signals(Some(&top), Level::Medium, &[]));
        assert_eq!(r.level, Level::Medium);
        assert_eq!(
            r.reasons,
            vec!["Nur 2 ähnliche Entscheidungen vorhanden.", MEDIUM_AMBIGUITY_TEXT]
        );
    }

    #[test]
    fn notices_follow_area_stats() {
        let sparse = AreaStats {
            total_rows: 40,
            with_comparator_rows: 10,
            orphan_missing_comparator_rows: 5,
            special_rows: 30,
        };
        assert_eq!(area_notices(Some(&sparse), false), vec![Notice::SparseArea]);

        let special = AreaStats {
            total_rows: 100,
            with_comparator_rows: 90,
            orphan_missing_comparator_rows: 2,
            special_rows: 35,
        };
        assert_eq!(
            area_notices(Some(&special), true),
            vec![Notice::SpecialProcedureHeavy, Notice::AreaFallback]
        );

        let healthy = AreaStats {
            total_rows: 100,
            with_comparator_rows: 95,
            orphan_missing_comparator_rows: 0,
            special_rows: 5,
        };
        assert!(area_notices(Some(&healthy), false).is_empty());
        assert_eq!(area_notices(None, true), vec![Notice::AreaFallback]);
    }

    #[test]
    fn notice_serializes_as_sentence() {
        let v = serde_json::to_value(Notice::AreaFallback).unwrap();
        assert!(v.as_str().unwrap().contains("andere Therapiegebiete"));
    }
}
