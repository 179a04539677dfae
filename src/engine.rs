// src/engine.rs
//! Retrieval & aggregation engine.
//!
//! Pipeline per request:
//! 1. build the query text and token set
//! 2. select the corpus (area only, or blended with a cross-area penalty)
//! 3. score, keep positive hits, take the top `retrieve_limit`
//! 4. weight each hit (context nudge, recency, decision quality)
//! 5. split the strongest hits into atomic comparators and aggregate per key,
//!    counting each decision at most once per candidate
//! 6. apply domain penalties, rank, label, flag and judge reliability
//!
//! The corpus is shared read-only; a request never mutates engine state.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::comparator::{canonical_id, is_combination_text, split_items};
use crate::config::EngineConfig;
use crate::corpus::{CorpusIndex, DecisionRecord, IndexedRecord};
use crate::domain::{
    round4, CandidateResult, ComparatorType, Level, ReferenceItem, ResultStatus, Setting,
    ShortlistRequest, TherapyLine, TherapyRole,
};
use crate::labels::{
    ambiguity_label, area_notices, confidence_label, derive_reliability, Notice,
    ReliabilitySignals,
};
use crate::rules::{apply_penalties, detect_red_flags, RedFlag, RuleContext};
use crate::scoring::{Scorer, StatsScope};
use crate::telemetry::{anon_hash, dev_logging_enabled};
use crate::text::token_set;

pub const MAX_CANDIDATES: usize = 5;
pub const MAX_REFERENCES: usize = 5;
pub const SNIPPET_CHARS: usize = 260;
/// Indications with fewer distinct tokens are too generic to rank reliably.
pub const MIN_INDICATION_TOKENS: usize = 3;
const COVERAGE_BONUS: f32 = 0.15;

/// Full result of one shortlist computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShortlistOutcome {
    pub status: ResultStatus,
    pub candidates: Vec<CandidateResult>,
    pub ambiguity: Level,
    pub notices: Vec<Notice>,
    pub red_flags: Vec<RedFlag>,
    pub reliability: Level,
    pub reliability_reasons: Vec<String>,
    /// The requested area was too sparse and other areas were blended in.
    pub area_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct ShortlistEngine {
    config: EngineConfig,
    corpus: Arc<CorpusIndex>,
}

/// A retrieved record with its raw score and cross-area penalty.
struct Hit<'a> {
    record: &'a IndexedRecord,
    base_score: f32,
    area_penalty: f32,
}

impl Hit<'_> {
    fn retrieval_score(&self) -> f32 {
        self.base_score * self.area_penalty
    }
}

/// Evidence collected for one candidate key.
#[derive(Debug, Default)]
struct CandidateAcc {
    text: String,
    best_display: f32,
    refs: Vec<ReferenceItem>,
    best_by_decision: HashMap<String, f32>,
    clean: HashMap<String, f32>,
    special: HashMap<String, f32>,
    score: f32,
}

impl CandidateAcc {
    fn new() -> Self {
        Self {
            best_display: -1.0,
            ..Self::default()
        }
    }
}

/// Keep the strictly higher value per decision.
fn keep_best(map: &mut HashMap<String, f32>, decision_id: &str, weighted: f32) {
    match map.get_mut(decision_id) {
        Some(prev) if weighted > *prev => *prev = weighted,
        Some(_) => {}
        None => {
            map.insert(decision_id.to_string(), weighted);
        }
    }
}

impl ShortlistEngine {
    pub fn new(config: EngineConfig, corpus: Arc<CorpusIndex>) -> Self {
        Self { config, corpus }
    }

    /// Load the corpus named in `config`. Fails if the corpus file is missing.
    pub fn load(config: EngineConfig) -> anyhow::Result<Self> {
        let corpus =
            CorpusIndex::load(&config.corpus_path, &config.stats_path, config.min_area_records)?;
        Ok(Self::new(config, Arc::new(corpus)))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn corpus(&self) -> &CorpusIndex {
        &self.corpus
    }

    pub fn shortlist(&self, req: &ShortlistRequest) -> ShortlistOutcome {
        self.shortlist_on(req, Utc::now().date_naive())
    }

    /// Same as [`shortlist`](Self::shortlist) with a fixed "today" for recency.
    pub fn shortlist_on(&self, req: &ShortlistRequest, today: NaiveDate) -> ShortlistOutcome {
        let cfg = &self.config;
        let query = build_query(req);
        let query_tokens = token_set(&query);
        let area = req.therapy_area.as_str();

        // corpus selection: strict area, or soft fallback over the full corpus
        let use_area = self.corpus.area_is_dense(area);
        let (pool, scorer): (Vec<(&IndexedRecord, f32)>, Scorer) = if use_area {
            (
                self.corpus.records_for_area(area).map(|r| (r, 1.0)).collect(),
                Scorer::for_scope(cfg, &self.corpus, StatsScope::Area(area)),
            )
        } else {
            (
                self.corpus
                    .records()
                    .iter()
                    .map(|r| {
                        let penalty = if r.record.therapy_area == area {
                            1.0
                        } else {
                            cfg.other_area_penalty
                        };
                        (r, penalty)
                    })
                    .collect(),
                Scorer::for_scope(cfg, &self.corpus, StatsScope::Global),
            )
        };

        let mut hits: Vec<Hit<'_>> = pool
            .into_iter()
            .filter_map(|(record, area_penalty)| {
                let hit = Hit {
                    record,
                    base_score: scorer.score(&query_tokens, record),
                    area_penalty,
                };
                (hit.retrieval_score() > 0.0).then_some(hit)
            })
            .collect();
        hits.sort_by(|a, b| b.retrieval_score().total_cmp(&a.retrieval_score()));
        hits.truncate(cfg.retrieve_limit);

        let mut accs = self.aggregate(req, &hits, today);

        let rule_ctx = RuleContext::new(&query, req.line, req.comparator_type);
        for acc in &mut accs {
            acc.score = apply_penalties(aggregate_score(&acc.best_by_decision), &rule_ctx, &acc.text);
        }
        accs.sort_by(|a, b| b.score.total_cmp(&a.score));
        accs.truncate(MAX_CANDIDATES);

        let top_score = accs.first().map_or(0.0, |a| a.score);
        let candidates: Vec<CandidateResult> = accs
            .into_iter()
            .enumerate()
            .map(|(i, acc)| finalize_candidate(i + 1, acc, top_score))
            .collect();

        let scores: Vec<f32> = candidates.iter().map(|c| c.support_score).collect();
        let ambiguity = ambiguity_label(&scores);

        let status = if candidates.is_empty() {
            ResultStatus::NoResult
        } else if token_set(&req.indication_text).len() < MIN_INDICATION_TOKENS {
            ResultStatus::NeedsClarification
        } else {
            ResultStatus::Ok
        };

        let notices = if cfg.notices_enabled {
            area_notices(self.corpus.area_stats(area), !use_area)
        } else {
            Vec::new()
        };

        let red_flags = candidates
            .first()
            .map(|top| detect_red_flags(&rule_ctx, &top.candidate_text))
            .unwrap_or_default();

        let reliability = derive_reliability(&ReliabilitySignals {
            status,
            top: candidates.first(),
            ambiguity,
            red_flags: &red_flags,
            area_fallback: !use_area,
        });

        if dev_logging_enabled() {
            debug!(
                target: "shortlist",
                q = %anon_hash(&query),
                area,
                indication_len = req.indication_text.chars().count(),
                population_len = req.population_text.as_deref().map_or(0, |p| p.chars().count()),
                mode = ?scorer.mode(),
                area_fallback = !use_area,
                retrieved = hits.len(),
                candidates = candidates.len(),
                status = ?status,
                reliability = %reliability.level,
                red_flags = ?red_flags,
                "shortlist computed"
            );
        }

        ShortlistOutcome {
            status,
            candidates,
            ambiguity,
            notices,
            red_flags,
            reliability: reliability.level,
            reliability_reasons: reliability.reasons,
            area_fallback: !use_area,
        }
    }

    /// Split and aggregate retrieved hits into candidate accumulators, in
    /// first-seen order.
    fn aggregate(&self, req: &ShortlistRequest, hits: &[Hit<'_>], today: NaiveDate) -> Vec<CandidateAcc> {
        let cfg = &self.config;
        let mut accs: Vec<CandidateAcc> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (rank, hit) in hits.iter().enumerate() {
            let rec = &hit.record.record;
            if rec.comparator_text.trim().is_empty() {
                continue;
            }

            let weighted = hit.base_score
                * context_adjustment(req, &rec.comparator_text)
                * recency_weight(&rec.decision_date, today)
                * hit.area_penalty
                * quality_weight(rec);
            if weighted <= 0.0 {
                continue;
            }

            let items = if rank < cfg.split_top_k {
                split_items(&rec.comparator_text, cfg.max_items_per_record)
            } else {
                vec![rec.comparator_text.clone()]
            };

            for item in items {
                let key = canonical_id(&item);
                if key.is_empty() {
                    continue;
                }
                let slot = match index.get(&key) {
                    Some(&slot) => slot,
                    // key budget: new keys are dropped, existing ones keep accumulating
                    None if index.len() >= cfg.max_candidate_keys => continue,
                    None => {
                        accs.push(CandidateAcc::new());
                        index.insert(key, accs.len() - 1);
                        accs.len() - 1
                    }
                };
                let acc = &mut accs[slot];

                if weighted > acc.best_display {
                    acc.text = item;
                    acc.best_display = weighted;
                }
                acc.refs.push(reference_for(rec, weighted));
                keep_best(&mut acc.best_by_decision, &rec.decision_id, weighted);
                let bucket = if rec.is_special() {
                    &mut acc.special
                } else {
                    &mut acc.clean
                };
                keep_best(bucket, &rec.decision_id, weighted);
            }
        }
        accs
    }
}

fn reference_for(rec: &DecisionRecord, weighted: f32) -> ReferenceItem {
    ReferenceItem {
        decision_id: rec.decision_id.clone(),
        product_name: rec.product_name.clone(),
        decision_date: rec.decision_date.clone(),
        url: rec.url.clone(),
        snippet: rec.population_text.chars().take(SNIPPET_CHARS).collect(),
        score: round4(weighted),
    }
}

fn finalize_candidate(rank: usize, mut acc: CandidateAcc, top_score: f32) -> CandidateResult {
    acc.refs.sort_by(|a, b| b.score.total_cmp(&a.score));
    acc.refs.truncate(MAX_REFERENCES);
    let support_cases = acc.best_by_decision.len();
    let support_cases_clean = acc.clean.len();
    let cases_for_conf = if support_cases_clean > 0 {
        support_cases_clean
    } else {
        support_cases
    };
    CandidateResult {
        rank,
        candidate_text: acc.text,
        support_score: round4(acc.score),
        confidence: confidence_label(acc.score, top_score, cases_for_conf),
        support_cases,
        support_cases_clean,
        support_cases_special: acc.special.len(),
        references: acc.refs,
    }
}

/// Query text: indication, population, specified facets, comparator text.
pub fn build_query(req: &ShortlistRequest) -> String {
    let mut parts: Vec<String> = vec![req.indication_text.clone()];
    if let Some(p) = req.population_text.as_deref().filter(|p| !p.trim().is_empty()) {
        parts.push(p.to_string());
    }
    if let Some(line) = req.line.filter(|l| *l != TherapyLine::Unspecified) {
        parts.push(format!("Therapielinie: {}", line.as_str()));
    }
    if let Some(ct) = req.comparator_type.filter(|c| *c != ComparatorType::Unspecified) {
        parts.push(format!("Comparator-Typ: {}", ct.as_str()));
    }
    if let Some(c) = req.comparator_text.as_deref().filter(|c| !c.trim().is_empty()) {
        parts.push(c.to_string());
    }
    parts.join("\n")
}

/// Sum of per-decision best scores times a diminishing breadth bonus.
pub fn aggregate_score(best_by_decision: &HashMap<String, f32>) -> f32 {
    if best_by_decision.is_empty() {
        return 0.0;
    }
    let base: f32 = best_by_decision.values().sum();
    let n = best_by_decision.len() as f32;
    base * (1.0 + COVERAGE_BONUS * (1.0 + n).ln())
}

/// 1.0 under two years, 0.8 up to four, 0.6 beyond; 0.8 when unparseable.
pub fn recency_weight(decision_date: &str, today: NaiveDate) -> f32 {
    let Ok(date) = NaiveDate::parse_from_str(decision_date.trim(), "%Y-%m-%d") else {
        return 0.8;
    };
    let years = (today - date).num_days() as f64 / 365.25;
    if years < 2.0 {
        1.0
    } else if years <= 4.0 {
        0.8
    } else {
        0.6
    }
}

/// Evidence weight by decision type; no established comparator means no evidence.
pub fn quality_weight(rec: &DecisionRecord) -> f32 {
    if !rec.has_comparator {
        0.0
    } else if rec.is_orphan {
        0.6
    } else if rec.is_atmp || rec.is_exception {
        0.7
    } else if rec.is_special_procedure {
        0.4
    } else {
        1.0
    }
}

/// Small nudge from role/setting alignment; unspecified facets cost a little.
fn context_adjustment(req: &ShortlistRequest, comparator_text: &str) -> f32 {
    let lower = comparator_text.to_lowercase();
    let combo = is_combination_text(&lower);
    let mut adj = 1.0f32;

    match req.role {
        TherapyRole::AddOn if combo => adj += 0.1,
        TherapyRole::Monotherapy => adj += if combo { -0.1 } else { 0.05 },
        TherapyRole::Unspecified => adj -= 0.1,
        _ => {}
    }
    match req.setting {
        Setting::Inpatient if lower.contains("infusion") || lower.contains("stationär") => adj += 0.1,
        Setting::Unspecified => adj -= 0.1,
        _ => {}
    }
    adj
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TherapyArea;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn recency_buckets() {
        let today = day("2025-06-01");
        assert_eq!(recency_weight("2024-06-01", today), 1.0);
        assert_eq!(recency_weight("2022-06-01", today), 0.8);
        assert_eq!(recency_weight("2019-01-01", today), 0.6);
        assert_eq!(recency_weight("unbekannt", today), 0.8);
        assert_eq!(recency_weight("", today), 0.8);
    }

    #[test]
    fn aggregate_rewards_breadth_with_diminishing_returns() {
        let one: HashMap<String, f32> = [("d1".to_string(), 2.0)].into();
        let two: HashMap<String, f32> = [("d1".to_string(), 1.0), ("d2".to_string(), 1.0)].into();
        let a = aggregate_score(&one);
        let b = aggregate_score(&two);
        assert!((a - 2.0 * (1.0 + 0.15 * 2f32.ln())).abs() < 1e-6);
        assert!((b - 2.0 * (1.0 + 0.15 * 3f32.ln())).abs() < 1e-6);
        assert!(b > a);
        assert_eq!(aggregate_score(&HashMap::new()), 0.0);
    }

    #[test]
    fn query_skips_unspecified_facets() {
        let req = ShortlistRequest::new(TherapyArea::Oncology, "NSCLC")
            .with_line(TherapyLine::Unspecified)
            .with_comparator_type(ComparatorType::BestSupportiveCare)
            .with_comparator_text("Docetaxel");
        assert_eq!(build_query(&req), "NSCLC\nComparator-Typ: BSC\nDocetaxel");

        let req = ShortlistRequest::new(TherapyArea::Oncology, "NSCLC")
            .with_population("Erwachsene")
            .with_line(TherapyLine::Later);
        assert_eq!(build_query(&req), "NSCLC\nErwachsene\nTherapielinie: später");
    }

    #[test]
    fn context_nudges() {
        let base = ShortlistRequest::new(TherapyArea::Oncology, "x");
        // both facets unspecified
        assert!((context_adjustment(&base, "Docetaxel") - 0.8).abs() < 1e-6);

        let addon = base
            .clone()
            .with_role(TherapyRole::AddOn)
            .with_setting(Setting::Inpatient);
        assert!((context_adjustment(&addon, "Rituximab + Bendamustin als Infusion") - 1.2).abs() < 1e-6);

        let mono = base.with_role(TherapyRole::Monotherapy).with_setting(Setting::Outpatient);
        assert!((context_adjustment(&mono, "Docetaxel") - 1.05).abs() < 1e-6);
        assert!((context_adjustment(&mono, "Paclitaxel + Carboplatin") - 0.9).abs() < 1e-6);
    }

    #[test]
    fn quality_weights_are_graduated() {
        let mut r: DecisionRecord =
            serde_json::from_value(serde_json::json!({"decision_id": "d"})).unwrap();
        assert_eq!(quality_weight(&r), 1.0);
        r.is_special_procedure = true;
        assert_eq!(quality_weight(&r), 0.4);
        r.is_atmp = true;
        assert_eq!(quality_weight(&r), 0.7);
        r.is_orphan = true;
        assert_eq!(quality_weight(&r), 0.6);
        r.has_comparator = false;
        assert_eq!(quality_weight(&r), 0.0);
    }

    #[test]
    fn keep_best_only_replaces_on_strictly_higher() {
        let mut m = HashMap::new();
        keep_best(&mut m, "d", 0.5);
        keep_best(&mut m, "d", 0.4);
        assert_eq!(m["d"], 0.5);
        keep_best(&mut m, "d", 0.7);
        assert_eq!(m["d"], 0.7);
    }
}
