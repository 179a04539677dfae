// src/config.rs
//! Engine configuration: one struct, built once at startup and threaded through
//! the engine.
//!
//! Precedence: built-in defaults < optional TOML file (`SHORTLIST_CONFIG_PATH`)
//! < environment overrides (`SHORTLIST_*`). Overrides are read through a lookup
//! closure so tests can feed a map instead of touching the process env.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

// --- env names & defaults ---
pub const ENV_CONFIG_PATH: &str = "SHORTLIST_CONFIG_PATH";
pub const ENV_CORPUS_PATH: &str = "SHORTLIST_CORPUS_PATH";
pub const ENV_STATS_PATH: &str = "SHORTLIST_STATS_PATH";
pub const ENV_SCORING_MODE: &str = "SHORTLIST_SCORING_MODE";
pub const ENV_MIN_AREA_RECORDS: &str = "SHORTLIST_MIN_AREA_RECORDS";
pub const ENV_OTHER_AREA_PENALTY: &str = "SHORTLIST_OTHER_AREA_PENALTY";
pub const ENV_RETRIEVE_LIMIT: &str = "SHORTLIST_RETRIEVE_LIMIT";
pub const ENV_W_AWG: &str = "SHORTLIST_W_AWG";
pub const ENV_W_POP: &str = "SHORTLIST_W_POP";
pub const ENV_W_ZVT: &str = "SHORTLIST_W_ZVT";
pub const ENV_BM25_K1: &str = "SHORTLIST_BM25_K1";
pub const ENV_BM25_B: &str = "SHORTLIST_BM25_B";
pub const ENV_SPLIT_TOP_K: &str = "SHORTLIST_SPLIT_TOP_K";
pub const ENV_MAX_ITEMS_PER_RECORD: &str = "SHORTLIST_MAX_ITEMS_PER_RECORD";
pub const ENV_MAX_CANDIDATE_KEYS: &str = "SHORTLIST_MAX_CANDIDATE_KEYS";
pub const ENV_NOTICES: &str = "SHORTLIST_NOTICES";

pub const DEFAULT_CORPUS_PATH: &str = "data/patient_groups_v2.json";
pub const DEFAULT_STATS_PATH: &str = "data/patient_groups_stats.json";

/// Lexical scoring function used for retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ScoringMode {
    Overlap,
    Tfidf,
    #[default]
    Bm25,
}

impl ScoringMode {
    /// Lenient parse: anything unrecognized becomes `Bm25`.
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| {
            warn!(target: "config", value = raw, "unknown scoring mode, using bm25");
            ScoringMode::Bm25
        })
    }
}

impl FromStr for ScoringMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overlap" => Ok(ScoringMode::Overlap),
            "tfidf" => Ok(ScoringMode::Tfidf),
            "bm25" => Ok(ScoringMode::Bm25),
            other => anyhow::bail!("unsupported scoring mode: {other}"),
        }
    }
}

impl From<String> for ScoringMode {
    fn from(raw: String) -> Self {
        ScoringMode::parse_lenient(&raw)
    }
}

/// Per-field weights: application area is the primary signal, the comparator
/// field only a boost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub application: f32,
    pub population: f32,
    pub comparator: f32,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            application: 1.0,
            population: 0.6,
            comparator: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub corpus_path: PathBuf,
    pub stats_path: PathBuf,
    pub scoring_mode: ScoringMode,
    /// Areas with fewer records fall back to the blended corpus / global stats.
    pub min_area_records: usize,
    /// Multiplier for records outside the requested area in fallback mode.
    pub other_area_penalty: f32,
    pub retrieve_limit: usize,
    pub field_weights: FieldWeights,
    pub bm25: Bm25Params,
    /// Only the strongest `split_top_k` retrieved records are split.
    pub split_top_k: usize,
    /// Explosion guard: more fragments than this keeps the text whole.
    pub max_items_per_record: usize,
    /// Distinct candidate keys created per request.
    pub max_candidate_keys: usize,
    pub notices_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            corpus_path: PathBuf::from(DEFAULT_CORPUS_PATH),
            stats_path: PathBuf::from(DEFAULT_STATS_PATH),
            scoring_mode: ScoringMode::Bm25,
            min_area_records: 10,
            other_area_penalty: 0.7,
            retrieve_limit: 50,
            field_weights: FieldWeights::default(),
            bm25: Bm25Params::default(),
            split_top_k: 20,
            max_items_per_record: 12,
            max_candidate_keys: 60,
            notices_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Defaults, then `SHORTLIST_CONFIG_PATH` (if set), then env overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        let base = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => Self::from_toml_file(Path::new(&p))?,
            Err(_) => Self::default(),
        };
        Ok(base.apply_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading shortlist config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing shortlist config at {}", path.display()))
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let cfg: EngineConfig = toml::from_str(toml_str)?;
        Ok(cfg.sanitized())
    }

    /// Apply `SHORTLIST_*` overrides from `lookup`. Unparseable values keep the
    /// current setting.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(p) = lookup(ENV_CORPUS_PATH) {
            self.corpus_path = PathBuf::from(p);
        }
        if let Some(p) = lookup(ENV_STATS_PATH) {
            self.stats_path = PathBuf::from(p);
        }
        if let Some(m) = lookup(ENV_SCORING_MODE) {
            self.scoring_mode = ScoringMode::parse_lenient(&m);
        }
        override_parsed(&lookup, ENV_MIN_AREA_RECORDS, &mut self.min_area_records);
        override_parsed(&lookup, ENV_OTHER_AREA_PENALTY, &mut self.other_area_penalty);
        override_parsed(&lookup, ENV_RETRIEVE_LIMIT, &mut self.retrieve_limit);
        override_parsed(&lookup, ENV_W_AWG, &mut self.field_weights.application);
        override_parsed(&lookup, ENV_W_POP, &mut self.field_weights.population);
        override_parsed(&lookup, ENV_W_ZVT, &mut self.field_weights.comparator);
        override_parsed(&lookup, ENV_BM25_K1, &mut self.bm25.k1);
        override_parsed(&lookup, ENV_BM25_B, &mut self.bm25.b);
        override_parsed(&lookup, ENV_SPLIT_TOP_K, &mut self.split_top_k);
        override_parsed(&lookup, ENV_MAX_ITEMS_PER_RECORD, &mut self.max_items_per_record);
        override_parsed(&lookup, ENV_MAX_CANDIDATE_KEYS, &mut self.max_candidate_keys);
        if let Some(v) = lookup(ENV_NOTICES) {
            self.notices_enabled = v.trim() == "1";
        }
        self.sanitized()
    }

    /// Replace non-finite or negative tunables with their defaults.
    fn sanitized(mut self) -> Self {
        let d = Self::default();
        sanitize_non_negative(&mut self.other_area_penalty, d.other_area_penalty);
        sanitize_non_negative(&mut self.field_weights.application, d.field_weights.application);
        sanitize_non_negative(&mut self.field_weights.population, d.field_weights.population);
        sanitize_non_negative(&mut self.field_weights.comparator, d.field_weights.comparator);
        sanitize_non_negative(&mut self.bm25.k1, d.bm25.k1);
        if !(0.0..=1.0).contains(&self.bm25.b) {
            self.bm25.b = d.bm25.b;
        }
        self
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => warn!(target: "config", key, value = %raw, "ignoring unparseable override"),
    }
}

fn sanitize_non_negative(v: &mut f32, fallback: f32) {
    if !v.is_finite() || *v < 0.0 {
        *v = fallback;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = EngineConfig::default();
        assert_eq!(c.scoring_mode, ScoringMode::Bm25);
        assert_eq!(c.min_area_records, 10);
        assert!((c.other_area_penalty - 0.7).abs() < 1e-6);
        assert_eq!(c.retrieve_limit, 50);
        assert!((c.field_weights.population - 0.6).abs() < 1e-6);
        assert!((c.bm25.k1 - 1.2).abs() < 1e-6);
        assert_eq!(c.split_top_k, 20);
        assert_eq!(c.max_items_per_record, 12);
        assert_eq!(c.max_candidate_keys, 60);
        assert!(c.notices_enabled);
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let c = EngineConfig::default().apply_overrides(lookup_from(&[
            (ENV_SCORING_MODE, "TFIDF"),
            (ENV_RETRIEVE_LIMIT, "25"),
            (ENV_BM25_K1, "not-a-number"),
            (ENV_OTHER_AREA_PENALTY, "-3"),
            (ENV_NOTICES, "0"),
        ]));
        assert_eq!(c.scoring_mode, ScoringMode::Tfidf);
        assert_eq!(c.retrieve_limit, 25);
        assert!((c.bm25.k1 - 1.2).abs() < 1e-6);
        assert!((c.other_area_penalty - 0.7).abs() < 1e-6);
        assert!(!c.notices_enabled);
    }

    #[test]
    fn unknown_scoring_mode_falls_back_to_bm25() {
        let c = EngineConfig::default().apply_overrides(lookup_from(&[(ENV_SCORING_MODE, "dense")]));
        assert_eq!(c.scoring_mode, ScoringMode::Bm25);
        assert!("dense".parse::<ScoringMode>().is_err());
    }

    #[test]
    fn toml_partial_file_keeps_defaults() {
        let c = EngineConfig::from_toml_str(
            r#"
scoring_mode = "overlap"
max_candidate_keys = 3

[field_weights]
comparator = 0.0
"#,
        )
        .unwrap();
        assert_eq!(c.scoring_mode, ScoringMode::Overlap);
        assert_eq!(c.max_candidate_keys, 3);
        assert_eq!(c.field_weights.comparator, 0.0);
        assert!((c.field_weights.application - 1.0).abs() < 1e-6);
        assert_eq!(c.retrieve_limit, 50);
    }

    #[test]
    fn toml_unknown_mode_is_coerced() {
        let c = EngineConfig::from_toml_str(r#"scoring_mode = "neural""#).unwrap();
        assert_eq!(c.scoring_mode, ScoringMode::Bm25);
    }
}
