// src/corpus.rs
//! Corpus index: immutable decision records with pre-tokenized fields, the
//! per-area statistics file, and memoized IDF / BM25 statistics.
//!
//! The index is built once at startup and shared read-only. Statistics are
//! computed on first use per key (global or area) and never invalidated; a
//! fresh index is the only way to recompute them.

use anyhow::Context;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

use crate::text::tokenize;

/// One patient-group row of a historical decision, as produced by the
/// spreadsheet conversion tool.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecisionRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub patient_group_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub decision_id: String,
    #[serde(default)]
    pub product_name: String,
    /// ISO date (`YYYY-MM-DD`), may be empty or malformed.
    #[serde(default)]
    pub decision_date: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub therapy_area: String,
    #[serde(default, rename = "awg_text")]
    pub application_text: String,
    #[serde(default, rename = "patient_group_text")]
    pub population_text: String,
    #[serde(default, rename = "zvt_text")]
    pub comparator_text: String,
    #[serde(default)]
    pub procedure_type: String,
    #[serde(default = "default_true", rename = "has_zvt", deserialize_with = "flag")]
    pub has_comparator: bool,
    #[serde(default, deserialize_with = "flag")]
    pub is_orphan: bool,
    #[serde(default, rename = "is_besond", deserialize_with = "flag")]
    pub is_special_procedure: bool,
    #[serde(default, rename = "is_ausn", deserialize_with = "flag")]
    pub is_exception: bool,
    #[serde(default, deserialize_with = "flag")]
    pub is_atmp: bool,
}

impl DecisionRecord {
    /// Orphan, exception, ATMP or other special procedure.
    pub fn is_special(&self) -> bool {
        self.is_orphan || self.is_special_procedure || self.is_exception || self.is_atmp
    }
}

fn default_true() -> bool {
    true
}

fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
        Null(()),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Bool(b) => b,
        Raw::Int(i) => i != 0,
        Raw::Float(f) => f != 0.0,
        Raw::Text(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "ja" | "yes"
        ),
        Raw::Null(()) => false,
    })
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Text(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
    })
}

/// Token lists of the three text fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldTokens {
    pub application: Vec<String>,
    pub population: Vec<String>,
    pub comparator: Vec<String>,
}

/// A record together with its load-time tokenization. Built in one step so the
/// derived tokens can never drift from the text they came from.
#[derive(Debug, Clone)]
pub struct IndexedRecord {
    pub record: DecisionRecord,
    pub tokens: FieldTokens,
    /// Union of all field tokens, for document-frequency counting.
    pub terms: HashSet<String>,
}

impl IndexedRecord {
    pub fn build(record: DecisionRecord) -> Self {
        let tokens = FieldTokens {
            application: tokenize(&record.application_text),
            population: tokenize(&record.population_text),
            comparator: tokenize(&record.comparator_text),
        };
        let terms = tokens
            .application
            .iter()
            .chain(&tokens.population)
            .chain(&tokens.comparator)
            .cloned()
            .collect();
        Self {
            record,
            tokens,
            terms,
        }
    }
}

/// Per-area counts from the statistics side file; feeds advisory notices only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AreaStats {
    pub total_rows: u32,
    #[serde(rename = "has_zvt_rows")]
    pub with_comparator_rows: u32,
    #[serde(rename = "orphan_missing_zvt_rows")]
    pub orphan_missing_comparator_rows: u32,
    pub special_rows: u32,
}

/// Smoothed TF-IDF weights: `ln((N+1)/(df+1))`.
pub type IdfTable = HashMap<String, f32>;

/// BM25 statistics: non-negative idf plus per-field average lengths (>= 1.0).
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Stats {
    pub idf: HashMap<String, f32>,
    pub avg_len_application: f32,
    pub avg_len_population: f32,
    pub avg_len_comparator: f32,
}

/// Immutable corpus plus lazily computed statistics.
#[derive(Debug)]
pub struct CorpusIndex {
    records: Vec<IndexedRecord>,
    by_area: HashMap<String, Vec<usize>>,
    area_stats: HashMap<String, AreaStats>,
    min_area_records: usize,
    global_idf: OnceCell<Arc<IdfTable>>,
    global_bm25: OnceCell<Arc<Bm25Stats>>,
    area_idf: RwLock<HashMap<String, Arc<IdfTable>>>,
    area_bm25: RwLock<HashMap<String, Arc<Bm25Stats>>>,
}

impl CorpusIndex {
    /// Load the record file (required) and the stats file (optional).
    pub fn load(
        corpus_path: &Path,
        stats_path: &Path,
        min_area_records: usize,
    ) -> anyhow::Result<Self> {
        let content = fs::read_to_string(corpus_path).with_context(|| {
            format!("decision corpus not readable at {}", corpus_path.display())
        })?;
        let records: Vec<DecisionRecord> = serde_json::from_str(&content)
            .with_context(|| format!("decision corpus at {} is malformed", corpus_path.display()))?;
        let index = Self::from_records(records, load_area_stats(stats_path), min_area_records);
        info!(
            target: "corpus",
            path = %corpus_path.display(),
            records = index.len(),
            areas = index.by_area.len(),
            "loaded decision corpus"
        );
        Ok(index)
    }

    pub fn from_records(
        records: Vec<DecisionRecord>,
        area_stats: HashMap<String, AreaStats>,
        min_area_records: usize,
    ) -> Self {
        let records: Vec<IndexedRecord> = records.into_iter().map(IndexedRecord::build).collect();
        let mut by_area: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, r) in records.iter().enumerate() {
            by_area
                .entry(r.record.therapy_area.clone())
                .or_default()
                .push(idx);
        }
        Self {
            records,
            by_area,
            area_stats,
            min_area_records,
            global_idf: OnceCell::new(),
            global_bm25: OnceCell::new(),
            area_idf: RwLock::new(HashMap::new()),
            area_bm25: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[IndexedRecord] {
        &self.records
    }

    pub fn records_for_area<'a>(&'a self, area: &str) -> impl Iterator<Item = &'a IndexedRecord> + 'a {
        self.by_area
            .get(area)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(move |&i| &self.records[i])
    }

    pub fn area_record_count(&self, area: &str) -> usize {
        self.by_area.get(area).map_or(0, Vec::len)
    }

    /// True if the area has enough records to stand on its own.
    pub fn area_is_dense(&self, area: &str) -> bool {
        self.area_record_count(area) >= self.min_area_records
    }

    pub fn area_stats(&self, area: &str) -> Option<&AreaStats> {
        self.area_stats.get(area)
    }

    pub fn idf(&self) -> Arc<IdfTable> {
        self.global_idf
            .get_or_init(|| Arc::new(build_idf(self.records.iter())))
            .clone()
    }

    /// Area IDF, or the global table when the area is too sparse.
    pub fn idf_for_area(&self, area: &str) -> Arc<IdfTable> {
        if !self.area_is_dense(area) {
            return self.idf();
        }
        memoized(&self.area_idf, area, || build_idf(self.records_for_area(area)))
    }

    pub fn bm25_stats(&self) -> Arc<Bm25Stats> {
        self.global_bm25
            .get_or_init(|| Arc::new(build_bm25_stats(self.records.iter())))
            .clone()
    }

    /// Area BM25 statistics, or the global ones when the area is too sparse.
    pub fn bm25_stats_for_area(&self, area: &str) -> Arc<Bm25Stats> {
        if !self.area_is_dense(area) {
            return self.bm25_stats();
        }
        memoized(&self.area_bm25, area, || {
            build_bm25_stats(self.records_for_area(area))
        })
    }
}

/// Read-mostly memo: fast path under the read lock, compute + insert under the
/// write lock with a second check so concurrent cold starts compute once.
fn memoized<T, F>(cache: &RwLock<HashMap<String, Arc<T>>>, key: &str, build: F) -> Arc<T>
where
    F: FnOnce() -> T,
{
    if let Some(v) = cache
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
    {
        return v.clone();
    }
    let mut guard = cache.write().unwrap_or_else(PoisonError::into_inner);
    guard
        .entry(key.to_string())
        .or_insert_with(|| Arc::new(build()))
        .clone()
}

pub fn build_idf<'a>(records: impl Iterator<Item = &'a IndexedRecord>) -> IdfTable {
    let (n, df) = document_frequencies(records, |_| {});
    if n == 0 {
        return IdfTable::new();
    }
    let n = n as f32;
    df.into_iter()
        .map(|(tok, count)| (tok, ((n + 1.0) / (count as f32 + 1.0)).ln()))
        .collect()
}

pub fn build_bm25_stats<'a>(records: impl Iterator<Item = &'a IndexedRecord>) -> Bm25Stats {
    let mut sums = [0usize; 3];
    let (n, df) = document_frequencies(records, |r| {
        sums[0] += r.tokens.application.len();
        sums[1] += r.tokens.population.len();
        sums[2] += r.tokens.comparator.len();
    });
    if n == 0 {
        return Bm25Stats {
            idf: HashMap::new(),
            avg_len_application: 1.0,
            avg_len_population: 1.0,
            avg_len_comparator: 1.0,
        };
    }
    let nf = n as f32;
    let idf = df
        .into_iter()
        .map(|(tok, d)| {
            let d = d as f32;
            (tok, (1.0 + (nf - d + 0.5) / (d + 0.5)).ln())
        })
        .collect();
    Bm25Stats {
        idf,
        avg_len_application: (sums[0] as f32 / nf).max(1.0),
        avg_len_population: (sums[1] as f32 / nf).max(1.0),
        avg_len_comparator: (sums[2] as f32 / nf).max(1.0),
    }
}

/// Record count and per-token document frequency over the union of fields.
fn document_frequencies<'a, F>(
    records: impl Iterator<Item = &'a IndexedRecord>,
    mut visit: F,
) -> (usize, HashMap<String, usize>)
where
    F: FnMut(&IndexedRecord),
{
    let mut n = 0usize;
    let mut df: HashMap<String, usize> = HashMap::new();
    for r in records {
        n += 1;
        visit(r);
        for tok in &r.terms {
            *df.entry(tok.clone()).or_insert(0) += 1;
        }
    }
    (n, df)
}

/// Load per-area stats. Missing or corrupt files yield an empty map: only the
/// advisory notices depend on it.
pub fn load_area_stats(path: &Path) -> HashMap<String, AreaStats> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(target: "corpus", path = %path.display(), error = %e, "area stats unavailable");
            return HashMap::new();
        }
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!(target: "corpus", path = %path.display(), error = %e, "area stats malformed, ignoring");
        HashMap::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(decision: &str, area: &str, awg: &str) -> DecisionRecord {
        serde_json::from_value(json!({
            "decision_id": decision,
            "therapy_area": area,
            "awg_text": awg,
            "zvt_text": "Docetaxel"
        }))
        .unwrap()
    }

    #[test]
    fn record_accepts_mixed_flag_encodings() {
        let r: DecisionRecord = serde_json::from_value(json!({
            "patient_group_id": 17,
            "decision_id": "d-1",
            "has_zvt": false,
            "is_orphan": 1,
            "is_besond": "ja",
            "is_ausn": 0,
            "is_atmp": null,
            "ues_be": "ignored"
        }))
        .unwrap();
        assert_eq!(r.patient_group_id, "17");
        assert!(!r.has_comparator);
        assert!(r.is_orphan);
        assert!(r.is_special_procedure);
        assert!(!r.is_exception);
        assert!(!r.is_atmp);
        assert!(r.is_special());
    }

    #[test]
    fn tokens_are_precomputed_once() {
        let r = IndexedRecord::build(rec("d-1", "Onkologie", "Metastasiertes Karzinom der Lunge"));
        assert_eq!(r.tokens.application, vec!["metastasiertes", "karzinom", "lunge"]);
        assert_eq!(r.tokens.comparator, vec!["docetaxel"]);
        assert!(r.terms.contains("docetaxel"));
        assert_eq!(r.terms.len(), 4);
    }

    #[test]
    fn sparse_area_uses_global_stats() {
        let mut records = vec![rec("x", "Haut", "psoriasis plaque")];
        for i in 0..10 {
            records.push(rec(&format!("o{i}"), "Onkologie", "karzinom lunge"));
        }
        let idx = CorpusIndex::from_records(records, HashMap::new(), 10);

        assert!(Arc::ptr_eq(&idx.bm25_stats_for_area("Haut"), &idx.bm25_stats()));
        assert!(Arc::ptr_eq(&idx.idf_for_area("Haut"), &idx.idf()));

        let onko = idx.bm25_stats_for_area("Onkologie");
        assert!(!Arc::ptr_eq(&onko, &idx.bm25_stats()));
        // memoized: second call returns the same allocation
        assert!(Arc::ptr_eq(&onko, &idx.bm25_stats_for_area("Onkologie")));
        // "karzinom" is in every oncology record -> lowest possible BM25 idf
        let k = onko.idf["karzinom"];
        assert!((k - (1.0f32 + 0.5 / 10.5).ln()).abs() < 1e-6);
    }

    #[test]
    fn idf_is_smoothed_and_non_negative() {
        let records = vec![
            rec("a", "Onkologie", "karzinom lunge"),
            rec("b", "Onkologie", "karzinom brust"),
        ];
        let idf = build_idf(records.into_iter().map(IndexedRecord::build).collect::<Vec<_>>().iter());
        assert!((idf["karzinom"] - (3.0f32 / 3.0).ln()).abs() < 1e-6);
        assert!((idf["lunge"] - (3.0f32 / 2.0).ln()).abs() < 1e-6);
        assert!(idf.values().all(|v| *v >= 0.0));
    }

    #[test]
    fn empty_corpus_stats_are_safe() {
        let s = build_bm25_stats(std::iter::empty());
        assert!(s.idf.is_empty());
        assert_eq!(s.avg_len_application, 1.0);
    }

    #[test]
    fn missing_stats_file_is_recoverable() {
        let stats = load_area_stats(Path::new("/definitely/not/here.json"));
        assert!(stats.is_empty());
    }

    #[test]
    fn missing_corpus_is_an_error() {
        let err = CorpusIndex::load(
            Path::new("/definitely/not/here.json"),
            Path::new("/nope.json"),
            10,
        )
        .unwrap_err();
        assert!(err.to_string().contains("decision corpus"));
    }
}
