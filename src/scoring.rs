// src/scoring.rs
//! Lexical scorers: overlap, TF-IDF and BM25.
//!
//! Every variant carries the statistics it needs, so a scorer for a mode
//! can only exist together with its corpus statistics.
//!
//! TF-IDF and BM25 are a weighted sum over three fields:
//! application text (primary), population text, comparator text (boost only).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{Bm25Params, EngineConfig, FieldWeights, ScoringMode};
use crate::corpus::{Bm25Stats, CorpusIndex, IdfTable, IndexedRecord};

/// Which slice of the corpus the statistics should describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsScope<'a> {
    Global,
    Area(&'a str),
}

#[derive(Debug, Clone)]
pub enum Scorer {
    Overlap,
    TfIdf {
        idf: Arc<IdfTable>,
        weights: FieldWeights,
    },
    Bm25 {
        stats: Arc<Bm25Stats>,
        weights: FieldWeights,
        params: Bm25Params,
    },
}

impl Scorer {
    /// Build the configured scorer over global or per-area statistics.
    pub fn for_scope(config: &EngineConfig, corpus: &CorpusIndex, scope: StatsScope<'_>) -> Self {
        match config.scoring_mode {
            ScoringMode::Overlap => Scorer::Overlap,
            ScoringMode::Tfidf => Scorer::TfIdf {
                idf: match scope {
                    StatsScope::Global => corpus.idf(),
                    StatsScope::Area(a) => corpus.idf_for_area(a),
                },
                weights: config.field_weights,
            },
            ScoringMode::Bm25 => Scorer::Bm25 {
                stats: match scope {
                    StatsScope::Global => corpus.bm25_stats(),
                    StatsScope::Area(a) => corpus.bm25_stats_for_area(a),
                },
                weights: config.field_weights,
                params: config.bm25,
            },
        }
    }

    pub fn mode(&self) -> ScoringMode {
        match self {
            Scorer::Overlap => ScoringMode::Overlap,
            Scorer::TfIdf { .. } => ScoringMode::Tfidf,
            Scorer::Bm25 { .. } => ScoringMode::Bm25,
        }
    }

    /// Non-negative relevance of `record` for the query token set.
    pub fn score(&self, query: &HashSet<String>, record: &IndexedRecord) -> f32 {
        if query.is_empty() {
            return 0.0;
        }
        let t = &record.tokens;
        match self {
            Scorer::Overlap => overlap(query, &t.application, &t.population),
            Scorer::TfIdf { idf, weights } => {
                tfidf(query, &t.application, idf) * weights.application
                    + tfidf(query, &t.population, idf) * weights.population
                    + tfidf(query, &t.comparator, idf) * weights.comparator
            }
            Scorer::Bm25 {
                stats,
                weights,
                params,
            } => {
                let f = |doc: &[String], avg: f32| bm25(query, doc, &stats.idf, avg, params);
                f(&t.application, stats.avg_len_application) * weights.application
                    + f(&t.population, stats.avg_len_population) * weights.population
                    + f(&t.comparator, stats.avg_len_comparator) * weights.comparator
            }
        }
    }
}

/// Hits of application + population tokens in the query, over sqrt(doc length).
fn overlap(query: &HashSet<String>, application: &[String], population: &[String]) -> f32 {
    let dl = application.len() + population.len();
    if dl == 0 {
        return 0.0;
    }
    let hits = application
        .iter()
        .chain(population)
        .filter(|tok| query.contains(*tok))
        .count();
    hits as f32 / (dl as f32).sqrt()
}

fn term_counts(doc: &[String]) -> HashMap<&str, usize> {
    let mut counts = HashMap::with_capacity(doc.len());
    for tok in doc {
        *counts.entry(tok.as_str()).or_insert(0) += 1;
    }
    counts
}

fn tfidf(query: &HashSet<String>, doc: &[String], idf: &IdfTable) -> f32 {
    if doc.is_empty() {
        return 0.0;
    }
    let counts = term_counts(doc);
    let len = doc.len() as f32;
    query
        .iter()
        .filter_map(|q| {
            let tf = *counts.get(q.as_str())? as f32 / len;
            Some(tf * idf.get(q).copied().unwrap_or(0.0))
        })
        .sum()
}

fn bm25(
    query: &HashSet<String>,
    doc: &[String],
    idf: &HashMap<String, f32>,
    avg_len: f32,
    p: &Bm25Params,
) -> f32 {
    if doc.is_empty() {
        return 0.0;
    }
    let counts = term_counts(doc);
    let avg_len = if avg_len > 0.0 { avg_len } else { 1.0 };
    let norm = p.k1 * (1.0 - p.b + p.b * (doc.len() as f32 / avg_len));
    query
        .iter()
        .filter_map(|q| {
            let tf = *counts.get(q.as_str())? as f32;
            let w = idf.get(q).copied().unwrap_or(0.0);
            Some(w * (tf * (p.k1 + 1.0)) / (tf + norm))
        })
        .sum()
}
