// tests/corpus_load.rs
//
// Loading the engine from files: bundled data, temp fixtures, failure modes.

use std::fs;

use comparator_shortlist::config::EngineConfig;
use comparator_shortlist::domain::{ResultStatus, ShortlistRequest, TherapyArea};
use comparator_shortlist::labels::Notice;
use comparator_shortlist::ShortlistEngine;
use tempfile::tempdir;

#[test]
fn bundled_corpus_answers_an_nsclc_query() {
    let engine = ShortlistEngine::load(EngineConfig::default()).expect("bundled corpus loads");
    assert_eq!(engine.corpus().len(), 15);
    assert!(engine.corpus().area_is_dense("Onkologie"));

    let req = ShortlistRequest::new(
        TherapyArea::Oncology,
        "Nichtkleinzelliges Lungenkarzinom nach vorheriger Chemotherapie",
    );
    let out = engine.shortlist(&req);
    assert_eq!(out.status, ResultStatus::Ok);
    assert!(!out.candidates.is_empty());
    assert!(out.candidates.len() <= 5);
    assert!(!out.area_fallback);
    // oncology stats carry a high special-procedure share
    assert_eq!(out.notices, vec![Notice::SpecialProcedureHeavy]);
    for (i, c) in out.candidates.iter().enumerate() {
        assert_eq!(c.rank, i + 1);
        assert!(c.references.len() <= 5);
    }
}

#[test]
fn missing_corpus_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let config = EngineConfig {
        corpus_path: dir.path().join("nope.json"),
        stats_path: dir.path().join("stats.json"),
        ..EngineConfig::default()
    };
    let err = ShortlistEngine::load(config).expect_err("missing corpus must fail");
    assert!(format!("{err:#}").contains("nope.json"));
}

#[test]
fn malformed_corpus_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let corpus = dir.path().join("corpus.json");
    fs::write(&corpus, "{ not json").expect("write corpus");
    let config = EngineConfig {
        corpus_path: corpus,
        stats_path: dir.path().join("stats.json"),
        ..EngineConfig::default()
    };
    assert!(ShortlistEngine::load(config).is_err());
}

#[test]
fn missing_or_broken_stats_only_drop_notices() {
    let dir = tempdir().expect("tempdir");
    let corpus = dir.path().join("corpus.json");
    fs::write(
        &corpus,
        r#"[
            {"patient_group_id": "a", "decision_id": 1, "therapy_area": "Haut",
             "decision_date": "2024-03-01",
             "awg_text": "Mittelschwere atopische Dermatitis", "patient_group_text": "Erwachsene",
             "zvt_text": "Dupilumab", "has_zvt": "1", "is_orphan": null}
        ]"#,
    )
    .expect("write corpus");
    let stats = dir.path().join("stats.json");
    fs::write(&stats, "[1, 2, 3]").expect("write stats");

    let config = EngineConfig {
        corpus_path: corpus,
        stats_path: stats,
        min_area_records: 1,
        ..EngineConfig::default()
    };
    let engine = ShortlistEngine::load(config).expect("corpus loads without stats");
    assert!(engine.corpus().area_stats("Haut").is_none());

    let out = engine.shortlist(&ShortlistRequest::new(
        TherapyArea::Skin,
        "Mittelschwere atopische Dermatitis bei Erwachsenen",
    ));
    assert_eq!(out.candidates[0].candidate_text, "Dupilumab");
    assert!(out.notices.is_empty());
}
