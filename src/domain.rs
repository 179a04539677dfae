//! domain.rs: request facets and the structured shortlist result.
//!
//! Facet values serialize to the German wording used by the corpus and the UI
//! (`"Onkologie"`, `"stationär"`, `"später"`, ...). Labels serialize as
//! `"hoch" | "mittel" | "niedrig"`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse clinical category used to select the primary evidence subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TherapyArea {
    #[serde(rename = "Augenerkrankungen")]
    Eye,
    #[serde(rename = "Haut")]
    Skin,
    #[serde(rename = "Herz-Kreislauf")]
    Cardiovascular,
    #[serde(rename = "Infektionen")]
    Infections,
    #[serde(rename = "Atmung")]
    Respiratory,
    #[serde(rename = "Blut/Blutbildend")]
    Blood,
    #[serde(rename = "Muskel-Skelett")]
    Musculoskeletal,
    #[serde(rename = "Nervensystem")]
    NervousSystem,
    #[serde(rename = "Urogenital")]
    Urogenital,
    #[serde(rename = "Verdauung")]
    Digestive,
    #[serde(rename = "Onkologie")]
    Oncology,
    #[serde(rename = "Psychische")]
    Psychiatric,
    #[serde(rename = "Stoffwechsel")]
    Metabolic,
    #[serde(rename = "Sonstiges")]
    Other,
}

impl TherapyArea {
    /// The area tag as stored on corpus records.
    pub fn as_str(self) -> &'static str {
        match self {
            TherapyArea::Eye => "Augenerkrankungen",
            TherapyArea::Skin => "Haut",
            TherapyArea::Cardiovascular => "Herz-Kreislauf",
            TherapyArea::Infections => "Infektionen",
            TherapyArea::Respiratory => "Atmung",
            TherapyArea::Blood => "Blut/Blutbildend",
            TherapyArea::Musculoskeletal => "Muskel-Skelett",
            TherapyArea::NervousSystem => "Nervensystem",
            TherapyArea::Urogenital => "Urogenital",
            TherapyArea::Digestive => "Verdauung",
            TherapyArea::Oncology => "Onkologie",
            TherapyArea::Psychiatric => "Psychische",
            TherapyArea::Metabolic => "Stoffwechsel",
            TherapyArea::Other => "Sonstiges",
        }
    }
}

/// Care setting of the new product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Setting {
    #[serde(rename = "ambulant")]
    Outpatient,
    #[serde(rename = "stationär")]
    Inpatient,
    #[serde(rename = "beides")]
    Both,
    #[default]
    #[serde(rename = "unklar")]
    Unspecified,
}

/// Role of the new product relative to existing therapy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TherapyRole {
    #[serde(rename = "replacement")]
    Replacement,
    #[serde(rename = "add-on")]
    AddOn,
    #[serde(rename = "monotherapy")]
    Monotherapy,
    #[default]
    #[serde(rename = "unklar")]
    Unspecified,
}

/// Treatment line. `Later` is the third-or-later bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TherapyLine {
    #[serde(rename = "1L")]
    First,
    #[serde(rename = "2L")]
    Second,
    #[serde(rename = "später")]
    Later,
    #[serde(rename = "switch")]
    Switch,
    #[serde(rename = "unklar")]
    Unspecified,
}

impl TherapyLine {
    pub fn as_str(self) -> &'static str {
        match self {
            TherapyLine::First => "1L",
            TherapyLine::Second => "2L",
            TherapyLine::Later => "später",
            TherapyLine::Switch => "switch",
            TherapyLine::Unspecified => "unklar",
        }
    }
}

/// Kind of comparator the requester expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparatorType {
    #[serde(rename = "aktiv")]
    Active,
    #[serde(rename = "placebo")]
    Placebo,
    #[serde(rename = "BSC")]
    BestSupportiveCare,
    #[serde(rename = "physician's choice")]
    PhysiciansChoice,
    #[serde(rename = "unklar")]
    Unspecified,
}

impl ComparatorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparatorType::Active => "aktiv",
            ComparatorType::Placebo => "placebo",
            ComparatorType::BestSupportiveCare => "BSC",
            ComparatorType::PhysiciansChoice => "physician's choice",
            ComparatorType::Unspecified => "unklar",
        }
    }
}

/// A shortlist request as handed over by the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortlistRequest {
    pub therapy_area: TherapyArea,
    pub indication_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population_text: Option<String>,
    #[serde(default)]
    pub setting: Setting,
    #[serde(default)]
    pub role: TherapyRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<TherapyLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparator_type: Option<ComparatorType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparator_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

impl ShortlistRequest {
    /// Minimal request: area + indication, every other facet unspecified.
    pub fn new(therapy_area: TherapyArea, indication_text: impl Into<String>) -> Self {
        Self {
            therapy_area,
            indication_text: indication_text.into(),
            population_text: None,
            setting: Setting::Unspecified,
            role: TherapyRole::Unspecified,
            line: None,
            comparator_type: None,
            comparator_text: None,
            project_name: None,
        }
    }

    pub fn with_population(mut self, text: impl Into<String>) -> Self {
        self.population_text = Some(text.into());
        self
    }

    pub fn with_setting(mut self, setting: Setting) -> Self {
        self.setting = setting;
        self
    }

    pub fn with_role(mut self, role: TherapyRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_line(mut self, line: TherapyLine) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_comparator_type(mut self, ct: ComparatorType) -> Self {
        self.comparator_type = Some(ct);
        self
    }

    pub fn with_comparator_text(mut self, text: impl Into<String>) -> Self {
        self.comparator_text = Some(text.into());
        self
    }
}

/// Three-step label used for confidence, ambiguity and reliability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    #[serde(rename = "hoch")]
    High,
    #[serde(rename = "mittel")]
    Medium,
    #[serde(rename = "niedrig")]
    Low,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::High => "hoch",
            Level::Medium => "mittel",
            Level::Low => "niedrig",
        })
    }
}

/// Outcome status of a shortlist computation. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    NeedsClarification,
    NoResult,
}

/// One supporting decision shown under a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub decision_id: String,
    pub product_name: String,
    pub decision_date: String,
    pub url: String,
    /// Population text, truncated for display.
    pub snippet: String,
    /// Weighted score that justified inclusion (rounded to 4 decimals).
    pub score: f32,
}

/// A ranked comparator candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub rank: usize,
    pub candidate_text: String,
    pub support_score: f32,
    pub confidence: Level,
    /// Distinct decisions supporting the candidate.
    pub support_cases: usize,
    pub support_cases_clean: usize,
    pub support_cases_special: usize,
    pub references: Vec<ReferenceItem>,
}

/// Round to 4 decimals for display/serialization.
pub fn round4(x: f32) -> f32 {
    (x * 10_000.0).round() / 10_000.0
}
