//! Prediction result: selected labels, confidence and explainability data.
//!
//! Built once per classification and returned by value. Nothing downstream
//! mutates it except the builder-style helpers used while assembling it.

use serde::{Deserialize, Serialize};

use crate::explain::{ConfidenceBreakdown, Fingerprint};
use crate::ontology::MainCategory;
use crate::scoring::clamp01;
use crate::tags::Source;
use crate::temporal::Season;

/// Where a prediction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Scored from tag evidence.
    Classified,
    /// Curated entry used because no tags were available.
    Fallback,
    /// Labelled row of the city dataset.
    Dataset,
    /// No usable evidence.
    Empty,
}

/// Reason shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    pub message: String,
    /// Optional strength in [0, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ReasonKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    SourceAgreement,
    AuthorityBoost,
    SupportingTags,
    Ambiguity,
    Seasonal,
    BelowMinimum,
    Fallback,
    Dataset,
    /// A dataset purpose code added category evidence.
    Purpose,
    Other,
}

impl Reason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            weight: None,
            kind: None,
        }
    }

    pub fn weighted(mut self, w: f32) -> Self {
        self.weight = Some(clamp01(w));
        self
    }

    pub fn kind(mut self, kind: ReasonKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLabel {
    pub label: String,
    pub score: f32,
}

impl ScoredLabel {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Counts describing the evidence behind a prediction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceStats {
    pub tags: usize,
    pub resolved: usize,
    pub unresolved: usize,
    /// Raw records dropped by validation before scoring.
    pub rejected: usize,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Selected main categories, best first.
    pub main: Vec<MainCategory>,
    /// Selected subcategories, best first.
    pub sub: Vec<String>,
    /// In [0, 1].
    pub confidence: f32,
    /// Every touched main category with its normalized score, best first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub main_scores: Vec<ScoredLabel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_scores: Vec<ScoredLabel>,
    #[serde(default)]
    pub ambiguity_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_breakdown: Option<ConfidenceBreakdown>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<Reason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<Season>,
    #[serde(default)]
    pub evidence: EvidenceStats,
}

impl Prediction {
    /// No labels, confidence exactly 0.0.
    pub fn empty() -> Self {
        Self {
            city: None,
            main: Vec::new(),
            sub: Vec::new(),
            confidence: 0.0,
            main_scores: Vec::new(),
            sub_scores: Vec::new(),
            ambiguity_score: 0.0,
            confidence_breakdown: None,
            reasons: Vec::new(),
            fingerprint: None,
            origin: Origin::Empty,
            season: None,
            evidence: EvidenceStats::default(),
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_reason(mut self, reason: Reason) -> Self {
        self.reasons.push(reason);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty() && self.sub.is_empty()
    }

    /// Best main category, if any was selected.
    pub fn top(&self) -> Option<MainCategory> {
        self.main.first().copied()
    }

    pub fn main_score(&self, category: MainCategory) -> Option<f32> {
        self.main_scores
            .iter()
            .find(|s| s.label == category.as_str())
            .map(|s| s.score)
    }
}
