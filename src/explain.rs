//! # Explainability
//!
//! Turns a finished scoring run into something a person can audit:
//!
//! - [`ConfidenceBreakdown`]: five named components that add up to the total
//!   confidence (`Σ positive − ambiguity_penalty = total`, within [`TOLERANCE`]).
//! - [`calculate_ambiguity`]: normalized entropy of the selected main scores.
//! - [`Fingerprint`]: main-category distribution with entropy and a cosine
//!   similarity for comparing cities.
//! - Human-readable [`Reason`]s.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::ontology::MainCategory;
use crate::prediction::{Reason, ReasonKind};
use crate::scoring::{clamp01, ScoreAccumulator};

/// Allowed gap between the component sum and the total confidence.
pub const TOLERANCE: f32 = 0.05;

/// Tags needed for full tag density.
const DENSITY_SATURATION: f32 = 50.0;
const SUPPORTING_TAGS_SHOWN: usize = 5;
const AGREEMENT_REASON_MIN: f32 = 0.2;
const AUTHORITY_REASON_MIN: f32 = 0.15;
const AMBIGUITY_REASON_MIN: f32 = 0.6;

/// Confidence split into named parts. Build with [`ConfidenceBreakdown::try_new`]
/// or [`RawComponents::rescaled`]; both guarantee the components add up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    source_agreement: f32,
    ontology_strength: f32,
    tag_density: f32,
    authority_weight: f32,
    /// Stored as a positive magnitude; subtracted in the sum.
    ambiguity_penalty: f32,
    total: f32,
}

impl ConfidenceBreakdown {
    pub fn try_new(
        source_agreement: f32,
        ontology_strength: f32,
        tag_density: f32,
        authority_weight: f32,
        ambiguity_penalty: f32,
        total: f32,
    ) -> Result<Self> {
        let parts = [
            source_agreement,
            ontology_strength,
            tag_density,
            authority_weight,
            ambiguity_penalty,
        ];
        if parts.iter().any(|p| !p.is_finite() || *p < 0.0) {
            bail!("breakdown components must be finite and non-negative: {parts:?}");
        }
        if !(0.0..=1.0).contains(&total) {
            bail!("total confidence {total} outside [0, 1]");
        }
        let b = Self {
            source_agreement,
            ontology_strength,
            tag_density,
            authority_weight,
            ambiguity_penalty,
            total,
        };
        let gap = (b.component_sum() - total).abs();
        if gap > TOLERANCE {
            bail!(
                "breakdown sums to {:.4}, total is {:.4}",
                b.component_sum(),
                total
            );
        }
        Ok(b)
    }

    pub fn zero() -> Self {
        Self {
            source_agreement: 0.0,
            ontology_strength: 0.0,
            tag_density: 0.0,
            authority_weight: 0.0,
            ambiguity_penalty: 0.0,
            total: 0.0,
        }
    }

    /// Whole confidence on the ontology match. `total` must be in [0, 1].
    fn ontology_only(total: f32) -> Self {
        Self {
            ontology_strength: total,
            total,
            ..Self::zero()
        }
    }

    pub fn component_sum(&self) -> f32 {
        self.source_agreement + self.ontology_strength + self.tag_density + self.authority_weight
            - self.ambiguity_penalty
    }

    pub fn source_agreement(&self) -> f32 {
        self.source_agreement
    }
    pub fn ontology_strength(&self) -> f32 {
        self.ontology_strength
    }
    pub fn tag_density(&self) -> f32 {
        self.tag_density
    }
    pub fn authority_weight(&self) -> f32 {
        self.authority_weight
    }
    pub fn ambiguity_penalty(&self) -> f32 {
        self.ambiguity_penalty
    }
    pub fn total(&self) -> f32 {
        self.total
    }
}

/// Unscaled component values for the winning main category.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawComponents {
    /// Distinct sources on the winner / distinct sources among resolved tags.
    pub source_agreement: f32,
    /// Normalized score of the winner.
    pub ontology_strength: f32,
    /// Resolved tag count, saturating at 50.
    pub tag_density: f32,
    /// Share of the winner's raw score that came from authority sources.
    pub authority_weight: f32,
    /// `ambiguity_weight × second / first` over the top two main scores.
    pub ambiguity_penalty: f32,
}

impl RawComponents {
    /// Measure the components from a scoring run. `ranked_main` holds every
    /// touched main category with its normalized score, best first.
    pub fn measure(
        acc: &ScoreAccumulator,
        ranked_main: &[(MainCategory, f32)],
        ambiguity_weight: f32,
    ) -> Self {
        let Some((winner, top)) = ranked_main.first().copied() else {
            return Self::default();
        };
        let ev = acc.main.get(&winner);
        let total_sources = acc.resolved_sources.len();

        let source_agreement = match ev {
            Some(ev) if total_sources > 0 => ev.sources.len() as f32 / total_sources as f32,
            _ => 0.0,
        };
        let authority_weight = match ev {
            Some(ev) if ev.score > 0.0 => ev.authority / ev.score,
            _ => 0.0,
        };
        let ambiguity_penalty = match ranked_main.get(1) {
            Some((_, second)) if top > 0.0 => ambiguity_weight * (second / top),
            _ => 0.0,
        };

        Self {
            source_agreement: clamp01(source_agreement),
            ontology_strength: clamp01(top),
            tag_density: (acc.resolved as f32 / DENSITY_SATURATION).min(1.0),
            authority_weight: clamp01(authority_weight),
            ambiguity_penalty: clamp01(ambiguity_penalty),
        }
    }

    /// Scale the positive components so that `Σ positive − penalty == confidence`.
    /// The penalty keeps its measured value. The result always passes the
    /// [`ConfidenceBreakdown::try_new`] checks; a component set that cannot be
    /// scaled is attributed to the ontology match instead.
    pub fn rescaled(&self, confidence: f32) -> ConfidenceBreakdown {
        let confidence = clamp01(confidence);
        if confidence <= 0.0 {
            return ConfidenceBreakdown::zero();
        }
        let positive =
            self.source_agreement + self.ontology_strength + self.tag_density + self.authority_weight;
        if positive <= 0.0 {
            return ConfidenceBreakdown::ontology_only(confidence);
        }
        let k = (confidence + self.ambiguity_penalty) / positive;
        let built = ConfidenceBreakdown::try_new(
            self.source_agreement * k,
            self.ontology_strength * k,
            self.tag_density * k,
            self.authority_weight * k,
            self.ambiguity_penalty,
            confidence,
        );
        debug_assert!(built.is_ok(), "rescaled breakdown rejected: {built:?}");
        built.unwrap_or_else(|e| {
            warn!(target: "scoring", error = %e, "breakdown rescale failed");
            ConfidenceBreakdown::ontology_only(confidence)
        })
    }
}

/// Normalized Shannon entropy of `scores` in [0, 1]; 0 for fewer than two scores.
pub fn calculate_ambiguity(scores: &[f32]) -> f32 {
    if scores.len() < 2 {
        return 0.0;
    }
    let total: f32 = scores.iter().filter(|s| **s > 0.0).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let entropy: f32 = scores
        .iter()
        .filter(|s| **s > 0.0)
        .map(|s| {
            let p = s / total;
            -p * p.ln()
        })
        .sum();
    clamp01(entropy / (scores.len() as f32).ln())
}

/// Human-readable reasons, in a fixed order.
pub fn build_reasons(
    acc: &ScoreAccumulator,
    raw: &RawComponents,
    winner: Option<MainCategory>,
    ambiguity_score: f32,
) -> Vec<Reason> {
    let mut reasons = Vec::new();
    let Some(winner) = winner else {
        return reasons;
    };

    if raw.source_agreement > AGREEMENT_REASON_MIN {
        let n = acc.main.get(&winner).map_or(0, |e| e.sources.len());
        reasons.push(
            Reason::new(format!(
                "{n} of {} sources support {winner}",
                acc.resolved_sources.len()
            ))
            .kind(ReasonKind::SourceAgreement)
            .weighted(raw.source_agreement),
        );
    }
    if raw.authority_weight > AUTHORITY_REASON_MIN {
        reasons.push(
            Reason::new(format!(
                "authority sources provide {:.0}% of the {winner} evidence",
                raw.authority_weight * 100.0
            ))
            .kind(ReasonKind::AuthorityBoost)
            .weighted(raw.authority_weight),
        );
    }
    if !acc.supporting.is_empty() {
        let shown: Vec<&str> = acc
            .supporting
            .iter()
            .take(SUPPORTING_TAGS_SHOWN)
            .map(String::as_str)
            .collect();
        reasons.push(
            Reason::new(format!("supporting tags: {}", shown.join(", ")))
                .kind(ReasonKind::SupportingTags),
        );
    }
    if ambiguity_score > AMBIGUITY_REASON_MIN {
        reasons.push(
            Reason::new("high ambiguity between the top categories")
                .kind(ReasonKind::Ambiguity)
                .weighted(ambiguity_score),
        );
    }
    reasons
}

/// Compact summary of a main-category distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub distribution: BTreeMap<String, f32>,
    /// Shannon entropy in bits.
    pub entropy_bits: f32,
    /// Largest single share.
    pub uniqueness: f32,
}

impl Fingerprint {
    pub fn from_scores<'a, I>(scores: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f32)>,
    {
        let distribution: BTreeMap<String, f32> = scores
            .into_iter()
            .filter(|(_, s)| *s > 0.0)
            .map(|(k, s)| (k.to_string(), s))
            .collect();
        let total: f32 = distribution.values().sum();
        let (entropy_bits, uniqueness) = if total > 0.0 {
            let h = distribution
                .values()
                .map(|s| {
                    let p = s / total;
                    -p * p.log2()
                })
                .sum::<f32>();
            let max = distribution.values().fold(0.0f32, |m, s| m.max(*s)) / total;
            (h, max)
        } else {
            (0.0, 0.0)
        };
        Self {
            distribution,
            entropy_bits,
            uniqueness,
        }
    }

    /// Cosine similarity over the union of categories; 0 when either side is empty.
    pub fn cosine_similarity(&self, other: &Fingerprint) -> f32 {
        let keys: BTreeSet<&String> = self
            .distribution
            .keys()
            .chain(other.distribution.keys())
            .collect();
        let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
        for k in keys {
            let a = self.distribution.get(k).copied().unwrap_or(0.0);
            let b = other.distribution.get(k).copied().unwrap_or(0.0);
            dot += a * b;
            na += a * a;
            nb += b * b;
        }
        if na <= 0.0 || nb <= 0.0 {
            return 0.0;
        }
        clamp01(dot / (na.sqrt() * nb.sqrt()))
    }
}
