//! # Scoring
//!
//! Weighted aggregation of tag evidence into per-category scores.
//!
//! Pipeline for one classification run:
//! 1. every record is normalized and resolved through the ontology;
//! 2. each resolved mapping adds `source_w × evidence_w × boost` to its main
//!    category and to each listed subcategory; a city-dataset purpose code
//!    adds `purpose_weight` to each of its categories the same way;
//! 3. optional seasonal multipliers scale the raw sums;
//! 4. main and sub scores are normalized separately over the categories that
//!    received evidence;
//! 5. labels strictly above threshold are kept, ordered by score then name;
//! 6. confidence blends the kept main/sub scores, damped by how much
//!    evidence there is in total.
//!
//! The accumulator is built fresh per run and never shared. All maps are
//! `BTreeMap`s so iteration, and therefore every floating-point sum, happens
//! in the same order on every run.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::normalize::normalize_signal;
use crate::ontology::{MainCategory, Ontology};
use crate::source_weights::WeightTable;
use crate::tags::{Source, TagRecord, TagStore};
use crate::temporal::{Season, SeasonalTable};

/// How raw sums become scores in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// `exp(x / T) / Σ exp(x / T)` over touched categories.
    Softmax,
    /// `x / Σ x` over touched categories.
    Proportional,
}

/// Tunable constants of the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    pub main_threshold: f32,
    pub sub_threshold: f32,
    pub max_main_labels: usize,
    pub max_sub_labels: usize,
    pub main_blend: f32,
    pub sub_blend: f32,
    pub normalization: Normalization,
    pub temperature: f32,
    /// Evidence mass at which the support factor reaches ~63%. 0 disables it.
    pub support_scale: f32,
    pub ambiguity_weight: f32,
    /// Predictions below this confidence are returned without labels.
    pub min_confidence: f32,
    /// Raw score added per category of a city-dataset purpose code.
    pub purpose_weight: f32,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            main_threshold: 0.15,
            sub_threshold: 0.10,
            max_main_labels: 5,
            max_sub_labels: 8,
            main_blend: 0.7,
            sub_blend: 0.3,
            normalization: Normalization::Softmax,
            temperature: 1.0,
            support_scale: 3.0,
            ambiguity_weight: 0.2,
            min_confidence: 0.0,
            purpose_weight: 2.0,
        }
    }
}

impl ScoringParams {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("main_threshold", self.main_threshold),
            ("sub_threshold", self.sub_threshold),
            ("main_blend", self.main_blend),
            ("sub_blend", self.sub_blend),
            ("ambiguity_weight", self.ambiguity_weight),
            ("min_confidence", self.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&v) {
                bail!("{name} must be in [0, 1], got {v}");
            }
        }
        if (self.main_blend + self.sub_blend - 1.0).abs() > 1e-3 {
            bail!(
                "main_blend + sub_blend must equal 1.0, got {}",
                self.main_blend + self.sub_blend
            );
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            bail!("temperature must be > 0, got {}", self.temperature);
        }
        if !(self.support_scale.is_finite() && self.support_scale >= 0.0) {
            bail!("support_scale must be >= 0, got {}", self.support_scale);
        }
        if !(self.purpose_weight.is_finite() && self.purpose_weight > 0.0) {
            bail!("purpose_weight must be > 0, got {}", self.purpose_weight);
        }
        if self.max_main_labels == 0 || self.max_sub_labels == 0 {
            bail!("max_main_labels and max_sub_labels must be at least 1");
        }
        Ok(())
    }
}

/// Running evidence for one category.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryEvidence {
    pub score: f32,
    /// Part of `score` that came from authority sources.
    pub authority: f32,
    pub sources: BTreeSet<Source>,
}

impl CategoryEvidence {
    fn add(&mut self, amount: f32, source: Source) {
        self.score += amount;
        if source.is_authority() {
            self.authority += amount;
        }
        self.sources.insert(source);
    }

    /// Evidence with no tag source behind it.
    fn add_unsourced(&mut self, amount: f32) {
        self.score += amount;
    }

    fn scale(&mut self, factor: f32) {
        self.score *= factor;
        self.authority *= factor;
    }
}

/// What happened to one record during accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOutcome {
    /// Nothing left after normalization.
    NoSignal,
    /// Normalized keyword not in the ontology.
    Unresolved,
    Resolved { mappings: usize, fuzzy: bool },
}

/// Per-run score accumulator.
#[derive(Debug, Clone, Default)]
pub struct ScoreAccumulator {
    pub main: BTreeMap<MainCategory, CategoryEvidence>,
    pub sub: BTreeMap<String, CategoryEvidence>,
    pub resolved: usize,
    pub unresolved: usize,
    pub no_signal: usize,
    /// Dataset purpose codes that added evidence.
    pub purposes: Vec<String>,
    /// Total contribution added to main categories before seasonal scaling.
    pub mass: f32,
    pub resolved_sources: BTreeSet<Source>,
    /// Ontology keywords that matched, first occurrence order, no repeats.
    pub supporting: Vec<String>,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every record of `store` through `add`.
    pub fn accumulate(store: &TagStore, ontology: &Ontology, weights: &WeightTable) -> Self {
        let mut acc = Self::new();
        for record in store {
            acc.add(record, ontology, weights);
        }
        acc
    }

    pub fn add(&mut self, record: &TagRecord, ontology: &Ontology, weights: &WeightTable) -> TagOutcome {
        let Some(key) = normalize_signal(record.raw_text()) else {
            self.no_signal += 1;
            return TagOutcome::NoSignal;
        };
        let Some(hit) = ontology.lookup(&key) else {
            self.unresolved += 1;
            return TagOutcome::Unresolved;
        };

        let base = weights.contribution(record);
        let source = record.source();
        for mapping in hit.mappings {
            let amount = base * mapping.boost;
            self.main.entry(mapping.main).or_default().add(amount, source);
            for sub in &mapping.subs {
                self.sub.entry(sub.clone()).or_default().add(amount, source);
            }
            self.mass += amount;
        }

        self.resolved += 1;
        self.resolved_sources.insert(source);
        if !self.supporting.iter().any(|k| k == hit.keyword) {
            self.supporting.push(hit.keyword.to_string());
        }
        TagOutcome::Resolved {
            mappings: hit.mappings.len(),
            fuzzy: hit.fuzzy,
        }
    }

    /// Add `weight` to each category of a dataset purpose code. Like a tag
    /// mapping, every main category it names counts towards the mass.
    pub fn add_purpose(&mut self, code: &str, main: &[MainCategory], sub: &[String], weight: f32) {
        for m in main {
            self.main.entry(*m).or_default().add_unsourced(weight);
            self.mass += weight;
        }
        for s in sub {
            self.sub.entry(s.clone()).or_default().add_unsourced(weight);
        }
        self.purposes.push(code.to_string());
    }

    /// Scale raw sums by the seasonal table (labels without an entry stay as they are).
    pub fn apply_season(&mut self, table: &SeasonalTable, season: Season) {
        for (main, ev) in self.main.iter_mut() {
            ev.scale(table.multiplier(main.as_str(), season));
        }
        for (sub, ev) in self.sub.iter_mut() {
            ev.scale(table.multiplier(sub, season));
        }
    }

    /// True when no tag produced any category contribution.
    pub fn is_empty(&self) -> bool {
        self.main.is_empty()
    }

    pub fn main_raw(&self) -> BTreeMap<MainCategory, f32> {
        self.main.iter().map(|(k, v)| (*k, v.score)).collect()
    }

    pub fn sub_raw(&self) -> BTreeMap<String, f32> {
        self.sub.iter().map(|(k, v)| (k.clone(), v.score)).collect()
    }
}

/// Normalize raw sums over the touched categories. Untouched categories are
/// absent from the result rather than given a floor.
pub fn normalize_scores<K: Ord + Clone>(
    raw: &BTreeMap<K, f32>,
    method: Normalization,
    temperature: f32,
) -> BTreeMap<K, f32> {
    let touched: Vec<(&K, f32)> = raw.iter().filter(|(_, v)| **v > 0.0).map(|(k, v)| (k, *v)).collect();
    if touched.is_empty() {
        return BTreeMap::new();
    }
    match method {
        Normalization::Softmax => {
            let t = if temperature > 0.0 { temperature } else { 1.0 };
            let max = touched.iter().map(|(_, v)| *v).fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = touched.iter().map(|(_, v)| ((v - max) / t).exp()).collect();
            let sum: f32 = exps.iter().sum();
            touched
                .iter()
                .zip(exps)
                .map(|((k, _), e)| ((*k).clone(), e / sum))
                .collect()
        }
        Normalization::Proportional => {
            let sum: f32 = touched.iter().map(|(_, v)| v).sum();
            touched
                .iter()
                .map(|(k, v)| ((*k).clone(), v / sum))
                .collect()
        }
    }
}

/// Anything with a display name used for deterministic tie-breaking.
pub trait Label {
    fn label(&self) -> &str;
}

impl Label for MainCategory {
    fn label(&self) -> &str {
        self.as_str()
    }
}

impl Label for String {
    fn label(&self) -> &str {
        self.as_str()
    }
}

/// Order by score descending, ties by label name ascending.
pub fn rank<K: Label + Clone>(scores: &BTreeMap<K, f32>) -> Vec<(K, f32)> {
    let mut out: Vec<(K, f32)> = scores.iter().map(|(k, v)| (k.clone(), *v)).collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.label().cmp(b.0.label())));
    out
}

/// Labels strictly above `threshold`, at most `max`, from an already ranked list.
pub fn select_top_labels<K: Clone>(ranked: &[(K, f32)], threshold: f32, max: usize) -> Vec<(K, f32)> {
    ranked
        .iter()
        .filter(|(_, s)| *s > threshold)
        .take(max)
        .cloned()
        .collect()
}

fn mean(xs: impl Iterator<Item = f32>) -> f32 {
    let (sum, n) = xs.fold((0.0f32, 0usize), |(s, n), x| (s + x, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f32
    }
}

/// `1 − exp(−mass / scale)`; 1.0 when the scale is 0 (support disabled).
pub fn support_factor(mass: f32, scale: f32) -> f32 {
    if scale <= 0.0 {
        return 1.0;
    }
    clamp01(1.0 - (-mass.max(0.0) / scale).exp())
}

/// `main_blend × mean(main) + sub_blend × mean(sub)`, times the support factor.
pub fn blend_confidence<A, B>(
    main: &[(A, f32)],
    sub: &[(B, f32)],
    mass: f32,
    params: &ScoringParams,
) -> f32 {
    let blend = params.main_blend * mean(main.iter().map(|(_, s)| *s))
        + params.sub_blend * mean(sub.iter().map(|(_, s)| *s));
    clamp01(blend * support_factor(mass, params.support_scale))
}

pub fn clamp01(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::EvidenceType;

    fn setup() -> (Ontology, WeightTable) {
        (Ontology::builtin().unwrap(), WeightTable::default_seed())
    }

    #[test]
    fn default_params_are_valid() {
        ScoringParams::default().validate().unwrap();
        let bad = ScoringParams {
            main_blend: 0.9,
            ..ScoringParams::default()
        };
        assert!(bad.validate().is_err());
        let bad_t = ScoringParams {
            temperature: 0.0,
            ..ScoringParams::default()
        };
        assert!(bad_t.validate().is_err());
    }

    #[test]
    fn accumulates_per_mapping() {
        let (o, w) = setup();
        let store: TagStore = [
            TagRecord::new("Historic Center", Source::Wikidata, EvidenceType::StructuredData),
            TagRecord::new("museum", Source::Booking, EvidenceType::MetaTag),
            TagRecord::new("xyzzy", Source::Booking, EvidenceType::MetaTag),
            TagRecord::new(" -- ", Source::Booking, EvidenceType::MetaTag),
        ]
        .into_iter()
        .collect();
        let acc = ScoreAccumulator::accumulate(&store, &o, &w);
        assert_eq!(acc.resolved, 2);
        assert_eq!(acc.unresolved, 1);
        assert_eq!(acc.no_signal, 1);
        assert!(acc.main.contains_key(&MainCategory::CultureHeritage));
        assert!(acc.main.contains_key(&MainCategory::Leisure));
        let culture = &acc.main[&MainCategory::CultureHeritage];
        assert_eq!(culture.sources.len(), 2);
        assert!(culture.authority > 0.0 && culture.authority < culture.score);
        assert_eq!(acc.supporting, vec!["historic center", "museum"]);
    }

    #[test]
    fn softmax_sums_to_one_over_touched() {
        let raw: BTreeMap<String, f32> =
            [("a".to_string(), 2.0), ("b".to_string(), 1.0), ("c".to_string(), 0.0)].into();
        let n = normalize_scores(&raw, Normalization::Softmax, 1.0);
        assert_eq!(n.len(), 2);
        let sum: f32 = n.values().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(n["a"] > n["b"]);

        let p = normalize_scores(&raw, Normalization::Proportional, 1.0);
        assert!((p["a"] - 2.0 / 3.0).abs() < 1e-6);
        assert!(normalize_scores(&BTreeMap::<String, f32>::new(), Normalization::Softmax, 1.0).is_empty());
    }

    #[test]
    fn ranking_breaks_ties_by_name() {
        let scores: BTreeMap<String, f32> = [
            ("Museums".to_string(), 0.3),
            ("Architecture".to_string(), 0.3),
            ("Old_Town".to_string(), 0.4),
        ]
        .into();
        let ranked = rank(&scores);
        let names: Vec<_> = ranked.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["Old_Town", "Architecture", "Museums"]);
    }

    #[test]
    fn selection_is_strictly_above_threshold() {
        let ranked = vec![("a", 0.5f32), ("b", 0.15), ("c", 0.1500001), ("d", 0.05)];
        let sel = select_top_labels(&ranked, 0.15, 5);
        let names: Vec<_> = sel.iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(select_top_labels(&ranked, 0.0, 2).len(), 2);
    }

    #[test]
    fn support_factor_behaviour() {
        assert_eq!(support_factor(0.0, 3.0), 0.0);
        assert!(support_factor(1.0, 3.0) > 0.0 && support_factor(1.0, 3.0) < 0.5);
        assert!(support_factor(30.0, 3.0) > 0.99);
        assert_eq!(support_factor(0.0, 0.0), 1.0);
    }

    #[test]
    fn blend_of_empty_is_zero() {
        let p = ScoringParams::default();
        let none: Vec<(String, f32)> = Vec::new();
        assert_eq!(blend_confidence(&none, &none, 5.0, &p), 0.0);
        let main = vec![("x".to_string(), 1.0f32)];
        let c = blend_confidence(&main, &none, 100.0, &p);
        assert!((c - 0.7).abs() < 1e-3);
    }

    #[test]
    fn purpose_code_adds_unsourced_evidence() {
        let (o, w) = setup();
        let store: TagStore = [TagRecord::new("port", Source::Booking, EvidenceType::MetaTag)]
            .into_iter()
            .collect();
        let mut acc = ScoreAccumulator::accumulate(&store, &o, &w);
        let tag_score = acc.main[&MainCategory::SeamanCrew].score;
        let mass = acc.mass;

        acc.add_purpose(
            "SEAMAN",
            &[MainCategory::SeamanCrew],
            &["Crew_Change_Port".to_string()],
            2.0,
        );
        let seaman = &acc.main[&MainCategory::SeamanCrew];
        assert!((seaman.score - (tag_score + 2.0)).abs() < 1e-6);
        assert_eq!(seaman.sources.len(), 1);
        assert_eq!(seaman.authority, 0.0);
        assert!((acc.sub["Crew_Change_Port"].score - 2.0).abs() < 1e-6);
        assert!((acc.mass - (mass + 2.0)).abs() < 1e-6);
        assert_eq!(acc.purposes, vec!["SEAMAN"]);
        assert_eq!(acc.resolved, 1);
    }

    #[test]
    fn season_scales_raw_scores() {
        let (o, w) = setup();
        let store: TagStore = [TagRecord::new("ski resort", Source::Booking, EvidenceType::MetaTag)]
            .into_iter()
            .collect();
        let mut acc = ScoreAccumulator::accumulate(&store, &o, &w);
        let before = acc.main[&MainCategory::WinterSnow].score;
        acc.apply_season(&SeasonalTable::builtin().unwrap(), Season::Winter);
        let after = acc.main[&MainCategory::WinterSnow].score;
        assert!((after - before * 1.5).abs() < 1e-5);
        // Mass stays pre-season.
        assert!((acc.mass - before).abs() < 1e-6);
    }
}
