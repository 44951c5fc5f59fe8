//! # Classifier
//! Pure mapping `(TagStore, Ontology, WeightTable)` → `Prediction`.
//! No I/O after construction; safe to call from many threads at once.
//!
//! Tables are loaded and validated up front (`Classifier::new` / `from_config`);
//! a bad table fails construction instead of producing partial results.

use anyhow::{Context, Result};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::dataset::PurposeMapping;
use crate::explain::{build_reasons, calculate_ambiguity, Fingerprint, RawComponents};
use crate::ontology::Ontology;
use crate::prediction::{EvidenceStats, Origin, Prediction, Reason, ReasonKind, ScoredLabel};
use crate::scoring::{
    blend_confidence, normalize_scores, rank, select_top_labels, ScoreAccumulator, ScoringParams,
};
use crate::source_weights::WeightTable;
use crate::tags::TagStore;
use crate::temporal::{Season, SeasonalTable};

/// Per-call knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyOptions {
    /// Apply the seasonal table for this season before normalization.
    pub season: Option<Season>,
    /// Attach breakdown, reasons and fingerprint.
    pub explain: bool,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            season: None,
            explain: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    ontology: Arc<Ontology>,
    weights: Arc<WeightTable>,
    seasonal: Arc<SeasonalTable>,
    purposes: Arc<PurposeMapping>,
    params: ScoringParams,
}

impl Classifier {
    pub fn new(
        ontology: Ontology,
        weights: WeightTable,
        seasonal: SeasonalTable,
        params: ScoringParams,
    ) -> Result<Self> {
        params.validate().context("invalid scoring parameters")?;
        seasonal.validate_against(&ontology)?;
        Ok(Self {
            ontology: Arc::new(ontology),
            weights: Arc::new(weights),
            seasonal: Arc::new(seasonal),
            purposes: Arc::new(PurposeMapping::default()),
            params,
        })
    }

    /// Attach the table that maps city-dataset purpose codes to categories.
    pub fn with_purposes(mut self, purposes: PurposeMapping) -> Result<Self> {
        purposes.validate_against(&self.ontology)?;
        self.purposes = Arc::new(purposes);
        Ok(self)
    }

    /// Built-in ontology, weights and seasons with default parameters.
    pub fn builtin() -> Result<Self> {
        Self::new(
            Ontology::builtin()?,
            WeightTable::default_seed(),
            SeasonalTable::builtin()?,
            ScoringParams::default(),
        )?
        .with_purposes(PurposeMapping::builtin()?)
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let ontology = match &cfg.data.ontology {
            Some(p) => Ontology::load_from_file(p)?,
            None => Ontology::builtin()?,
        };
        let weights = match &cfg.data.source_weights {
            Some(p) => WeightTable::load_from_file(p)?,
            None => WeightTable::default_seed(),
        };
        let seasonal = match &cfg.data.seasonal {
            Some(p) => SeasonalTable::load_from_file(p)?,
            None => SeasonalTable::builtin()?,
        };
        let purposes = match &cfg.data.purpose_mapping {
            Some(p) => PurposeMapping::load_from_file(p)?,
            None => PurposeMapping::builtin()?,
        };
        let c = Self::new(ontology, weights, seasonal, cfg.scoring.clone())?
            .with_purposes(purposes)
            .context("purpose mapping does not match the ontology")?;
        info!(
            target: "engine",
            keywords = c.ontology.keyword_count(),
            main_threshold = c.params.main_threshold,
            sub_threshold = c.params.sub_threshold,
            "classifier ready"
        );
        Ok(c)
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    pub fn params(&self) -> &ScoringParams {
        &self.params
    }

    /// Classify with default options (no season, explanations on).
    pub fn classify(&self, store: &TagStore) -> Prediction {
        self.classify_with(store, &ClassifyOptions::default())
    }

    pub fn classify_with(&self, store: &TagStore, opts: &ClassifyOptions) -> Prediction {
        self.classify_with_purposes(store, &[], opts)
    }

    /// Classify tags together with city-dataset purpose codes. Codes the
    /// mapping does not know are skipped.
    pub fn classify_with_purposes(
        &self,
        store: &TagStore,
        purposes: &[String],
        opts: &ClassifyOptions,
    ) -> Prediction {
        let p = &self.params;

        // 1) Accumulate raw evidence
        let mut acc = ScoreAccumulator::accumulate(store, &self.ontology, &self.weights);
        for code in purposes {
            match self.purposes.resolve(code) {
                Some(t) => acc.add_purpose(code, &t.main, &t.sub, p.purpose_weight),
                None => debug!(target: "scoring", code = %code, "unknown purpose code skipped"),
            }
        }
        let evidence = EvidenceStats {
            tags: store.len(),
            resolved: acc.resolved,
            unresolved: acc.unresolved + acc.no_signal,
            rejected: 0,
            sources: acc.resolved_sources.iter().copied().collect(),
        };
        if acc.is_empty() {
            debug!(target: "scoring", tags = store.len(), "no resolvable evidence");
            let mut out = Prediction::empty();
            out.evidence = evidence;
            out.season = opts.season;
            return out;
        }

        // 2) Seasonal adjustment on raw sums
        if let Some(season) = opts.season {
            acc.apply_season(&self.seasonal, season);
        }

        // 3) Normalize over touched categories, rank, select
        let main_norm = normalize_scores(&acc.main_raw(), p.normalization, p.temperature);
        let sub_norm = normalize_scores(&acc.sub_raw(), p.normalization, p.temperature);
        let ranked_main = rank(&main_norm);
        let ranked_sub = rank(&sub_norm);
        let mut sel_main = select_top_labels(&ranked_main, p.main_threshold, p.max_main_labels);
        let mut sel_sub = select_top_labels(&ranked_sub, p.sub_threshold, p.max_sub_labels);

        // 4) Confidence and ambiguity
        let confidence = blend_confidence(&sel_main, &sel_sub, acc.mass, p);
        let ambiguity_score =
            calculate_ambiguity(&sel_main.iter().map(|(_, s)| *s).collect::<Vec<_>>());

        let mut reasons = Vec::new();
        if confidence < p.min_confidence {
            sel_main.clear();
            sel_sub.clear();
            reasons.push(
                Reason::new(format!(
                    "confidence {confidence:.2} below minimum {:.2}",
                    p.min_confidence
                ))
                .kind(ReasonKind::BelowMinimum),
            );
        }

        // 5) Explainability
        let (confidence_breakdown, fingerprint) = if opts.explain {
            let raw = RawComponents::measure(&acc, &ranked_main, p.ambiguity_weight);
            let winner = ranked_main.first().map(|(m, _)| *m);
            reasons.extend(build_reasons(&acc, &raw, winner, ambiguity_score));
            for code in &acc.purposes {
                reasons.push(
                    Reason::new(format!(
                        "dataset purpose {code} added at weight {:.1}",
                        p.purpose_weight
                    ))
                    .kind(ReasonKind::Purpose),
                );
            }
            if let Some(season) = opts.season {
                reasons.push(
                    Reason::new(format!("seasonal multipliers for {season} applied"))
                        .kind(ReasonKind::Seasonal),
                );
            }
            let fp = Fingerprint::from_scores(ranked_main.iter().map(|(m, s)| (m.as_str(), *s)));
            (Some(raw.rescaled(confidence)), Some(fp))
        } else {
            (None, None)
        };

        debug!(
            target: "scoring",
            tags = store.len(),
            resolved = acc.resolved,
            main = sel_main.len(),
            sub = sel_sub.len(),
            confidence,
            "classified"
        );

        Prediction {
            city: None,
            main: sel_main.iter().map(|(m, _)| *m).collect(),
            sub: sel_sub.iter().map(|(s, _)| s.clone()).collect(),
            confidence,
            main_scores: ranked_main
                .iter()
                .map(|(m, s)| ScoredLabel::new(m.as_str(), *s))
                .collect(),
            sub_scores: ranked_sub
                .iter()
                .map(|(l, s)| ScoredLabel::new(l.as_str(), *s))
                .collect(),
            ambiguity_score,
            confidence_breakdown,
            reasons,
            fingerprint,
            origin: Origin::Classified,
            season: opts.season,
            evidence,
        }
    }
}

/* ----------------------------
Thread-safe handle
---------------------------- */

/// Shared classifier. Readers take a cheap `Arc` snapshot; `replace` swaps in a
/// freshly validated classifier. In-flight classifications keep their snapshot.
#[derive(Clone)]
pub struct ClassifierHandle {
    inner: Arc<RwLock<Arc<Classifier>>>,
}

impl ClassifierHandle {
    pub fn new(classifier: Classifier) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(classifier))),
        }
    }

    pub fn current(&self) -> Arc<Classifier> {
        match self.inner.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, classifier: Classifier) {
        let next = Arc::new(classifier);
        match self.inner.write() {
            Ok(mut g) => *g = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
