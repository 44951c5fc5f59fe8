//! # Purpose service
//!
//! Facade used by the CLI and the HTTP layer. A city is answered from, in order:
//! 1. a labelled row of the city dataset;
//! 2. provider tags plus the row's purpose code, if any, through the classifier;
//! 3. the curated fallback table, when there is neither tag nor purpose code.
//!
//! Also fronts the simple-tags dataset.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::dataset::CityDataset;
use crate::engine::{Classifier, ClassifierHandle, ClassifyOptions};
use crate::fallback::FallbackTable;
use crate::normalize::normalize_city_name;
use crate::ontology::OntologySummary;
use crate::prediction::Prediction;
use crate::provider::{CachedTagProvider, TagProvider};
use crate::simple_tags::{
    convert_ontology_to_simple, CityTags, SimpleCityTags, SimpleTag, TagStatistics,
};
use crate::tags::{RawTag, Rejection, Source, TagRecord, TagStore};
use crate::temporal::Season;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("classify_total", "Classification requests served.");
        describe_counter!(
            "classify_empty_total",
            "Classifications that ended with no labels."
        );
        describe_counter!(
            "classify_fallback_total",
            "Predictions answered from the curated fallback table."
        );
        describe_counter!(
            "classify_dataset_total",
            "Predictions answered from a labelled city-dataset row."
        );
        describe_counter!(
            "tags_rejected_total",
            "Raw tag records rejected by validation."
        );
        describe_histogram!("classify_ms", "Classification time in milliseconds.");
    });
}

/// Per-request options for [`PurposeService::predict`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PredictOptions {
    /// Travel month 1..=12; used when `season` is not given.
    #[serde(default)]
    pub month: Option<u32>,
    #[serde(default)]
    pub season: Option<Season>,
    #[serde(default)]
    pub explain: bool,
}

impl PredictOptions {
    fn classify_options(&self) -> Result<ClassifyOptions> {
        let season = match (self.season, self.month) {
            (Some(s), _) => Some(s),
            (None, Some(m)) => Some(Season::from_month(m)?),
            (None, None) => None,
        };
        Ok(ClassifyOptions {
            season,
            explain: self.explain,
        })
    }
}

/// Prediction plus the raw records that were dropped on the way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifyOutcome {
    pub prediction: Prediction,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<Rejection>,
}

/// City-keyed tables checked against the classifier's ontology. Swapped
/// together on reload.
#[derive(Debug)]
struct CityTables {
    fallback: FallbackTable,
    dataset: CityDataset,
}

impl CityTables {
    fn load(cfg: &AppConfig, classifier: &Classifier) -> Result<Self> {
        let fallback = match &cfg.data.fallback {
            Some(p) => FallbackTable::load_from_file(p)?,
            None => FallbackTable::builtin()?,
        };
        fallback.validate_against(classifier.ontology())?;
        let dataset = match &cfg.data.cities {
            Some(p) => CityDataset::load_from_file(p)?,
            None => CityDataset::default(),
        };
        dataset.validate_against(classifier.ontology())?;
        Ok(Self { fallback, dataset })
    }
}

#[derive(Clone)]
pub struct PurposeService {
    config: AppConfig,
    classifier: ClassifierHandle,
    provider: Arc<dyn TagProvider>,
    tables: Arc<RwLock<Arc<CityTables>>>,
    simple: Arc<RwLock<SimpleCityTags>>,
}

impl PurposeService {
    /// Load every table named in `cfg`. Any configuration error is fatal.
    pub fn from_config(cfg: AppConfig) -> Result<Self> {
        let classifier = Classifier::from_config(&cfg)?;
        let provider: Arc<dyn TagProvider> = match &cfg.data.tags_csv {
            Some(p) => Arc::new(CachedTagProvider::from_csv_path(p)?),
            None => Arc::new(CachedTagProvider::empty()),
        };
        let simple = match &cfg.data.city_tags_csv {
            Some(p) => SimpleCityTags::load(p)?,
            None => SimpleCityTags::default(),
        };
        Self::with_parts(cfg, classifier, provider, simple)
    }

    /// Assemble from already-built parts (tests, embedding).
    pub fn with_parts(
        cfg: AppConfig,
        classifier: Classifier,
        provider: Arc<dyn TagProvider>,
        simple: SimpleCityTags,
    ) -> Result<Self> {
        ensure_metrics_described();
        let tables = CityTables::load(&cfg, &classifier)?;
        info!(
            target: "service",
            provider = provider.name(),
            fallback_cities = tables.fallback.len(),
            dataset_cities = tables.dataset.len(),
            simple_cities = simple.len(),
            "purpose service ready"
        );
        Ok(Self {
            config: cfg,
            classifier: ClassifierHandle::new(classifier),
            provider,
            tables: Arc::new(RwLock::new(Arc::new(tables))),
            simple: Arc::new(RwLock::new(simple)),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn classifier(&self) -> Arc<Classifier> {
        self.classifier.current()
    }

    /// Tags → prediction for a city. Falls back to the curated table when the
    /// provider has no valid tags for it.
    pub async fn predict(&self, city: &str, opts: &PredictOptions) -> Result<Prediction> {
        let city = city.trim();
        if city.is_empty() {
            bail!("city name is empty");
        }
        let copts = opts.classify_options()?;
        let tables = self.tables();
        let row = tables.dataset.find(city);
        if let Some(mut p) = row.and_then(|r| r.prediction()) {
            counter!("classify_total").increment(1);
            counter!("classify_dataset_total").increment(1);
            debug!(target: "service", city, "answered from city dataset");
            p.season = copts.season;
            return Ok(p);
        }
        let purposes: Vec<String> = row.and_then(|r| r.purpose()).map(str::to_string).into_iter().collect();

        let raws = self
            .provider
            .tags_for(city)
            .await
            .with_context(|| format!("fetching tags for {city}"))?;
        let (store, rejected) = validate_batch(&raws);

        if store.is_empty() && purposes.is_empty() {
            if let Some(mut p) = tables.fallback.get(city) {
                counter!("classify_total").increment(1);
                counter!("classify_fallback_total").increment(1);
                debug!(target: "service", city, "answered from fallback table");
                p.season = copts.season;
                p.evidence.rejected = rejected.len();
                return Ok(p);
            }
        }

        let mut p = self.run(&store, &purposes, &copts);
        p.city = Some(city.to_string());
        p.evidence.rejected = rejected.len();
        Ok(p)
    }

    /// Classify caller-supplied raw tags. Invalid records are reported, not fatal.
    pub fn classify_raw(&self, city: Option<&str>, raws: &[RawTag], opts: &PredictOptions) -> Result<ClassifyOutcome> {
        let copts = opts.classify_options()?;
        let (store, rejected) = validate_batch(raws);
        let mut prediction = self.run(&store, &[], &copts);
        prediction.city = city.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        prediction.evidence.rejected = rejected.len();
        Ok(ClassifyOutcome { prediction, rejected })
    }

    fn run(&self, store: &TagStore, purposes: &[String], opts: &ClassifyOptions) -> Prediction {
        let t0 = Instant::now();
        let p = self
            .classifier
            .current()
            .classify_with_purposes(store, purposes, opts);
        histogram!("classify_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("classify_total").increment(1);
        if p.is_empty() {
            counter!("classify_empty_total").increment(1);
        }
        p
    }

    /// Valid tag records for a city, optionally filtered by source and capped.
    pub async fn tags(&self, city: &str, source: Option<Source>, limit: Option<usize>) -> Result<Vec<TagRecord>> {
        let raws = self.provider.tags_for(city.trim()).await?;
        let (store, _) = validate_batch(&raws);
        let out = store
            .iter()
            .filter(|r| source.map_or(true, |s| r.source() == s))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(out)
    }

    /// Every city with dataset or cached evidence, sorted by normalized name.
    /// Dataset spellings win over the provider's normalized keys.
    pub async fn available_cities(&self) -> Result<Vec<String>> {
        let mut out: BTreeMap<String, String> = BTreeMap::new();
        for name in self.tables().dataset.names() {
            out.entry(normalize_city_name(name))
                .or_insert_with(|| name.to_string());
        }
        for name in self.provider.cities().await? {
            out.entry(normalize_city_name(&name)).or_insert(name);
        }
        Ok(out.into_values().collect())
    }

    /// Simple-tags rows whose city or country contains `query` (at most 20).
    pub fn search(&self, query: &str) -> Vec<CityTags> {
        self.with_simple(|t| t.search(query).into_iter().cloned().collect())
    }

    pub fn simple_tags(&self, city: &str, country: Option<&str>) -> Option<CityTags> {
        self.with_simple(|t| t.get_city_tags(city, country).cloned())
    }

    pub fn cities_with_tag(&self, tag: SimpleTag) -> Vec<CityTags> {
        self.with_simple(|t| t.search_by_tag(tag).into_iter().cloned().collect())
    }

    pub fn simple_statistics(&self) -> TagStatistics {
        self.with_simple(SimpleCityTags::statistics)
    }

    /// Collapse a prediction's labels into coarse simple tags.
    pub fn simple_tags_for(&self, prediction: &Prediction) -> Vec<SimpleTag> {
        let classifier = self.classifier.current();
        let labels = prediction
            .main
            .iter()
            .map(|m| m.as_str())
            .chain(prediction.sub.iter().map(String::as_str));
        convert_ontology_to_simple(labels, classifier.ontology())
    }

    pub fn ontology_summary(&self) -> OntologySummary {
        self.classifier.current().ontology().summary()
    }

    /// Re-read the configuration and rebuild the classifier and city tables.
    pub fn reload(&self) -> Result<()> {
        let cfg = AppConfig::load()?;
        self.reload_with(&cfg)
    }

    /// Rebuild the classifier, the fallback table and the city dataset from
    /// `cfg`, and check the city tables against the new ontology before
    /// swapping anything. Everything current keeps serving on error.
    pub fn reload_with(&self, cfg: &AppConfig) -> Result<()> {
        let classifier = Classifier::from_config(cfg).context("reload failed")?;
        let tables = CityTables::load(cfg, &classifier).context("reload failed")?;
        let next = Arc::new(tables);
        match self.tables.write() {
            Ok(mut g) => *g = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        self.classifier.replace(classifier);
        info!(target: "service", "classifier and city tables reloaded");
        Ok(())
    }

    fn tables(&self) -> Arc<CityTables> {
        match self.tables.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with_simple<T>(&self, f: impl FnOnce(&SimpleCityTags) -> T) -> T {
        match self.simple.read() {
            Ok(g) => f(&g),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

fn validate_batch(raws: &[RawTag]) -> (TagStore, Vec<Rejection>) {
    let (store, rejected) = TagStore::from_raw(raws);
    if !rejected.is_empty() {
        counter!("tags_rejected_total").increment(rejected.len() as u64);
        for r in &rejected {
            warn!(target: "service", index = r.index, reason = %r.reason, "tag record rejected");
        }
    }
    (store, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::MainCategory;
    use crate::prediction::Origin;

    fn service(records: Vec<RawTag>) -> PurposeService {
        PurposeService::with_parts(
            AppConfig::default(),
            Classifier::builtin().unwrap(),
            Arc::new(CachedTagProvider::from_records(records)),
            SimpleCityTags::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn predicts_from_provider_tags() {
        let svc = service(vec![
            RawTag::new("ski resort", "booking").for_city("Zermatt"),
            RawTag::new("ski in ski out", "agoda").for_city("Zermatt"),
            RawTag::new("bad", "myspace").for_city("Zermatt"),
        ]);
        let p = svc.predict("zermatt", &PredictOptions::default()).await.unwrap();
        assert_eq!(p.top(), Some(MainCategory::WinterSnow));
        assert_eq!(p.origin, Origin::Classified);
        assert_eq!(p.evidence.rejected, 1);
        assert_eq!(p.city.as_deref(), Some("zermatt"));
    }

    #[tokio::test]
    async fn unknown_city_with_curated_entry_uses_fallback() {
        let svc = service(Vec::new());
        let p = svc.predict("Paris", &PredictOptions::default()).await.unwrap();
        assert_eq!(p.origin, Origin::Fallback);
        assert!(p.main.contains(&MainCategory::CultureHeritage));

        let none = svc.predict("Atlantis", &PredictOptions::default()).await.unwrap();
        assert_eq!(none.origin, Origin::Empty);
        assert_eq!(none.confidence, 0.0);
    }

    #[tokio::test]
    async fn invalid_month_is_an_error() {
        let svc = service(Vec::new());
        let opts = PredictOptions {
            month: Some(13),
            ..PredictOptions::default()
        };
        assert!(svc.predict("Paris", &opts).await.is_err());
        assert!(svc.predict("   ", &PredictOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn tags_filter_and_limit() {
        let svc = service(vec![
            RawTag::new("museum", "booking").for_city("Rome"),
            RawTag::new("old town", "wikidata").for_city("Rome"),
            RawTag::new("gallery", "booking").for_city("Rome"),
        ]);
        assert_eq!(svc.tags("Rome", None, None).await.unwrap().len(), 3);
        assert_eq!(svc.tags("Rome", Some(Source::Booking), None).await.unwrap().len(), 2);
        assert_eq!(svc.tags("Rome", None, Some(1)).await.unwrap().len(), 1);
    }

    #[test]
    fn classify_raw_reports_rejections() {
        let svc = service(Vec::new());
        let raws = vec![
            RawTag::new("beach", "booking"),
            RawTag::new("casino", "booking"),
            RawTag::new("", "booking"),
        ];
        let out = svc.classify_raw(Some("Somewhere"), &raws, &PredictOptions::default()).unwrap();
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.prediction.main.len(), 2);
        assert_eq!(
            svc.simple_tags_for(&out.prediction),
            vec![SimpleTag::Leisure]
        );
    }
}
