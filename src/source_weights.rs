//! # Source Weights
//!
//! Multipliers applied to every tag contribution:
//!
//! `contribution = source_weight(source) × evidence_weight(evidence_type) × rule boost`
//!
//! - Loads from TOML or JSON (picked by file extension).
//! - Keys are parsed with the same alias rules as tag records, so `trip.com`
//!   and `tripdotcom` name the same source.
//! - Sources without an entry fall back to `default_weight`; evidence types
//!   without an entry fall back to 1.0.
//! - Values must lie in (0, 10]. Values outside the usual [0.7, 2.0] band are
//!   accepted with a warning.
//! - Includes a built-in `default_seed()` with the standard catalogue.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::Path};
use tracing::{info, warn};

use crate::tags::{EvidenceType, Source, TagRecord};

const MAX_WEIGHT: f32 = 10.0;
const TYPICAL_RANGE: (f32, f32) = (0.7, 2.0);

/// On-disk shape; keys are still strings here.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceWeightsConfig {
    /// Weight for a source without an explicit entry.
    #[serde(default = "default_default_weight")]
    pub default_weight: f32,
    #[serde(default)]
    pub sources: BTreeMap<String, f32>,
    #[serde(default)]
    pub evidence: BTreeMap<String, f32>,
}

fn default_default_weight() -> f32 {
    0.70
}

/// Validated, read-only multiplier table.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    default_weight: f32,
    sources: BTreeMap<Source, f32>,
    evidence: BTreeMap<EvidenceType, f32>,
}

impl WeightTable {
    /// Load from a `.toml` or `.json` file. Missing or malformed files are errors.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading weight table from {}", path.display()))?;
        let cfg: SourceWeightsConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)
                .with_context(|| format!("parsing JSON {}", path.display()))?,
            _ => toml::from_str(&raw)
                .with_context(|| format!("parsing TOML {}", path.display()))?,
        };
        let table = Self::from_config(cfg)
            .with_context(|| format!("invalid weight table in {}", path.display()))?;
        info!(
            target: "weights",
            path = %path.display(),
            sources = table.sources.len(),
            evidence = table.evidence.len(),
            "weight table loaded"
        );
        Ok(table)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: SourceWeightsConfig = toml::from_str(s)?;
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: SourceWeightsConfig) -> Result<Self> {
        check_weight("default_weight", cfg.default_weight)?;

        let mut sources = BTreeMap::new();
        for (name, w) in &cfg.sources {
            let src: Source = name.parse()?;
            check_weight(name, *w)?;
            if sources.insert(src, *w).is_some() {
                bail!("source `{src}` configured twice");
            }
        }

        let mut evidence = BTreeMap::new();
        for (name, w) in &cfg.evidence {
            let ev: EvidenceType = name.parse()?;
            check_weight(name, *w)?;
            if evidence.insert(ev, *w).is_some() {
                bail!("evidence type `{ev}` configured twice");
            }
        }

        Ok(Self {
            default_weight: cfg.default_weight,
            sources,
            evidence,
        })
    }

    pub fn source_weight(&self, source: Source) -> f32 {
        self.sources
            .get(&source)
            .copied()
            .unwrap_or(self.default_weight)
    }

    pub fn evidence_weight(&self, evidence: EvidenceType) -> f32 {
        self.evidence.get(&evidence).copied().unwrap_or(1.0)
    }

    /// Source × evidence multiplier for one record (before any rule boost).
    pub fn contribution(&self, record: &TagRecord) -> f32 {
        self.source_weight(record.source()) * self.evidence_weight(record.evidence_type())
    }

    pub fn default_weight(&self) -> f32 {
        self.default_weight
    }

    /// Built-in table with the standard source catalogue.
    /// Used when no weight file is configured.
    pub fn default_seed() -> Self {
        let sources = [
            (Source::Unesco, 2.0),
            (Source::Wikidata, 1.5),
            (Source::Wikipedia, 1.3),
            (Source::Geonames, 1.2),
            (Source::Opentripmap, 1.1),
            (Source::Restcountries, 1.0),
            (Source::Booking, 1.0),
            (Source::Agoda, 1.0),
            (Source::Trivago, 0.9),
            (Source::Kayak, 0.9),
            (Source::Tripdotcom, 0.9),
            (Source::Skyscanner, 0.8),
            (Source::Cached, 0.8),
        ]
        .into_iter()
        .collect();

        let evidence = [
            (EvidenceType::StructuredData, 1.2),
            (EvidenceType::MetaTag, 1.0),
            (EvidenceType::Heading, 0.8),
            (EvidenceType::Curated, 1.3),
        ]
        .into_iter()
        .collect();

        Self {
            default_weight: default_default_weight(),
            sources,
            evidence,
        }
    }
}

fn check_weight(name: &str, w: f32) -> Result<()> {
    if !w.is_finite() || w <= 0.0 || w > MAX_WEIGHT {
        bail!("weight for `{name}` must be in (0, {MAX_WEIGHT}], got {w}");
    }
    if w < TYPICAL_RANGE.0 || w > TYPICAL_RANGE.1 {
        warn!(target: "weights", name, weight = w, "weight outside the usual 0.7..=2.0 band");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> WeightTable {
        WeightTable::default_seed()
    }

    #[test]
    fn exact_match() {
        let c = cfg();
        assert!((c.source_weight(Source::Unesco) - 2.0).abs() < 1e-6);
        assert!((c.evidence_weight(EvidenceType::Curated) - 1.3).abs() < 1e-6);
    }

    #[test]
    fn authority_sources_outweigh_platforms() {
        let c = cfg();
        for src in Source::ALL.iter().filter(|s| s.is_authority()) {
            assert!(c.source_weight(*src) > c.source_weight(Source::Booking));
        }
    }

    #[test]
    fn contribution_multiplies_source_and_evidence() {
        let c = cfg();
        let rec = TagRecord::new("museum", Source::Wikidata, EvidenceType::StructuredData);
        assert!((c.contribution(&rec) - 1.8).abs() < 1e-6);
    }

    #[test]
    fn default_weight_used() {
        let c = WeightTable::from_toml_str(
            r#"
            default_weight = 0.75
            [sources]
            unesco = 2.0
            "#,
        )
        .unwrap();
        assert!((c.source_weight(Source::Kayak) - 0.75).abs() < 1e-6);
        assert!((c.evidence_weight(EvidenceType::Heading) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn aliased_keys_parse() {
        let c = WeightTable::from_toml_str(
            r#"
            [sources]
            "Trip.com" = 0.95
            [evidence]
            jsonld = 1.25
            "#,
        )
        .unwrap();
        assert!((c.source_weight(Source::Tripdotcom) - 0.95).abs() < 1e-6);
        assert!((c.evidence_weight(EvidenceType::StructuredData) - 1.25).abs() < 1e-6);
    }

    #[test]
    fn unknown_keys_and_bad_values_are_fatal() {
        assert!(WeightTable::from_toml_str("[sources]\nmyspace = 1.0").is_err());
        assert!(WeightTable::from_toml_str("[evidence]\nrumour = 1.0").is_err());
        assert!(WeightTable::from_toml_str("[sources]\nbooking = 0.0").is_err());
        assert!(WeightTable::from_toml_str("[sources]\nbooking = 11.0").is_err());
        assert!(WeightTable::from_toml_str("[sources]\nbooking = 1.0\nbooking_com = 1.1").is_err());
    }

    #[test]
    fn shipped_file_matches_seed() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/source_weights.toml");
        let loaded = WeightTable::load_from_file(path).unwrap();
        assert_eq!(loaded, WeightTable::default_seed());
    }

    #[test]
    fn json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("weights.json");
        fs::write(
            &p,
            r#"{"default_weight": 0.8, "sources": {"wikidata": 1.6}, "evidence": {"heading": 0.9}}"#,
        )
        .unwrap();
        let c = WeightTable::load_from_file(&p).unwrap();
        assert!((c.source_weight(Source::Wikidata) - 1.6).abs() < 1e-6);
        assert!((c.default_weight() - 0.8).abs() < 1e-6);
        assert!(WeightTable::load_from_file(dir.path().join("missing.toml")).is_err());
    }
}
