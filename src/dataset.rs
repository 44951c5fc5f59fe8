//! # City dataset
//!
//! Pre-classified cities (`data/cities.json`) and the table that maps their
//! coarse `purpose` codes onto ontology categories.
//!
//! A row that carries `main_categories` is answered as-is, before any tag is
//! fetched. A row with only a `purpose` code feeds that code's categories into
//! the scorer as extra evidence, weighted by `scoring.purpose_weight`.
//!
//! ```json
//! [
//!   { "name": "Houston", "main_categories": ["Medical_Health"], "confidence": 0.82 },
//!   { "name": "Manila", "country": "Philippines", "purpose": "SEAMAN" }
//! ]
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::normalize::normalize_city_name;
use crate::ontology::{MainCategory, Ontology};
use crate::prediction::{Origin, Prediction, Reason, ReasonKind};

const BUILTIN_PURPOSE_MAPPING: &str = include_str!("../config/purpose_mapping.toml");

/// Used for labelled rows that omit `confidence`.
pub const DEFAULT_DATASET_CONFIDENCE: f32 = 0.8;

/// Code looked up when a purpose has no entry of its own.
const DEFAULT_PURPOSE: &str = "DEFAULT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Coarse purpose code, e.g. `SEAMAN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub main_categories: Vec<MainCategory>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subcategories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl CityRecord {
    /// The stored answer, when the row is labelled.
    pub fn prediction(&self) -> Option<Prediction> {
        if self.main_categories.is_empty() {
            return None;
        }
        let mut p = Prediction::empty()
            .with_city(self.name.clone())
            .with_reason(Reason::new("pre-classified entry in the city dataset").kind(ReasonKind::Dataset));
        p.main = self.main_categories.clone();
        p.sub = self.subcategories.clone();
        p.confidence = self.confidence.unwrap_or(DEFAULT_DATASET_CONFIDENCE);
        p.origin = Origin::Dataset;
        Some(p)
    }

    pub fn purpose(&self) -> Option<&str> {
        self.purpose.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }
}

/// Rows keyed by normalized city name, in file order.
#[derive(Debug, Clone, Default)]
pub struct CityDataset {
    rows: Vec<CityRecord>,
    index: BTreeMap<String, usize>,
}

impl CityDataset {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading city dataset {}", path.display()))?;
        let ds = Self::from_json_str(&raw)
            .with_context(|| format!("invalid city dataset {}", path.display()))?;
        info!(target: "dataset", path = %path.display(), cities = ds.len(), "city dataset loaded");
        Ok(ds)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let rows: Vec<CityRecord> = serde_json::from_str(s)?;
        Self::from_records(rows)
    }

    pub fn from_records(rows: Vec<CityRecord>) -> Result<Self> {
        let mut index = BTreeMap::new();
        for (i, row) in rows.iter().enumerate() {
            let key = normalize_city_name(&row.name);
            if key.is_empty() {
                bail!("row #{}: city name is empty", i + 1);
            }
            if let Some(c) = row.confidence {
                if !(0.0..=1.0).contains(&c) {
                    bail!("`{}`: confidence must be in [0, 1], got {c}", row.name);
                }
            }
            if row.main_categories.is_empty() && !row.subcategories.is_empty() {
                bail!("`{}`: subcategories given without main categories", row.name);
            }
            if index.insert(key, i).is_some() {
                bail!("`{}` listed twice", row.name);
            }
        }
        Ok(Self { rows, index })
    }

    /// Labelled rows may only name subcategories the ontology knows.
    pub fn validate_against(&self, ontology: &Ontology) -> Result<()> {
        for row in &self.rows {
            if let Some(sub) = row.subcategories.iter().find(|s| !ontology.is_subcategory(s)) {
                bail!("city dataset `{}`: unknown subcategory `{sub}`", row.name);
            }
        }
        Ok(())
    }

    pub fn find(&self, city: &str) -> Option<&CityRecord> {
        self.index
            .get(&normalize_city_name(city))
            .and_then(|i| self.rows.get(*i))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/* ----------------------------
Purpose codes → categories
---------------------------- */

#[derive(Debug, Deserialize)]
struct PurposeFile {
    #[serde(default)]
    purposes: BTreeMap<String, PurposeEntryCfg>,
}

#[derive(Debug, Deserialize)]
struct PurposeEntryCfg {
    #[serde(default)]
    main: Vec<String>,
    #[serde(default)]
    sub: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurposeTarget {
    pub main: Vec<MainCategory>,
    pub sub: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PurposeMapping {
    codes: BTreeMap<String, PurposeTarget>,
}

impl PurposeMapping {
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_PURPOSE_MAPPING).context("parsing built-in purpose mapping")
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading purpose mapping {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid purpose mapping {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: PurposeFile = toml::from_str(s)?;
        let mut codes = BTreeMap::new();
        for (code, cfg) in file.purposes {
            let main = cfg
                .main
                .iter()
                .map(|m| m.parse::<MainCategory>())
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("purpose `{code}`"))?;
            if main.is_empty() {
                bail!("purpose `{code}` maps to no main category");
            }
            let key = code.trim().to_ascii_uppercase();
            let target = PurposeTarget { main, sub: cfg.sub };
            if codes.insert(key.clone(), target).is_some() {
                bail!("purpose `{key}` listed twice");
            }
        }
        Ok(Self { codes })
    }

    pub fn validate_against(&self, ontology: &Ontology) -> Result<()> {
        for (code, target) in &self.codes {
            if let Some(sub) = target.sub.iter().find(|s| !ontology.is_subcategory(s)) {
                bail!("purpose `{code}`: unknown subcategory `{sub}`");
            }
        }
        Ok(())
    }

    /// Case-insensitive; falls back to `DEFAULT` when present.
    pub fn resolve(&self, code: &str) -> Option<&PurposeTarget> {
        self.codes
            .get(&code.trim().to_ascii_uppercase())
            .or_else(|| self.codes.get(DEFAULT_PURPOSE))
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_mapping_matches_ontology() {
        let m = PurposeMapping::builtin().unwrap();
        m.validate_against(&Ontology::builtin().unwrap()).unwrap();
        let seaman = m.resolve(" seaman ").unwrap();
        assert_eq!(seaman.main, vec![MainCategory::SeamanCrew]);
        // unknown code lands on DEFAULT
        assert_eq!(m.resolve("GOLF").unwrap().main, vec![MainCategory::Leisure]);
    }

    #[test]
    fn mapping_without_default_leaves_unknown_codes_alone() {
        let m = PurposeMapping::from_toml_str("[purposes.port]\nmain = [\"Seaman_Crew\"]\n").unwrap();
        assert!(m.resolve("PORT").is_some());
        assert!(m.resolve("GOLF").is_none());
        assert!(PurposeMapping::from_toml_str("[purposes.x]\nmain = []\n").is_err());
        assert!(PurposeMapping::from_toml_str("[purposes.x]\nmain = [\"Shopping\"]\n").is_err());
    }

    #[test]
    fn labelled_row_answers_directly() {
        let ds = CityDataset::from_json_str(
            r#"[
                {"name": "Busan", "main_categories": ["Seaman_Crew"], "subcategories": ["Shipyards"]},
                {"name": "Manila City", "purpose": "SEAMAN"}
            ]"#,
        )
        .unwrap();
        let p = ds.find("BUSAN").unwrap().prediction().unwrap();
        assert_eq!(p.origin, Origin::Dataset);
        assert_eq!(p.confidence, DEFAULT_DATASET_CONFIDENCE);
        assert_eq!(p.sub, vec!["Shipyards".to_string()]);

        let manila = ds.find("manila").unwrap();
        assert!(manila.prediction().is_none());
        assert_eq!(manila.purpose(), Some("SEAMAN"));
        assert_eq!(ds.names().collect::<Vec<_>>(), vec!["Busan", "Manila City"]);
    }

    #[test]
    fn bad_rows_are_rejected() {
        assert!(CityDataset::from_json_str(r#"[{"name": " "}]"#).is_err());
        assert!(CityDataset::from_json_str(r#"[{"name": "a"}, {"name": "A"}]"#).is_err());
        assert!(CityDataset::from_json_str(
            r#"[{"name": "a", "main_categories": ["Leisure"], "confidence": 1.2}]"#
        )
        .is_err());
        assert!(CityDataset::from_json_str(r#"[{"name": "a", "subcategories": ["Luxury"]}]"#).is_err());

        let ds = CityDataset::from_json_str(
            r#"[{"name": "a", "main_categories": ["Leisure"], "subcategories": ["Moon_Base"]}]"#,
        )
        .unwrap();
        assert!(ds.validate_against(&Ontology::builtin().unwrap()).is_err());
    }

    #[test]
    fn shipped_dataset_is_consistent() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/data/cities.json");
        let ds = CityDataset::load_from_file(path).unwrap();
        ds.validate_against(&Ontology::builtin().unwrap()).unwrap();
        assert!(ds.find("Houston").unwrap().prediction().is_some());
    }
}
