//! Curated fallback predictions for well-known cities, used only when no tag
//! evidence is available.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::normalize::normalize_city_name;
use crate::ontology::{MainCategory, Ontology};
use crate::prediction::{Origin, Prediction, Reason, ReasonKind};

const BUILTIN_FALLBACK: &str = include_str!("../config/fallback_cities.toml");

#[derive(Debug, Deserialize)]
struct FallbackFile {
    #[serde(default)]
    cities: BTreeMap<String, FallbackEntryCfg>,
}

#[derive(Debug, Deserialize)]
struct FallbackEntryCfg {
    main: Vec<String>,
    #[serde(default)]
    sub: Vec<String>,
    confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackEntry {
    pub main: Vec<MainCategory>,
    pub sub: Vec<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct FallbackTable {
    cities: BTreeMap<String, FallbackEntry>,
}

impl FallbackTable {
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_FALLBACK).context("parsing built-in fallback table")
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading fallback table {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid fallback table {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: FallbackFile = toml::from_str(s)?;
        let mut cities = BTreeMap::new();
        for (name, cfg) in file.cities {
            if !(0.0..=1.0).contains(&cfg.confidence) {
                bail!("fallback confidence for `{name}` must be in [0, 1]");
            }
            let main = cfg
                .main
                .iter()
                .map(|m| m.parse::<MainCategory>())
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("fallback entry `{name}`"))?;
            let key = normalize_city_name(&name);
            let entry = FallbackEntry {
                main,
                sub: cfg.sub,
                confidence: cfg.confidence,
            };
            if cities.insert(key.clone(), entry).is_some() {
                bail!("fallback city `{key}` listed twice");
            }
        }
        Ok(Self { cities })
    }

    /// Every subcategory must exist in the ontology. Curated entries may list a
    /// subcategory whose main category did not make the cut.
    pub fn validate_against(&self, ontology: &Ontology) -> Result<()> {
        for (city, entry) in &self.cities {
            if let Some(sub) = entry.sub.iter().find(|s| !ontology.is_subcategory(s)) {
                bail!("fallback `{city}`: unknown subcategory `{sub}`");
            }
        }
        Ok(())
    }

    pub fn entry(&self, city: &str) -> Option<&FallbackEntry> {
        self.cities.get(&normalize_city_name(city))
    }

    pub fn get(&self, city: &str) -> Option<Prediction> {
        let e = self.entry(city)?;
        let mut p = Prediction::empty()
            .with_city(city.trim())
            .with_reason(Reason::new("curated fallback entry, no tag evidence available").kind(ReasonKind::Fallback));
        p.main = e.main.clone();
        p.sub = e.sub.clone();
        p.confidence = e.confidence;
        p.origin = Origin::Fallback;
        Some(p)
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_entries_are_consistent() {
        let t = FallbackTable::builtin().unwrap();
        assert_eq!(t.len(), 20);
        t.validate_against(&Ontology::builtin().unwrap()).unwrap();
    }

    #[test]
    fn lookup_normalizes_city() {
        let t = FallbackTable::builtin().unwrap();
        let p = t.get("New York City").unwrap();
        assert_eq!(p.origin, Origin::Fallback);
        assert_eq!(p.main[0], MainCategory::Business);
        assert_eq!(p.city.as_deref(), Some("New York City"));
        assert!(t.get("Atlantis").is_none());
    }

    #[test]
    fn bad_entries_rejected() {
        assert!(FallbackTable::from_toml_str("[cities.x]\nmain = [\"Shopping\"]\nconfidence = 0.5").is_err());
        assert!(FallbackTable::from_toml_str("[cities.x]\nmain = [\"Leisure\"]\nconfidence = 1.5").is_err());
        let t = FallbackTable::from_toml_str(
            "[cities.x]\nmain = [\"Leisure\"]\nsub = [\"Moon_Base\"]\nconfidence = 0.5",
        )
        .unwrap();
        assert!(t.validate_against(&Ontology::builtin().unwrap()).is_err());
    }
}
