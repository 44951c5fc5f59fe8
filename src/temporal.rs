//! Seasonal adjustment: per-label multipliers keyed by season, applied to raw
//! category scores before normalization. Labels without an entry stay at 1.0.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::ontology::{MainCategory, Ontology};

const BUILTIN_SEASONAL: &str = include_str!("../config/seasonal.toml");

/// Northern-hemisphere meteorological seasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    pub const ALL: [Season; 4] = [Season::Winter, Season::Spring, Season::Summer, Season::Fall];

    /// Month 1..=12 → season. Anything else is an error.
    pub fn from_month(month: u32) -> Result<Self> {
        let s = match month {
            12 | 1 | 2 => Season::Winter,
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Fall,
            _ => bail!("month must be 1..=12, got {month}"),
        };
        Ok(s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Fall => "fall",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Season {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "winter" => Ok(Season::Winter),
            "spring" => Ok(Season::Spring),
            "summer" => Ok(Season::Summer),
            "fall" | "autumn" => Ok(Season::Fall),
            other => Err(anyhow!("unknown season `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SeasonalFile {
    #[serde(default)]
    seasons: BTreeMap<String, BTreeMap<String, f32>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeasonalTable {
    multipliers: BTreeMap<Season, BTreeMap<String, f32>>,
}

impl SeasonalTable {
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_SEASONAL).context("parsing built-in seasonal table")
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading seasonal table from {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid seasonal table in {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: SeasonalFile = toml::from_str(s)?;
        let mut multipliers = BTreeMap::new();
        for (name, entries) in file.seasons {
            let season: Season = name.parse()?;
            for (label, m) in &entries {
                if !m.is_finite() || *m <= 0.0 {
                    bail!("seasonal multiplier for `{label}` in {season} must be > 0, got {m}");
                }
            }
            if multipliers.insert(season, entries).is_some() {
                bail!("season `{season}` configured twice");
            }
        }
        Ok(Self { multipliers })
    }

    /// Multiplier for a main-category or subcategory label; 1.0 when absent.
    pub fn multiplier(&self, label: &str, season: Season) -> f32 {
        self.multipliers
            .get(&season)
            .and_then(|m| m.get(label))
            .copied()
            .unwrap_or(1.0)
    }

    /// Every label must name a main category or a subcategory of `ontology`.
    pub fn validate_against(&self, ontology: &Ontology) -> Result<()> {
        for (season, entries) in &self.multipliers {
            for label in entries.keys() {
                let known = label.parse::<MainCategory>().is_ok() || ontology.is_subcategory(label);
                if !known {
                    bail!("seasonal table ({season}) names unknown category `{label}`");
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.multipliers.values().all(BTreeMap::is_empty)
    }
}
