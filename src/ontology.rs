//! # Ontology
//!
//! Static rule table mapping normalized keywords to travel-purpose categories.
//!
//! - 12 main categories form a closed set ([`MainCategory`]).
//! - Every subcategory is scoped to exactly one main category.
//! - Keywords live in a multimap: one keyword may feed several mappings
//!   (a "historic center" tag supports both heritage and city-break purposes).
//! - Lookup is exact on the normalized keyword; an optional Jaro-Winkler
//!   fallback can be switched on with `fuzzy_threshold`.
//!
//! TOML shape:
//! ```toml
//! fuzzy_threshold = 0.92          # optional
//!
//! [subcategories]
//! Culture_Heritage = ["UNESCO_Site", "Museums"]
//!
//! [[rules]]
//! keywords = ["museum", "art gallery"]
//! main = "Culture_Heritage"
//! sub = ["Museums"]
//! boost = 1.0                     # optional, default 1.0
//! ```
//!
//! Loading is all-or-nothing: any unknown category, mis-scoped subcategory or
//! bad boost fails the whole load. A keyword that feeds several mappings must
//! give them all the same boost, otherwise one more tag could lower the score
//! of a category it supports. The table is read-only afterwards.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::normalize::normalize_signal;

const BUILTIN_ONTOLOGY: &str = include_str!("../config/ontology.toml");

/// Top-level travel purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MainCategory {
    Business,
    Leisure,
    #[serde(rename = "Culture_Heritage")]
    CultureHeritage,
    #[serde(rename = "Beach_Resort")]
    BeachResort,
    #[serde(rename = "Adventure_Nature")]
    AdventureNature,
    Family,
    #[serde(rename = "Winter_Snow")]
    WinterSnow,
    #[serde(rename = "Nightlife_Entertainment")]
    NightlifeEntertainment,
    #[serde(rename = "Seaman_Crew")]
    SeamanCrew,
    #[serde(rename = "Transit_Gateway")]
    TransitGateway,
    #[serde(rename = "Medical_Health")]
    MedicalHealth,
    #[serde(rename = "Religious_Pilgrimage")]
    ReligiousPilgrimage,
}

impl MainCategory {
    pub const ALL: [MainCategory; 12] = [
        MainCategory::Business,
        MainCategory::Leisure,
        MainCategory::CultureHeritage,
        MainCategory::BeachResort,
        MainCategory::AdventureNature,
        MainCategory::Family,
        MainCategory::WinterSnow,
        MainCategory::NightlifeEntertainment,
        MainCategory::SeamanCrew,
        MainCategory::TransitGateway,
        MainCategory::MedicalHealth,
        MainCategory::ReligiousPilgrimage,
    ];

    /// Label as used in configs and results, e.g. `Culture_Heritage`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MainCategory::Business => "Business",
            MainCategory::Leisure => "Leisure",
            MainCategory::CultureHeritage => "Culture_Heritage",
            MainCategory::BeachResort => "Beach_Resort",
            MainCategory::AdventureNature => "Adventure_Nature",
            MainCategory::Family => "Family",
            MainCategory::WinterSnow => "Winter_Snow",
            MainCategory::NightlifeEntertainment => "Nightlife_Entertainment",
            MainCategory::SeamanCrew => "Seaman_Crew",
            MainCategory::TransitGateway => "Transit_Gateway",
            MainCategory::MedicalHealth => "Medical_Health",
            MainCategory::ReligiousPilgrimage => "Religious_Pilgrimage",
        }
    }
}

impl fmt::Display for MainCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MainCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        MainCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow!("unknown main category `{s}`"))
    }
}

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
pub struct OntologyFile {
    #[serde(default)]
    pub fuzzy_threshold: Option<f64>,
    pub subcategories: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub rules: Vec<RuleCfg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleCfg {
    pub keywords: Vec<String>,
    pub main: String,
    #[serde(default)]
    pub sub: Vec<String>,
    #[serde(default = "default_boost")]
    pub boost: f32,
}

fn default_boost() -> f32 {
    1.0
}

/* ----------------------------
Compiled table
---------------------------- */

/// One rule target: a main category, any of its subcategories, and a multiplier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryMapping {
    pub main: MainCategory,
    pub subs: Vec<String>,
    pub boost: f32,
}

/// Result of a keyword lookup.
#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    /// The ontology key that matched (differs from the query on a fuzzy hit).
    pub keyword: &'a str,
    pub mappings: &'a [CategoryMapping],
    pub fuzzy: bool,
}

#[derive(Debug, Clone)]
pub struct Ontology {
    sub_to_main: BTreeMap<String, MainCategory>,
    keywords: BTreeMap<String, Vec<CategoryMapping>>,
    fuzzy_threshold: Option<f64>,
}

/// Serializable overview for API/CLI consumers.
#[derive(Debug, Clone, Serialize)]
pub struct OntologySummary {
    pub main_categories: Vec<MainCategory>,
    pub subcategories: BTreeMap<String, Vec<String>>,
    pub keyword_count: usize,
    pub fuzzy_threshold: Option<f64>,
}

impl Ontology {
    /// The ontology shipped with the crate (`config/ontology.toml`).
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_ONTOLOGY).context("parsing built-in ontology")
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading ontology from {}", path.display()))?;
        let ont = Self::from_toml_str(&content)
            .with_context(|| format!("invalid ontology in {}", path.display()))?;
        info!(
            target: "ontology",
            path = %path.display(),
            keywords = ont.keyword_count(),
            subcategories = ont.sub_to_main.len(),
            "ontology loaded"
        );
        Ok(ont)
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let file: OntologyFile = toml::from_str(toml_str)?;
        Self::compile(file)
    }

    /// Validate and build the lookup structures.
    pub fn compile(file: OntologyFile) -> Result<Self> {
        if let Some(t) = file.fuzzy_threshold {
            if !(t > 0.0 && t <= 1.0) {
                bail!("fuzzy_threshold must be in (0, 1], got {t}");
            }
        }

        // Subcategory scoping
        let mut sub_to_main = BTreeMap::new();
        for (main_name, subs) in &file.subcategories {
            let main: MainCategory = main_name.parse()?;
            for sub in subs {
                let sub = sub.trim();
                if sub.is_empty() {
                    bail!("empty subcategory name under `{main}`");
                }
                if let Some(prev) = sub_to_main.insert(sub.to_string(), main) {
                    if prev != main {
                        bail!("subcategory `{sub}` scoped to both `{prev}` and `{main}`");
                    }
                    bail!("subcategory `{sub}` listed twice under `{main}`");
                }
            }
        }

        if file.rules.is_empty() {
            bail!("ontology has no rules");
        }

        // Keyword multimap
        let mut keywords: BTreeMap<String, Vec<CategoryMapping>> = BTreeMap::new();
        for (i, rule) in file.rules.iter().enumerate() {
            let main: MainCategory = rule
                .main
                .parse()
                .with_context(|| format!("rule #{}", i + 1))?;
            if !rule.boost.is_finite() || rule.boost <= 0.0 {
                bail!("rule #{} has invalid boost {}", i + 1, rule.boost);
            }
            let mut subs = Vec::with_capacity(rule.sub.len());
            for sub in &rule.sub {
                match sub_to_main.get(sub.trim()) {
                    Some(owner) if *owner == main => subs.push(sub.trim().to_string()),
                    Some(owner) => bail!(
                        "rule #{}: subcategory `{}` belongs to `{}`, not `{}`",
                        i + 1,
                        sub,
                        owner,
                        main
                    ),
                    None => bail!("rule #{}: unknown subcategory `{}`", i + 1, sub),
                }
            }
            if rule.keywords.is_empty() {
                bail!("rule #{} has no keywords", i + 1);
            }
            let mapping = CategoryMapping {
                main,
                subs,
                boost: rule.boost,
            };
            let mut seen = BTreeSet::new();
            for kw in &rule.keywords {
                let Some(key) = normalize_signal(kw) else {
                    bail!("rule #{}: keyword `{}` is empty after normalization", i + 1, kw);
                };
                // Spelling variants of one keyword within a rule count once.
                if seen.insert(key.clone()) {
                    keywords.entry(key).or_default().push(mapping.clone());
                }
            }
        }

        for (key, mappings) in &keywords {
            let first = mappings[0].boost;
            if let Some(other) = mappings.iter().find(|m| m.boost != first) {
                bail!(
                    "keyword `{key}` maps with unequal boosts ({first} and {}); one keyword needs one boost",
                    other.boost
                );
            }
        }

        debug!(target: "ontology", keywords = keywords.len(), "ontology compiled");
        Ok(Self {
            sub_to_main,
            keywords,
            fuzzy_threshold: file.fuzzy_threshold,
        })
    }

    /// Resolve a normalized keyword. `None` means "no contribution", not an error.
    pub fn lookup(&self, keyword: &str) -> Option<Resolution<'_>> {
        if let Some((k, mappings)) = self.keywords.get_key_value(keyword) {
            return Some(Resolution {
                keyword: k.as_str(),
                mappings: mappings.as_slice(),
                fuzzy: false,
            });
        }
        let threshold = self.fuzzy_threshold?;
        self.fuzzy_lookup(keyword, threshold)
    }

    /// Exact-match only.
    pub fn resolve(&self, keyword: &str) -> &[CategoryMapping] {
        self.keywords
            .get(keyword)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn fuzzy_lookup(&self, keyword: &str, threshold: f64) -> Option<Resolution<'_>> {
        let mut best: Option<(&String, &Vec<CategoryMapping>, f64)> = None;
        // BTreeMap order: on equal similarity the lexicographically first key wins.
        for (k, v) in &self.keywords {
            let sim = strsim::jaro_winkler(keyword, k);
            if sim >= threshold && best.map_or(true, |(_, _, b)| sim > b) {
                best = Some((k, v, sim));
            }
        }
        best.map(|(k, v, _)| Resolution {
            keyword: k.as_str(),
            mappings: v.as_slice(),
            fuzzy: true,
        })
    }

    pub fn main_of(&self, sub: &str) -> Option<MainCategory> {
        self.sub_to_main.get(sub).copied()
    }

    pub fn is_subcategory(&self, label: &str) -> bool {
        self.sub_to_main.contains_key(label)
    }

    pub fn subcategories_of(&self, main: MainCategory) -> Vec<&str> {
        self.sub_to_main
            .iter()
            .filter(|(_, m)| **m == main)
            .map(|(s, _)| s.as_str())
            .collect()
    }

    pub fn subcategory_count(&self) -> usize {
        self.sub_to_main.len()
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords.len()
    }

    pub fn summary(&self) -> OntologySummary {
        let mut subcategories: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (sub, main) in &self.sub_to_main {
            subcategories
                .entry(main.as_str().to_string())
                .or_default()
                .push(sub.clone());
        }
        OntologySummary {
            main_categories: MainCategory::ALL.to_vec(),
            subcategories,
            keyword_count: self.keyword_count(),
            fuzzy_threshold: self.fuzzy_threshold,
        }
    }
}
