//! # Simple city tags
//!
//! A flat lookup table assigning each city up to three of seven coarse tags:
//! BUSINESS, LEISURE, SEAMAN, CRUISE, SECONDHOME, MEDICAL, RELIGIOUS.
//!
//! Stored as CSV with header `City,Country,Region,Tags`, tags comma-joined in
//! one quoted field. This table is curated, not produced by the classifier;
//! [`convert_ontology_to_simple`] bridges the two when a prediction needs to be
//! collapsed into coarse tags.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use crate::normalize::normalize_city_name;
use crate::ontology::{MainCategory, Ontology};

pub const MAX_TAGS_PER_CITY: usize = 3;
pub const MAX_SEARCH_RESULTS: usize = 20;

/// Coarse tag. Declaration order is the priority order used when trimming to three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SimpleTag {
    Business,
    Medical,
    Religious,
    Seaman,
    Cruise,
    Leisure,
    SecondHome,
}

impl SimpleTag {
    pub const ALL: [SimpleTag; 7] = [
        SimpleTag::Business,
        SimpleTag::Leisure,
        SimpleTag::Seaman,
        SimpleTag::Cruise,
        SimpleTag::SecondHome,
        SimpleTag::Medical,
        SimpleTag::Religious,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SimpleTag::Business => "BUSINESS",
            SimpleTag::Leisure => "LEISURE",
            SimpleTag::Seaman => "SEAMAN",
            SimpleTag::Cruise => "CRUISE",
            SimpleTag::SecondHome => "SECONDHOME",
            SimpleTag::Medical => "MEDICAL",
            SimpleTag::Religious => "RELIGIOUS",
        }
    }

    /// Coarse tag for a main category.
    pub fn for_main(main: MainCategory) -> Self {
        match main {
            MainCategory::Business => SimpleTag::Business,
            MainCategory::SeamanCrew => SimpleTag::Seaman,
            MainCategory::TransitGateway => SimpleTag::Cruise,
            MainCategory::MedicalHealth => SimpleTag::Medical,
            MainCategory::ReligiousPilgrimage => SimpleTag::Religious,
            MainCategory::Leisure
            | MainCategory::CultureHeritage
            | MainCategory::BeachResort
            | MainCategory::AdventureNature
            | MainCategory::Family
            | MainCategory::WinterSnow
            | MainCategory::NightlifeEntertainment => SimpleTag::Leisure,
        }
    }
}

impl fmt::Display for SimpleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimpleTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_uppercase().replace(['_', '-', ' '], "");
        SimpleTag::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == key)
            .ok_or_else(|| anyhow!("invalid tag `{}`; expected one of BUSINESS, LEISURE, SEAMAN, CRUISE, SECONDHOME, MEDICAL, RELIGIOUS", s.trim()))
    }
}

/// Collapse ontology labels (main categories or subcategories) into at most
/// three coarse tags, highest priority first. Unknown labels are ignored.
pub fn convert_ontology_to_simple<'a, I>(labels: I, ontology: &Ontology) -> Vec<SimpleTag>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut tags: Vec<SimpleTag> = labels
        .into_iter()
        .filter_map(|l| l.parse::<MainCategory>().ok().or_else(|| ontology.main_of(l)))
        .map(SimpleTag::for_main)
        .collect();
    tags.sort();
    tags.dedup();
    tags.truncate(MAX_TAGS_PER_CITY);
    tags
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CityTags {
    pub city: String,
    pub country: String,
    pub region: String,
    pub tags: Vec<SimpleTag>,
}

impl CityTags {
    fn matches(&self, city_key: &str, country: Option<&str>) -> bool {
        normalize_city_name(&self.city) == city_key
            && country.map_or(true, |c| self.country.trim().eq_ignore_ascii_case(c.trim()))
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct CsvRow {
    #[serde(rename = "City")]
    city: String,
    #[serde(rename = "Country")]
    country: String,
    #[serde(rename = "Region")]
    region: String,
    #[serde(rename = "Tags")]
    tags: String,
}

impl CsvRow {
    fn into_city(self) -> Result<CityTags> {
        if self.city.trim().is_empty() {
            bail!("empty city name");
        }
        let mut tags = Vec::new();
        for t in self.tags.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let tag: SimpleTag = t.parse()?;
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        if tags.len() > MAX_TAGS_PER_CITY {
            bail!("{} tags, at most {MAX_TAGS_PER_CITY} allowed", tags.len());
        }
        Ok(CityTags {
            city: self.city,
            country: self.country,
            region: self.region,
            tags,
        })
    }

    fn from_city(c: &CityTags) -> Self {
        Self {
            city: c.city.clone(),
            country: c.country.clone(),
            region: c.region.clone(),
            tags: c.tags.iter().map(SimpleTag::as_str).collect::<Vec<_>>().join(","),
        }
    }
}

/// Whether `add_city` created a row or replaced the tags of an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Added,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagStatistics {
    pub total_cities: usize,
    pub regions: BTreeMap<String, usize>,
    pub tag_usage: BTreeMap<SimpleTag, usize>,
    pub avg_tags_per_city: f32,
    pub max_tags_per_city: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SimpleCityTags {
    path: Option<PathBuf>,
    rows: Vec<CityTags>,
}

impl SimpleCityTags {
    /// Load from `path`. A missing file gives an empty table (with a warning)
    /// that `save` will create; malformed rows are skipped.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(target: "simple_tags", path = %path.display(), "city tags file not found, starting empty");
            return Ok(Self {
                path: Some(path.to_path_buf()),
                rows: Vec::new(),
            });
        }
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut table = Self::from_reader(file).with_context(|| format!("reading {}", path.display()))?;
        table.path = Some(path.to_path_buf());
        info!(target: "simple_tags", path = %path.display(), cities = table.rows.len(), "city tags loaded");
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut rows = Vec::new();
        for (i, row) in rdr.deserialize::<CsvRow>().enumerate() {
            match row.map_err(anyhow::Error::from).and_then(CsvRow::into_city) {
                Ok(c) => rows.push(c),
                Err(e) => warn!(target: "simple_tags", row = i + 2, error = %e, "skipping city tags row"),
            }
        }
        Ok(Self { path: None, rows })
    }

    /// Write back to the file this table was loaded from.
    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| anyhow!("table was not loaded from a file; use save_to"))?;
        self.save_to(path)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_rows(path.as_ref(), self.rows.iter())?;
        info!(target: "simple_tags", path = %path.as_ref().display(), cities = self.rows.len(), "city tags saved");
        Ok(())
    }

    pub fn cities(&self) -> &[CityTags] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First matching row; `country` narrows the match when the city name is ambiguous.
    pub fn get_city_tags(&self, city: &str, country: Option<&str>) -> Option<&CityTags> {
        let key = normalize_city_name(city);
        self.rows.iter().find(|c| c.matches(&key, country))
    }

    /// Add a city or replace its tags (matched on city + country). Extra tags
    /// beyond three are dropped; an empty tag list is an error.
    pub fn add_city(&mut self, city: &str, country: &str, region: &str, tags: &[SimpleTag]) -> Result<Upsert> {
        if city.trim().is_empty() {
            bail!("city name is empty");
        }
        let mut uniq: Vec<SimpleTag> = Vec::new();
        for t in tags {
            if !uniq.contains(t) {
                uniq.push(*t);
            }
        }
        if uniq.is_empty() {
            bail!("at least one tag is required");
        }
        if uniq.len() > MAX_TAGS_PER_CITY {
            warn!(target: "simple_tags", city, dropped = uniq.len() - MAX_TAGS_PER_CITY, "too many tags, keeping the first three");
            uniq.truncate(MAX_TAGS_PER_CITY);
        }

        let key = normalize_city_name(city);
        if let Some(existing) = self.rows.iter_mut().find(|c| c.matches(&key, Some(country))) {
            existing.tags = uniq;
            info!(target: "simple_tags", city, country, "city tags updated");
            return Ok(Upsert::Updated);
        }
        self.rows.push(CityTags {
            city: city.trim().to_string(),
            country: country.trim().to_string(),
            region: region.trim().to_string(),
            tags: uniq,
        });
        info!(target: "simple_tags", city, country, "city added");
        Ok(Upsert::Added)
    }

    pub fn search_by_tag(&self, tag: SimpleTag) -> Vec<&CityTags> {
        self.rows.iter().filter(|c| c.tags.contains(&tag)).collect()
    }

    /// Substring search over normalized city and country names, at most 20 hits.
    pub fn search(&self, query: &str) -> Vec<&CityTags> {
        let q = normalize_city_name(query);
        if q.is_empty() {
            return Vec::new();
        }
        self.rows
            .iter()
            .filter(|c| normalize_city_name(&c.city).contains(&q) || normalize_city_name(&c.country).contains(&q))
            .take(MAX_SEARCH_RESULTS)
            .collect()
    }

    pub fn statistics(&self) -> TagStatistics {
        let mut regions = BTreeMap::new();
        let mut tag_usage: BTreeMap<SimpleTag, usize> = SimpleTag::ALL.iter().map(|t| (*t, 0)).collect();
        let mut max_tags = 0;
        let mut total_tags = 0;
        for c in &self.rows {
            *regions.entry(c.region.clone()).or_insert(0) += 1;
            for t in &c.tags {
                *tag_usage.entry(*t).or_insert(0) += 1;
            }
            max_tags = max_tags.max(c.tags.len());
            total_tags += c.tags.len();
        }
        let avg = if self.rows.is_empty() {
            0.0
        } else {
            total_tags as f32 / self.rows.len() as f32
        };
        TagStatistics {
            total_cities: self.rows.len(),
            regions,
            tag_usage,
            avg_tags_per_city: avg,
            max_tags_per_city: max_tags,
        }
    }

    /// One `<region>_cities.csv` per region in `dir`. Returns the written paths.
    pub fn export_by_region<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let mut by_region: BTreeMap<&str, Vec<&CityTags>> = BTreeMap::new();
        for c in &self.rows {
            by_region.entry(c.region.as_str()).or_default().push(c);
        }
        let mut written = Vec::new();
        for (region, rows) in by_region {
            let slug = region.trim().to_lowercase().replace(' ', "_");
            let slug = if slug.is_empty() { "unknown".to_string() } else { slug };
            let path = dir.join(format!("{slug}_cities.csv"));
            write_rows(&path, rows.into_iter())?;
            written.push(path);
        }
        Ok(written)
    }
}

fn write_rows<'a>(path: &Path, rows: impl Iterator<Item = &'a CityTags>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut w = csv::Writer::from_path(path).with_context(|| format!("writing {}", path.display()))?;
    for c in rows {
        w.serialize(CsvRow::from_city(c))?;
    }
    w.flush()?;
    Ok(())
}
