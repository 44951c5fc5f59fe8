//! Tag providers: anything that can hand over raw tags for a city.
//!
//! Live harvesters are out of scope; the crate ships a cache-backed provider
//! reading `city,tag,source,evidence_type,ts` CSV rows, which is also what the
//! harvesters write.

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::normalize::normalize_city_name;
use crate::tags::RawTag;

#[async_trait]
pub trait TagProvider: Send + Sync {
    /// Raw tags for `city` in harvest order. An unknown city yields an empty list.
    async fn tags_for(&self, city: &str) -> Result<Vec<RawTag>>;

    /// Cities this provider can answer for without going to the network.
    /// Live providers have nothing to list.
    async fn cities(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str;
}

/// In-memory tags keyed by normalized city name.
#[derive(Debug, Clone, Default)]
pub struct CachedTagProvider {
    by_city: BTreeMap<String, Vec<RawTag>>,
}

impl CachedTagProvider {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Records without a city are skipped.
    pub fn from_records<I: IntoIterator<Item = RawTag>>(records: I) -> Self {
        let mut by_city: BTreeMap<String, Vec<RawTag>> = BTreeMap::new();
        for rec in records {
            let Some(city) = rec.city.as_deref().map(normalize_city_name) else {
                continue;
            };
            if city.is_empty() {
                continue;
            }
            by_city.entry(city).or_default().push(rec);
        }
        Self { by_city }
    }

    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening tags cache {}", path.display()))?;
        let p = Self::from_csv_reader(file)
            .with_context(|| format!("reading tags cache {}", path.display()))?;
        info!(
            target: "provider",
            path = %path.display(),
            cities = p.by_city.len(),
            "tags cache loaded"
        );
        Ok(p)
    }

    /// Rows that do not deserialize are logged and skipped; a bad header is an error.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(false)
            .from_reader(reader);
        let headers = rdr.headers().context("missing CSV header")?.clone();
        for required in ["city", "tag", "source"] {
            if !headers.iter().any(|h| h == required) {
                anyhow::bail!("tags CSV is missing the `{required}` column");
            }
        }

        let mut records = Vec::new();
        let mut skipped = 0u64;
        for (line, row) in rdr.deserialize::<RawTag>().enumerate() {
            match row {
                Ok(rec) => records.push(rec),
                Err(e) => {
                    skipped += 1;
                    warn!(target: "provider", row = line + 2, error = %e, "skipping malformed tags row");
                }
            }
        }
        if skipped > 0 {
            counter!("tags_rejected_total").increment(skipped);
        }
        Ok(Self::from_records(records))
    }

    pub fn len(&self) -> usize {
        self.by_city.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_city.is_empty()
    }
}

#[async_trait]
impl TagProvider for CachedTagProvider {
    async fn tags_for(&self, city: &str) -> Result<Vec<RawTag>> {
        let key = normalize_city_name(city);
        let tags = self.by_city.get(&key).cloned().unwrap_or_default();
        debug!(target: "provider", city = %key, tags = tags.len(), "cache lookup");
        Ok(tags)
    }

    async fn cities(&self) -> Result<Vec<String>> {
        Ok(self.by_city.keys().cloned().collect())
    }

    fn name(&self) -> &'static str {
        "cache"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "city,tag,source,evidence_type,ts\n\
        Istanbul,Grand Bazaar,booking,meta-tag,2025-06-01T10:00:00Z\n\
        Istanbul City,historic center,wikidata,structured-data,\n\
        Zermatt,ski resort,booking,,\n";

    #[tokio::test]
    async fn lookup_is_by_normalized_city() {
        let p = CachedTagProvider::from_csv_reader(CSV.as_bytes()).unwrap();
        assert_eq!(p.len(), 2);
        let tags = p.tags_for("  ISTANBUL ").await.unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].tag, "Grand Bazaar");
        assert_eq!(tags[1].source, "wikidata");
        assert!(p.tags_for("Atlantis").await.unwrap().is_empty());
        assert_eq!(p.cities().await.unwrap(), vec!["istanbul", "zermatt"]);
    }

    #[tokio::test]
    async fn empty_evidence_column_validates_as_meta_tag() {
        let p = CachedTagProvider::from_csv_reader(CSV.as_bytes()).unwrap();
        let tags = p.tags_for("zermatt").await.unwrap();
        let rec = tags[0].validate().unwrap();
        assert_eq!(rec.evidence_type(), crate::tags::EvidenceType::MetaTag);
    }

    #[test]
    fn missing_column_is_an_error() {
        assert!(CachedTagProvider::from_csv_reader("town,tag\nRome,museum\n".as_bytes()).is_err());
    }

    #[tokio::test]
    async fn shipped_cache_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/data/tags_cache.csv");
        let p = CachedTagProvider::from_csv_path(path).unwrap();
        let cities = p.cities().await.unwrap();
        assert!(cities.iter().any(|c| c == "istanbul"));
        assert!(cities.iter().any(|c| c == "zermatt"));
    }
}
