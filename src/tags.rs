//! # Tag Records
//!
//! One observed signal about a city: the raw text as harvested, the source it
//! came from and how it was extracted. Records are immutable once built; a
//! [`TagStore`] is an append-only sequence of them consumed by the classifier.
//!
//! Harvesters and CSV caches hand over loosely-typed [`RawTag`]s. Each one is
//! validated on its own: a malformed record is rejected (and reported back as a
//! [`Rejection`]) without affecting the rest of the batch.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Originating collaborator of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Wikidata,
    Wikipedia,
    Unesco,
    Geonames,
    Opentripmap,
    Restcountries,
    Booking,
    Agoda,
    Trivago,
    Kayak,
    Tripdotcom,
    Skyscanner,
    Cached,
}

impl Source {
    pub const ALL: [Source; 13] = [
        Source::Wikidata,
        Source::Wikipedia,
        Source::Unesco,
        Source::Geonames,
        Source::Opentripmap,
        Source::Restcountries,
        Source::Booking,
        Source::Agoda,
        Source::Trivago,
        Source::Kayak,
        Source::Tripdotcom,
        Source::Skyscanner,
        Source::Cached,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Wikidata => "wikidata",
            Source::Wikipedia => "wikipedia",
            Source::Unesco => "unesco",
            Source::Geonames => "geonames",
            Source::Opentripmap => "opentripmap",
            Source::Restcountries => "restcountries",
            Source::Booking => "booking",
            Source::Agoda => "agoda",
            Source::Trivago => "trivago",
            Source::Kayak => "kayak",
            Source::Tripdotcom => "tripdotcom",
            Source::Skyscanner => "skyscanner",
            Source::Cached => "cached",
        }
    }

    /// Curated knowledge bases, trusted above commercial platform scrapes.
    pub fn is_authority(&self) -> bool {
        matches!(
            self,
            Source::Wikidata | Source::Wikipedia | Source::Unesco | Source::Geonames
        )
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = anyhow::Error;

    /// Case-insensitive; separators are ignored so "Trip.com" and "trip_com" both parse.
    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase().replace(['-', '_', ' ', '.'], "");
        let src = match key.as_str() {
            "wikidata" => Source::Wikidata,
            "wikipedia" | "wiki" => Source::Wikipedia,
            "unesco" => Source::Unesco,
            "geonames" => Source::Geonames,
            "opentripmap" | "otm" => Source::Opentripmap,
            "restcountries" => Source::Restcountries,
            "booking" | "bookingcom" => Source::Booking,
            "agoda" => Source::Agoda,
            "trivago" => Source::Trivago,
            "kayak" => Source::Kayak,
            "tripdotcom" | "tripcom" | "trip" => Source::Tripdotcom,
            "skyscanner" => Source::Skyscanner,
            "cached" | "cache" => Source::Cached,
            _ => bail!("unknown source `{}`", s.trim()),
        };
        Ok(src)
    }
}

/// Extraction method of a tag, a proxy for how much the signal can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvidenceType {
    StructuredData,
    MetaTag,
    Heading,
    Curated,
}

impl EvidenceType {
    pub const ALL: [EvidenceType; 4] = [
        EvidenceType::StructuredData,
        EvidenceType::MetaTag,
        EvidenceType::Heading,
        EvidenceType::Curated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceType::StructuredData => "structured-data",
            EvidenceType::MetaTag => "meta-tag",
            EvidenceType::Heading => "heading",
            EvidenceType::Curated => "curated",
        }
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvidenceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "");
        let ev = match key.as_str() {
            "structureddata" | "structured" | "jsonld" => EvidenceType::StructuredData,
            "metatag" | "meta" => EvidenceType::MetaTag,
            "heading" | "h1" | "h2" => EvidenceType::Heading,
            "curated" | "category" => EvidenceType::Curated,
            _ => bail!("unknown evidence type `{}`", s.trim()),
        };
        Ok(ev)
    }
}

/// One validated signal. Fields are private: a record cannot change once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    raw_text: String,
    source: Source,
    evidence_type: EvidenceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

impl TagRecord {
    pub fn new(raw_text: impl Into<String>, source: Source, evidence_type: EvidenceType) -> Self {
        Self {
            raw_text: raw_text.into(),
            source,
            evidence_type,
            timestamp: None,
        }
    }

    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn evidence_type(&self) -> EvidenceType {
        self.evidence_type
    }

    /// Informational only; scoring ignores recency.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }
}

/// Loosely-typed tag as delivered by harvesters, caches and API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    pub tag: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

impl RawTag {
    pub fn new(tag: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            city: None,
            tag: tag.into(),
            source: source.into(),
            evidence_type: None,
            ts: None,
        }
    }

    pub fn evidence(mut self, evidence_type: impl Into<String>) -> Self {
        self.evidence_type = Some(evidence_type.into());
        self
    }

    pub fn for_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// Validate into a [`TagRecord`].
    ///
    /// A missing or blank evidence type counts as a plain meta tag; an unknown
    /// one is an error, as is an unknown source, blank text or an unparseable
    /// RFC 3339 timestamp.
    pub fn validate(&self) -> Result<TagRecord> {
        if self.tag.trim().is_empty() {
            bail!("empty tag text");
        }
        let source: Source = self.source.parse()?;
        let evidence_type = match self.evidence_type.as_deref().map(str::trim) {
            None | Some("") => EvidenceType::MetaTag,
            Some(ev) => ev.parse()?,
        };
        let timestamp = match self.ts.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(ts) => Some(
                DateTime::parse_from_rfc3339(ts)
                    .map_err(|e| anyhow!("bad timestamp `{ts}`: {e}"))?
                    .with_timezone(&Utc),
            ),
        };
        Ok(TagRecord {
            raw_text: self.tag.clone(),
            source,
            evidence_type,
            timestamp,
        })
    }
}

/// A raw record excluded from aggregation, with its position in the input batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub index: usize,
    pub tag: String,
    pub reason: String,
}

/// Ordered, append-only collection of tag records for one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagStore {
    records: Vec<TagRecord>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: TagRecord) {
        self.records.push(record);
    }

    /// Validate a batch, keeping the good records in input order.
    pub fn from_raw<'a, I>(raws: I) -> (Self, Vec<Rejection>)
    where
        I: IntoIterator<Item = &'a RawTag>,
    {
        let mut store = Self::new();
        let mut rejected = Vec::new();
        for (index, raw) in raws.into_iter().enumerate() {
            match raw.validate() {
                Ok(rec) => store.push(rec),
                Err(e) => rejected.push(Rejection {
                    index,
                    tag: raw.tag.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        (store, rejected)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TagRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<TagRecord> for TagStore {
    fn from_iter<T: IntoIterator<Item = TagRecord>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a TagStore {
    type Item = &'a TagRecord;
    type IntoIter = std::slice::Iter<'a, TagRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
