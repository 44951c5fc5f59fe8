// src/lib.rs
// Public library surface for the CLI, the HTTP server and integration tests.

pub mod api;
pub mod config;
pub mod engine;
pub mod explain;
pub mod metrics;
pub mod normalize;
pub mod ontology;
pub mod prediction;
pub mod scoring;
pub mod source_weights;
pub mod tags;
pub mod temporal;

// Data sources around the classifier (tag cache, city dataset, curated fallbacks, simple-tag CSV)
pub mod dataset;
pub mod fallback;
pub mod provider;
pub mod service;
pub mod simple_tags;
pub mod synthetic;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::engine::{ClassifyOptions, Classifier, ClassifierHandle};
pub use crate::ontology::{MainCategory, Ontology};
pub use crate::prediction::Prediction;
pub use crate::service::{PredictOptions, PurposeService};
pub use crate::tags::{RawTag, Source, TagRecord};
