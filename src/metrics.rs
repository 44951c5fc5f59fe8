//! Prometheus exposition for `tpurpose serve`.
//!
//! Counters and the `classify_ms` histogram are emitted by the service; this
//! module installs the recorder, publishes table-size gauges and serves
//! `/metrics`.

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Router};
use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::service::PurposeService;

pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global recorder. Fails if one is already installed.
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        describe_gauge!("ontology_keywords", "Distinct keywords in the loaded ontology.");
        describe_gauge!("ontology_subcategories", "Subcategories in the loaded ontology.");
        describe_gauge!("simple_tag_cities", "Rows in the simple-tags dataset.");

        Ok(Self { handle })
    }

    /// Publish the sizes of the tables behind `svc`. Call again after a reload.
    pub fn record_tables(&self, svc: &PurposeService) {
        let classifier = svc.classifier();
        let ontology = classifier.ontology();
        gauge!("ontology_keywords").set(ontology.keyword_count() as f64);
        gauge!("ontology_subcategories").set(ontology.subcategory_count() as f64);
        gauge!("simple_tag_cities").set(svc.simple_statistics().total_cities as f64);
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(render_metrics))
            .with_state(self.handle.clone())
    }
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
