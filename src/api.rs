use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::ontology::OntologySummary;
use crate::prediction::Prediction;
use crate::service::{ClassifyOutcome, PredictOptions, PurposeService};
use crate::simple_tags::{CityTags, SimpleTag};
use crate::tags::{RawTag, Source, TagRecord};
use crate::temporal::Season;

type ApiError = (StatusCode, String);

#[derive(Clone)]
pub struct AppState {
    service: PurposeService,
}

pub fn create_router(service: PurposeService) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/predict", get(predict))
        .route("/classify", post(classify))
        .route("/tags", get(tags))
        .route("/search", get(search))
        .route("/cities", get(cities))
        .route("/simple-tags", get(simple_tags))
        .route("/ontology", get(ontology))
        .route("/admin/reload", post(admin_reload))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn bad_request(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::BAD_REQUEST, e.to_string())
}

#[derive(Deserialize)]
struct PredictQuery {
    city: String,
    #[serde(default)]
    month: Option<u32>,
    #[serde(default)]
    season: Option<Season>,
    #[serde(default)]
    explain: bool,
}

async fn predict(
    State(state): State<AppState>,
    Query(q): Query<PredictQuery>,
) -> Result<Json<Prediction>, ApiError> {
    let opts = PredictOptions {
        month: q.month,
        season: q.season,
        explain: q.explain,
    };
    state
        .service
        .predict(&q.city, &opts)
        .await
        .map(Json)
        .map_err(bad_request)
}

#[derive(Deserialize)]
struct ClassifyReq {
    #[serde(default)]
    city: Option<String>,
    tags: Vec<RawTag>,
    #[serde(default)]
    month: Option<u32>,
    #[serde(default)]
    season: Option<Season>,
    #[serde(default = "default_true")]
    explain: bool,
}

fn default_true() -> bool {
    true
}

async fn classify(
    State(state): State<AppState>,
    Json(body): Json<ClassifyReq>,
) -> Result<Json<ClassifyOutcome>, ApiError> {
    let opts = PredictOptions {
        month: body.month,
        season: body.season,
        explain: body.explain,
    };
    state
        .service
        .classify_raw(body.city.as_deref(), &body.tags, &opts)
        .map(Json)
        .map_err(bad_request)
}

#[derive(Deserialize)]
struct TagsQuery {
    city: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn tags(
    State(state): State<AppState>,
    Query(q): Query<TagsQuery>,
) -> Result<Json<Vec<TagRecord>>, ApiError> {
    let source = match q.source.as_deref() {
        Some(s) => Some(s.parse::<Source>().map_err(bad_request)?),
        None => None,
    };
    match state.service.tags(&q.city, source, q.limit).await {
        Ok(t) => Ok(Json(t)),
        Err(e) => {
            warn!(target: "api", error = %e, "tags lookup failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

async fn search(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> Json<Vec<CityTags>> {
    Json(state.service.search(&q.q))
}

#[derive(Deserialize)]
struct SimpleTagsQuery {
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    tag: Option<String>,
}

/// `?city=..[&country=..]` for one city, or `?tag=..` for every city carrying a tag.
async fn simple_tags(
    State(state): State<AppState>,
    Query(q): Query<SimpleTagsQuery>,
) -> Result<Json<Vec<CityTags>>, ApiError> {
    if let Some(tag) = q.tag.as_deref() {
        let tag: SimpleTag = tag.parse().map_err(bad_request)?;
        return Ok(Json(state.service.cities_with_tag(tag)));
    }
    let Some(city) = q.city.as_deref() else {
        return Err(bad_request("either `city` or `tag` is required"));
    };
    match state.service.simple_tags(city, q.country.as_deref()) {
        Some(row) => Ok(Json(vec![row])),
        None => Err((StatusCode::NOT_FOUND, format!("city not found: {city}"))),
    }
}

async fn ontology(State(state): State<AppState>) -> Json<OntologySummary> {
    Json(state.service.ontology_summary())
}

async fn cities(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    state
        .service
        .available_cities()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn admin_reload(State(state): State<AppState>) -> Result<String, ApiError> {
    match state.service.reload() {
        Ok(()) => Ok("reloaded".to_string()),
        Err(e) => {
            warn!(target: "api", error = %e, "reload failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, format!("failed: {e:#}")))
        }
    }
}
