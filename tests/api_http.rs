// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - GET /predict       (classified, fallback, bad month)
// - POST /classify     (rejections reported, explain toggle)
// - GET /tags, /search, /simple-tags, /ontology, /cities

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use serde_json::Value as Json;
use std::sync::Arc;
use tower::ServiceExt as _; // for `oneshot`

use travel_purpose::config::AppConfig;
use travel_purpose::provider::CachedTagProvider;
use travel_purpose::simple_tags::SimpleCityTags;
use travel_purpose::{create_router, Classifier, PurposeService, RawTag};

const BODY_LIMIT: usize = 1024 * 1024;

const CITY_TAGS_CSV: &str = "\
City,Country,Region,Tags
Zermatt,Switzerland,Europe,LEISURE
Frankfurt,Germany,Europe,BUSINESS
Hamburg,Germany,Europe,\"SEAMAN,BUSINESS,CRUISE\"
";

/// Service over in-memory tags and a three-row simple-tags table.
fn test_router() -> Router {
    let provider = CachedTagProvider::from_records(vec![
        RawTag::new("Ski Resort", "booking").evidence("structured-data").for_city("Zermatt"),
        RawTag::new("Ski-in/Ski-out", "agoda").for_city("Zermatt"),
        RawTag::new("Mountains", "wikidata").evidence("structured-data").for_city("Zermatt"),
        RawTag::new("Trade Fair", "booking").for_city("Frankfurt"),
        RawTag::new("Stock Exchange", "wikipedia").evidence("heading").for_city("Frankfurt"),
    ]);
    let simple = SimpleCityTags::from_reader(CITY_TAGS_CSV.as_bytes()).expect("simple tags csv");
    let svc = PurposeService::with_parts(
        AppConfig::default(),
        Classifier::builtin().expect("built-in classifier"),
        Arc::new(provider),
        simple,
    )
    .expect("service");
    create_router(svc)
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

async fn get_json(uri: &str) -> (StatusCode, Json) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET");
    let (status, bytes) = send(test_router(), req).await;
    let v = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");
    let (status, bytes) = send(test_router(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(bytes).unwrap().trim(), "ok");
}

#[tokio::test]
async fn api_predict_classifies_known_city() {
    let (status, v) = get_json("/predict?city=Zermatt&explain=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["origin"], "classified");
    assert_eq!(v["main"][0], "Winter_Snow");
    assert!(v["confidence"].as_f64().unwrap() > 0.0);
    assert!(v["confidence_breakdown"].is_object());
    assert!(v["reasons"].as_array().is_some_and(|r| !r.is_empty()));
}

#[tokio::test]
async fn api_predict_season_is_echoed() {
    let (status, v) = get_json("/predict?city=Zermatt&month=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["season"], "winter");
    // explain defaults to off on GET
    assert!(v.get("confidence_breakdown").is_none());
}

#[tokio::test]
async fn api_predict_uses_fallback_without_tags() {
    let (status, v) = get_json("/predict?city=Paris").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["origin"], "fallback");
    let main: Vec<&str> = v["main"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m.as_str())
        .collect();
    assert!(main.contains(&"Culture_Heritage"));
}

#[tokio::test]
async fn api_predict_rejects_bad_month() {
    let (status, _) = get_json("/predict?city=Zermatt&month=13").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn api_classify_reports_rejected_records() {
    let payload = json!({
        "city": "Somewhere",
        "tags": [
            { "tag": "beach", "source": "booking" },
            { "tag": "casino", "source": "booking", "evidence_type": "meta-tag" },
            { "tag": "museum", "source": "myspace" }
        ]
    });
    let req = Request::builder()
        .method("POST")
        .uri("/classify")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST /classify");
    let (status, bytes) = send(test_router(), req).await;
    assert_eq!(status, StatusCode::OK);

    let v: Json = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["rejected"].as_array().unwrap().len(), 1);
    assert_eq!(v["rejected"][0]["index"], 2);
    let p = &v["prediction"];
    assert_eq!(p["city"], "Somewhere");
    assert_eq!(p["main"].as_array().unwrap().len(), 2);
    assert_eq!(p["evidence"]["rejected"], 1);
    assert!(p["confidence_breakdown"]["ambiguity_penalty"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn api_classify_empty_tags_is_zero() {
    let req = Request::builder()
        .method("POST")
        .uri("/classify")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"tags":[],"explain":false}"#))
        .unwrap();
    let (status, bytes) = send(test_router(), req).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["prediction"]["confidence"], 0.0);
    assert_eq!(v["prediction"]["main"], json!([]));
    assert_eq!(v["prediction"]["origin"], "empty");
}

#[tokio::test]
async fn api_tags_filters_by_source() {
    let (status, v) = get_json("/tags?city=Frankfurt&source=booking").await;
    assert_eq!(status, StatusCode::OK);
    let tags = v.as_array().unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0]["raw_text"], "Trade Fair");

    let (status, _) = get_json("/tags?city=Frankfurt&source=myspace").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn api_search_and_simple_tags() {
    let (status, v) = get_json("/search?q=germ").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v.as_array().unwrap().len(), 2);

    let (status, v) = get_json("/simple-tags?city=hamburg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v[0]["tags"], json!(["SEAMAN", "BUSINESS", "CRUISE"]));

    let (status, v) = get_json("/simple-tags?tag=business").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v.as_array().unwrap().len(), 2);

    let (status, _) = get_json("/simple-tags?city=Atlantis").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json("/simple-tags").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn api_cities_lists_cached_cities_sorted() {
    let (status, v) = get_json("/cities").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v, json!(["frankfurt", "zermatt"]));
}

#[tokio::test]
async fn api_ontology_lists_all_main_categories() {
    let (status, v) = get_json("/ontology").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["main_categories"].as_array().unwrap().len(), 12);
    assert!(v["keyword_count"].as_u64().unwrap() > 100);
    let culture = v["subcategories"]["Culture_Heritage"].as_array().unwrap();
    assert!(culture.iter().any(|s| s == "Museums"));
}
