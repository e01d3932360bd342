use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::common::{TEST_API_KEY, setup_test_app};

async fn send(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .body(Body::empty())
        .unwrap()
}

fn authed_post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app();

    let (status, json) = send(
        app.router,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["sessions_in_use"], 0);
    assert_eq!(json["sessions_capacity"], 5);
}

#[tokio::test]
async fn health_reports_shut_down_pool() {
    let app = setup_test_app();
    app.service.shutdown();

    let (status, json) = send(
        app.router,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "unhealthy");
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app();

    let (status, json) = send(
        app.router,
        Request::get("/v1/sources").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_test_app();

    let (status, _) = send(
        app.router,
        Request::get("/v1/sources")
            .header("authorization", "Bearer wrong-key")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn lists_known_sources() {
    let app = setup_test_app();

    let (status, json) = send(app.router, authed_get("/v1/sources")).await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = json["sources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        ["amazon", "eprice", "unieuro", "mediaworld", "trovaprezzi"]
    );
    assert_eq!(json["sources"][0]["reliability"], "high");
}

#[tokio::test]
async fn search_returns_cheapest_offer() {
    let app = setup_test_app();

    let (status, json) = send(
        app.router,
        authed_post(
            "/v1/search",
            serde_json::json!({
                "query": "Mouse Logitech MX Master 3",
                "sources": ["eprice", "amazon"],
                "max_results_per_source": 10
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["results"][0]["source"], "eprice");
    assert_eq!(json["results"][1]["source"], "amazon");
    assert_eq!(json["best"]["source"], "amazon");
    assert_eq!(json["best"]["price"], 79.99);
    assert_eq!(json["best"]["availability"], "in_stock");
    assert_eq!(json["successful_sources"], 2);
}

#[tokio::test]
async fn source_failures_are_reported_per_source() {
    let app = setup_test_app();

    let (status, json) = send(
        app.router,
        authed_post(
            "/v1/search",
            serde_json::json!({
                "query": "mouse",
                "sources": ["amazon", "unieuro", "mediaworld"]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["results"][0]["success"], true);
    assert_eq!(json["results"][1]["success"], false);
    assert_eq!(json["results"][1]["error_kind"], "blocked_error");
    // No adapter is registered for mediaworld.
    assert_eq!(json["results"][2]["error_kind"], "unavailable");
    assert_eq!(json["best"]["source"], "amazon");
}

#[tokio::test]
async fn unknown_source_returns_400() {
    let app = setup_test_app();

    let (status, json) = send(
        app.router,
        authed_post(
            "/v1/search",
            serde_json::json!({ "query": "mouse", "sources": ["ebay"] }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");
    assert_eq!(app.amazon.calls(), 0);
}

#[tokio::test]
async fn quick_search_uses_default_sources() {
    let app = setup_test_app();

    let (status, json) = send(app.router, authed_get("/v1/search/quick?q=mouse")).await;

    assert_eq!(status, StatusCode::OK);
    let sources: Vec<&str> = json["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["source"].as_str().unwrap())
        .collect();
    assert_eq!(sources, ["amazon", "eprice", "trovaprezzi"]);
    assert_eq!(json["best"]["source"], "trovaprezzi");
}

#[tokio::test]
async fn quick_search_with_explicit_sources() {
    let app = setup_test_app();

    let (status, json) = send(
        app.router,
        authed_get("/v1/search/quick?q=mouse&sources=eprice,%20amazon"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["results"].as_array().unwrap().len(), 2);
    assert_eq!(json["results"][0]["source"], "eprice");
}

#[tokio::test]
async fn quick_search_by_barcode() {
    let app = setup_test_app();

    let (status, json) = send(
        app.router,
        authed_get("/v1/search/quick?barcode=5099206085800&sources=amazon"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["barcode"], "5099206085800");
    assert_eq!(json["query"], "");
    assert_eq!(json["results"][0]["source"], "amazon");
    assert_eq!(app.amazon.calls(), 1);
}

#[tokio::test]
async fn quick_search_without_term_or_barcode_is_rejected() {
    let app = setup_test_app();

    let (status, json) = send(app.router, authed_get("/v1/search/quick")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");
    assert_eq!(app.amazon.calls(), 0);
}

#[tokio::test]
async fn clearing_the_cache_forces_a_new_dispatch() {
    let app = setup_test_app();
    let body = serde_json::json!({ "query": "ssd", "sources": ["amazon"] });

    let (status, _) = send(app.router.clone(), authed_post("/v1/search", body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(app.router.clone(), authed_post("/v1/search", body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.amazon.calls(), 1);

    let (status, _) = send(
        app.router.clone(),
        Request::delete("/v1/search/cache")
            .header("authorization", format!("Bearer {TEST_API_KEY}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    send(app.router, authed_post("/v1/search", body)).await;
    assert_eq!(app.amazon.calls(), 2);
}

#[tokio::test]
async fn batch_reports_each_item_in_order() {
    let app = setup_test_app();

    let (status, json) = send(
        app.router,
        authed_post(
            "/v1/search/batch",
            serde_json::json!({
                "items": [
                    { "description": "Mouse Logitech MX Master 3" },
                    { "description": "", "barcode": "12ab" },
                    { "description": "Tastiera", "barcode": "5099206085800" }
                ],
                "sources": ["amazon", "eprice"]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["batch_id"].as_str().is_some());
    assert_eq!(json["completed"], 2);
    assert_eq!(json["failed"], 1);
    assert_eq!(json["cancelled"], 0);

    let items = json["items"].as_array().unwrap();
    assert_eq!(items[0]["index"], 0);
    assert_eq!(items[0]["status"], "completed");
    assert_eq!(items[0]["result"]["best"]["source"], "amazon");
    assert_eq!(items[1]["status"], "failed");
    assert!(items[1]["error"].as_str().unwrap().contains("barcode"));
    assert_eq!(items[2]["status"], "completed");
    assert_eq!(items[2]["result"]["barcode"], "5099206085800");
    assert_eq!(app.eprice.calls(), 2);
}

#[tokio::test]
async fn empty_batch_returns_400() {
    let app = setup_test_app();

    let (status, json) = send(
        app.router,
        authed_post(
            "/v1/search/batch",
            serde_json::json!({ "items": [], "sources": ["amazon"] }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");
}
