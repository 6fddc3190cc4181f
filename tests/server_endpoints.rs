use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use insightdb::interface::QueryInterface;
use insightdb::server;
use insightdb::store::{PersistenceMode, RecordStore};

fn section(uuid: &str, avg: f64) -> Value {
    json!({
        "dept": "cpsc",
        "id": "110",
        "instructor": "smith",
        "title": "intro",
        "uuid": uuid,
        "avg": avg,
        "pass": 100.0,
        "fail": 5.0,
        "audit": 1.0,
        "year": 2015.0,
    })
}

fn setup() -> Router {
    let store = RecordStore::new(PersistenceMode::InMemory).unwrap();
    server::router(Arc::new(QueryInterface::new(Arc::new(store))))
}

fn request(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    (status, body)
}

#[tokio::test]
async fn dataset_lifecycle_over_http() {
    let router = setup();
    let rows = json!([section("a", 80.0), section("b", 60.0)]);

    let (status, body) = send(
        &router,
        request(Method::PUT, "/dataset/sections/sections", &rows),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "result": ["sections"] }), "add returns stored ids");

    let (status, body) = send(&router, request(Method::GET, "/datasets", &json!(null))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "result": [{ "id": "sections", "kind": "sections", "numRows": 2 }] })
    );

    let (status, body) = send(
        &router,
        request(
            Method::POST,
            "/query",
            &json!({
                "WHERE": { "GT": { "sections_avg": 70 } },
                "OPTIONS": { "COLUMNS": ["sections_uuid"] }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "result": [{ "sections_uuid": "a" }] }));

    let (status, body) = send(
        &router,
        request(Method::DELETE, "/dataset/sections", &json!(null)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "result": "sections" }));
}

#[tokio::test]
async fn invalid_query_is_bad_request() {
    let router = setup();
    let (status, body) = send(
        &router,
        request(
            Method::POST,
            "/query",
            &json!({ "WHERE": {}, "OPTIONS": { "COLUMNS": [] } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["error"].as_str().unwrap().starts_with("Invalid query"),
        "the envelope carries the error, not a result: {}",
        body
    );
    assert!(body.get("result").is_none());
}

#[tokio::test]
async fn oversized_result_is_payload_too_large() {
    let router = setup();
    let rows: Vec<Value> = (0..5001).map(|i| section(&format!("{}", i), 80.0)).collect();
    let (status, _) = send(
        &router,
        request(Method::PUT, "/dataset/sections/sections", &json!(rows)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        request(
            Method::POST,
            "/query",
            &json!({ "WHERE": {}, "OPTIONS": { "COLUMNS": ["sections_uuid"] } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(
        body["error"].as_str().unwrap().contains("too large"),
        "{}",
        body
    );
}

#[tokio::test]
async fn missing_dataset_delete_is_not_found() {
    let router = setup();
    let (status, body) = send(
        &router,
        request(Method::DELETE, "/dataset/ghost", &json!(null)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("ghost"), "{}", body);
}
