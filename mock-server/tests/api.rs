use axum::http::{self, Request, StatusCode};
use axum::routing::RouterIntoService;
use http_body_util::BodyExt;
use mock_server::{app, Item, Page};
use serde_json::Value;
use tower::{Service, ServiceExt};

const TOKEN: &str = "test-token";

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn get(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

/// JSON request carrying a matching csrf cookie and header.
fn json_request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .header(http::header::COOKIE, format!("sessionid=s; csrftoken={TOKEN}"))
        .header("X-CSRFToken", TOKEN)
        .body(body.to_string())
        .unwrap()
}

async fn send(app: &mut RouterIntoService<String>, request: Request<String>) -> axum::response::Response {
    ServiceExt::ready(app).await.unwrap().call(request).await.unwrap()
}

fn new_item(name: &str) -> String {
    format!(r#"{{"name":"{name}","owner":{{"id":1,"username":"kim"}}}}"#)
}

// --- list ---

#[tokio::test]
async fn list_items_empty() {
    let resp = app().oneshot(get("/api/items")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let page: Page<Item> = body_json(resp).await;
    assert_eq!(page.count, 0);
    assert!(page.next.is_none());
    assert!(page.previous.is_none());
    assert!(page.results.is_empty());
}

#[tokio::test]
async fn list_items_page_zero_is_not_found() {
    let resp = app().oneshot(get("/api/items?page=0")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = body_json(resp).await;
    assert_eq!(body["error"], "invalid page");
}

// --- create ---

#[tokio::test]
async fn create_item_returns_201() {
    let resp = app()
        .oneshot(json_request("POST", "/api/items", &new_item("Lamp")))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    let item: Item = body_json(resp).await;
    assert_eq!(item.name, "Lamp");
    assert_eq!(item.owner.username, "kim");
}

#[tokio::test]
async fn create_item_without_csrf_is_forbidden() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/items")
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(new_item("Lamp"))
        .unwrap();
    let resp = app().oneshot(request).await.unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = body_json(resp).await;
    assert_eq!(body["error"], "CSRF token missing or incorrect");
}

#[tokio::test]
async fn create_item_malformed_json_returns_400() {
    let resp = app()
        .oneshot(json_request("POST", "/api/items", r#"{"not_name":1}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- get ---

#[tokio::test]
async fn get_item_not_found() {
    let resp = app()
        .oneshot(get("/api/items/00000000-0000-0000-0000-000000000000"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_item_bad_uuid_returns_400() {
    let resp = app().oneshot(get("/api/items/not-a-uuid")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- support routes ---

#[tokio::test]
async fn csrf_route_sets_cookie() {
    let resp = app().oneshot(get("/api/csrf")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let cookie = resp.headers()[http::header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.starts_with("csrftoken="), "{cookie}");
    assert!(body_bytes(resp).await.is_empty());
}

#[tokio::test]
async fn echo_reflects_override_and_headers() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/echo?_method=DELETE&x=1")
        .header(http::header::ACCEPT_LANGUAGE, "ko")
        .header("X-CSRFToken", "abc")
        .body(String::new())
        .unwrap();
    let resp = app().oneshot(request).await.unwrap();
    let body: Value = body_json(resp).await;
    assert_eq!(body["method"], "POST");
    assert_eq!(body["effective_method"], "DELETE");
    assert_eq!(body["query"], "_method=DELETE&x=1");
    assert_eq!(body["accept_language"], "ko");
    assert_eq!(body["csrf_token"], "abc");
    assert_eq!(body["cookie"], Value::Null);
}

#[tokio::test]
async fn status_route_returns_json_error() {
    let resp = app().oneshot(get("/api/status/418")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
    let body: Value = body_json(resp).await;
    assert_eq!(body["error"], "status 418");
}

#[tokio::test]
async fn gateway_route_returns_plain_text() {
    let resp = app().oneshot(get("/api/gateway")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(&body_bytes(resp).await[..], b"Bad Gateway");
}

// --- pagination ---

#[tokio::test]
async fn pagination_links() {
    let mut app = app().into_service();
    for name in ["a", "b", "c"] {
        let resp = send(&mut app, json_request("POST", "/api/items", &new_item(name))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let resp = send(&mut app, get("/api/items?page_size=2")).await;
    let first: Page<Item> = body_json(resp).await;
    assert_eq!(first.count, 3);
    assert_eq!(first.results.len(), 2);
    assert_eq!(
        first.next.as_deref(),
        Some("http://localhost/api/items?page=2&page_size=2")
    );
    assert!(first.previous.is_none());

    let resp = send(&mut app, get("/api/items?page=2&page_size=2")).await;
    let second: Page<Item> = body_json(resp).await;
    assert_eq!(second.results.len(), 1);
    assert_eq!(second.results[0].name, "c");
    assert!(second.next.is_none());
    assert_eq!(
        second.previous.as_deref(),
        Some("http://localhost/api/items?page=1&page_size=2")
    );

    let resp = send(&mut app, get("/api/items?page=3&page_size=2")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- full lifecycle with verb overrides ---

#[tokio::test]
async fn lifecycle_with_tunnelled_verbs() {
    let mut app = app().into_service();

    // create
    let resp = send(&mut app, json_request("POST", "/api/items", &new_item("Lamp"))).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Item = body_json(resp).await;
    let id = created.id;

    // patch via POST + override
    let resp = send(
        &mut app,
        json_request("POST", &format!("/api/items/{id}?_method=PATCH"), r#"{"name":"Desk lamp"}"#),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let patched: Item = body_json(resp).await;
    assert_eq!(patched.name, "Desk lamp");
    assert_eq!(patched.owner, created.owner); // unchanged

    // put with the real verb and a redundant override
    let resp = send(
        &mut app,
        json_request(
            "PUT",
            &format!("/api/items/{id}?_method=PUT"),
            r#"{"name":"Chair","owner":{"id":2,"username":"lee"}}"#,
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let replaced: Item = body_json(resp).await;
    assert_eq!(replaced.name, "Chair");
    assert_eq!(replaced.owner.id, 2);

    // bare POST on an item is not a write
    let resp = send(&mut app, json_request("POST", &format!("/api/items/{id}"), "{}")).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    // delete via override
    let resp = send(&mut app, json_request("POST", &format!("/api/items/{id}?_method=DELETE"), "")).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(body_bytes(resp).await.is_empty());

    // get after delete
    let resp = send(&mut app, get(&format!("/api/items/{id}"))).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
