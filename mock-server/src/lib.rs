use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const CSRF_COOKIE: &str = "csrftoken";
pub const CSRF_HEADER: &str = "x-csrftoken";
pub const OVERRIDE_PARAM: &str = "_method";
pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Owner {
    pub id: u64,
    pub username: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    pub owner: Owner,
}

#[derive(Deserialize)]
pub struct NewItem {
    pub name: String,
    pub owner: Owner,
}

#[derive(Deserialize)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub owner: Option<Owner>,
}

/// Paginated list in the usual `count`/`next`/`previous`/`results` shape.
#[derive(Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

pub type Db = Arc<RwLock<Vec<Item>>>;

type Failure = (StatusCode, Json<Value>);

fn failure(status: StatusCode, message: impl Into<String>) -> Failure {
    (status, Json(json!({ "error": message.into() })))
}

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Vec::new()));
    Router::new()
        .route("/api/csrf", get(issue_csrf))
        .route("/api/echo", any(echo))
        .route("/api/status/{code}", any(status))
        .route("/api/gateway", any(gateway))
        .route("/api/items", get(list_items).post(create_item))
        .route(
            "/api/items/{id}",
            get(get_item)
                .post(write_item)
                .put(write_item)
                .patch(write_item)
                .delete(write_item),
        )
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Hand out a fresh CSRF cookie, the way a page load would.
async fn issue_csrf() -> impl IntoResponse {
    let token = Uuid::new_v4().simple().to_string();
    (
        StatusCode::NO_CONTENT,
        [(
            header::SET_COOKIE,
            format!("{CSRF_COOKIE}={token}; Path=/; SameSite=Lax"),
        )],
    )
}

/// Reflect what the request looked like on arrival.
async fn echo(
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    let effective = effective_method(&method, &query)
        .map(|m| m.to_string())
        .unwrap_or_else(|_| "invalid".to_string());
    Json(json!({
        "method": method.as_str(),
        "effective_method": effective,
        "query": uri.query().unwrap_or_default(),
        "accept": header_str(&headers, header::ACCEPT.as_str()),
        "content_type": header_str(&headers, header::CONTENT_TYPE.as_str()),
        "accept_language": header_str(&headers, header::ACCEPT_LANGUAGE.as_str()),
        "csrf_token": header_str(&headers, CSRF_HEADER),
        "cookie": header_str(&headers, header::COOKIE.as_str()),
    }))
}

async fn status(Path(code): Path<u16>) -> Failure {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    failure(status, format!("status {code}"))
}

async fn gateway() -> (StatusCode, &'static str) {
    (StatusCode::BAD_GATEWAY, "Bad Gateway")
}

async fn list_items(
    State(db): State<Db>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
) -> Result<Json<Page<Item>>, Failure> {
    let page = query.page.unwrap_or(1);
    let size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
    let items = db.read().await;
    let count = items.len();

    if page == 0 || (page > 1 && (page - 1) * size >= count) {
        return Err(failure(StatusCode::NOT_FOUND, "invalid page"));
    }
    let start = (page - 1) * size;
    let results = items.iter().skip(start).take(size).cloned().collect();

    let host = header_str(&headers, header::HOST.as_str()).unwrap_or("localhost");
    let base = format!("http://{host}/api/items");
    let next = (start + size < count).then(|| format!("{base}?page={}&page_size={size}", page + 1));
    let previous = (page > 1).then(|| format!("{base}?page={}&page_size={size}", page - 1));

    Ok(Json(Page {
        count,
        next,
        previous,
        results,
    }))
}

async fn create_item(
    State(db): State<Db>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Item>), Failure> {
    check_csrf(&headers)?;
    let input: NewItem = parse_json(&body)?;
    let item = Item {
        id: Uuid::new_v4(),
        name: input.name,
        owner: input.owner,
    };
    db.write().await.push(item.clone());
    tracing::debug!(id = %item.id, "item created");
    Ok((StatusCode::CREATED, Json(item)))
}

async fn get_item(State(db): State<Db>, Path(id): Path<Uuid>) -> Result<Json<Item>, Failure> {
    let items = db.read().await;
    items
        .iter()
        .find(|item| item.id == id)
        .cloned()
        .map(Json)
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "item not found"))
}

/// PUT, PATCH and DELETE, either sent directly or tunnelled through POST
/// with `?_method=`.
async fn write_item(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Failure> {
    let effective = effective_method(&method, &query)?;
    check_csrf(&headers)?;

    let mut items = db.write().await;
    let index = items
        .iter()
        .position(|item| item.id == id)
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "item not found"))?;

    match effective {
        Method::PUT => {
            let input: NewItem = parse_json(&body)?;
            let item = &mut items[index];
            item.name = input.name;
            item.owner = input.owner;
            Ok(Json(item.clone()).into_response())
        }
        Method::PATCH => {
            let input: ItemPatch = parse_json(&body)?;
            let item = &mut items[index];
            if let Some(name) = input.name {
                item.name = name;
            }
            if let Some(owner) = input.owner {
                item.owner = owner;
            }
            Ok(Json(item.clone()).into_response())
        }
        Method::DELETE => {
            items.remove(index);
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        other => Err(failure(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("{other} not allowed on an item"),
        )),
    }
}

/// The `_method` query parameter wins over the request line.
fn effective_method(method: &Method, query: &HashMap<String, String>) -> Result<Method, Failure> {
    let Some(requested) = query.get(OVERRIDE_PARAM) else {
        return Ok(method.clone());
    };
    match requested.to_ascii_uppercase().as_str() {
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        other => Err(failure(
            StatusCode::BAD_REQUEST,
            format!("unsupported method override {other}"),
        )),
    }
}

/// Double-submit check: the `X-CSRFToken` header must repeat the
/// `csrftoken` cookie.
fn check_csrf(headers: &HeaderMap) -> Result<(), Failure> {
    let cookie = header_str(headers, header::COOKIE.as_str()).and_then(|c| cookie_value(c, CSRF_COOKIE));
    let token = header_str(headers, CSRF_HEADER);
    match (cookie, token) {
        (Some(cookie), Some(token)) if !token.is_empty() && cookie == token => Ok(()),
        _ => {
            tracing::warn!("rejecting request with missing or mismatched csrf token");
            Err(failure(StatusCode::FORBIDDEN, "CSRF token missing or incorrect"))
        }
    }
}

fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, Failure> {
    serde_json::from_slice(body)
        .map_err(|e| failure(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")))
}
