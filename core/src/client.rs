//! The request pipeline: resolve, adapt, attach credentials, dispatch,
//! normalize.
//!
//! # Design
//! `ApiClient` holds only read-only state: the runtime context, a transport
//! and a normalizer. The pre-dispatch stages are exposed on their own as
//! [`ApiClient::build_request`] and the post-dispatch stage as
//! [`ApiClient::parse_response`], so a caller that owns the I/O can drive
//! the pipeline without a `Transport`. Each verb method issues exactly one
//! request and settles exactly once; concurrent calls share nothing mutable.

use std::sync::Arc;

use ::url::Url;
use serde_json::{Map, Value};
use tracing::Instrument;

use crate::context::{ExecutionContext, RuntimeContext};
use crate::credentials;
use crate::error::ApiError;
use crate::http::{HttpRequest, HttpResponse};
use crate::normalize::{EntityNormalizer, Normalizer, Schema};
use crate::response::{self, ResponseEnvelope};
use crate::transport::{ReqwestTransport, Transport};
use crate::urls::{append_query, encode_params, param_text, resolve};
use crate::verb::{ResolvedRequest, Verb, OVERRIDE_PARAM};

/// Param consumed for `Accept-Language` instead of being sent as a query.
pub const LANGUAGE_PARAM: &str = "language";

/// Per-call options. Borrowed for the duration of the call only.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub params: Map<String, Value>,
    pub data: Option<Value>,
    pub schema: Option<Schema>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn language(self, language: impl Into<String>) -> Self {
        self.param(LANGUAGE_PARAM, language.into())
    }

    /// Serialize `data` as the JSON request body.
    pub fn data<T: serde::Serialize>(mut self, data: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(data).map_err(|e| ApiError::SerializationError(e.to_string()))?;
        self.data = Some(value);
        Ok(self)
    }

    pub fn schema(mut self, schema: impl Into<Schema>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    fn language_value(&self) -> Option<String> {
        self.params.get(LANGUAGE_PARAM).and_then(param_text)
    }
}

/// Context-aware JSON API client.
#[derive(Clone)]
pub struct ApiClient<T = ReqwestTransport> {
    context: Arc<RuntimeContext>,
    transport: T,
    normalizer: Arc<dyn Normalizer>,
}

impl ApiClient<ReqwestTransport> {
    /// Client over a default `reqwest` transport. In the browser context the
    /// transport shares the context's cookie store.
    pub fn new(context: RuntimeContext) -> Self {
        let transport = match &context.execution {
            ExecutionContext::Browser(cookies) => {
                let api_url = resolve("/", &context.config, &context.execution);
                match Url::parse(&api_url).ok().as_ref().and_then(Url::host_str) {
                    Some(host) => ReqwestTransport::new().with_cookie_store(Arc::clone(cookies), host),
                    None => ReqwestTransport::new(),
                }
            }
            ExecutionContext::Server(_) => ReqwestTransport::new(),
        };
        Self::with_transport(context, transport)
    }
}

impl<T> ApiClient<T> {
    pub fn with_transport(context: RuntimeContext, transport: T) -> Self {
        Self {
            context: Arc::new(context),
            transport,
            normalizer: Arc::new(EntityNormalizer),
        }
    }

    /// Replace the collaborator used when a call carries a schema.
    pub fn with_normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }

    /// Resolve the URL and wire verb for `path` without building headers.
    pub fn resolve(&self, verb: Verb, path: &str) -> ResolvedRequest {
        let url = resolve(path, &self.context.config, &self.context.execution);
        ResolvedRequest::new(verb, url, self.context.config.tunnel_verbs)
    }

    /// Run every stage up to dispatch and return the request as data.
    pub fn build_request(&self, verb: Verb, path: &str, options: &RequestOptions) -> Result<HttpRequest, ApiError> {
        let resolved = self.resolve(verb, path);
        let query = encode_params(&options.params, &[LANGUAGE_PARAM, OVERRIDE_PARAM]);
        let url = append_query(&resolved.target(), &query);

        let mut request = HttpRequest::new(resolved.method, url);
        credentials::attach(&mut request, &self.context.execution, options.language_value().as_deref());

        if let Some(data) = &options.data {
            let body = serde_json::to_string(data).map_err(|e| ApiError::SerializationError(e.to_string()))?;
            request.body = Some(body);
        }

        Ok(request)
    }

    /// Turn the transport's response into the caller's result.
    pub fn parse_response(
        &self,
        response: HttpResponse,
        schema: Option<&Schema>,
    ) -> Result<Option<ResponseEnvelope>, ApiError> {
        response::parse(response, schema, self.normalizer.as_ref(), self.context.page_scheme())
    }
}

impl<T: Transport> ApiClient<T> {
    pub async fn request(
        &self,
        verb: Verb,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Option<ResponseEnvelope>, ApiError> {
        let request = self.build_request(verb, path, options)?;
        let span = tracing::debug_span!("api_request", %verb, method = %request.method, url = %request.url);

        async move {
            let response = match self.transport.send(request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(error = %e, "transport failed");
                    return Err(e.into());
                }
            };
            tracing::debug!(status = response.status, "response received");
            self.parse_response(response, options.schema.as_ref())
        }
        .instrument(span)
        .await
    }

    pub async fn get(&self, path: &str, options: &RequestOptions) -> Result<Option<ResponseEnvelope>, ApiError> {
        self.request(Verb::Get, path, options).await
    }

    pub async fn post(&self, path: &str, options: &RequestOptions) -> Result<Option<ResponseEnvelope>, ApiError> {
        self.request(Verb::Post, path, options).await
    }

    pub async fn put(&self, path: &str, options: &RequestOptions) -> Result<Option<ResponseEnvelope>, ApiError> {
        self.request(Verb::Put, path, options).await
    }

    pub async fn patch(&self, path: &str, options: &RequestOptions) -> Result<Option<ResponseEnvelope>, ApiError> {
        self.request(Verb::Patch, path, options).await
    }

    pub async fn delete(&self, path: &str, options: &RequestOptions) -> Result<Option<ResponseEnvelope>, ApiError> {
        self.request(Verb::Delete, path, options).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::context::{ApiConfig, PageScheme};
    use crate::credentials::{DocumentCookies, InboundRequest, CSRF_HEADER};
    use crate::error::TransportError;
    use crate::http::{CredentialsMode, HttpMethod};
    use crate::normalize::EntitySchema;

    /// Answers by URL path and records every request it sees.
    #[derive(Default)]
    struct ScriptedTransport {
        routes: HashMap<String, Result<HttpResponse, TransportError>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn route(mut self, path: &str, status: u16, body: &str) -> Self {
            let response = HttpResponse {
                status,
                headers: Vec::new(),
                body: body.to_string(),
            };
            self.routes.insert(path.to_string(), Ok(response));
            self
        }

        fn fail(mut self, path: &str, error: TransportError) -> Self {
            self.routes.insert(path.to_string(), Err(error));
            self
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let path = request.url.split('?').next().unwrap_or_default().to_string();
            self.seen.lock().unwrap().push(request);
            tokio::task::yield_now().await;
            self.routes
                .get(&path)
                .cloned()
                .unwrap_or_else(|| Err(TransportError::Network(format!("no route for {path}"))))
        }
    }

    fn browser_config() -> ApiConfig {
        ApiConfig::default().with_api_host("api.example.com")
    }

    fn browser_client(transport: ScriptedTransport) -> ApiClient<Arc<ScriptedTransport>> {
        let cookies = DocumentCookies::from_cookie_string("csrftoken=browser-token");
        let context = RuntimeContext::browser(browser_config(), Arc::new(cookies));
        ApiClient::with_transport(context, Arc::new(transport))
    }

    #[test]
    fn build_get_request() {
        let client = browser_client(ScriptedTransport::default());
        let options = RequestOptions::new().param("page", 2).language("ko");
        let req = client.build_request(Verb::Get, "items", &options).unwrap();

        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://api.example.com/api/items?page=2");
        assert_eq!(req.credentials, CredentialsMode::Include);
        assert_eq!(req.header("Accept-Language"), Some("ko"));
        assert_eq!(req.header(CSRF_HEADER), Some("browser-token"));
        assert!(req.body.is_none());
    }

    #[test]
    fn build_patch_request_places_override_before_params() {
        let client = browser_client(ScriptedTransport::default());
        let options = RequestOptions::new()
            .param("fields", "name")
            .data(&json!({"name": "renamed"}))
            .unwrap();
        let req = client.build_request(Verb::Patch, "/items/1/", &options).unwrap();

        assert_eq!(req.method, HttpMethod::Patch);
        assert_eq!(
            req.url,
            "http://api.example.com/api/items/1/?_method=PATCH&fields=name"
        );
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"name": "renamed"}));
    }

    #[test]
    fn caller_cannot_inject_verb_override() {
        let client = browser_client(ScriptedTransport::default());
        let options = RequestOptions::new().param("_method", "DELETE").param("x", 1);

        let put = client.build_request(Verb::Put, "items", &options).unwrap();
        assert_eq!(put.url, "http://api.example.com/api/items?_method=PUT&x=1");

        let get = client.build_request(Verb::Get, "items", &options).unwrap();
        assert_eq!(get.url, "http://api.example.com/api/items?x=1");
    }

    #[test]
    fn numeric_language_becomes_header() {
        let client = browser_client(ScriptedTransport::default());
        let options = RequestOptions::new().param("language", 5);
        let req = client.build_request(Verb::Get, "items", &options).unwrap();
        assert_eq!(req.url, "http://api.example.com/api/items");
        assert_eq!(req.header("Accept-Language"), Some("5"));
    }

    #[test]
    fn tunnelled_delete_goes_out_as_post() {
        let cookies = Arc::new(DocumentCookies::default());
        let context = RuntimeContext::browser(browser_config().with_tunnel_verbs(true), cookies);
        let client = ApiClient::with_transport(context, ScriptedTransport::default());
        let req = client.build_request(Verb::Delete, "/items/1/", &RequestOptions::new()).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert!(req.url.ends_with("?_method=DELETE"));
        assert!(req.header(CSRF_HEADER).is_none());
    }

    #[test]
    fn server_context_forwards_inbound_cookies() {
        let inbound = InboundRequest::new().with_header("cookie", "csrftoken=srv; sessionid=s1");
        let context = RuntimeContext::server(ApiConfig::default().with_api_port(3030), inbound);
        let client = ApiClient::with_transport(context, ScriptedTransport::default());
        let req = client.build_request(Verb::Post, "/items/", &RequestOptions::new()).unwrap();

        assert_eq!(req.url, "http://localhost:3030/api/items/");
        assert_eq!(req.header(CSRF_HEADER), Some("srv"));
        assert_eq!(req.header("Cookie"), Some("csrftoken=srv; sessionid=s1"));
    }

    #[tokio::test]
    async fn verb_methods_dispatch_through_transport() {
        let transport = ScriptedTransport::default()
            .route("http://api.example.com/api/items", 200, r#"{"next":"http://api.example.com/api/items?page=2","a":1}"#);
        let client = browser_client(transport);

        let env = client.get("/items", &RequestOptions::new()).await.unwrap().unwrap();
        assert_eq!(env.next_page_url.as_deref(), Some("http://api.example.com/api/items?page=2"));
        assert_eq!(env.get("a"), Some(&json!(1)));

        for verb in Verb::ALL {
            client.request(verb, "items", &RequestOptions::new()).await.unwrap();
        }
        let seen = client.transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 6);
        let overrides: Vec<usize> = seen.iter().map(|r| r.url.matches("_method=").count()).collect();
        assert_eq!(overrides, vec![0, 0, 0, 1, 1, 1]);
    }

    #[tokio::test]
    async fn https_page_upgrades_links_end_to_end() {
        let transport = ScriptedTransport::default()
            .route("http://api.example.com/api/items", 200, r#"{"previous":"http://api.example.com/api/items?page=1","results":[]}"#);
        let cookies = Arc::new(DocumentCookies::default());
        let context = RuntimeContext::browser(browser_config().with_page_scheme(PageScheme::Https), cookies);
        let client = ApiClient::with_transport(context, transport);

        let env = client.get("items", &RequestOptions::new()).await.unwrap().unwrap();
        assert_eq!(
            env.prev_page_url.as_deref(),
            Some("https://api.example.com/api/items?page=1")
        );
    }

    #[tokio::test]
    async fn schema_option_normalizes_results() {
        let transport = ScriptedTransport::default().route(
            "http://api.example.com/api/items",
            200,
            r#"{"count":2,"results":[{"id":1,"owner":{"id":3}},{"id":2,"owner":{"id":3}}]}"#,
        );
        let client = browser_client(transport);
        let schema = Schema::array_of(EntitySchema::new("items").define("owner", EntitySchema::new("users")));

        let env = client
            .get("/items", &RequestOptions::new().schema(schema))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.result(), Some(&json!([1, 2])));
        let entities = env.entities().unwrap();
        assert_eq!(entities["items"].len(), 2);
        assert_eq!(entities["users"]["3"], json!({"id": 3}));
    }

    #[tokio::test]
    async fn empty_body_resolves_to_none() {
        let transport = ScriptedTransport::default().route("http://api.example.com/api/logout", 204, "");
        let client = browser_client(transport);
        assert!(client.post("/logout", &RequestOptions::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_calls_settle_independently() {
        let transport = ScriptedTransport::default()
            .route("http://api.example.com/api/ok", 200, r#"{"fine":true}"#)
            .route("http://api.example.com/api/bad", 400, r#"{"error":"bad"}"#)
            .fail("http://api.example.com/api/down", TransportError::Network("refused".to_string()));
        let client = browser_client(transport);
        let options = RequestOptions::new();

        let (ok, bad, down) = tokio::join!(
            client.get("/ok", &options),
            client.delete("/bad", &options),
            client.put("/down", &options),
        );

        assert_eq!(ok.unwrap().unwrap().get("fine"), Some(&json!(true)));
        assert_eq!(bad.unwrap_err().body(), Some(&json!({"error": "bad"})));
        assert!(matches!(
            down.unwrap_err(),
            ApiError::Transport(TransportError::Network(ref msg)) if msg == "refused"
        ));
    }
}
