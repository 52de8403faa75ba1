//! The I/O seam: something that turns an `HttpRequest` into an `HttpResponse`.
//!
//! Non-2xx statuses are returned as data, not errors; interpreting them is
//! the response normalizer's job. Only failures that produce no response at
//! all are reported as `TransportError`.

use std::sync::Arc;

use ::url::Url;
use async_trait::async_trait;
use reqwest::header::SET_COOKIE;
use reqwest::Method;

use crate::credentials::{parse_set_cookie, CookieStore};
use crate::error::TransportError;
use crate::http::{CredentialsMode, HttpMethod, HttpRequest, HttpResponse};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).send(request).await
    }
}

/// `reqwest`-backed transport.
///
/// Outside a real browser nobody attaches cookies on our behalf. When built
/// with [`ReqwestTransport::with_cookie_store`], requests in
/// `CredentialsMode::Include` to the store's host carry its cookies, and
/// `Set-Cookie` responses from that host are written back into it. Other
/// hosts never see the store.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    cookies: Option<ScopedCookies>,
}

/// A cookie store bound to the one host its cookies belong to.
#[derive(Clone)]
struct ScopedCookies {
    store: Arc<dyn CookieStore>,
    host: String,
}

impl ScopedCookies {
    fn matches(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(&self.host))
    }
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            cookies: None,
        }
    }

    /// Share `cookies` with requests to `host` (no port, as cookie domains
    /// are matched).
    pub fn with_cookie_store(mut self, cookies: Arc<dyn CookieStore>, host: impl Into<String>) -> Self {
        self.cookies = Some(ScopedCookies {
            store: cookies,
            host: host.into(),
        });
        self
    }

    /// The store, when `url` is on its host and the request includes
    /// credentials.
    fn scoped(&self, credentials: CredentialsMode, url: &str) -> Option<&Arc<dyn CookieStore>> {
        if credentials != CredentialsMode::Include {
            return None;
        }
        let cookies = self.cookies.as_ref()?;
        let url = Url::parse(url).ok()?;
        cookies.matches(&url).then_some(&cookies.store)
    }

    fn browser_cookies(&self, request: &HttpRequest) -> Option<String> {
        if request.header("cookie").is_some() {
            return None;
        }
        self.scoped(request.credentials, &request.url)?.cookie_header()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let cookie_header = self.browser_cookies(&request);
        let credentials = request.credentials;

        let mut builder = self.client.request(to_reqwest(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(cookie) = cookie_header {
            builder = builder.header("Cookie", cookie);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if let Some(store) = self.scoped(credentials, response.url().as_str()) {
            for value in response.headers().get_all(SET_COOKIE) {
                let Ok(value) = value.to_str() else { continue };
                if let Some((name, value)) = parse_set_cookie(value) {
                    store.set(&name, &value);
                }
            }
        }

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(HttpResponse { status, headers, body })
    }
}

fn to_reqwest(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}
