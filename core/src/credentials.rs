//! Credential attachment: cookies, the CSRF token and fixed JSON headers.
//!
//! # Design
//! Where the CSRF token comes from depends on the execution context. In the
//! browser it is read from the document cookie store. In the server process
//! there is no cookie store; the browser's cookies arrive in the `Cookie`
//! header of the page request being rendered, so that header is parsed and
//! forwarded verbatim to the API. A missing token is never an error: the
//! request goes out without `X-CSRFToken` and the API decides.

use std::sync::{PoisonError, RwLock};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::context::ExecutionContext;
use crate::http::{CredentialsMode, HttpRequest};

pub const CSRF_COOKIE: &str = "csrftoken";
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// Bytes that cannot appear raw inside a cookie value.
const COOKIE_VALUE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b',').add(b';').add(b'%');

/// Read/write access to the browser's cookies for the current origin.
pub trait CookieStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    fn set(&self, name: &str, value: &str);

    /// Every cookie rendered as a `Cookie` request header, or `None` when
    /// the store is empty.
    fn cookie_header(&self) -> Option<String>;
}

/// In-memory cookie store seeded from a `document.cookie` style string.
#[derive(Debug, Default)]
pub struct DocumentCookies {
    jar: RwLock<Vec<(String, String)>>,
}

impl DocumentCookies {
    pub fn from_cookie_string(cookies: &str) -> Self {
        let jar = parse_cookie_header(cookies)
            .map(|(name, value)| (name.to_string(), decode(value)))
            .collect();
        Self {
            jar: RwLock::new(jar),
        }
    }
}

impl CookieStore for DocumentCookies {
    fn get(&self, name: &str) -> Option<String> {
        let jar = self.jar.read().unwrap_or_else(PoisonError::into_inner);
        jar.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone())
    }

    fn set(&self, name: &str, value: &str) {
        let mut jar = self.jar.write().unwrap_or_else(PoisonError::into_inner);
        match jar.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => jar.push((name.to_string(), value.to_string())),
        }
    }

    fn cookie_header(&self) -> Option<String> {
        let jar = self.jar.read().unwrap_or_else(PoisonError::into_inner);
        if jar.is_empty() {
            return None;
        }
        let pairs: Vec<String> = jar
            .iter()
            .map(|(name, value)| format!("{name}={}", utf8_percent_encode(value, COOKIE_VALUE)))
            .collect();
        Some(pairs.join("; "))
    }
}

/// The page request the server process is currently rendering.
///
/// Only the headers matter to the client; names are matched
/// case-insensitively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundRequest {
    headers: Vec<(String, String)>,
}

impl InboundRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn cookie_header(&self) -> Option<&str> {
        self.header("cookie").filter(|c| !c.trim().is_empty())
    }
}

/// Split a `Cookie` header into `(name, raw value)` pairs. Malformed
/// segments without `=` are skipped; surrounding quotes are stripped.
pub fn parse_cookie_header(header: &str) -> impl Iterator<Item = (&str, &str)> + '_ {
    header.split(';').filter_map(|segment| {
        let (name, value) = segment.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some((name, value.trim().trim_matches('"')))
    })
}

/// Decoded value of cookie `name` in a `Cookie` header.
pub fn find_cookie(header: &str, name: &str) -> Option<String> {
    parse_cookie_header(header)
        .find(|(n, _)| *n == name)
        .map(|(_, v)| decode(v))
}

/// Name and value of a `Set-Cookie` header, ignoring its attributes.
pub fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), decode(value.trim().trim_matches('"'))))
}

/// The CSRF token visible from `context`, if any.
pub fn csrf_token(context: &ExecutionContext) -> Option<String> {
    let token = match context {
        ExecutionContext::Server(inbound) => inbound
            .cookie_header()
            .and_then(|header| find_cookie(header, CSRF_COOKIE)),
        ExecutionContext::Browser(cookies) => cookies.get(CSRF_COOKIE),
    };
    token.filter(|t| !t.is_empty())
}

/// Add credentials and fixed headers to `request`.
pub fn attach(request: &mut HttpRequest, context: &ExecutionContext, language: Option<&str>) {
    request.credentials = CredentialsMode::Include;
    request.set_header("Accept", "application/json");
    request.set_header("Content-Type", "application/json");

    if let Some(language) = language {
        request.set_header("Accept-Language", language);
    }

    if let ExecutionContext::Server(inbound) = context {
        if let Some(cookie) = inbound.cookie_header() {
            request.set_header("Cookie", cookie);
        }
    }

    match csrf_token(context) {
        Some(token) => request.set_header(CSRF_HEADER, token),
        None => tracing::debug!(url = %request.url, "no csrf token available"),
    }
}

fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}
