//! URL resolution and query-string helpers.
//!
//! All functions here are pure string computation; nothing is validated
//! against the network and nothing fails. Malformed paths are normalized.

use ::url::{form_urlencoded, Url};
use serde_json::{Map, Value};

use crate::context::{ApiConfig, ExecutionContext, PageScheme};

/// Host used in place of an unset `APIHOST`. The transport fails to connect
/// to it, which is where the misconfiguration surfaces.
pub const PLACEHOLDER_HOST: &str = "undefined";

/// True when `candidate` is already a fully-qualified URL with a host,
/// written out with `scheme://`.
pub fn is_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => {
            url.has_host()
                && candidate
                    .split_once(':')
                    .is_some_and(|(_, rest)| rest.starts_with("//"))
        }
        Err(_) => false,
    }
}

/// Turn `path` into an absolute request URL for the given context.
///
/// Absolute URLs are returned untouched.
pub fn resolve(path: &str, config: &ApiConfig, context: &ExecutionContext) -> String {
    if is_url(path) {
        return path.to_string();
    }

    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let prefix = &config.api_path;

    match context {
        ExecutionContext::Server(_) => {
            format!("http://localhost:{}{prefix}{path}", config.api_port)
        }
        ExecutionContext::Browser(_) if config.localhost_override => {
            format!("http://localhost:{}{prefix}{path}", config.default_api_port)
        }
        ExecutionContext::Browser(_) => {
            let host = config.api_host.as_deref().unwrap_or_else(|| {
                tracing::warn!("APIHOST is not configured, using placeholder host");
                PLACEHOLDER_HOST
            });
            format!("http://{host}{prefix}{path}")
        }
    }
}

/// Append an already-encoded `query` after whatever query `url` carries,
/// keeping any fragment at the end.
pub fn append_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let separator = if !base.contains('?') {
        "?"
    } else if base.ends_with('?') || base.ends_with('&') {
        ""
    } else {
        "&"
    };
    match fragment {
        Some(fragment) => format!("{base}{separator}{query}#{fragment}"),
        None => format!("{base}{separator}{query}"),
    }
}

/// Form-encode caller params. Strings are sent as-is, arrays repeat the
/// key, nulls are dropped and nested objects are sent as JSON text.
/// Keys listed in `reserved` are skipped.
pub fn encode_params(params: &Map<String, Value>, reserved: &[&str]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        if reserved.contains(&key.as_str()) {
            continue;
        }
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = param_text(item) {
                        serializer.append_pair(key, &text);
                    }
                }
            }
            other => {
                if let Some(text) = param_text(other) {
                    serializer.append_pair(key, &text);
                }
            }
        }
    }
    serializer.finish()
}

/// Query text for a scalar param; `None` for null.
pub(crate) fn param_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Rewrite an `http://` pagination link to `https://` when the calling page
/// is served over https. Empty links become `None`.
pub fn upgrade_link(link: &str, page_scheme: PageScheme) -> Option<String> {
    if link.is_empty() {
        return None;
    }
    match (page_scheme, link.strip_prefix("http://")) {
        (PageScheme::Https, Some(rest)) => Some(format!("https://{rest}")),
        _ => Some(link.to_string()),
    }
}
