//! Execution context and environment configuration.
//!
//! # Design
//! Whether the client runs inside the server process (rendering on behalf of
//! a browser) or inside the browser itself is decided once, when the
//! `RuntimeContext` is built, and never changes for the lifetime of the
//! client. Environment values are read into `ApiConfig` at the same time.
//! Nothing here is mutated during a request, so the context is shared
//! behind an `Arc` without locking.

use std::fmt;
use std::sync::Arc;

use crate::credentials::{CookieStore, InboundRequest};

pub const DEFAULT_API_PORT: u16 = 8000;
pub const DEFAULT_API_PATH: &str = "/api";

/// Scheme the calling page was served over. Only meaningful in the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageScheme {
    #[default]
    Http,
    Https,
}

/// Deploy-time configuration for locating the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Public API host used by browsers in production. `None` when unset.
    pub api_host: Option<String>,
    /// Port the API listens on, as seen from the server process.
    pub api_port: u16,
    /// Port used by browsers when the localhost override is active.
    pub default_api_port: u16,
    /// Path prefix every API route lives under, e.g. `/api`.
    pub api_path: String,
    /// Browsers talk to `localhost` instead of `api_host`.
    pub localhost_override: bool,
    pub page_scheme: PageScheme,
    /// Send PUT/PATCH/DELETE as POST, relying on the `_method` token alone.
    pub tunnel_verbs: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_host: None,
            api_port: DEFAULT_API_PORT,
            default_api_port: DEFAULT_API_PORT,
            api_path: DEFAULT_API_PATH.to_string(),
            localhost_override: false,
            page_scheme: PageScheme::Http,
            tunnel_verbs: false,
        }
    }
}

impl ApiConfig {
    /// Read configuration from the process environment.
    ///
    /// | variable           | field                                  |
    /// |--------------------|----------------------------------------|
    /// | `APIHOST`          | `api_host`; `localhost` sets the override |
    /// | `APIPORT`          | `api_port`                             |
    /// | `API_PATH`         | `api_path`                             |
    /// | `PAGE_SCHEME`      | `page_scheme` (`https` or `http`)      |
    /// | `API_TUNNEL_VERBS` | `tunnel_verbs` (`1` / `true`)          |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ApiConfig::from_env`] but reading from an arbitrary lookup,
    /// so tests do not have to touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(host) = lookup("APIHOST").filter(|h| !h.is_empty()) {
            config.localhost_override = host == "localhost";
            config.api_host = Some(host);
        }
        if let Some(port) = lookup("APIPORT") {
            match port.parse() {
                Ok(port) => config.api_port = port,
                Err(_) => tracing::warn!(value = %port, "ignoring unparsable APIPORT"),
            }
        }
        if let Some(path) = lookup("API_PATH") {
            config.api_path = path;
        }
        if let Some(scheme) = lookup("PAGE_SCHEME") {
            config.page_scheme = if scheme.eq_ignore_ascii_case("https") {
                PageScheme::Https
            } else {
                PageScheme::Http
            };
        }
        if let Some(flag) = lookup("API_TUNNEL_VERBS") {
            config.tunnel_verbs = matches!(flag.as_str(), "1" | "true" | "TRUE" | "yes");
        }

        config
    }

    pub fn with_api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = Some(host.into());
        self
    }

    pub fn with_api_port(mut self, port: u16) -> Self {
        self.api_port = port;
        self
    }

    pub fn with_api_path(mut self, path: impl Into<String>) -> Self {
        self.api_path = path.into();
        self
    }

    pub fn with_localhost_override(mut self, enabled: bool) -> Self {
        self.localhost_override = enabled;
        self
    }

    pub fn with_page_scheme(mut self, scheme: PageScheme) -> Self {
        self.page_scheme = scheme;
        self
    }

    pub fn with_tunnel_verbs(mut self, enabled: bool) -> Self {
        self.tunnel_verbs = enabled;
        self
    }
}

/// Where the client is running, together with the credential source that
/// only exists in that place.
#[derive(Clone)]
pub enum ExecutionContext {
    /// Inside the server process, rendering a page for `InboundRequest`.
    Server(InboundRequest),
    /// Inside the browser, with access to the document's cookies.
    Browser(Arc<dyn CookieStore>),
}

impl ExecutionContext {
    pub fn is_server(&self) -> bool {
        matches!(self, ExecutionContext::Server(_))
    }

    pub fn is_browser(&self) -> bool {
        matches!(self, ExecutionContext::Browser(_))
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::Server(inbound) => f.debug_tuple("Server").field(inbound).finish(),
            ExecutionContext::Browser(_) => f.write_str("Browser"),
        }
    }
}

/// Everything the request pipeline reads but never writes.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub config: ApiConfig,
    pub execution: ExecutionContext,
}

impl RuntimeContext {
    pub fn server(config: ApiConfig, inbound: InboundRequest) -> Self {
        Self {
            config,
            execution: ExecutionContext::Server(inbound),
        }
    }

    pub fn browser(config: ApiConfig, cookies: Arc<dyn CookieStore>) -> Self {
        Self {
            config,
            execution: ExecutionContext::Browser(cookies),
        }
    }

    /// Scheme used to upgrade pagination links. The server process has no
    /// page location, so links are left alone there.
    pub fn page_scheme(&self) -> PageScheme {
        match self.execution {
            ExecutionContext::Server(_) => PageScheme::Http,
            ExecutionContext::Browser(_) => self.config.page_scheme,
        }
    }
}
