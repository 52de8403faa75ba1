//! Context-aware JSON API client shared by server-side rendering and the
//! browser.
//!
//! # Overview
//! One request pipeline with four stages:
//! - **resolve** (`urls`): path to absolute URL, depending on whether the
//!   client runs in the server process or in the browser;
//! - **adapt** (`verb`): logical verb to wire method plus an optional
//!   `_method` override token;
//! - **attach** (`credentials`): cookies, `X-CSRFToken`, JSON headers;
//! - **normalize** (`response`): pagination links and, when a schema is
//!   given, flat entity tables.
//!
//! # Design
//! - The pre- and post-dispatch stages are pure. `ApiClient::build_request`
//!   yields an `HttpRequest` value and `ApiClient::parse_response` consumes
//!   an `HttpResponse` value; the `Transport` trait is the only I/O seam.
//! - The execution context is injected through `RuntimeContext`, never read
//!   from globals, so both branches are testable in one process.
//! - Graph flattening is delegated to a `Normalizer`; `EntityNormalizer` is
//!   the default.

pub mod client;
pub mod context;
pub mod credentials;
pub mod error;
pub mod http;
pub mod normalize;
pub mod response;
pub mod transport;
pub mod urls;
pub mod verb;

pub use client::{ApiClient, RequestOptions};
pub use context::{ApiConfig, ExecutionContext, PageScheme, RuntimeContext};
pub use credentials::{CookieStore, DocumentCookies, InboundRequest};
pub use error::{ApiError, TransportError};
pub use http::{CredentialsMode, HttpMethod, HttpRequest, HttpResponse};
pub use normalize::{EntityNormalizer, EntitySchema, EntityTables, Normalized, Normalizer, Schema};
pub use response::{EnvelopeBody, ResponseEnvelope};
pub use transport::{ReqwestTransport, Transport};
pub use verb::{ResolvedRequest, Verb};
