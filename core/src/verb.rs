//! Logical verbs and their wire encoding.
//!
//! Some proxies and server frameworks only let GET and POST through. For
//! PUT, PATCH and DELETE the intended verb is therefore also written into
//! the query string as `_method=<VERB>`, which the API honours regardless
//! of the method the request actually arrived with.

use std::fmt;

use crate::http::HttpMethod;
use crate::urls::append_query;

/// Query parameter that carries the intended verb.
pub const OVERRIDE_PARAM: &str = "_method";

/// Verb the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// One row of [`VERB_TABLE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerbMapping {
    pub verb: Verb,
    pub method: HttpMethod,
    pub override_token: Option<&'static str>,
}

/// Indexed by `Verb as usize`.
pub static VERB_TABLE: [VerbMapping; 5] = [
    VerbMapping {
        verb: Verb::Get,
        method: HttpMethod::Get,
        override_token: None,
    },
    VerbMapping {
        verb: Verb::Post,
        method: HttpMethod::Post,
        override_token: None,
    },
    VerbMapping {
        verb: Verb::Put,
        method: HttpMethod::Put,
        override_token: Some("PUT"),
    },
    VerbMapping {
        verb: Verb::Patch,
        method: HttpMethod::Patch,
        override_token: Some("PATCH"),
    },
    VerbMapping {
        verb: Verb::Delete,
        method: HttpMethod::Delete,
        override_token: Some("DELETE"),
    },
];

impl Verb {
    pub const ALL: [Verb; 5] = [Verb::Get, Verb::Post, Verb::Put, Verb::Patch, Verb::Delete];

    pub fn mapping(self) -> &'static VerbMapping {
        &VERB_TABLE[self as usize]
    }

    /// Method sent on the wire. With `tunnel` set, overridden verbs travel
    /// as POST.
    pub fn wire_method(self, tunnel: bool) -> HttpMethod {
        let mapping = self.mapping();
        match mapping.override_token {
            Some(_) if tunnel => HttpMethod::Post,
            _ => mapping.method,
        }
    }

    pub fn override_token(self) -> Option<&'static str> {
        self.mapping().override_token
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mapping().method.as_str())
    }
}

/// A resolved URL paired with its wire method and verb override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub url: String,
    pub method: HttpMethod,
    pub query_override: Option<&'static str>,
}

impl ResolvedRequest {
    pub fn new(verb: Verb, url: String, tunnel: bool) -> Self {
        Self {
            url,
            method: verb.wire_method(tunnel),
            query_override: verb.override_token(),
        }
    }

    /// The URL with `_method=<VERB>` appended after any existing query.
    pub fn target(&self) -> String {
        match self.query_override {
            Some(token) => append_query(&self.url, &format!("{OVERRIDE_PARAM}={token}")),
            None => self.url.clone(),
        }
    }
}
