//! Response post-processing: pagination links and optional normalization.
//!
//! # Design
//! The decoded body is read, never modified. A new `ResponseEnvelope` is
//! assembled from selected parts of it: pagination links are lifted out of
//! `next`/`previous`, and the remainder is either kept as plain fields or
//! replaced wholesale by the normalizer's output. `EnvelopeBody` being an
//! enum is what keeps raw fields and entity tables from ever coexisting.

use serde_json::{Map, Value};

use crate::context::PageScheme;
use crate::error::{ApiError, TransportError};
use crate::http::HttpResponse;
use crate::normalize::{EntityTables, Normalized, Normalizer, Schema};
use crate::urls::upgrade_link;

const NEXT_FIELD: &str = "next";
const PREVIOUS_FIELD: &str = "previous";
const RESULTS_FIELD: &str = "results";

/// What a successful call hands back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub next_page_url: Option<String>,
    pub prev_page_url: Option<String>,
    pub body: EnvelopeBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeBody {
    /// Remaining top-level fields of an object body, unprocessed.
    Fields(Map<String, Value>),
    /// Normalizer output, replacing every other body field.
    Normalized(Normalized),
    /// A non-object body returned without a schema.
    Payload(Value),
}

impl ResponseEnvelope {
    /// Build an envelope from a decoded body. `body` must not be `null`.
    pub fn from_body(
        body: &Value,
        schema: Option<&Schema>,
        normalizer: &dyn Normalizer,
        page_scheme: PageScheme,
    ) -> Self {
        let Value::Object(object) = body else {
            let body = match schema {
                Some(schema) => EnvelopeBody::Normalized(normalizer.normalize(body, schema)),
                None => EnvelopeBody::Payload(body.clone()),
            };
            return Self {
                next_page_url: None,
                prev_page_url: None,
                body,
            };
        };

        let next_page_url = page_link(object.get(NEXT_FIELD), page_scheme);
        let prev_page_url = page_link(object.get(PREVIOUS_FIELD), page_scheme);

        let remainder: Map<String, Value> = object
            .iter()
            .filter(|(key, _)| key.as_str() != NEXT_FIELD && key.as_str() != PREVIOUS_FIELD)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let body = match schema {
            Some(schema) => {
                let normalized = match remainder.get(RESULTS_FIELD) {
                    Some(results) => normalizer.normalize(results, schema),
                    None => normalizer.normalize(&Value::Object(remainder), schema),
                };
                EnvelopeBody::Normalized(normalized)
            }
            None => EnvelopeBody::Fields(remainder),
        };

        Self {
            next_page_url,
            prev_page_url,
            body,
        }
    }

    /// A remaining raw field, when the body was not normalized.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match &self.body {
            EnvelopeBody::Fields(fields) => fields.get(field),
            _ => None,
        }
    }

    pub fn entities(&self) -> Option<&EntityTables> {
        match &self.body {
            EnvelopeBody::Normalized(normalized) => Some(&normalized.entities),
            _ => None,
        }
    }

    /// The normalizer's reference structure, or the raw non-object payload.
    pub fn result(&self) -> Option<&Value> {
        match &self.body {
            EnvelopeBody::Normalized(normalized) => Some(&normalized.result),
            EnvelopeBody::Payload(payload) => Some(payload),
            EnvelopeBody::Fields(_) => None,
        }
    }

    /// Flatten into a single JSON object: `nextPageUrl`, `prevPageUrl`,
    /// then either the raw fields, or `entities` and `result`.
    pub fn into_value(self) -> Value {
        let mut out = Map::new();
        if let Some(next) = self.next_page_url {
            out.insert("nextPageUrl".to_string(), Value::String(next));
        }
        if let Some(prev) = self.prev_page_url {
            out.insert("prevPageUrl".to_string(), Value::String(prev));
        }
        match self.body {
            EnvelopeBody::Fields(fields) => out.extend(fields),
            EnvelopeBody::Normalized(normalized) => {
                let entities = serde_json::to_value(normalized.entities).unwrap_or(Value::Null);
                out.insert("entities".to_string(), entities);
                out.insert("result".to_string(), normalized.result);
            }
            EnvelopeBody::Payload(payload) => {
                out.insert("result".to_string(), payload);
            }
        }
        Value::Object(out)
    }
}

/// Turn a transport response into the caller's result.
///
/// Non-2xx responses reject with their decoded JSON body when there is one,
/// otherwise with the raw status and text. Successful responses with an
/// empty, `null` or undecodable body resolve to `None`.
pub fn parse(
    response: HttpResponse,
    schema: Option<&Schema>,
    normalizer: &dyn Normalizer,
    page_scheme: PageScheme,
) -> Result<Option<ResponseEnvelope>, ApiError> {
    if !response.is_success() {
        return Err(match decode_body(&response.body) {
            Some(body) => ApiError::Rejected {
                status: response.status,
                body,
            },
            None => TransportError::Status {
                status: response.status,
                body: response.body,
            }
            .into(),
        });
    }

    Ok(decode_body(&response.body)
        .map(|body| ResponseEnvelope::from_body(&body, schema, normalizer, page_scheme)))
}

fn decode_body(raw: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => None,
        Ok(body) => Some(body),
        Err(e) => {
            tracing::debug!(error = %e, "response body is not JSON");
            None
        }
    }
}

fn page_link(value: Option<&Value>, page_scheme: PageScheme) -> Option<String> {
    value
        .and_then(Value::as_str)
        .and_then(|link| upgrade_link(link, page_scheme))
}
