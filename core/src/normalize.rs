//! Schema descriptors and the normalization collaborator.
//!
//! # Design
//! The response pipeline only decides *when* to normalize; *how* is behind
//! the [`Normalizer`] trait. [`EntityNormalizer`] is the implementation
//! shipped with the crate: it walks a JSON value along a [`Schema`], moves
//! every entity into `entities[key][id]` and replaces it with its id.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

/// `entity key -> id -> record`.
pub type EntityTables = BTreeMap<String, BTreeMap<String, Value>>;

/// Shape of the data to normalize.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Entity(EntitySchema),
    Array(Box<Schema>),
    /// A plain object whose listed fields hold nested schemas.
    Object(BTreeMap<String, Schema>),
}

impl Schema {
    pub fn array_of(inner: impl Into<Schema>) -> Self {
        Schema::Array(Box::new(inner.into()))
    }

    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Schema)>,
        K: Into<String>,
    {
        Schema::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<EntitySchema> for Schema {
    fn from(entity: EntitySchema) -> Self {
        Schema::Entity(entity)
    }
}

/// A record type with a stable identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    key: String,
    id_attribute: String,
    definition: BTreeMap<String, Schema>,
}

impl EntitySchema {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            id_attribute: "id".to_string(),
            definition: BTreeMap::new(),
        }
    }

    pub fn id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.id_attribute = attribute.into();
        self
    }

    /// Declare that `field` holds data shaped like `schema`.
    pub fn define(mut self, field: impl Into<String>, schema: impl Into<Schema>) -> Self {
        self.definition.insert(field.into(), schema.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Output of a normalizer: the flattened tables plus a reference structure
/// (an id, a list of ids, or an object of them) rebuilding the input shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Normalized {
    pub result: Value,
    pub entities: EntityTables,
}

/// Flattens nested JSON into entity tables.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, data: &Value, schema: &Schema) -> Normalized;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EntityNormalizer;

impl Normalizer for EntityNormalizer {
    fn normalize(&self, data: &Value, schema: &Schema) -> Normalized {
        let mut entities = EntityTables::new();
        let result = visit(data, schema, &mut entities);
        Normalized { result, entities }
    }
}

fn visit(value: &Value, schema: &Schema, entities: &mut EntityTables) -> Value {
    match schema {
        Schema::Entity(entity) => visit_entity(value, entity, entities),
        Schema::Array(inner) => match value {
            Value::Array(items) => Value::Array(items.iter().map(|item| visit(item, inner, entities)).collect()),
            other => other.clone(),
        },
        Schema::Object(fields) => match value {
            Value::Object(object) => Value::Object(visit_fields(object, fields, entities)),
            other => other.clone(),
        },
    }
}

fn visit_entity(value: &Value, entity: &EntitySchema, entities: &mut EntityTables) -> Value {
    let Value::Object(object) = value else {
        // Already a reference.
        return value.clone();
    };
    let Some(id) = object.get(&entity.id_attribute).cloned() else {
        return value.clone();
    };
    let Some(id_key) = id_key(&id) else {
        return value.clone();
    };

    let record = visit_fields(object, &entity.definition, entities);
    let table = entities.entry(entity.key.clone()).or_default();
    match table.get_mut(&id_key) {
        Some(Value::Object(existing)) => existing.extend(record),
        _ => {
            table.insert(id_key, Value::Object(record));
        }
    }
    id
}

fn visit_fields(
    object: &Map<String, Value>,
    fields: &BTreeMap<String, Schema>,
    entities: &mut EntityTables,
) -> Map<String, Value> {
    object
        .iter()
        .map(|(field, value)| {
            let value = match fields.get(field) {
                Some(schema) if !value.is_null() => visit(value, schema, entities),
                _ => value.clone(),
            };
            (field.clone(), value)
        })
        .collect()
}

fn id_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
