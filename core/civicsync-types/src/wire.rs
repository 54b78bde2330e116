//! Wire decoding of server collections.
//!
//! Both the request/response path and the push feed carry the same shape:
//! a JSON array of objects, or an object holding that array under `items` or
//! `data`. Every element must be an object with a non-empty string or integer
//! `id`; the whole element becomes the entity payload.
//!
//! Decoding fails closed: one bad element rejects the whole collection.

use crate::{Entity, EntityId, Error, Result};
use serde_json::Value;

/// Keys under which an enveloped collection may be found.
pub const ENVELOPE_KEYS: [&str; 2] = ["items", "data"];

/// Decodes a raw body into entities.
pub fn decode_collection(body: &[u8]) -> Result<Vec<Entity>> {
    let value: Value = serde_json::from_slice(body)?;
    decode_value(value)
}

/// Decodes an already-parsed JSON value into entities.
pub fn decode_value(value: Value) -> Result<Vec<Entity>> {
    let elements = match value {
        Value::Array(elements) => elements,
        Value::Object(mut map) => {
            let key = ENVELOPE_KEYS
                .iter()
                .find(|k| map.get(**k).is_some_and(Value::is_array))
                .ok_or_else(|| {
                    Error::Schema("object body without an `items` or `data` array".into())
                })?;
            match map.remove(*key) {
                Some(Value::Array(elements)) => elements,
                _ => return Err(Error::Schema(format!("`{key}` is not an array"))),
            }
        }
        other => {
            return Err(Error::Schema(format!(
                "expected array or object, got {}",
                kind(&other)
            )));
        }
    };

    elements
        .into_iter()
        .enumerate()
        .map(|(index, element)| decode_entity(index, element))
        .collect()
}

fn decode_entity(index: usize, element: Value) -> Result<Entity> {
    let id = match element.get("id") {
        Some(Value::String(s)) if !s.is_empty() => EntityId::new(s.clone()),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => EntityId::new(n.to_string()),
        Some(other) => {
            return Err(Error::Schema(format!(
                "element {index}: unusable id of kind {}",
                kind(other)
            )));
        }
        None if element.is_object() => {
            return Err(Error::Schema(format!("element {index}: missing id")));
        }
        None => {
            return Err(Error::Schema(format!(
                "element {index}: expected object, got {}",
                kind(&element)
            )));
        }
    };
    Ok(Entity::new(id, element))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
