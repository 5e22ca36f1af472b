//! The owned value form that crosses the polyglot boundary.
//!
//! Converting a `Value` to a `Payload` is the binding snapshot: lists and
//! dicts copy deeply, structs flatten to field maps. Payloads are `Send`, so
//! dispatcher threads never touch interpreter handles.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::{ErrorKind, NaabError};
use crate::value::{HeapData, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Payload>),
    /// Insertion-ordered, mirroring NAAb dicts.
    Dict(Vec<(String, Payload)>),
}

impl Payload {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Payload::Null => serde_json::Value::Null,
            Payload::Bool(b) => serde_json::Value::Bool(*b),
            Payload::Int(n) => serde_json::Value::from(*n),
            Payload::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Payload::Str(s) => serde_json::Value::String(s.clone()),
            Payload::List(items) => {
                serde_json::Value::Array(items.iter().map(|p| p.to_json()).collect())
            }
            Payload::Dict(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
        }
    }

    /// Inverse of `to_json`. Integers convert to int when they fit 64 bits;
    /// a foreign integer that overflows comes back as its decimal string,
    /// never as a lossy float. Non-integral numbers stay floats.
    pub fn from_json(json: &serde_json::Value) -> Payload {
        match json {
            serde_json::Value::Null => Payload::Null,
            serde_json::Value::Bool(b) => Payload::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Payload::Int(i),
                None if n.is_u64() => Payload::Str(n.to_string()),
                None => match n.as_f64() {
                    Some(x) => Payload::Float(x),
                    None => Payload::Str(n.to_string()),
                },
            },
            serde_json::Value::String(s) => Payload::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Payload::List(items.iter().map(Payload::from_json).collect())
            }
            serde_json::Value::Object(map) => Payload::Dict(
                map.iter()
                    .map(|(k, v)| (k.clone(), Payload::from_json(v)))
                    .collect(),
            ),
        }
    }
}

/// Capture a binding snapshot of `value`. Fails on values that cannot cross
/// the boundary (functions, modules, blocks, cycles).
pub fn value_to_payload(value: &Value) -> Result<Payload, NaabError> {
    let mut visiting = HashSet::new();
    convert_value(value, &mut visiting)
}

fn convert_value(value: &Value, visiting: &mut HashSet<u64>) -> Result<Payload, NaabError> {
    if let Some(cell) = value.heap_ref() {
        if !visiting.insert(cell.id()) {
            return Err(NaabError::new(
                ErrorKind::Type,
                "cyclic value cannot cross the polyglot boundary",
            ));
        }
    }
    let result = match value {
        Value::Null => Ok(Payload::Null),
        Value::Bool(b) => Ok(Payload::Bool(*b)),
        Value::Int(n) => Ok(Payload::Int(*n)),
        Value::Float(x) => Ok(Payload::Float(*x)),
        Value::Str(s) => Ok(Payload::Str(s.clone())),
        Value::List(cell) => match &*cell.data.borrow() {
            HeapData::List(items) => {
                let converted: Result<Vec<_>, _> =
                    items.iter().map(|v| convert_value(v, visiting)).collect();
                Ok(Payload::List(converted?))
            }
            _ => Ok(Payload::List(Vec::new())),
        },
        Value::Dict(cell) => match &*cell.data.borrow() {
            HeapData::Dict(entries) => {
                let mut converted = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    converted.push((k.clone(), convert_value(v, visiting)?));
                }
                Ok(Payload::Dict(converted))
            }
            _ => Ok(Payload::Dict(Vec::new())),
        },
        // Structs cross as field maps, per the binding protocol.
        Value::Struct(cell) => match &*cell.data.borrow() {
            HeapData::Struct { def, fields } => {
                let mut converted = Vec::with_capacity(fields.len());
                for (fd, v) in def.fields.iter().zip(fields.iter()) {
                    converted.push((fd.name.clone(), convert_value(v, visiting)?));
                }
                Ok(Payload::Dict(converted))
            }
            _ => Ok(Payload::Dict(Vec::new())),
        },
        Value::Enum(cell) => match &*cell.data.borrow() {
            HeapData::Enum {
                def,
                variant,
                payload,
            } => {
                let name = def
                    .variants
                    .get(*variant)
                    .map(|v| v.name.clone())
                    .unwrap_or_default();
                let converted: Result<Vec<_>, _> =
                    payload.iter().map(|v| convert_value(v, visiting)).collect();
                Ok(Payload::Dict(vec![
                    ("variant".to_string(), Payload::Str(name)),
                    ("payload".to_string(), Payload::List(converted?)),
                ]))
            }
            _ => Ok(Payload::Dict(Vec::new())),
        },
        other => Err(NaabError::new(
            ErrorKind::Type,
            format!("{} cannot cross the polyglot boundary", other.type_name()),
        )),
    };
    if let Some(cell) = value.heap_ref() {
        visiting.remove(&cell.id());
    }
    result
}

/// Convert a returned payload back into interpreter values.
pub fn payload_to_value(payload: &Payload) -> Value {
    match payload {
        Payload::Null => Value::Null,
        Payload::Bool(b) => Value::Bool(*b),
        Payload::Int(n) => Value::Int(*n),
        Payload::Float(x) => Value::Float(*x),
        Payload::Str(s) => Value::str(s.clone()),
        Payload::List(items) => Value::list(items.iter().map(payload_to_value).collect()),
        Payload::Dict(entries) => {
            let map: IndexMap<String, Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), payload_to_value(v)))
                .collect();
            Value::dict(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_deep_copies_lists() {
        let original = Value::list(vec![Value::Int(1), Value::str("two")]);
        let payload = value_to_payload(&original).unwrap();
        assert_eq!(
            payload,
            Payload::List(vec![Payload::Int(1), Payload::Str("two".into())])
        );
        // Mutating the original after snapshot does not affect the payload.
        if let Value::List(cell) = &original {
            if let HeapData::List(items) = &mut *cell.data.borrow_mut() {
                items.clear();
            }
        }
        assert!(matches!(payload, Payload::List(ref items) if items.len() == 2));
    }

    #[test]
    fn cyclic_values_are_rejected() {
        let d = Value::dict(IndexMap::new());
        if let Value::Dict(cell) = &d {
            if let HeapData::Dict(entries) = &mut *cell.data.borrow_mut() {
                entries.insert("me".into(), d.clone());
            }
        }
        let err = value_to_payload(&d).unwrap_err();
        assert!(err.message.contains("cyclic"), "{}", err.message);
    }

    #[test]
    fn shared_but_acyclic_values_convert() {
        let shared = Value::list(vec![Value::Int(1)]);
        let outer = Value::list(vec![shared.clone(), shared]);
        assert!(value_to_payload(&outer).is_ok());
    }

    #[test]
    fn overflowing_integers_fall_back_to_string() {
        let big: serde_json::Value = serde_json::from_str("9223372036854775808").unwrap();
        assert_eq!(
            Payload::from_json(&big),
            Payload::Str("9223372036854775808".to_string())
        );
        let max: serde_json::Value = serde_json::from_str("9223372036854775807").unwrap();
        assert_eq!(Payload::from_json(&max), Payload::Int(i64::MAX));
        let fraction: serde_json::Value = serde_json::from_str("-1.5").unwrap();
        assert_eq!(Payload::from_json(&fraction), Payload::Float(-1.5));
    }

    #[test]
    fn json_round_trip() {
        let payload = Payload::Dict(vec![
            ("n".to_string(), Payload::Int(7)),
            ("xs".to_string(), Payload::List(vec![Payload::Bool(true)])),
        ]);
        let back = Payload::from_json(&payload.to_json());
        assert_eq!(payload, back);
    }

    #[test]
    fn round_trip_through_value() {
        let payload = Payload::Dict(vec![
            ("a".to_string(), Payload::Int(1)),
            ("b".to_string(), Payload::Str("x".into())),
        ]);
        let value = payload_to_value(&payload);
        let again = value_to_payload(&value).unwrap();
        assert_eq!(payload, again);
    }
}
