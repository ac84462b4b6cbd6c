/// Value coercion: turns raw widget input into a value of the field's type.
///
/// Coercion is lenient. Input that cannot be converted falls back to the
/// previous value instead of failing, since keystrokes routinely pass through
/// invalid intermediate states.
use crate::schema::{SchemaNode, SchemaType};
use serde_json::{Map, Number, Value};
use std::sync::Arc;

/// Raw input delivered by a widget.
#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    /// A plain value.
    Value(Value),
    /// An event-like wrapper carrying the value of its target.
    Event { value: Value },
    /// No value at all (`undefined`).
    Absent,
}

impl RawInput {
    /// The carried value; `None` when absent.
    pub fn into_value(self) -> Option<Value> {
        match self {
            RawInput::Value(v) | RawInput::Event { value: v } => Some(v),
            RawInput::Absent => None,
        }
    }
}

impl From<Value> for RawInput {
    fn from(value: Value) -> Self {
        RawInput::Value(value)
    }
}

impl From<Option<Value>> for RawInput {
    fn from(value: Option<Value>) -> Self {
        value.map_or(RawInput::Absent, RawInput::Value)
    }
}

/// A replacement for [`parse`], installed per form.
pub type ValueParser =
    Arc<dyn Fn(RawInput, Option<&Value>, &SchemaNode) -> Option<Value> + Send + Sync>;

/// Coerce `raw` against `schema`, with `previous` as the fallback.
pub fn parse(raw: RawInput, previous: Option<&Value>, schema: &SchemaNode) -> Option<Value> {
    match raw.into_value() {
        None => previous.cloned().or_else(|| schema.default.clone()),
        Some(value) => coerce(value, previous, schema),
    }
}

fn coerce(value: Value, previous: Option<&Value>, schema: &SchemaNode) -> Option<Value> {
    if value.is_null() {
        return match schema.schema_type {
            SchemaType::Null => Some(Value::Null),
            _ => None,
        };
    }

    let fallback = || previous.cloned();
    match schema.schema_type {
        SchemaType::String => match value {
            Value::String(_) => Some(value),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => fallback(),
        },
        SchemaType::Number | SchemaType::Integer => coerce_number(value, schema.schema_type)
            .unwrap_or_else(fallback),
        SchemaType::Boolean => match value {
            Value::Bool(_) => Some(value),
            Value::String(s) => match s.trim() {
                "true" | "on" | "1" => Some(Value::Bool(true)),
                "false" | "off" | "0" => Some(Value::Bool(false)),
                _ => fallback(),
            },
            Value::Number(n) if n.as_f64() == Some(1.0) => Some(Value::Bool(true)),
            Value::Number(n) if n.as_f64() == Some(0.0) => Some(Value::Bool(false)),
            _ => fallback(),
        },
        SchemaType::Array => match value {
            Value::Array(items) => Some(Value::Array(coerce_items(items, previous, schema))),
            _ => fallback(),
        },
        SchemaType::Object => match value {
            Value::Object(map) => Some(Value::Object(coerce_properties(map, previous, schema))),
            _ => fallback(),
        },
        SchemaType::Null => fallback(),
    }
}

/// `Some(result)` when the input was understood; `None` to use the fallback.
fn coerce_number(value: Value, ty: SchemaType) -> Option<Option<Value>> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Some(None);
            }
            s.parse::<f64>().ok().filter(|f| f.is_finite())?
        }
        _ => return None,
    };

    if ty == SchemaType::Integer {
        if n.fract() != 0.0 || n < i64::MIN as f64 || n >= i64::MAX as f64 {
            return None;
        }
        return Some(Some(Value::from(n as i64)));
    }
    Some(Number::from_f64(n).map(|num| {
        // Keep integral numbers integral so `1` stays `1`, not `1.0`.
        if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            Value::from(n as i64)
        } else {
            Value::Number(num)
        }
    }))
}

fn coerce_items(items: Vec<Value>, previous: Option<&Value>, schema: &SchemaNode) -> Vec<Value> {
    let Some(item_schema) = schema.items.as_deref() else {
        return items;
    };
    let previous_items = previous.and_then(Value::as_array);
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let prev = previous_items.and_then(|p| p.get(i));
            coerce(item, prev, item_schema).unwrap_or(Value::Null)
        })
        .collect()
}

fn coerce_properties(
    mut map: Map<String, Value>,
    previous: Option<&Value>,
    schema: &SchemaNode,
) -> Map<String, Value> {
    let previous_map = previous.and_then(Value::as_object);
    let mut out = Map::new();
    for (key, prop_schema) in &schema.properties {
        let prev = previous_map.and_then(|p| p.get(key));
        let coerced = match map.remove(key) {
            Some(v) => coerce(v, prev, prop_schema),
            None => prev.cloned(),
        };
        if let Some(v) = coerced {
            out.insert(key.clone(), v);
        }
    }
    out
}
