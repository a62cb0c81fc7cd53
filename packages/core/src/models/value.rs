//! Value Layer - Typecast and Write Errors
//!
//! Coercion of raw JSON input into the typed representation documents
//! hold, governed by each field's [`FieldKind`]. Coercions that cannot be
//! performed safely reject the write: the document keeps its prior value
//! and records a [`SetError`]. Nothing in this module performs I/O or
//! panics on bad input.
//!
//! Dates are held as `chrono::DateTime<Utc>` and serialize as epoch
//! milliseconds unless a caller asks for ISO-8601.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::models::document::Document;
use crate::models::field::{FieldKind, StringConstraints};
use crate::models::schema::Schema;

/// A rejected field write
///
/// Accumulated on the document instance; never thrown. `previous` is the
/// projection of the value the field kept.
#[derive(Debug, Clone, PartialEq)]
pub struct SetError {
    pub field: String,
    pub message: String,
    pub attempted: Value,
    pub previous: Value,
}

/// The current value of a single document field
#[derive(Clone)]
pub enum FieldValue {
    /// Unset; omitted from serialized output
    Missing,

    /// Typecast-normalized plain JSON
    Value(Value),

    /// A date field
    Date(DateTime<Utc>),

    /// A hydrated embedded document
    Doc(Box<Document>),

    /// Array element slots, each following the element descriptor
    Array(Vec<FieldValue>),
}

impl FieldValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Plain-JSON projection of this slot
    ///
    /// Hydrated embedded documents project to their user-visible key value
    /// (or `null` when the child has no key yet); full expansion is the
    /// job of `to_object`.
    pub fn projected(&self, date_to_iso: bool) -> Value {
        match self {
            Self::Missing => Value::Null,
            Self::Value(v) => v.clone(),
            Self::Date(d) => project_date(d, date_to_iso),
            Self::Doc(doc) => doc.key_value().unwrap_or(Value::Null),
            Self::Array(items) => {
                Value::Array(items.iter().map(|i| i.projected(date_to_iso)).collect())
            }
        }
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "Missing"),
            Self::Value(v) => write!(f, "Value({v})"),
            Self::Date(d) => write!(f, "Date({})", d.to_rfc3339()),
            Self::Doc(doc) => write!(f, "Doc({})", doc.model_name()),
            Self::Array(items) => f.debug_list().entries(items).finish(),
        }
    }
}

/// Serialize a date per the requested representation
pub(crate) fn project_date(date: &DateTime<Utc>, date_to_iso: bool) -> Value {
    if date_to_iso {
        Value::String(date.to_rfc3339())
    } else {
        Value::from(date.timestamp_millis())
    }
}

/// Coerce `raw` to the declared kind
///
/// `Ok` carries the typed slot value; `Err` carries the rejection message
/// for the [`SetError`]. JSON `null` always clears the field.
pub(crate) fn typecast(kind: &FieldKind, raw: Value) -> Result<FieldValue, String> {
    if raw.is_null() {
        return Ok(FieldValue::Missing);
    }

    match kind {
        FieldKind::String(constraints) => cast_string(constraints, raw),
        FieldKind::Number(constraints) => {
            let number = match &raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .ok_or_else(|| format!("cannot cast {} to number", type_of(&raw)))?;

            if let Some(min) = constraints.min {
                if number < min {
                    return Err(format!("value {number} below minimum {min}"));
                }
            }
            if let Some(max) = constraints.max {
                if number > max {
                    return Err(format!("value {number} above maximum {max}"));
                }
            }
            // Integral values stay integers so numeric keys render without
            // a fractional part.
            let json = if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
                Value::from(number as i64)
            } else {
                serde_json::Number::from_f64(number)
                    .map(Value::Number)
                    .ok_or_else(|| "number is not finite".to_string())?
            };
            Ok(FieldValue::Value(json))
        }
        FieldKind::Boolean => {
            let flag = match &raw {
                Value::Bool(b) => Some(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(1) => Some(true),
                    Some(0) => Some(false),
                    _ => None,
                },
                Value::String(s) => match s.as_str() {
                    "true" | "1" => Some(true),
                    "false" | "0" => Some(false),
                    _ => None,
                },
                _ => None,
            };
            flag.map(|b| FieldValue::Value(Value::Bool(b)))
                .ok_or_else(|| format!("cannot cast {} to boolean", type_of(&raw)))
        }
        FieldKind::Date => cast_date(raw).map(FieldValue::Date),
        FieldKind::Any => Ok(FieldValue::Value(raw)),
        FieldKind::Array {
            element,
            constraints,
        } => {
            let items = match raw {
                Value::Array(items) => items,
                other => return Err(format!("cannot cast {} to array", type_of(&other))),
            };
            let mut slots = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let slot = typecast(&element.kind, item)
                    .map_err(|msg| format!("element {i}: {msg}"))?;
                slots.push(slot);
            }
            if constraints.unique {
                slots = dedupe(slots);
            }
            Ok(FieldValue::Array(slots))
        }
        FieldKind::Object(schema) => cast_object(schema, raw),
        FieldKind::Reference { model } => match raw {
            scalar @ (Value::String(_) | Value::Number(_)) => Ok(FieldValue::Value(scalar)),
            other => Err(format!(
                "cannot cast {} to a {model} reference; pass a key scalar or use set_document",
                type_of(&other)
            )),
        },
        FieldKind::Alias { target } => {
            // Aliases are resolved to their target before typecast.
            Err(format!("alias to '{target}' was not resolved"))
        }
    }
}

fn cast_string(constraints: &StringConstraints, raw: Value) -> Result<FieldValue, String> {
    let mut text = match raw {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => return Err(format!("cannot cast {} to string", type_of(&other))),
    };

    if let Some(transform) = &constraints.transform {
        text = transform(text);
    }

    if let Some(max) = constraints.max_length {
        if text.chars().count() > max {
            if constraints.clip {
                text = text.chars().take(max).collect();
            } else {
                return Err(format!("string longer than {max} characters"));
            }
        }
    }
    if let Some(min) = constraints.min_length {
        if text.chars().count() < min {
            return Err(format!("string shorter than {min} characters"));
        }
    }
    if let Some(pattern) = &constraints.pattern {
        if !pattern.is_match(&text) {
            return Err(format!("string does not match pattern '{}'", pattern.as_str()));
        }
    }
    if let Some(allowed) = &constraints.enum_values {
        if !allowed.iter().any(|v| v == &text) {
            return Err(format!(
                "'{text}' is not one of: {}",
                allowed.join(", ")
            ));
        }
    }

    Ok(FieldValue::Value(Value::String(text)))
}

fn cast_date(raw: Value) -> Result<DateTime<Utc>, String> {
    match raw {
        Value::String(s) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(&s) {
                return Ok(parsed.with_timezone(&Utc));
            }
            if let Ok(date) = chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
                if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                    return Ok(Utc.from_utc_datetime(&midnight));
                }
            }
            Err(format!("cannot parse '{s}' as a date"))
        }
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .ok_or_else(|| "epoch value must be an integer".to_string())?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| format!("epoch value {millis} out of range"))
        }
        other => Err(format!("cannot cast {} to date", type_of(&other))),
    }
}

fn cast_object(schema: &Schema, raw: Value) -> Result<FieldValue, String> {
    let mut input = match raw {
        Value::Object(input) => input,
        other => return Err(format!("cannot cast {} to object", type_of(&other))),
    };

    // Unknown keys are dropped; the sub-schema is the shape.
    let mut out = Map::new();
    for field in schema.fields() {
        let Some(value) = input.remove(&field.name) else {
            continue;
        };
        let slot = typecast(&field.kind, value)
            .map_err(|msg| format!("field '{}': {msg}", field.name))?;
        match slot {
            FieldValue::Missing => {}
            other => {
                out.insert(field.name.clone(), other.projected(false));
            }
        }
    }
    Ok(FieldValue::Value(Value::Object(out)))
}

fn dedupe(slots: Vec<FieldValue>) -> Vec<FieldValue> {
    let mut seen: Vec<Value> = Vec::new();
    let mut out = Vec::with_capacity(slots.len());
    for slot in slots {
        let projection = slot.projected(false);
        if !seen.contains(&projection) {
            seen.push(projection);
            out.push(slot);
        }
    }
    out
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
