//! Conversions between command-line text, JSON and runtime values

use anyhow::{bail, Context};
use kiln_engine::{Tensor, Value};
use serde_json::Value as Json;

/// Parse a `run` argument: int, float, bool, `None`, otherwise a string
pub fn parse_arg(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        return Value::Float(f);
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "None" => Value::None,
        _ => Value::from(text),
    }
}

/// Convert JSON to a value
///
/// Arrays of numbers become 1-D tensors; other arrays become tuples.
/// `{"shape": [...], "data": [...]}` builds a shaped tensor.
pub fn from_json(json: &Json) -> anyhow::Result<Value> {
    Ok(match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().context("number out of range")?),
        },
        Json::String(s) => Value::from(s.as_str()),
        Json::Array(items) if !items.is_empty() && items.iter().all(Json::is_number) => {
            Value::from(Tensor::from_vec(numbers(items)?))
        }
        Json::Array(items) => Value::from(
            items
                .iter()
                .map(from_json)
                .collect::<anyhow::Result<Vec<_>>>()?,
        ),
        Json::Object(fields) => {
            let (Some(Json::Array(shape)), Some(Json::Array(data))) =
                (fields.get("shape"), fields.get("data"))
            else {
                bail!("objects must be tensors of the form {{\"shape\": [...], \"data\": [...]}}");
            };
            let shape = shape
                .iter()
                .map(|d| d.as_u64().map(|d| d as usize).context("shape entries must be sizes"))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let tensor = Tensor::with_shape(shape.clone(), numbers(data)?)
                .with_context(|| format!("data doesn't fill shape {shape:?}"))?;
            Value::from(tensor)
        }
    })
}

fn numbers(items: &[Json]) -> anyhow::Result<Vec<f64>> {
    items
        .iter()
        .map(|n| n.as_f64().context("expected a number"))
        .collect()
}

/// Convert a value to JSON for display
pub fn to_json(value: &Value) -> Json {
    match value {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or_else(|| Json::String(f.to_string())),
        Value::Str(s) => Json::String(s.to_string()),
        Value::Tensor(t) => serde_json::json!({
            "shape": t.shape,
            "device": t.device.to_string(),
            "data": t.data,
        }),
        Value::Tuple(items) => Json::Array(items.iter().map(to_json).collect()),
    }
}
