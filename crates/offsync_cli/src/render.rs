//! Output helpers shared by the commands.

use ciborium::Value;
use clap::ValueEnum;
use serde_json::{Map, Number, Value as Json};

/// Output format for listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

const SUMMARY_CHARS: usize = 60;

/// Converts a decoded CBOR payload into JSON.
///
/// Byte strings become lowercase hex, tags are dropped, integers outside the
/// JSON number range become strings and non-text map keys are rendered as
/// their JSON text.
pub fn cbor_to_json(value: &Value) -> Json {
    match value {
        Value::Integer(i) => {
            let n = i128::from(*i);
            if let Ok(v) = i64::try_from(n) {
                Json::from(v)
            } else if let Ok(v) = u64::try_from(n) {
                Json::from(v)
            } else {
                Json::String(n.to_string())
            }
        }
        Value::Bytes(bytes) => Json::String(hex(bytes)),
        Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Text(s) => Json::String(s.clone()),
        Value::Bool(b) => Json::Bool(*b),
        Value::Null => Json::Null,
        Value::Tag(_, inner) => cbor_to_json(inner),
        Value::Array(items) => Json::Array(items.iter().map(cbor_to_json).collect()),
        Value::Map(entries) => {
            let mut object = Map::new();
            for (k, v) in entries {
                let key = match k {
                    Value::Text(s) => s.clone(),
                    other => cbor_to_json(other).to_string(),
                };
                object.insert(key, cbor_to_json(v));
            }
            Json::Object(object)
        }
        _ => Json::Null,
    }
}

/// One-line rendering of a converted payload for text output.
pub fn summarize(value: &Json) -> String {
    let text = value.to_string();
    if text.chars().count() <= SUMMARY_CHARS {
        return text;
    }
    let mut short: String = text.chars().take(SUMMARY_CHARS).collect();
    short.push_str("...");
    short
}

/// Renders how long ago `then` was, relative to `now` (both unix millis).
pub fn format_age(now: u64, then: u64) -> String {
    let secs = now.saturating_sub(then) / 1000;
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
