//! JSON interchange for column values.
//!
//! [`JsonValue`] is the scalar token a column reads and writes. Numbers and
//! strings keep their literal text so the exact representation chosen by the
//! column survives a round trip. Escaping covers control characters, quote,
//! backslash and the three line separators JavaScript treats as newlines
//! (U+0085, U+2028, U+2029).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::DataType;
use crate::value::{DATE_FORMAT, TIME_FORMAT, Value, parse_timestamp, parse_timestamp_tz};

/// A scalar JSON token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonValue {
    /// A number, carrying its literal text.
    Number(String),
    /// A string, carrying its unescaped text.
    String(String),
    /// `true`.
    True,
    /// `false`.
    False,
    /// `null`.
    Null,
}

impl JsonValue {
    /// Create a number token from its literal text.
    pub fn number(text: impl Into<String>) -> Self {
        JsonValue::Number(text.into())
    }

    /// Create a string token.
    pub fn string(text: impl Into<String>) -> Self {
        JsonValue::String(text.into())
    }

    /// Create a boolean token.
    pub fn boolean(value: bool) -> Self {
        if value {
            JsonValue::True
        } else {
            JsonValue::False
        }
    }

    /// The literal text of the token, unescaped.
    pub fn text(&self) -> &str {
        match self {
            JsonValue::Number(s) | JsonValue::String(s) => s,
            JsonValue::True => "true",
            JsonValue::False => "false",
            JsonValue::Null => "null",
        }
    }

    /// Append the JSON rendering of the token.
    pub fn write_to(&self, out: &mut String) {
        match self {
            JsonValue::String(s) => {
                out.push('"');
                escape_into(out, s);
                out.push('"');
            }
            other => out.push_str(other.text()),
        }
    }

    /// Render the token as JSON text.
    pub fn to_json_string(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    /// Parse a single JSON scalar token.
    pub fn parse(text: &str) -> Result<JsonValue> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        JsonValue::from_serde(&value)
    }

    /// Convert a parsed `serde_json` scalar. Arrays and objects are rejected.
    pub fn from_serde(value: &serde_json::Value) -> Result<JsonValue> {
        match value {
            serde_json::Value::Null => Ok(JsonValue::Null),
            serde_json::Value::Bool(b) => Ok(JsonValue::boolean(*b)),
            serde_json::Value::Number(n) => Ok(JsonValue::Number(n.to_string())),
            serde_json::Value::String(s) => Ok(JsonValue::String(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Err(Error::format(
                "expected a JSON scalar, found an array or object",
            )),
        }
    }
}

/// Escape `s` for inclusion inside a JSON string literal.
pub fn escape_into(out: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\u{85}' | '\u{2028}' | '\u{2029}' => {
                out.push_str(&format!("\\u{:04x}", ch as u32));
            }
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
}

impl DataType {
    /// Serialize a value of this type to a JSON token.
    pub fn serialize(self, value: &Value) -> Result<JsonValue> {
        if value.is_null() {
            return Ok(JsonValue::Null);
        }
        let value = value.cast(self)?;
        Ok(match &value {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::boolean(*b),
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
                JsonValue::Number(value.to_string())
            }
            Value::Float(v) => float_token(f64::from(*v), v.to_string()),
            Value::Double(v) => float_token(*v, v.to_string()),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Bytes(b) => JsonValue::String(BASE64.encode(b)),
            Value::Date(_)
            | Value::Time(_)
            | Value::Timestamp(_)
            | Value::TimestampTz(_)
            | Value::Uuid(_) => JsonValue::String(value.to_string()),
        })
    }

    /// Deserialize a JSON token into a value of this type.
    pub fn deserialize(self, json: &JsonValue) -> Result<Value> {
        if *json == JsonValue::Null {
            return Ok(Value::Null);
        }
        let bad = || {
            Error::format(format!(
                "cannot read {} from JSON token '{}'",
                self.sql_name(),
                json.text()
            ))
        };
        match self {
            DataType::Boolean => match json {
                JsonValue::True => Ok(Value::Bool(true)),
                JsonValue::False => Ok(Value::Bool(false)),
                _ => Err(bad()),
            },
            DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt => {
                let JsonValue::Number(text) = json else {
                    return Err(bad());
                };
                let wide: i64 = text.parse().map_err(|_| bad())?;
                Value::BigInt(wide).cast(self).map_err(|_| bad())
            }
            DataType::Float | DataType::Double => {
                let f = match json {
                    JsonValue::Number(text) => text.parse::<f64>().map_err(|_| bad())?,
                    JsonValue::String(s) => match s.as_str() {
                        "NaN" => f64::NAN,
                        "Infinity" => f64::INFINITY,
                        "-Infinity" => f64::NEG_INFINITY,
                        _ => return Err(bad()),
                    },
                    _ => return Err(bad()),
                };
                Ok(if self == DataType::Float {
                    Value::Float(f as f32)
                } else {
                    Value::Double(f)
                })
            }
            DataType::Text => match json {
                JsonValue::String(s) => Ok(Value::Text(s.clone())),
                _ => Err(bad()),
            },
            other => {
                let JsonValue::String(s) = json else {
                    return Err(bad());
                };
                match other {
                    DataType::Bytes => BASE64.decode(s).map(Value::Bytes).map_err(|_| bad()),
                    DataType::Date => NaiveDate::parse_from_str(s, DATE_FORMAT)
                        .map(Value::Date)
                        .map_err(|_| bad()),
                    DataType::Time => NaiveTime::parse_from_str(s, TIME_FORMAT)
                        .map(Value::Time)
                        .map_err(|_| bad()),
                    DataType::Timestamp => parse_timestamp(s).map(Value::Timestamp).ok_or_else(bad),
                    DataType::TimestampTz => {
                        parse_timestamp_tz(s).map(Value::TimestampTz).ok_or_else(bad)
                    }
                    DataType::Uuid => Uuid::parse_str(s).map(Value::Uuid).map_err(|_| bad()),
                    _ => Err(bad()),
                }
            }
        }
    }
}

fn float_token(v: f64, text: String) -> JsonValue {
    if v.is_nan() {
        JsonValue::string("NaN")
    } else if v.is_infinite() {
        JsonValue::string(if v > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        JsonValue::Number(text)
    }
}
