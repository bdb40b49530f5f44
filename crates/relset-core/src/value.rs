//! Dynamic values stored in data sets and bound to statements.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::DataType;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIME_FORMAT: &str = "%H:%M:%S%.f";
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A single value held by a column for one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 8-bit integer.
    TinyInt(i8),
    /// 16-bit integer.
    SmallInt(i16),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Text.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// Date and time without zone.
    Timestamp(NaiveDateTime),
    /// Date and time in UTC.
    TimestampTz(DateTime<Utc>),
    /// Unique identifier.
    Uuid(Uuid),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The data type of this value, `None` for NULL.
    pub fn data_type(&self) -> Option<DataType> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => DataType::Boolean,
            Value::TinyInt(_) => DataType::TinyInt,
            Value::SmallInt(_) => DataType::SmallInt,
            Value::Int(_) => DataType::Int,
            Value::BigInt(_) => DataType::BigInt,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Text(_) => DataType::Text,
            Value::Bytes(_) => DataType::Bytes,
            Value::Date(_) => DataType::Date,
            Value::Time(_) => DataType::Time,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::TimestampTz(_) => DataType::TimestampTz,
            Value::Uuid(_) => DataType::Uuid,
        })
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        self.data_type().map_or("NULL", |t| t.sql_name())
    }

    /// Get as boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get any integer variant widened to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(i64::from(*v)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Get any numeric variant as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Get as string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get as byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Total order with NULL first.
    ///
    /// Values of incomparable types are a type error rather than an arbitrary
    /// order.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Less),
            (_, Value::Null) => Ok(Ordering::Greater),
            _ => self.compare_non_null(other),
        }
    }

    fn compare_non_null(&self, other: &Value) -> Result<Ordering> {
        if let (Some(a), Some(b)) = (self.as_i64(), other.as_i64()) {
            return Ok(a.cmp(&b));
        }
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return Ok(a.total_cmp(&b));
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Ok(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Ok(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Ok(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Ok(a.cmp(b)),
            (Value::TimestampTz(a), Value::TimestampTz(b)) => Ok(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Ok(a.cmp(b)),
            _ => Err(Error::type_mismatch(
                self.type_name(),
                format!("{} (not comparable)", other.type_name()),
            )),
        }
    }

    /// Checked addition; NULL propagates.
    pub fn checked_add(&self, rhs: &Value) -> Result<Value> {
        self.arithmetic(rhs, "+", i64::checked_add, |a, b| a + b)
    }

    /// Checked subtraction; NULL propagates.
    pub fn checked_sub(&self, rhs: &Value) -> Result<Value> {
        self.arithmetic(rhs, "-", i64::checked_sub, |a, b| a - b)
    }

    /// Checked multiplication; NULL propagates.
    pub fn checked_mul(&self, rhs: &Value) -> Result<Value> {
        self.arithmetic(rhs, "*", i64::checked_mul, |a, b| a * b)
    }

    /// Checked division; integer division by zero is an error.
    pub fn checked_div(&self, rhs: &Value) -> Result<Value> {
        if rhs.as_i64() == Some(0) && self.as_i64().is_some() {
            return Err(Error::DivideByZero);
        }
        self.arithmetic(rhs, "/", i64::checked_div, |a, b| a / b)
    }

    /// Checked remainder; integer remainder by zero is an error.
    pub fn checked_rem(&self, rhs: &Value) -> Result<Value> {
        if rhs.as_i64() == Some(0) && self.as_i64().is_some() {
            return Err(Error::DivideByZero);
        }
        self.arithmetic(rhs, "%", i64::checked_rem, |a, b| a % b)
    }

    /// Checked negation; NULL propagates.
    pub fn checked_neg(&self) -> Result<Value> {
        match self {
            Value::Null => Ok(Value::Null),
            Value::Float(v) => Ok(Value::Float(-v)),
            Value::Double(v) => Ok(Value::Double(-v)),
            other => {
                let (Some(v), Some(ty)) = (other.as_i64(), other.data_type()) else {
                    return Err(Error::type_mismatch("numeric", other.type_name()));
                };
                let negated = v
                    .checked_neg()
                    .ok_or_else(|| Error::overflow(format!("-({})", v)))?;
                narrow_integer(negated, ty)
            }
        }
    }

    fn arithmetic(
        &self,
        rhs: &Value,
        op: &str,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> Result<Value> {
        if self.is_null() || rhs.is_null() {
            return Ok(Value::Null);
        }
        let (Some(lt), Some(rt)) = (self.data_type(), rhs.data_type()) else {
            return Ok(Value::Null);
        };
        let Some(result_type) = lt.promote(rt) else {
            return Err(Error::type_mismatch(
                "numeric",
                format!("{} {} {}", lt, op, rt),
            ));
        };
        if result_type.is_integer() {
            let (Some(a), Some(b)) = (self.as_i64(), rhs.as_i64()) else {
                return Err(Error::type_mismatch("integer", self.type_name()));
            };
            let v = int_op(a, b)
                .ok_or_else(|| Error::overflow(format!("{} {} {} ({})", a, op, b, result_type)))?;
            return narrow_integer(v, result_type);
        }
        let (Some(a), Some(b)) = (self.as_f64(), rhs.as_f64()) else {
            return Err(Error::type_mismatch("numeric", self.type_name()));
        };
        let v = float_op(a, b);
        Ok(if result_type == DataType::Float {
            Value::Float(v as f32)
        } else {
            Value::Double(v)
        })
    }

    /// Convert to the requested type, best effort.
    ///
    /// NULL converts to NULL. Lossless numeric conversions, text parsing and
    /// date/time widening are supported; anything else is a type error.
    pub fn cast(&self, to: DataType) -> Result<Value> {
        if self.data_type() == Some(to) || self.is_null() {
            return Ok(self.clone());
        }
        let fail = || Error::type_mismatch(to.sql_name(), self.type_name());
        match to {
            DataType::Boolean => match self {
                Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(Value::Bool(true)),
                    "false" | "0" => Ok(Value::Bool(false)),
                    _ => Err(fail()),
                },
                other => other.as_i64().map(|v| Value::Bool(v != 0)).ok_or_else(fail),
            },
            DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt => {
                let wide = match self {
                    Value::Bool(b) => i64::from(*b),
                    Value::Float(_) | Value::Double(_) => {
                        let f = self.as_f64().ok_or_else(fail)?;
                        if f.fract() != 0.0 || f < i64::MIN as f64 || f > i64::MAX as f64 {
                            return Err(fail());
                        }
                        f as i64
                    }
                    Value::Text(s) => s.trim().parse::<i64>().map_err(|_| fail())?,
                    other => other.as_i64().ok_or_else(fail)?,
                };
                narrow_integer(wide, to).map_err(|_| fail())
            }
            DataType::Float | DataType::Double => {
                let f = match self {
                    Value::Text(s) => s.trim().parse::<f64>().map_err(|_| fail())?,
                    other => other.as_f64().ok_or_else(fail)?,
                };
                Ok(if to == DataType::Float {
                    Value::Float(f as f32)
                } else {
                    Value::Double(f)
                })
            }
            DataType::Text => Ok(Value::Text(self.to_string())),
            DataType::Bytes => match self {
                Value::Text(s) => Ok(Value::Bytes(s.as_bytes().to_vec())),
                Value::Uuid(u) => Ok(Value::Bytes(u.as_bytes().to_vec())),
                _ => Err(fail()),
            },
            DataType::Date => match self {
                Value::Timestamp(ts) => Ok(Value::Date(ts.date())),
                Value::TimestampTz(ts) => Ok(Value::Date(ts.date_naive())),
                Value::Text(s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                    .map(Value::Date)
                    .map_err(|_| fail()),
                _ => Err(fail()),
            },
            DataType::Time => match self {
                Value::Timestamp(ts) => Ok(Value::Time(ts.time())),
                Value::TimestampTz(ts) => Ok(Value::Time(ts.naive_utc().time())),
                Value::Text(s) => NaiveTime::parse_from_str(s.trim(), TIME_FORMAT)
                    .map(Value::Time)
                    .map_err(|_| fail()),
                _ => Err(fail()),
            },
            DataType::Timestamp => match self {
                Value::TimestampTz(ts) => Ok(Value::Timestamp(ts.naive_utc())),
                Value::Date(d) => d.and_hms_opt(0, 0, 0).map(Value::Timestamp).ok_or_else(fail),
                Value::Text(s) => parse_timestamp(s).map(Value::Timestamp).ok_or_else(fail),
                _ => Err(fail()),
            },
            DataType::TimestampTz => match self {
                Value::Timestamp(ts) => Ok(Value::TimestampTz(Utc.from_utc_datetime(ts))),
                Value::Date(d) => d
                    .and_hms_opt(0, 0, 0)
                    .map(|ts| Value::TimestampTz(Utc.from_utc_datetime(&ts)))
                    .ok_or_else(fail),
                Value::Text(s) => parse_timestamp_tz(s)
                    .map(Value::TimestampTz)
                    .ok_or_else(fail),
                _ => Err(fail()),
            },
            DataType::Uuid => match self {
                Value::Text(s) => Uuid::parse_str(s.trim()).map(Value::Uuid).map_err(|_| fail()),
                Value::Bytes(b) => Uuid::from_slice(b).map(Value::Uuid).map_err(|_| fail()),
                _ => Err(fail()),
            },
        }
    }
}

/// Narrow a wide integer into the requested integer type, failing on overflow.
fn narrow_integer(v: i64, to: DataType) -> Result<Value> {
    let overflow = || Error::overflow(format!("{} does not fit in {}", v, to));
    match to {
        DataType::TinyInt => i8::try_from(v).map(Value::TinyInt).map_err(|_| overflow()),
        DataType::SmallInt => i16::try_from(v).map(Value::SmallInt).map_err(|_| overflow()),
        DataType::Int => i32::try_from(v).map(Value::Int).map_err(|_| overflow()),
        DataType::BigInt => Ok(Value::BigInt(v)),
        _ => Err(Error::type_mismatch("integer", to.sql_name())),
    }
}

/// Parse a timestamp written with or without a trailing UTC marker.
pub(crate) fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    let s = s.strip_suffix('Z').unwrap_or(s);
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

/// Parse a UTC timestamp; a missing marker is read as UTC, offsets are honored.
pub(crate) fn parse_timestamp_tz(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.trim();
    if let Some(naive) = parse_timestamp(trimmed) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => {
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
            Value::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
            Value::TimestampTz(ts) => write!(f, "{}Z", ts.naive_utc().format(TIMESTAMP_FORMAT)),
            Value::Uuid(u) => write!(f, "{}", u.hyphenated()),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => TinyInt,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    f32 => Float,
    f64 => Double,
    String => Text,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => Timestamp,
    DateTime<Utc> => TimestampTz,
    Uuid => Uuid,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A tuple of values usable as a hash map key (primary key lookups).
///
/// Floats hash by bit pattern and compare with `total_cmp`, so the key is a
/// proper `Eq`.
#[derive(Debug, Clone)]
pub struct ValueKey(pub Vec<Value>);

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|(a, b)| a.data_type() == b.data_type() && a.compare(b).ok() == Some(Ordering::Equal))
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for v in &self.0 {
            hash_value(v, state);
        }
    }
}

fn hash_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::TinyInt(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::SmallInt(i) => {
            3u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Int(i) => {
            4u8.hash(hasher);
            i.hash(hasher);
        }
        Value::BigInt(i) => {
            5u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Float(f) => {
            6u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Double(f) => {
            7u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Text(s) => {
            8u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            9u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Date(d) => {
            10u8.hash(hasher);
            d.hash(hasher);
        }
        Value::Time(t) => {
            11u8.hash(hasher);
            t.hash(hasher);
        }
        Value::Timestamp(ts) => {
            12u8.hash(hasher);
            ts.hash(hasher);
        }
        Value::TimestampTz(ts) => {
            13u8.hash(hasher);
            ts.hash(hasher);
        }
        Value::Uuid(u) => {
            14u8.hash(hasher);
            u.hash(hasher);
        }
    }
}
