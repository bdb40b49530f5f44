//! Rows returned by a backend and the forward-only reader over them.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::DataType;
use crate::value::Value;

/// A single result row with named, ordinal-indexed values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row. Column names are shared between rows of one result.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Convenience constructor for tests and fakes.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let (names, values): (Vec<String>, Vec<Value>) =
            pairs.into_iter().map(|(n, v)| (n.into(), v)).unzip();
        Self {
            columns: names.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names in ordinal order.
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Get a value by ordinal.
    pub fn get(&self, ordinal: usize) -> Option<&Value> {
        self.values.get(ordinal)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    /// All values in ordinal order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Forward-only cursor over a result set.
///
/// Every typed getter returns `Ok(None)` for SQL NULL and converts the
/// stored value best effort when the backend reported a different type.
#[derive(Debug)]
pub struct RowReader {
    rows: std::vec::IntoIter<Row>,
    current: Option<Row>,
}

impl RowReader {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
            current: None,
        }
    }

    /// Advance to the next row. Returns `false` once the rows are exhausted.
    pub fn advance(&mut self) -> bool {
        self.current = self.rows.next();
        self.current.is_some()
    }

    /// The row the cursor is positioned on.
    pub fn current(&self) -> Result<&Row> {
        self.current
            .as_ref()
            .ok_or_else(|| Error::invalid_state("reader is not positioned on a row"))
    }

    /// Number of fields in the current row.
    pub fn field_count(&self) -> Result<usize> {
        Ok(self.current()?.len())
    }

    pub fn is_null(&self, ordinal: usize) -> Result<bool> {
        Ok(self.raw(ordinal)?.is_null())
    }

    /// The raw value at `ordinal`.
    pub fn raw(&self, ordinal: usize) -> Result<&Value> {
        let row = self.current()?;
        row.get(ordinal).ok_or_else(|| {
            Error::argument(format!(
                "ordinal {} out of range for row with {} fields",
                ordinal,
                row.len()
            ))
        })
    }

    /// Read the value at `ordinal` converted to `ty`.
    pub fn get_value(&self, ordinal: usize, ty: DataType) -> Result<Value> {
        let raw = self.raw(ordinal)?;
        raw.cast(ty).map_err(|e| self.with_name(e, ordinal))
    }

    fn with_name(&self, err: Error, ordinal: usize) -> Error {
        match self.current.as_ref().and_then(|r| r.columns.get(ordinal)) {
            Some(name) => err.with_column(name),
            None => err,
        }
    }

    fn typed<T>(
        &self,
        ordinal: usize,
        ty: DataType,
        extract: impl FnOnce(Value) -> Option<T>,
    ) -> Result<Option<T>> {
        match self.get_value(ordinal, ty)? {
            Value::Null => Ok(None),
            other => {
                let found = other.type_name();
                extract(other)
                    .map(Some)
                    .ok_or_else(|| self.with_name(Error::type_mismatch(ty.sql_name(), found), ordinal))
            }
        }
    }

    pub fn get_bool(&self, ordinal: usize) -> Result<Option<bool>> {
        self.typed(ordinal, DataType::Boolean, |v| v.as_bool())
    }

    pub fn get_i16(&self, ordinal: usize) -> Result<Option<i16>> {
        self.typed(ordinal, DataType::SmallInt, |v| match v {
            Value::SmallInt(n) => Some(n),
            _ => None,
        })
    }

    pub fn get_i32(&self, ordinal: usize) -> Result<Option<i32>> {
        self.typed(ordinal, DataType::Int, |v| match v {
            Value::Int(n) => Some(n),
            _ => None,
        })
    }

    pub fn get_i64(&self, ordinal: usize) -> Result<Option<i64>> {
        self.typed(ordinal, DataType::BigInt, |v| v.as_i64())
    }

    pub fn get_f64(&self, ordinal: usize) -> Result<Option<f64>> {
        self.typed(ordinal, DataType::Double, |v| v.as_f64())
    }

    pub fn get_string(&self, ordinal: usize) -> Result<Option<String>> {
        self.typed(ordinal, DataType::Text, |v| match v {
            Value::Text(s) => Some(s),
            _ => None,
        })
    }

    pub fn get_bytes(&self, ordinal: usize) -> Result<Option<Vec<u8>>> {
        self.typed(ordinal, DataType::Bytes, |v| match v {
            Value::Bytes(b) => Some(b),
            _ => None,
        })
    }

    pub fn get_date(&self, ordinal: usize) -> Result<Option<NaiveDate>> {
        self.typed(ordinal, DataType::Date, |v| match v {
            Value::Date(d) => Some(d),
            _ => None,
        })
    }

    pub fn get_time(&self, ordinal: usize) -> Result<Option<NaiveTime>> {
        self.typed(ordinal, DataType::Time, |v| match v {
            Value::Time(t) => Some(t),
            _ => None,
        })
    }

    pub fn get_timestamp(&self, ordinal: usize) -> Result<Option<NaiveDateTime>> {
        self.typed(ordinal, DataType::Timestamp, |v| match v {
            Value::Timestamp(ts) => Some(ts),
            _ => None,
        })
    }

    pub fn get_timestamp_tz(&self, ordinal: usize) -> Result<Option<DateTime<Utc>>> {
        self.typed(ordinal, DataType::TimestampTz, |v| match v {
            Value::TimestampTz(ts) => Some(ts),
            _ => None,
        })
    }

    pub fn get_uuid(&self, ordinal: usize) -> Result<Option<Uuid>> {
        self.typed(ordinal, DataType::Uuid, |v| match v {
            Value::Uuid(u) => Some(u),
            _ => None,
        })
    }
}
