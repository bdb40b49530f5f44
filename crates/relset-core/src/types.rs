//! Column data types.

use serde::{Deserialize, Serialize};

/// The data type carried by a column or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean.
    Boolean,
    /// 8-bit signed integer.
    TinyInt,
    /// 16-bit signed integer.
    SmallInt,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    BigInt,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Unicode text.
    Text,
    /// Binary data.
    Bytes,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Date and time without a zone.
    Timestamp,
    /// Date and time in UTC.
    TimestampTz,
    /// 128-bit unique identifier.
    Uuid,
}

impl DataType {
    /// Get the SQL type name used in DDL and casts.
    #[must_use]
    pub const fn sql_name(&self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::TinyInt => "TINYINT",
            DataType::SmallInt => "SMALLINT",
            DataType::Int => "INTEGER",
            DataType::BigInt => "BIGINT",
            DataType::Float => "REAL",
            DataType::Double => "DOUBLE PRECISION",
            DataType::Text => "TEXT",
            DataType::Bytes => "BLOB",
            DataType::Date => "DATE",
            DataType::Time => "TIME",
            DataType::Timestamp => "TIMESTAMP",
            DataType::TimestampTz => "TIMESTAMPTZ",
            DataType::Uuid => "UUID",
        }
    }

    /// Check if this is an integer type.
    #[must_use]
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt
        )
    }

    /// Check if this is a floating point type.
    #[must_use]
    pub const fn is_float(&self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    /// Check if this is a numeric type.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Width rank of integer types, used for promotion.
    pub(crate) const fn integer_rank(&self) -> u8 {
        match self {
            DataType::TinyInt => 1,
            DataType::SmallInt => 2,
            DataType::Int => 3,
            DataType::BigInt => 4,
            _ => 0,
        }
    }

    /// Result type of an arithmetic operation between two numeric types.
    ///
    /// Integers widen to the larger operand; `Float` stays `Float` only when both
    /// operands are `Float`, every other float combination becomes `Double`.
    #[must_use]
    pub fn promote(self, other: DataType) -> Option<DataType> {
        if !self.is_numeric() || !other.is_numeric() {
            return None;
        }
        if self == DataType::Float && other == DataType::Float {
            return Some(DataType::Float);
        }
        if self.is_float() || other.is_float() {
            return Some(DataType::Double);
        }
        Some(if self.integer_rank() >= other.integer_rank() {
            self
        } else {
            other
        })
    }

    /// Whether values of the two types can be compared with each other.
    #[must_use]
    pub fn is_comparable_with(self, other: DataType) -> bool {
        self == other || (self.is_numeric() && other.is_numeric())
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_promotion_widens() {
        assert_eq!(
            DataType::Int.promote(DataType::BigInt),
            Some(DataType::BigInt)
        );
        assert_eq!(
            DataType::SmallInt.promote(DataType::TinyInt),
            Some(DataType::SmallInt)
        );
    }

    #[test]
    fn test_float_promotion() {
        assert_eq!(
            DataType::Float.promote(DataType::Float),
            Some(DataType::Float)
        );
        assert_eq!(
            DataType::Float.promote(DataType::Int),
            Some(DataType::Double)
        );
        assert_eq!(DataType::Text.promote(DataType::Int), None);
    }

    #[test]
    fn test_comparable() {
        assert!(DataType::Int.is_comparable_with(DataType::Double));
        assert!(DataType::Text.is_comparable_with(DataType::Text));
        assert!(!DataType::Text.is_comparable_with(DataType::Int));
    }
}
