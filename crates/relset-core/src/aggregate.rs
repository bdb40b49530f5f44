//! Streaming aggregation.
//!
//! An [`Aggregator`] follows an init / accumulate / finish protocol so a row
//! set is aggregated in a single pass. Sums use checked arithmetic and fail
//! with an overflow error instead of wrapping.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::expr::FunctionKey;
use crate::types::DataType;
use crate::value::Value;

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunc {
    /// Number of non-null operand values.
    Count,
    /// Number of rows.
    CountRows,
    Sum,
    Avg,
    Min,
    Max,
    /// Value of the first row.
    First,
    /// Value of the last row.
    Last,
}

impl AggFunc {
    pub const fn key(self) -> FunctionKey {
        match self {
            AggFunc::Count => FunctionKey::COUNT,
            AggFunc::CountRows => FunctionKey::COUNT_ROWS,
            AggFunc::Sum => FunctionKey::SUM,
            AggFunc::Avg => FunctionKey::AVG,
            AggFunc::Min => FunctionKey::MIN,
            AggFunc::Max => FunctionKey::MAX,
            AggFunc::First => FunctionKey::FIRST,
            AggFunc::Last => FunctionKey::LAST,
        }
    }

    /// Result type for an operand of type `operand`.
    pub fn result_type(self, operand: Option<DataType>) -> Result<DataType> {
        match (self, operand) {
            (AggFunc::Count | AggFunc::CountRows, _) => Ok(DataType::BigInt),
            (AggFunc::Sum, Some(t)) if t.is_numeric() => Ok(t),
            (AggFunc::Avg, Some(t)) if t.is_numeric() => Ok(DataType::Double),
            (AggFunc::Min | AggFunc::Max | AggFunc::First | AggFunc::Last, Some(t)) => Ok(t),
            (func, Some(t)) => Err(Error::argument(format!(
                "{:?} is not defined for {}",
                func, t
            ))),
            (func, None) => Err(Error::argument(format!("{:?} requires an operand", func))),
        }
    }
}

/// Accumulator state for one aggregate evaluation.
#[derive(Debug, Clone)]
pub struct Aggregator {
    func: AggFunc,
    result_type: DataType,
    count: i64,
    acc: Option<Value>,
}

impl Aggregator {
    pub fn new(func: AggFunc, result_type: DataType) -> Self {
        Self {
            func,
            result_type,
            count: 0,
            acc: None,
        }
    }

    /// Reset the accumulator.
    pub fn init(&mut self) {
        self.count = 0;
        self.acc = None;
    }

    /// Feed one row's operand value.
    pub fn accumulate(&mut self, value: &Value) -> Result<()> {
        match self.func {
            AggFunc::CountRows => return self.bump(),
            AggFunc::First => {
                if self.count == 0 {
                    self.acc = Some(value.clone());
                }
                return self.bump();
            }
            AggFunc::Last => {
                self.acc = Some(value.clone());
                return self.bump();
            }
            _ => {}
        }
        if value.is_null() {
            return Ok(());
        }
        match self.func {
            AggFunc::Count => self.bump(),
            AggFunc::Sum => {
                let next = match self.acc.take() {
                    None => value.cast(self.result_type)?,
                    Some(acc) => acc.checked_add(value)?.cast(self.result_type)?,
                };
                self.acc = Some(next);
                Ok(())
            }
            AggFunc::Avg => {
                let wide = if value.as_i64().is_some() {
                    value.cast(DataType::BigInt)?
                } else {
                    value.cast(DataType::Double)?
                };
                let next = match self.acc.take() {
                    None => wide,
                    Some(acc) => acc.checked_add(&wide)?,
                };
                self.acc = Some(next);
                self.bump()
            }
            AggFunc::Min | AggFunc::Max => {
                let wanted = if self.func == AggFunc::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let replace = match &self.acc {
                    None => true,
                    Some(acc) => value.compare(acc)? == wanted,
                };
                if replace {
                    self.acc = Some(value.clone());
                }
                Ok(())
            }
            AggFunc::CountRows | AggFunc::First | AggFunc::Last => Ok(()),
        }
    }

    fn bump(&mut self) -> Result<()> {
        self.count = self
            .count
            .checked_add(1)
            .ok_or_else(|| Error::overflow("row count"))?;
        Ok(())
    }

    /// Produce the aggregate value.
    pub fn finish(&self) -> Result<Value> {
        match self.func {
            AggFunc::Count | AggFunc::CountRows => Ok(Value::BigInt(self.count)),
            AggFunc::Avg => match (&self.acc, self.count) {
                (Some(sum), n) if n > 0 => {
                    let total = sum
                        .as_f64()
                        .ok_or_else(|| Error::type_mismatch("numeric", sum.type_name()))?;
                    Ok(Value::Double(total / n as f64))
                }
                _ => Ok(Value::Null),
            },
            AggFunc::Sum | AggFunc::Min | AggFunc::Max | AggFunc::First | AggFunc::Last => {
                match &self.acc {
                    Some(v) => v.cast(self.result_type),
                    None => Ok(Value::Null),
                }
            }
        }
    }

    /// Run the whole protocol over `values`.
    pub fn run<'a>(mut self, values: impl IntoIterator<Item = &'a Value>) -> Result<Value> {
        self.init();
        for v in values {
            self.accumulate(v)?;
        }
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(func: AggFunc, ty: DataType, values: &[Value]) -> Result<Value> {
        Aggregator::new(func, func.result_type(Some(ty)).unwrap()).run(values)
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(agg(AggFunc::Sum, DataType::Int, &[]).unwrap(), Value::Null);
        assert_eq!(agg(AggFunc::Avg, DataType::Int, &[]).unwrap(), Value::Null);
        assert_eq!(agg(AggFunc::Max, DataType::Int, &[]).unwrap(), Value::Null);
        assert_eq!(agg(AggFunc::Count, DataType::Int, &[]).unwrap(), Value::BigInt(0));
    }

    #[test]
    fn test_all_null_input() {
        let nulls = [Value::Null, Value::Null];
        assert_eq!(agg(AggFunc::Sum, DataType::Int, &nulls).unwrap(), Value::Null);
        assert_eq!(agg(AggFunc::Avg, DataType::Int, &nulls).unwrap(), Value::Null);
        assert_eq!(agg(AggFunc::Min, DataType::Int, &nulls).unwrap(), Value::Null);
        assert_eq!(agg(AggFunc::Count, DataType::Int, &nulls).unwrap(), Value::BigInt(0));
        assert_eq!(
            agg(AggFunc::CountRows, DataType::Int, &nulls).unwrap(),
            Value::BigInt(2)
        );
    }

    #[test]
    fn test_sum_overflow_fails_fast() {
        let err = agg(
            AggFunc::Sum,
            DataType::Int,
            &[Value::Int(i32::MAX), Value::Int(1)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Overflow(_)));
    }

    #[test]
    fn test_avg_min_max() {
        let values = [Value::Int(1), Value::Null, Value::Int(4)];
        assert_eq!(agg(AggFunc::Avg, DataType::Int, &values).unwrap(), Value::Double(2.5));
        assert_eq!(agg(AggFunc::Min, DataType::Int, &values).unwrap(), Value::Int(1));
        assert_eq!(agg(AggFunc::Max, DataType::Int, &values).unwrap(), Value::Int(4));
        assert_eq!(agg(AggFunc::First, DataType::Int, &values).unwrap(), Value::Int(1));
        assert_eq!(agg(AggFunc::Last, DataType::Int, &values).unwrap(), Value::Int(4));
    }

    #[test]
    fn test_sum_requires_numeric() {
        assert!(AggFunc::Sum.result_type(Some(DataType::Text)).is_err());
        assert!(AggFunc::Max.result_type(None).is_err());
    }
}
