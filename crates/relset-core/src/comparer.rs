//! Row comparers.
//!
//! A [`RowComparer`] orders rows of one model type. Member columns compare
//! by ordinal in the stored or local value list; expression columns are
//! translated to each row's model (cached on that model) and evaluated.
//! Comparers chain with [`RowComparer::then_by`], which consults the second
//! comparer only on ties.

use std::cmp::Ordering;
use std::fmt;

use crate::column::Column;
use crate::dataset::DataRow;
use crate::error::{Error, Result};
use crate::keys::SortDirection;
use crate::model::ModelType;
use crate::value::Value;

enum Kind {
    Member {
        ordinal: usize,
        local: bool,
        direction: SortDirection,
    },
    Expression {
        column: Column,
        direction: SortDirection,
    },
    ThenBy(Box<RowComparer>, Box<RowComparer>),
}

/// Orders rows of one model type.
pub struct RowComparer {
    model_type: ModelType,
    kind: Kind,
}

impl RowComparer {
    /// Comparer over a member column or an expression reading one model.
    pub fn new(column: &Column, direction: SortDirection) -> Result<Self> {
        if let Some(ordinal) = column.ordinal() {
            let model = column.model().ok_or_else(|| {
                Error::invalid_state(format!("model of column '{}' was dropped", column.name()))
            })?;
            return Ok(Self {
                model_type: model.model_type(),
                kind: Kind::Member {
                    ordinal,
                    local: column.is_local(),
                    direction,
                },
            });
        }
        let sources = column.scalar_source_models();
        let [model] = sources.as_slice() else {
            return Err(Error::argument(format!(
                "comparer expression must read exactly one model, found {}",
                sources.len()
            )));
        };
        Ok(Self {
            model_type: model.model_type(),
            kind: Kind::Expression {
                column: column.clone(),
                direction,
            },
        })
    }

    pub fn asc(column: &Column) -> Result<Self> {
        Self::new(column, SortDirection::Ascending)
    }

    pub fn desc(column: &Column) -> Result<Self> {
        Self::new(column, SortDirection::Descending)
    }

    pub fn model_type(&self) -> &ModelType {
        &self.model_type
    }

    /// Chain `next` to break ties. Both comparers must target the same
    /// model type.
    pub fn then_by(self, next: RowComparer) -> Result<Self> {
        if self.model_type != next.model_type {
            return Err(Error::argument(format!(
                "cannot chain a comparer over {} with one over {}",
                self.model_type.name(),
                next.model_type.name()
            )));
        }
        Ok(Self {
            model_type: self.model_type.clone(),
            kind: Kind::ThenBy(Box::new(self), Box::new(next)),
        })
    }

    pub fn compare(&self, a: &DataRow, b: &DataRow) -> Result<Ordering> {
        match &self.kind {
            Kind::Member {
                ordinal,
                local,
                direction,
            } => {
                let pick = |row: &DataRow| -> Result<Value> {
                    self.require_row_type(row)?;
                    let values = if *local { row.locals() } else { row.values() };
                    values.get(*ordinal).cloned().ok_or_else(|| {
                        Error::argument(format!("row has no value at ordinal {}", ordinal))
                    })
                };
                Ok(direction.apply(pick(a)?.compare(&pick(b)?)?))
            }
            Kind::Expression { column, direction } => {
                let va = Self::eval_translated(column, a)?;
                let vb = Self::eval_translated(column, b)?;
                Ok(direction.apply(va.compare(&vb)?))
            }
            Kind::ThenBy(first, second) => match first.compare(a, b)? {
                Ordering::Equal => second.compare(a, b),
                other => Ok(other),
            },
        }
    }

    /// Ordinals only mean something within rows of the comparer's type.
    fn require_row_type(&self, row: &DataRow) -> Result<()> {
        let model = row
            .model()
            .ok_or_else(|| Error::invalid_state("row is detached from its data set"))?;
        if model.model_type() != self.model_type {
            return Err(Error::argument(format!(
                "comparer over {} cannot order rows of {}",
                self.model_type.name(),
                model.type_name()
            )));
        }
        Ok(())
    }

    fn eval_translated(column: &Column, row: &DataRow) -> Result<Value> {
        let model = row
            .model()
            .ok_or_else(|| Error::invalid_state("row is detached from its data set"))?;
        column.translate_to(model)?.eval(row)
    }
}

impl fmt::Debug for RowComparer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Member {
                ordinal, direction, ..
            } => write!(f, "Member(#{} {:?})", ordinal, direction),
            Kind::Expression { column, direction } => {
                write!(f, "Expression({:?} {:?})", column, direction)
            }
            Kind::ThenBy(a, b) => write!(f, "{:?}, {:?}", a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnDef;
    use crate::dataset::DataSet;
    use crate::model::{Model, ModelBuilder};
    use crate::types::DataType;

    fn model() -> Model {
        ModelBuilder::new("Pair")
            .column(ColumnDef::new("a", DataType::Int))
            .column(ColumnDef::new("b", DataType::Int))
            .build()
            .unwrap()
    }

    fn rows(m: &Model, values: &[(i32, i32)]) -> DataSet {
        let mut ds = DataSet::new(m);
        let (a, b) = (m.column("a").unwrap(), m.column("b").unwrap());
        for (x, y) in values {
            let i = ds.add_row();
            ds.set(i, &a, Value::Int(*x)).unwrap();
            ds.set(i, &b, Value::Int(*y)).unwrap();
        }
        ds
    }

    #[test]
    fn test_then_by_breaks_ties() {
        let m = model();
        let ds = rows(&m, &[(1, 2), (1, 1)]);
        let cmp = RowComparer::asc(&m.column("a").unwrap())
            .unwrap()
            .then_by(RowComparer::asc(&m.column("b").unwrap()).unwrap())
            .unwrap();
        let (r1, r2) = (ds.row(0).unwrap(), ds.row(1).unwrap());
        assert_eq!(cmp.compare(r2, r1).unwrap(), Ordering::Less);
        assert_eq!(cmp.compare(r1, r2).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_mixed_model_types_rejected() {
        let m = model();
        let other = ModelBuilder::new("Other")
            .column(ColumnDef::new("x", DataType::Int))
            .build()
            .unwrap();
        let err = RowComparer::asc(&m.column("a").unwrap())
            .unwrap()
            .then_by(RowComparer::asc(&other.column("x").unwrap()).unwrap());
        assert!(err.is_err());
    }

    #[test]
    fn test_member_comparer_rejects_rows_of_another_type() {
        let m = model();
        let other = ModelBuilder::new("Other")
            .column(ColumnDef::new("x", DataType::Int))
            .column(ColumnDef::new("y", DataType::Int))
            .build()
            .unwrap();
        let mut ds = DataSet::new(&other);
        ds.add_row();
        ds.add_row();
        let cmp = RowComparer::asc(&m.column("a").unwrap()).unwrap();
        let err = cmp.compare(ds.row(0).unwrap(), ds.row(1).unwrap()).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));

        let same_type = rows(&m.clone_schema().unwrap(), &[(2, 0), (1, 0)]);
        assert_eq!(
            cmp.compare(same_type.row(0).unwrap(), same_type.row(1).unwrap())
                .unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn test_expression_comparer_translates_to_row_model() {
        let m = model();
        let copy = m.clone_schema().unwrap();
        let ds = rows(&copy, &[(1, 5), (2, 1)]);
        let sum = m.column("a").unwrap().add(&m.column("b").unwrap()).unwrap();
        let cmp = RowComparer::desc(&sum).unwrap();
        assert_eq!(
            cmp.compare(ds.row(0).unwrap(), ds.row(1).unwrap()).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn test_local_column_comparer() {
        let m = ModelBuilder::new("Pick")
            .column(ColumnDef::new("id", DataType::Int))
            .column(ColumnDef::new("rank", DataType::Int).local())
            .build()
            .unwrap();
        let mut ds = DataSet::new(&m);
        let rank = m.column("rank").unwrap();
        for r in [3, 1] {
            let i = ds.add_row();
            ds.set(i, &rank, Value::Int(r)).unwrap();
        }
        let cmp = RowComparer::asc(&rank).unwrap();
        assert_eq!(
            cmp.compare(ds.row(0).unwrap(), ds.row(1).unwrap()).unwrap(),
            Ordering::Greater
        );
    }
}
