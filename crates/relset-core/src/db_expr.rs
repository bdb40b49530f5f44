//! Backend expression trees.
//!
//! [`DbExpr`] is the lowered form of a column expression handed to the SQL
//! generator. Member columns stay as [`DbExpr::Column`] leaves so statement
//! composition can substitute them when a query is inlined into another.

use crate::column::Column;
use crate::expr::FunctionKey;
use crate::model::ModelId;
use crate::types::DataType;
use crate::value::Value;

#[derive(Debug, Clone)]
pub enum DbExpr {
    /// A member column of some model in scope.
    Column(Column),
    /// A bound parameter.
    Param { value: Value, data_type: DataType },
    /// An inline literal.
    Const { value: Value, data_type: DataType },
    /// An operator, function or aggregate call.
    Call {
        key: FunctionKey,
        args: Vec<DbExpr>,
        data_type: DataType,
    },
    Case {
        whens: Vec<(DbExpr, DbExpr)>,
        otherwise: Box<DbExpr>,
        data_type: DataType,
    },
    Cast {
        operand: Box<DbExpr>,
        data_type: DataType,
    },
}

impl DbExpr {
    pub fn data_type(&self) -> DataType {
        match self {
            DbExpr::Column(c) => c.data_type(),
            DbExpr::Param { data_type, .. }
            | DbExpr::Const { data_type, .. }
            | DbExpr::Call { data_type, .. }
            | DbExpr::Case { data_type, .. }
            | DbExpr::Cast { data_type, .. } => *data_type,
        }
    }

    /// A typed NULL literal.
    pub fn null(data_type: DataType) -> DbExpr {
        DbExpr::Const {
            value: Value::Null,
            data_type,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, DbExpr::Call { key, .. } if key.is_aggregate())
    }

    pub fn contains_aggregate(&self) -> bool {
        self.is_aggregate() || self.children().any(DbExpr::contains_aggregate)
    }

    /// Whether a call to `key` appears anywhere in the tree.
    pub fn calls(&self, key: FunctionKey) -> bool {
        matches!(self, DbExpr::Call { key: k, .. } if *k == key)
            || self.children().any(|c| c.calls(key))
    }

    pub fn as_column(&self) -> Option<&Column> {
        match self {
            DbExpr::Column(c) => Some(c),
            _ => None,
        }
    }

    fn children(&self) -> Box<dyn Iterator<Item = &DbExpr> + '_> {
        match self {
            DbExpr::Column(_) | DbExpr::Param { .. } | DbExpr::Const { .. } => {
                Box::new(std::iter::empty())
            }
            DbExpr::Call { args, .. } => Box::new(args.iter()),
            DbExpr::Case {
                whens, otherwise, ..
            } => Box::new(
                whens
                    .iter()
                    .flat_map(|(c, v)| [c, v])
                    .chain(std::iter::once(otherwise.as_ref())),
            ),
            DbExpr::Cast { operand, .. } => Box::new(std::iter::once(operand.as_ref())),
        }
    }

    /// Member columns referenced, in first-use order without repeats.
    pub fn columns(&self) -> Vec<Column> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<Column>) {
        if let DbExpr::Column(c) = self {
            if !out.contains(c) {
                out.push(c.clone());
            }
            return;
        }
        for child in self.children() {
            child.collect_columns(out);
        }
    }

    /// Ids of the models whose columns are referenced.
    pub fn model_ids(&self) -> Vec<ModelId> {
        let mut ids: Vec<ModelId> = Vec::new();
        for c in self.columns() {
            if let Some(id) = c.model_id() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// Replace column leaves for which `f` returns a replacement.
    pub fn substitute(&self, f: &mut impl FnMut(&Column) -> Option<DbExpr>) -> DbExpr {
        match self {
            DbExpr::Column(c) => f(c).unwrap_or_else(|| self.clone()),
            DbExpr::Param { .. } | DbExpr::Const { .. } => self.clone(),
            DbExpr::Call {
                key,
                args,
                data_type,
            } => DbExpr::Call {
                key: *key,
                args: args.iter().map(|a| a.substitute(f)).collect(),
                data_type: *data_type,
            },
            DbExpr::Case {
                whens,
                otherwise,
                data_type,
            } => DbExpr::Case {
                whens: whens
                    .iter()
                    .map(|(c, v)| (c.substitute(f), v.substitute(f)))
                    .collect(),
                otherwise: Box::new(otherwise.substitute(f)),
                data_type: *data_type,
            },
            DbExpr::Cast { operand, data_type } => DbExpr::Cast {
                operand: Box::new(operand.substitute(f)),
                data_type: *data_type,
            },
        }
    }

    /// Combine two predicates with AND.
    pub fn and(self, other: DbExpr) -> DbExpr {
        DbExpr::Call {
            key: FunctionKey::AND,
            args: vec![self, other],
            data_type: DataType::Boolean,
        }
    }

    /// Equality predicate between two expressions.
    pub fn equal(self, other: DbExpr) -> DbExpr {
        DbExpr::Call {
            key: FunctionKey::EQ,
            args: vec![self, other],
            data_type: DataType::Boolean,
        }
    }
}
