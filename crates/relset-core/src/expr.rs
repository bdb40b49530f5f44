//! Expression nodes.
//!
//! An [`ExprNode`] is one immutable computation step over operand columns.
//! It evaluates in two ways: directly against an in-memory [`DataRow`], and
//! by lowering to a [`DbExpr`] that the SQL generator renders. Both sides
//! dispatch on the node's [`FunctionKey`], which is the only thing they share.
//!
//! Expressions are built through methods on [`Column`]; every constructor
//! checks operand types up front and returns an argument error on mismatch.
//!
//! NULL handling: AND and OR use three-valued logic, IS NULL, IS NOT NULL and
//! IF NULL test for NULL, and every other operator yields NULL when an operand
//! is NULL.

use std::fmt;
use std::sync::OnceLock;

use crate::aggregate::{AggFunc, Aggregator};
use crate::column::Column;
use crate::dataset::DataRow;
use crate::db_expr::DbExpr;
use crate::error::{Error, Result};
use crate::model::{Model, WeakModel};
use crate::types::DataType;
use crate::value::Value;

/// Stable identity of an expression's operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionKey(&'static str);

impl FunctionKey {
    pub const PARAM: FunctionKey = FunctionKey("param");
    pub const CONST: FunctionKey = FunctionKey("const");
    pub const ADD: FunctionKey = FunctionKey("add");
    pub const SUB: FunctionKey = FunctionKey("sub");
    pub const MUL: FunctionKey = FunctionKey("mul");
    pub const DIV: FunctionKey = FunctionKey("div");
    pub const MOD: FunctionKey = FunctionKey("mod");
    pub const NEGATE: FunctionKey = FunctionKey("negate");
    pub const EQ: FunctionKey = FunctionKey("eq");
    pub const NE: FunctionKey = FunctionKey("ne");
    pub const LT: FunctionKey = FunctionKey("lt");
    pub const LE: FunctionKey = FunctionKey("le");
    pub const GT: FunctionKey = FunctionKey("gt");
    pub const GE: FunctionKey = FunctionKey("ge");
    pub const AND: FunctionKey = FunctionKey("and");
    pub const OR: FunctionKey = FunctionKey("or");
    pub const NOT: FunctionKey = FunctionKey("not");
    pub const IS_NULL: FunctionKey = FunctionKey("is_null");
    pub const IS_NOT_NULL: FunctionKey = FunctionKey("is_not_null");
    pub const IF_NULL: FunctionKey = FunctionKey("if_null");
    pub const CONCAT: FunctionKey = FunctionKey("concat");
    pub const CASE: FunctionKey = FunctionKey("case");
    pub const CAST: FunctionKey = FunctionKey("cast");
    pub const COUNT: FunctionKey = FunctionKey("count");
    pub const COUNT_ROWS: FunctionKey = FunctionKey("count_rows");
    pub const SUM: FunctionKey = FunctionKey("sum");
    pub const AVG: FunctionKey = FunctionKey("avg");
    pub const MIN: FunctionKey = FunctionKey("min");
    pub const MAX: FunctionKey = FunctionKey("max");
    pub const FIRST: FunctionKey = FunctionKey("first");
    pub const LAST: FunctionKey = FunctionKey("last");

    pub const fn name(self) -> &'static str {
        self.0
    }

    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            FunctionKey::COUNT
                | FunctionKey::COUNT_ROWS
                | FunctionKey::SUM
                | FunctionKey::AVG
                | FunctionKey::MIN
                | FunctionKey::MAX
                | FunctionKey::FIRST
                | FunctionKey::LAST
        )
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

pub(crate) enum ExprKind {
    Param(Value),
    Const(Value),
    Call {
        key: FunctionKey,
        args: Vec<Column>,
    },
    Case {
        whens: Vec<(Column, Column)>,
        otherwise: Column,
    },
    Cast {
        operand: Column,
    },
    Aggregate {
        func: AggFunc,
        operand: Option<Column>,
        scope: WeakModel,
    },
}

/// An immutable expression node.
pub struct ExprNode {
    kind: ExprKind,
    data_type: DataType,
    db: OnceLock<DbExpr>,
}

impl ExprNode {
    fn new(kind: ExprKind, data_type: DataType) -> Self {
        Self {
            kind,
            data_type,
            db: OnceLock::new(),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn function_key(&self) -> FunctionKey {
        match &self.kind {
            ExprKind::Param(_) => FunctionKey::PARAM,
            ExprKind::Const(_) => FunctionKey::CONST,
            ExprKind::Call { key, .. } => *key,
            ExprKind::Case { .. } => FunctionKey::CASE,
            ExprKind::Cast { .. } => FunctionKey::CAST,
            ExprKind::Aggregate { func, .. } => func.key(),
        }
    }

    /// Operand columns in evaluation order.
    pub fn operands(&self) -> Vec<&Column> {
        match &self.kind {
            ExprKind::Param(_) | ExprKind::Const(_) => Vec::new(),
            ExprKind::Call { args, .. } => args.iter().collect(),
            ExprKind::Case { whens, otherwise } => whens
                .iter()
                .flat_map(|(c, v)| [c, v])
                .chain(std::iter::once(otherwise))
                .collect(),
            ExprKind::Cast { operand } => vec![operand],
            ExprKind::Aggregate { operand, .. } => operand.iter().collect(),
        }
    }

    /// The aggregate function, operand and scope model of an aggregate node.
    pub fn as_aggregate(&self) -> Option<(AggFunc, Option<&Column>, &WeakModel)> {
        match &self.kind {
            ExprKind::Aggregate {
                func,
                operand,
                scope,
            } => Some((*func, operand.as_ref(), scope)),
            _ => None,
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        matches!(self.kind, ExprKind::Aggregate { .. })
            || self.operands().iter().any(|c| c.contains_aggregate())
    }

    pub(crate) fn collect_models(&self, aggregate: bool, out: &mut Vec<Model>) {
        if let ExprKind::Aggregate { operand, scope, .. } = &self.kind {
            if aggregate {
                if let Some(m) = scope.upgrade() {
                    if !out.contains(&m) {
                        out.push(m);
                    }
                }
                if let Some(op) = operand {
                    op.collect_models(true, out);
                }
            }
            return;
        }
        for operand in self.operands() {
            operand.collect_models(aggregate, out);
        }
    }

    /// The backend representation, built on first use.
    pub fn db_expr(&self) -> &DbExpr {
        self.db.get_or_init(|| self.lower())
    }

    fn lower(&self) -> DbExpr {
        let data_type = self.data_type;
        match &self.kind {
            ExprKind::Param(value) => DbExpr::Param {
                value: value.clone(),
                data_type,
            },
            ExprKind::Const(value) => DbExpr::Const {
                value: value.clone(),
                data_type,
            },
            ExprKind::Call { key, args } => DbExpr::Call {
                key: *key,
                args: args.iter().map(Column::db_expr).collect(),
                data_type,
            },
            ExprKind::Case { whens, otherwise } => DbExpr::Case {
                whens: whens
                    .iter()
                    .map(|(c, v)| (c.db_expr(), v.db_expr()))
                    .collect(),
                otherwise: Box::new(otherwise.db_expr()),
                data_type,
            },
            ExprKind::Cast { operand } => DbExpr::Cast {
                operand: Box::new(operand.db_expr()),
                data_type,
            },
            ExprKind::Aggregate { func, operand, .. } => DbExpr::Call {
                key: func.key(),
                args: operand.iter().map(Column::db_expr).collect(),
                data_type,
            },
        }
    }

    /// Evaluate against an in-memory row.
    pub fn eval(&self, row: &DataRow) -> Result<Value> {
        match &self.kind {
            ExprKind::Param(v) | ExprKind::Const(v) => Ok(v.clone()),
            ExprKind::Call { key, args } => self.eval_call(*key, args, row),
            ExprKind::Case { whens, otherwise } => {
                for (condition, value) in whens {
                    if condition.eval(row)? == Value::Bool(true) {
                        return value.eval(row)?.cast(self.data_type);
                    }
                }
                otherwise.eval(row)?.cast(self.data_type)
            }
            ExprKind::Cast { operand } => operand.eval(row)?.cast(self.data_type),
            ExprKind::Aggregate {
                func,
                operand,
                scope,
            } => {
                let row_model = row
                    .model()
                    .ok_or_else(|| Error::invalid_state("row is detached from its data set"))?;
                let scope_model = scope
                    .upgrade()
                    .ok_or_else(|| Error::invalid_state("aggregate scope model was dropped"))?;
                if scope_model == *row_model || !scope_model.is_self_or_descendant_of(row_model) {
                    return Err(Error::invalid_state(format!(
                        "aggregate over {} cannot be evaluated on a {} row",
                        scope_model.type_name(),
                        row_model.type_name()
                    )));
                }
                let mut rows = Vec::new();
                row.collect_descendants(scope.id(), &mut rows);
                aggregate_rows(*func, operand.as_ref(), self.data_type, rows)
            }
        }
    }

    fn eval_call(&self, key: FunctionKey, args: &[Column], row: &DataRow) -> Result<Value> {
        let arg = |i: usize| -> Result<Value> {
            args.get(i)
                .ok_or_else(|| Error::invalid_state(format!("{} is missing operand {}", key, i)))?
                .eval(row)
        };
        let value = match key {
            FunctionKey::ADD => arg(0)?.checked_add(&arg(1)?)?,
            FunctionKey::SUB => arg(0)?.checked_sub(&arg(1)?)?,
            FunctionKey::MUL => arg(0)?.checked_mul(&arg(1)?)?,
            FunctionKey::DIV => arg(0)?.checked_div(&arg(1)?)?,
            FunctionKey::MOD => arg(0)?.checked_rem(&arg(1)?)?,
            FunctionKey::NEGATE => arg(0)?.checked_neg()?,
            FunctionKey::EQ
            | FunctionKey::NE
            | FunctionKey::LT
            | FunctionKey::LE
            | FunctionKey::GT
            | FunctionKey::GE => {
                let (a, b) = (arg(0)?, arg(1)?);
                if a.is_null() || b.is_null() {
                    return Ok(Value::Null);
                }
                let ord = a.compare(&b)?;
                Value::Bool(match key {
                    FunctionKey::EQ => ord.is_eq(),
                    FunctionKey::NE => ord.is_ne(),
                    FunctionKey::LT => ord.is_lt(),
                    FunctionKey::LE => ord.is_le(),
                    FunctionKey::GT => ord.is_gt(),
                    _ => ord.is_ge(),
                })
            }
            FunctionKey::AND => and3(arg(0)?.as_bool(), arg(1)?.as_bool()),
            FunctionKey::OR => or3(arg(0)?.as_bool(), arg(1)?.as_bool()),
            FunctionKey::NOT => match arg(0)?.as_bool() {
                Some(b) => Value::Bool(!b),
                None => Value::Null,
            },
            FunctionKey::IS_NULL => Value::Bool(arg(0)?.is_null()),
            FunctionKey::IS_NOT_NULL => Value::Bool(!arg(0)?.is_null()),
            FunctionKey::IF_NULL => {
                let a = arg(0)?;
                if a.is_null() { arg(1)? } else { a }
            }
            FunctionKey::CONCAT => {
                let (a, b) = (arg(0)?, arg(1)?);
                match (a.as_str(), b.as_str()) {
                    (Some(x), Some(y)) => Value::Text(format!("{}{}", x, y)),
                    _ => Value::Null,
                }
            }
            other => {
                return Err(Error::invalid_state(format!(
                    "no in-memory evaluation for {}",
                    other
                )));
            }
        };
        value.cast(self.data_type)
    }

    /// Rebuild this node against `target`. Returns `None` when no operand
    /// changes.
    pub(crate) fn translate(&self, target: &Model) -> Result<Option<ExprNode>> {
        let kind = match &self.kind {
            ExprKind::Param(_) | ExprKind::Const(_) => return Ok(None),
            ExprKind::Call { key, args } => {
                let Some(args) = translate_all(args, target)? else {
                    return Ok(None);
                };
                ExprKind::Call { key: *key, args }
            }
            ExprKind::Case { whens, otherwise } => {
                let mut changed = false;
                let mut new_whens = Vec::with_capacity(whens.len());
                for (c, v) in whens {
                    let (tc, tv) = (c.translate_to(target)?, v.translate_to(target)?);
                    changed |= tc != *c || tv != *v;
                    new_whens.push((tc, tv));
                }
                let new_otherwise = otherwise.translate_to(target)?;
                changed |= new_otherwise != *otherwise;
                if !changed {
                    return Ok(None);
                }
                ExprKind::Case {
                    whens: new_whens,
                    otherwise: new_otherwise,
                }
            }
            ExprKind::Cast { operand } => {
                let translated = operand.translate_to(target)?;
                if translated == *operand {
                    return Ok(None);
                }
                ExprKind::Cast {
                    operand: translated,
                }
            }
            ExprKind::Aggregate {
                func,
                operand,
                scope,
            } => {
                let scope_model = scope
                    .upgrade()
                    .ok_or_else(|| Error::invalid_state("aggregate scope model was dropped"))?;
                let new_scope = target
                    .resolve_compatible(&scope_model.model_type())
                    .ok_or_else(|| {
                        Error::argument(format!(
                            "cannot translate aggregate over {} to model {}",
                            scope_model.type_name(),
                            target.type_name()
                        ))
                    })?;
                let new_operand = operand
                    .as_ref()
                    .map(|c| c.translate_to(target))
                    .transpose()?;
                if new_scope == scope_model && new_operand == *operand {
                    return Ok(None);
                }
                ExprKind::Aggregate {
                    func: *func,
                    operand: new_operand,
                    scope: new_scope.downgrade(),
                }
            }
        };
        Ok(Some(ExprNode::new(kind, self.data_type)))
    }
}

impl fmt::Debug for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExprNode")
            .field("key", &self.function_key())
            .field("data_type", &self.data_type)
            .field("operands", &self.operands())
            .finish()
    }
}

fn translate_all(columns: &[Column], target: &Model) -> Result<Option<Vec<Column>>> {
    let translated = columns
        .iter()
        .map(|c| c.translate_to(target))
        .collect::<Result<Vec<_>>>()?;
    if translated.iter().zip(columns).all(|(a, b)| a == b) {
        Ok(None)
    } else {
        Ok(Some(translated))
    }
}

fn and3(a: Option<bool>, b: Option<bool>) -> Value {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Value::Bool(false),
        (Some(true), Some(true)) => Value::Bool(true),
        _ => Value::Null,
    }
}

fn or3(a: Option<bool>, b: Option<bool>) -> Value {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Value::Bool(true),
        (Some(false), Some(false)) => Value::Bool(false),
        _ => Value::Null,
    }
}

/// Run an aggregate over a set of rows.
pub(crate) fn aggregate_rows<'a>(
    func: AggFunc,
    operand: Option<&Column>,
    result_type: DataType,
    rows: impl IntoIterator<Item = &'a DataRow>,
) -> Result<Value> {
    let mut agg = Aggregator::new(func, result_type);
    agg.init();
    for row in rows {
        let value = match operand {
            Some(c) => c.eval(row)?,
            None => Value::Null,
        };
        agg.accumulate(&value)?;
    }
    agg.finish()
}

fn expr(kind: ExprKind, data_type: DataType) -> Column {
    Column::from_expr(ExprNode::new(kind, data_type))
}

fn call(key: FunctionKey, args: Vec<Column>, data_type: DataType) -> Column {
    expr(ExprKind::Call { key, args }, data_type)
}

fn mismatch(op: &str, a: DataType, b: DataType) -> Error {
    Error::argument(format!("operator {} is not defined for {} and {}", op, a, b))
}

fn require_boolean(op: &str, c: &Column) -> Result<()> {
    if c.data_type() == DataType::Boolean {
        Ok(())
    } else {
        Err(Error::argument(format!(
            "operator {} requires BOOLEAN, found {}",
            op,
            c.data_type()
        )))
    }
}

/// Common type of two branches: equal types, or the numeric promotion.
fn unify(op: &str, a: DataType, b: DataType) -> Result<DataType> {
    if a == b {
        return Ok(a);
    }
    a.promote(b).ok_or_else(|| mismatch(op, a, b))
}

/// Expression constructors.
impl Column {
    /// A bound parameter. NULL needs an explicit type, see [`Column::param_of`].
    pub fn param(value: impl Into<Value>) -> Result<Column> {
        let value = value.into();
        let ty = value.data_type().ok_or_else(|| {
            Error::argument("a NULL parameter needs an explicit type (use param_of)")
        })?;
        Ok(expr(ExprKind::Param(value), ty))
    }

    /// A bound parameter of an explicit type; the value is converted.
    pub fn param_of(data_type: DataType, value: impl Into<Value>) -> Result<Column> {
        let value = value.into().cast(data_type)?;
        Ok(expr(ExprKind::Param(value), data_type))
    }

    /// A literal rendered inline in SQL.
    pub fn constant(value: impl Into<Value>) -> Result<Column> {
        let value = value.into();
        let ty = value
            .data_type()
            .ok_or_else(|| Error::argument("a NULL constant needs an explicit type (use null_of)"))?;
        Ok(expr(ExprKind::Const(value), ty))
    }

    /// A typed NULL literal.
    pub fn null_of(data_type: DataType) -> Column {
        expr(ExprKind::Const(Value::Null), data_type)
    }

    fn arithmetic(&self, key: FunctionKey, other: &Column) -> Result<Column> {
        let ty = self
            .data_type()
            .promote(other.data_type())
            .ok_or_else(|| mismatch(key.name(), self.data_type(), other.data_type()))?;
        Ok(call(key, vec![self.clone(), other.clone()], ty))
    }

    pub fn add(&self, other: &Column) -> Result<Column> {
        self.arithmetic(FunctionKey::ADD, other)
    }

    pub fn sub(&self, other: &Column) -> Result<Column> {
        self.arithmetic(FunctionKey::SUB, other)
    }

    pub fn mul(&self, other: &Column) -> Result<Column> {
        self.arithmetic(FunctionKey::MUL, other)
    }

    pub fn div(&self, other: &Column) -> Result<Column> {
        self.arithmetic(FunctionKey::DIV, other)
    }

    pub fn rem(&self, other: &Column) -> Result<Column> {
        self.arithmetic(FunctionKey::MOD, other)
    }

    pub fn neg(&self) -> Result<Column> {
        if !self.data_type().is_numeric() {
            return Err(Error::argument(format!(
                "negation is not defined for {}",
                self.data_type()
            )));
        }
        Ok(call(FunctionKey::NEGATE, vec![self.clone()], self.data_type()))
    }

    fn comparison(&self, key: FunctionKey, other: &Column) -> Result<Column> {
        if !self.data_type().is_comparable_with(other.data_type()) {
            return Err(mismatch(key.name(), self.data_type(), other.data_type()));
        }
        Ok(call(key, vec![self.clone(), other.clone()], DataType::Boolean))
    }

    pub fn equal(&self, other: &Column) -> Result<Column> {
        self.comparison(FunctionKey::EQ, other)
    }

    pub fn not_equal(&self, other: &Column) -> Result<Column> {
        self.comparison(FunctionKey::NE, other)
    }

    pub fn less_than(&self, other: &Column) -> Result<Column> {
        self.comparison(FunctionKey::LT, other)
    }

    pub fn less_equal(&self, other: &Column) -> Result<Column> {
        self.comparison(FunctionKey::LE, other)
    }

    pub fn greater_than(&self, other: &Column) -> Result<Column> {
        self.comparison(FunctionKey::GT, other)
    }

    pub fn greater_equal(&self, other: &Column) -> Result<Column> {
        self.comparison(FunctionKey::GE, other)
    }

    /// Three-valued AND.
    pub fn and(&self, other: &Column) -> Result<Column> {
        require_boolean("AND", self)?;
        require_boolean("AND", other)?;
        Ok(call(
            FunctionKey::AND,
            vec![self.clone(), other.clone()],
            DataType::Boolean,
        ))
    }

    /// Three-valued OR.
    pub fn or(&self, other: &Column) -> Result<Column> {
        require_boolean("OR", self)?;
        require_boolean("OR", other)?;
        Ok(call(
            FunctionKey::OR,
            vec![self.clone(), other.clone()],
            DataType::Boolean,
        ))
    }

    pub fn not(&self) -> Result<Column> {
        require_boolean("NOT", self)?;
        Ok(call(FunctionKey::NOT, vec![self.clone()], DataType::Boolean))
    }

    pub fn is_null(&self) -> Column {
        call(FunctionKey::IS_NULL, vec![self.clone()], DataType::Boolean)
    }

    pub fn is_not_null(&self) -> Column {
        call(
            FunctionKey::IS_NOT_NULL,
            vec![self.clone()],
            DataType::Boolean,
        )
    }

    /// `self` unless it is NULL, otherwise `fallback`.
    pub fn if_null(&self, fallback: &Column) -> Result<Column> {
        let ty = unify("IF NULL", self.data_type(), fallback.data_type())?;
        Ok(call(
            FunctionKey::IF_NULL,
            vec![self.clone(), fallback.clone()],
            ty,
        ))
    }

    /// String concatenation.
    pub fn concat(&self, other: &Column) -> Result<Column> {
        if self.data_type() != DataType::Text || other.data_type() != DataType::Text {
            return Err(mismatch("||", self.data_type(), other.data_type()));
        }
        Ok(call(
            FunctionKey::CONCAT,
            vec![self.clone(), other.clone()],
            DataType::Text,
        ))
    }

    /// Convert to another type.
    pub fn cast(&self, to: DataType) -> Column {
        expr(
            ExprKind::Cast {
                operand: self.clone(),
            },
            to,
        )
    }

    pub fn cast_to_string(&self) -> Column {
        self.cast(DataType::Text)
    }

    fn aggregate(&self, func: AggFunc) -> Result<Column> {
        if self.contains_aggregate() {
            return Err(Error::argument("aggregates cannot be nested"));
        }
        let sources = self.scalar_source_models();
        let [scope] = sources.as_slice() else {
            return Err(Error::argument(format!(
                "aggregate operand must read exactly one model, found {}",
                sources.len()
            )));
        };
        let ty = func.result_type(Some(self.data_type()))?;
        Ok(expr(
            ExprKind::Aggregate {
                func,
                operand: Some(self.clone()),
                scope: scope.downgrade(),
            },
            ty,
        ))
    }

    pub fn count(&self) -> Result<Column> {
        self.aggregate(AggFunc::Count)
    }

    /// Number of rows of `model`.
    pub fn count_rows(model: &Model) -> Column {
        expr(
            ExprKind::Aggregate {
                func: AggFunc::CountRows,
                operand: None,
                scope: model.downgrade(),
            },
            DataType::BigInt,
        )
    }

    pub fn sum(&self) -> Result<Column> {
        self.aggregate(AggFunc::Sum)
    }

    pub fn avg(&self) -> Result<Column> {
        self.aggregate(AggFunc::Avg)
    }

    pub fn min(&self) -> Result<Column> {
        self.aggregate(AggFunc::Min)
    }

    pub fn max(&self) -> Result<Column> {
        self.aggregate(AggFunc::Max)
    }

    pub fn first(&self) -> Result<Column> {
        self.aggregate(AggFunc::First)
    }

    pub fn last(&self) -> Result<Column> {
        self.aggregate(AggFunc::Last)
    }
}

/// Builds a searched CASE expression.
#[derive(Debug, Default)]
pub struct CaseBuilder {
    whens: Vec<(Column, Column)>,
}

impl CaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, condition: &Column, value: &Column) -> Self {
        self.whens.push((condition.clone(), value.clone()));
        self
    }

    pub fn otherwise(self, value: &Column) -> Result<Column> {
        if self.whens.is_empty() {
            return Err(Error::argument("CASE needs at least one WHEN"));
        }
        let mut ty = value.data_type();
        for (condition, result) in &self.whens {
            require_boolean("CASE WHEN", condition)?;
            ty = unify("CASE", ty, result.data_type())?;
        }
        Ok(expr(
            ExprKind::Case {
                whens: self.whens,
                otherwise: value.clone(),
            },
            ty,
        ))
    }
}
