//! Columns: typed handles bound to a model member or to an expression.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::columns::Columns;
use crate::dataset::DataRow;
use crate::db_expr::DbExpr;
use crate::error::{Error, Result};
use crate::expr::ExprNode;
use crate::model::{Model, ModelId, ModelInner};
use crate::types::DataType;
use crate::value::Value;

static NEXT_COLUMN_UID: AtomicU64 = AtomicU64::new(1);

fn next_uid() -> u64 {
    NEXT_COLUMN_UID.fetch_add(1, Ordering::Relaxed)
}

/// Structural identity of a column: the type that declared it plus its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId {
    declaring_type: Arc<str>,
    name: Arc<str>,
}

impl ColumnId {
    pub fn new(declaring_type: &str, name: &str) -> Self {
        Self {
            declaring_type: Arc::from(declaring_type),
            name: Arc::from(name),
        }
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.name)
    }
}

/// Role of a column within its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// An ordinary stored column.
    General,
    /// A column that lives only in memory and is never sent to the database.
    Local,
    /// Internal bookkeeping (row ids for correlation), hidden from natural
    /// projections and skipped by auto-mapping.
    System,
}

/// Declaration of a model column.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    name: Arc<str>,
    data_type: DataType,
    kind: ColumnKind,
    nullable: bool,
    auto_increment: bool,
    declared_by: Option<Arc<str>>,
    original: Option<ColumnId>,
}

impl ColumnDef {
    /// Create a new column definition.
    pub fn new(name: impl AsRef<str>, data_type: DataType) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            data_type,
            kind: ColumnKind::General,
            nullable: false,
            auto_increment: false,
            declared_by: None,
            original: None,
        }
    }

    /// Mark as nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark as database-generated.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Mark as a system column.
    pub fn system(mut self) -> Self {
        self.kind = ColumnKind::System;
        self
    }

    /// Mark as a local, in-memory only column.
    pub fn local(mut self) -> Self {
        self.kind = ColumnKind::Local;
        self.nullable = true;
        self
    }

    /// Share the identity of a column declared by another type, so that
    /// models declaring the same registration match by id.
    pub fn declared_by(mut self, declaring_type: &str) -> Self {
        self.declared_by = Some(Arc::from(declaring_type));
        self
    }

    /// Record the identity this column had before it was renamed.
    pub fn renamed_from(mut self, declaring_type: &str, name: &str) -> Self {
        self.original = Some(ColumnId::new(declaring_type, name));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    fn id_for(&self, type_name: &Arc<str>) -> ColumnId {
        ColumnId {
            declaring_type: self
                .declared_by
                .clone()
                .unwrap_or_else(|| Arc::clone(type_name)),
            name: Arc::clone(&self.name),
        }
    }
}

pub(crate) enum Binding {
    Member {
        model: Weak<ModelInner>,
        model_id: ModelId,
        ordinal: usize,
    },
    Expression(Arc<ExprNode>),
}

pub(crate) struct ColumnInner {
    uid: u64,
    id: ColumnId,
    original_id: ColumnId,
    data_type: DataType,
    kind: ColumnKind,
    nullable: bool,
    auto_increment: bool,
    binding: Binding,
}

/// A typed column handle.
///
/// Cloning is cheap. Equality is instance identity: two handles are equal
/// only when they refer to the same attached member or the same expression.
#[derive(Clone)]
pub struct Column(pub(crate) Arc<ColumnInner>);

impl Column {
    pub(crate) fn member(
        def: &ColumnDef,
        type_name: &Arc<str>,
        model: Weak<ModelInner>,
        model_id: ModelId,
        ordinal: usize,
    ) -> Column {
        let id = def.id_for(type_name);
        let original_id = def.original.clone().unwrap_or_else(|| id.clone());
        Column(Arc::new(ColumnInner {
            uid: next_uid(),
            id,
            original_id,
            data_type: def.data_type,
            kind: def.kind,
            nullable: def.nullable,
            auto_increment: def.auto_increment,
            binding: Binding::Member {
                model,
                model_id,
                ordinal,
            },
        }))
    }

    pub(crate) fn from_expr(node: ExprNode) -> Column {
        let uid = next_uid();
        let id = ColumnId::new("", &format!("{}{}", node.function_key().name(), uid));
        Column(Arc::new(ColumnInner {
            uid,
            original_id: id.clone(),
            id,
            data_type: node.data_type(),
            kind: ColumnKind::General,
            nullable: true,
            auto_increment: false,
            binding: Binding::Expression(Arc::new(node)),
        }))
    }

    /// Process-unique id of this handle.
    pub fn uid(&self) -> u64 {
        self.0.uid
    }

    pub fn id(&self) -> &ColumnId {
        &self.0.id
    }

    /// Identity before any rename; equal to [`Column::id`] if never renamed.
    pub fn original_id(&self) -> &ColumnId {
        &self.0.original_id
    }

    pub fn name(&self) -> &str {
        self.0.id.name()
    }

    pub fn data_type(&self) -> DataType {
        self.0.data_type
    }

    pub fn kind(&self) -> ColumnKind {
        self.0.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.0.nullable
    }

    pub fn is_auto_increment(&self) -> bool {
        self.0.auto_increment
    }

    pub fn is_system(&self) -> bool {
        self.0.kind == ColumnKind::System
    }

    pub fn is_local(&self) -> bool {
        self.0.kind == ColumnKind::Local
    }

    /// True for stored and system columns of a model.
    pub fn is_stored_member(&self) -> bool {
        matches!(self.0.binding, Binding::Member { .. }) && !self.is_local()
    }

    pub fn is_expression(&self) -> bool {
        matches!(self.0.binding, Binding::Expression(_))
    }

    pub fn expression(&self) -> Option<&ExprNode> {
        match &self.0.binding {
            Binding::Expression(node) => Some(node),
            Binding::Member { .. } => None,
        }
    }

    /// Ordinal within the model's stored (or local) column list.
    pub fn ordinal(&self) -> Option<usize> {
        match self.0.binding {
            Binding::Member { ordinal, .. } => Some(ordinal),
            Binding::Expression(_) => None,
        }
    }

    pub fn model_id(&self) -> Option<ModelId> {
        match self.0.binding {
            Binding::Member { model_id, .. } => Some(model_id),
            Binding::Expression(_) => None,
        }
    }

    /// The model this member column is attached to.
    pub fn model(&self) -> Option<Model> {
        match &self.0.binding {
            Binding::Member { model, .. } => model.upgrade().map(Model),
            Binding::Expression(_) => None,
        }
    }

    /// A declaration reproducing this column's identity, for building models
    /// that carry copies of it.
    pub fn to_def(&self) -> ColumnDef {
        ColumnDef {
            name: Arc::clone(&self.0.id.name),
            data_type: self.0.data_type,
            kind: ColumnKind::General,
            nullable: self.0.nullable,
            auto_increment: false,
            declared_by: Some(Arc::clone(&self.0.id.declaring_type)),
            original: Some(self.0.original_id.clone()),
        }
    }

    /// Models whose row values this column reads directly, outside aggregates.
    pub fn scalar_source_models(&self) -> Vec<Model> {
        let mut out = Vec::new();
        self.collect_models(false, &mut out);
        out
    }

    /// Models aggregated over by this column.
    pub fn aggregate_source_models(&self) -> Vec<Model> {
        let mut out = Vec::new();
        self.collect_models(true, &mut out);
        out
    }

    pub(crate) fn collect_models(&self, aggregate: bool, out: &mut Vec<Model>) {
        match &self.0.binding {
            Binding::Member { .. } => {
                if !aggregate {
                    if let Some(m) = self.model() {
                        if !out.contains(&m) {
                            out.push(m);
                        }
                    }
                }
            }
            Binding::Expression(node) => node.collect_models(aggregate, out),
        }
    }

    /// Whether an aggregate appears anywhere in this column's expression.
    pub fn contains_aggregate(&self) -> bool {
        self.expression().is_some_and(ExprNode::contains_aggregate)
    }

    /// Member columns referenced by this column, including itself.
    pub fn member_columns(&self) -> Columns {
        let mut out = Columns::new();
        self.collect_members(&mut out);
        out
    }

    pub(crate) fn collect_members(&self, out: &mut Columns) {
        match &self.0.binding {
            Binding::Member { .. } => {
                if !out.contains(self) {
                    out.push(self.clone());
                }
            }
            Binding::Expression(node) => {
                for operand in node.operands() {
                    operand.collect_members(out);
                }
            }
        }
    }

    /// Evaluate this column against an in-memory row.
    pub fn eval(&self, row: &DataRow) -> Result<Value> {
        match &self.0.binding {
            Binding::Member {
                model_id, ordinal, ..
            } => {
                let row_model = row
                    .model()
                    .ok_or_else(|| Error::invalid_state("row is detached from its data set"))?;
                if row_model.id() != *model_id {
                    return Err(Error::argument(format!(
                        "column '{}' does not belong to model {}",
                        self.name(),
                        row_model.type_name()
                    )));
                }
                let values = if self.is_local() {
                    row.locals()
                } else {
                    row.values()
                };
                Ok(values.get(*ordinal).cloned().unwrap_or(Value::Null))
            }
            Binding::Expression(node) => node.eval(row),
        }
    }

    /// The backend representation, computed once per expression node.
    pub fn db_expr(&self) -> DbExpr {
        match &self.0.binding {
            Binding::Member { .. } => DbExpr::Column(self.clone()),
            Binding::Expression(node) => node.db_expr().clone(),
        }
    }

    /// Produce the equivalent column against `target`, a model instance whose
    /// tree contains a model of this column's type.
    ///
    /// Expression translations are cached on `target`.
    pub fn translate_to(&self, target: &Model) -> Result<Column> {
        match &self.0.binding {
            Binding::Member {
                model_id, ordinal, ..
            } => {
                if *model_id == target.id() {
                    return Ok(self.clone());
                }
                let own = self.model().ok_or_else(|| {
                    Error::invalid_state(format!("model of column '{}' was dropped", self.name()))
                })?;
                let dest = target.resolve_compatible(&own.model_type()).ok_or_else(|| {
                    Error::argument(format!(
                        "cannot translate column '{}' of {} to model {}",
                        self.name(),
                        own.type_name(),
                        target.type_name()
                    ))
                })?;
                let list = if self.is_local() {
                    dest.local_columns()
                } else {
                    dest.columns()
                };
                list.get(*ordinal).cloned().ok_or_else(|| {
                    Error::invalid_state(format!("ordinal {} missing in translated model", ordinal))
                })
            }
            Binding::Expression(node) => {
                if let Some(hit) = target.cached_translation(self.0.uid) {
                    return Ok(hit);
                }
                let Some(node) = node.translate(target)? else {
                    return Ok(self.clone());
                };
                let translated = Column::from_expr(node);
                target.store_translation(self, translated.clone());
                Ok(translated)
            }
        }
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Column {}

impl Hash for Column {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.uid.hash(state);
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.binding {
            Binding::Member {
                model_id, ordinal, ..
            } => write!(
                f,
                "Column({} {} @{}#{})",
                self.0.id, self.0.data_type, model_id, ordinal
            ),
            Binding::Expression(node) => {
                write!(f, "Column({} {:?})", self.0.data_type, node.function_key())
            }
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SortDirection;
    use crate::model::ModelBuilder;

    fn model() -> Model {
        ModelBuilder::new("Product")
            .column(ColumnDef::new("id", DataType::Int))
            .column(ColumnDef::new("price", DataType::Int))
            .column(ColumnDef::new("title", DataType::Text).renamed_from("Product", "name"))
            .primary_key("PK_Product", &[("id", SortDirection::Ascending)])
            .build()
            .unwrap()
    }

    #[test]
    fn test_identity_and_original_identity() {
        let m = model();
        let title = m.column("title").unwrap();
        assert_eq!(title.id(), &ColumnId::new("Product", "title"));
        assert_eq!(title.original_id(), &ColumnId::new("Product", "name"));
        let id = m.column("id").unwrap();
        assert_eq!(id.id(), id.original_id());
    }

    #[test]
    fn test_member_translation_by_ordinal() {
        let m = model();
        let copy = m.clone_schema().unwrap();
        let price = m.column("price").unwrap();
        let translated = price.translate_to(&copy).unwrap();
        assert_eq!(translated, copy.column("price").unwrap());
        assert_eq!(price.translate_to(&m).unwrap(), price);
    }

    #[test]
    fn test_expression_translation_is_cached_per_target() {
        let m = model();
        let copy = m.clone_schema().unwrap();
        let price = m.column("price").unwrap();
        let doubled = price.add(&price).unwrap();
        let a = doubled.translate_to(&copy).unwrap();
        let b = doubled.translate_to(&copy).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.scalar_source_models(), vec![copy.clone()]);
        copy.clear_translation_cache();
        let c = doubled.translate_to(&copy).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_translation_to_unrelated_model_fails() {
        let m = model();
        let other = ModelBuilder::new("Other")
            .column(ColumnDef::new("x", DataType::Int))
            .build()
            .unwrap();
        assert!(m.column("id").unwrap().translate_to(&other).is_err());
    }

    #[test]
    fn test_to_def_keeps_identity() {
        let m = model();
        let title = m.column("title").unwrap();
        let copy = ModelBuilder::new("Seq")
            .column(title.to_def())
            .build()
            .unwrap();
        let c = copy.column("title").unwrap();
        assert_eq!(c.id(), title.id());
        assert_eq!(c.original_id(), title.original_id());
    }
}
