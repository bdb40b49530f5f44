//! Immutable statement trees.
//!
//! Statements are built by [`QueryBuilder`](crate::builder::QueryBuilder) and
//! never change afterwards: composing a filter, ordering or join produces a
//! new statement. The SQL generator walks these trees.

use std::fmt;
use std::sync::Arc;

use relset_core::{Column, DbExpr, Model, ModelId, SortDirection};

/// One projected column: `source` populates `target`, a column of the
/// statement's model.
#[derive(Debug, Clone)]
pub struct DbColumnMapping {
    pub source: DbExpr,
    pub target: Column,
}

/// One ORDER BY item.
#[derive(Debug, Clone)]
pub struct DbSortItem {
    pub expr: DbExpr,
    pub direction: SortDirection,
}

/// A named table bound to one model instance.
#[derive(Debug, Clone)]
pub struct DbTableRef {
    model: Model,
    name: String,
}

impl DbTableRef {
    pub fn new(model: &Model, name: impl Into<String>) -> Self {
        Self {
            model: model.clone(),
            name: name.into(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Inner join of two FROM sources.
#[derive(Debug, Clone)]
pub struct DbJoinClause {
    pub left: DbFromClause,
    pub right: DbFromClause,
    pub on: DbExpr,
}

/// A FROM source: a table, a join, or a derived statement.
#[derive(Debug, Clone)]
pub enum DbFromClause {
    Table(DbTableRef),
    Join(Box<DbJoinClause>),
    Derived(Arc<DbQueryStatement>),
}

impl DbFromClause {
    /// Models whose columns this source exposes, left to right.
    pub fn exposed_models(&self) -> Vec<ModelId> {
        let mut out = Vec::new();
        self.collect_exposed(&mut out);
        out
    }

    fn collect_exposed(&self, out: &mut Vec<ModelId>) {
        match self {
            DbFromClause::Table(t) => out.push(t.model.id()),
            DbFromClause::Derived(s) => out.push(s.model().id()),
            DbFromClause::Join(j) => {
                j.left.collect_exposed(out);
                j.right.collect_exposed(out);
            }
        }
    }

    /// Whether a table of `model` appears directly (not inside a derived
    /// statement).
    pub fn exposes(&self, model: &Model) -> bool {
        self.exposed_models().contains(&model.id())
    }
}

/// A SELECT statement.
#[derive(Clone)]
pub struct DbSelectStatement {
    pub(crate) model: Model,
    pub(crate) select: Option<Vec<DbColumnMapping>>,
    pub(crate) from: DbFromClause,
    pub(crate) where_clause: Option<DbExpr>,
    pub(crate) group_by: Vec<DbExpr>,
    pub(crate) order_by: Vec<DbSortItem>,
    pub(crate) offset: Option<u64>,
    pub(crate) fetch: Option<u64>,
    pub(crate) system_columns_removed: bool,
}

impl DbSelectStatement {
    /// The model describing the result rows.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Projection; `None` selects the model's own columns from the FROM source.
    pub fn select(&self) -> Option<&[DbColumnMapping]> {
        self.select.as_deref()
    }

    pub fn from(&self) -> &DbFromClause {
        &self.from
    }

    pub fn where_clause(&self) -> Option<&DbExpr> {
        self.where_clause.as_ref()
    }

    pub fn group_by(&self) -> &[DbExpr] {
        &self.group_by
    }

    pub fn order_by(&self) -> &[DbSortItem] {
        &self.order_by
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn fetch(&self) -> Option<u64> {
        self.fetch
    }

    pub fn system_columns_removed(&self) -> bool {
        self.system_columns_removed
    }

    /// Whether the statement can be merged into an outer one instead of being
    /// wrapped as a derived table.
    pub fn is_inlinable(&self) -> bool {
        self.offset.is_none()
            && self.fetch.is_none()
            && self.group_by.is_empty()
            && !self
                .select
                .iter()
                .flatten()
                .any(|m| m.source.contains_aggregate())
    }

    /// The expression producing `column` of this statement's model.
    pub fn source_of(&self, column: &Column) -> Option<DbExpr> {
        match &self.select {
            None => Some(DbExpr::Column(column.clone())),
            Some(list) => list
                .iter()
                .find(|m| m.target == *column)
                .map(|m| m.source.clone()),
        }
    }

    /// The same statement projecting `mappings` into `model`.
    pub(crate) fn with_projection(&self, model: &Model, mappings: Vec<DbColumnMapping>) -> Self {
        Self {
            model: model.clone(),
            select: Some(mappings),
            system_columns_removed: false,
            ..self.clone()
        }
    }
}

impl fmt::Debug for DbSelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSelectStatement")
            .field("model", &self.model.type_name())
            .field("select", &self.select.as_ref().map(Vec::len))
            .field("from", &self.from.exposed_models())
            .field("where", &self.where_clause.is_some())
            .field("order_by", &self.order_by.len())
            .field("offset", &self.offset)
            .field("fetch", &self.fetch)
            .finish_non_exhaustive()
    }
}

/// `left UNION [ALL] right`, wrapped in a model of its own.
#[derive(Debug, Clone)]
pub struct DbUnionStatement {
    pub(crate) model: Model,
    pub(crate) left: Arc<DbQueryStatement>,
    pub(crate) right: Arc<DbQueryStatement>,
    pub(crate) all: bool,
    pub(crate) system_columns_removed: bool,
}

impl DbUnionStatement {
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn left(&self) -> &DbQueryStatement {
        &self.left
    }

    pub fn right(&self) -> &DbQueryStatement {
        &self.right
    }

    pub fn is_all(&self) -> bool {
        self.all
    }
}

/// Any statement producing rows.
#[derive(Debug, Clone)]
pub enum DbQueryStatement {
    Select(DbSelectStatement),
    Union(DbUnionStatement),
}

impl DbQueryStatement {
    pub fn model(&self) -> &Model {
        match self {
            DbQueryStatement::Select(s) => &s.model,
            DbQueryStatement::Union(u) => &u.model,
        }
    }

    pub fn system_columns_removed(&self) -> bool {
        match self {
            DbQueryStatement::Select(s) => s.system_columns_removed,
            DbQueryStatement::Union(u) => u.system_columns_removed,
        }
    }

    pub fn as_select(&self) -> Option<&DbSelectStatement> {
        match self {
            DbQueryStatement::Select(s) => Some(s),
            DbQueryStatement::Union(_) => None,
        }
    }

    /// This statement prepared for use as a FROM source: system columns are
    /// hidden. A statement already stripped is returned as is.
    pub fn remove_system_columns(self: &Arc<Self>) -> Arc<Self> {
        if self.system_columns_removed() {
            return Arc::clone(self);
        }
        tracing::debug!(model = %self.model().type_name(), "Removing system columns from derived statement");
        let stripped = match &**self {
            DbQueryStatement::Select(s) => DbQueryStatement::Select(DbSelectStatement {
                system_columns_removed: true,
                ..s.clone()
            }),
            DbQueryStatement::Union(u) => DbQueryStatement::Union(DbUnionStatement {
                system_columns_removed: true,
                ..u.clone()
            }),
        };
        Arc::new(stripped)
    }

    /// Columns of the model that appear in the result, in ordinal order.
    pub fn output_columns(&self) -> Vec<Column> {
        let removed = self.system_columns_removed();
        self.model()
            .columns()
            .iter()
            .filter(|c| !(removed && c.is_system()))
            .cloned()
            .collect()
    }
}

/// `INSERT INTO target (...) SELECT ...`
#[derive(Debug, Clone)]
pub struct DbInsertStatement {
    pub(crate) target: DbTableRef,
    pub(crate) select: DbSelectStatement,
}

/// `UPDATE target SET ... FROM source WHERE key join`
#[derive(Debug, Clone)]
pub struct DbUpdateStatement {
    pub(crate) target: DbTableRef,
    pub(crate) select: DbSelectStatement,
}

/// `DELETE FROM target WHERE EXISTS (source joined on key)`
#[derive(Debug, Clone)]
pub struct DbDeleteStatement {
    pub(crate) target: DbTableRef,
    pub(crate) select: DbSelectStatement,
}

macro_rules! mutation_accessors {
    ($($ty:ty),*) => {
        $(
            impl $ty {
                pub fn target(&self) -> &DbTableRef {
                    &self.target
                }

                /// The underlying select: projection, FROM (including the
                /// extra join) and WHERE.
                pub fn select(&self) -> &DbSelectStatement {
                    &self.select
                }
            }
        )*
    };
}

mutation_accessors!(DbInsertStatement, DbUpdateStatement, DbDeleteStatement);
