//! Queries as data sources.
//!
//! A [`DbQuery`] wraps an immutable statement. Every composing operation
//! returns a new query whose provenance links back to this one.

use std::sync::{Arc, OnceLock};

use relset_core::{
    Column, ColumnSort, DataSource, DataSourceKind, Error, Model, Provenance, Result,
    SortDirection, Value,
};

use crate::builder::QueryBuilder;
use crate::sequential::SequentialKey;
use crate::sql::{Dialect, SqlGenerator};
use crate::statement::{DbQueryStatement, DbSelectStatement, DbSortItem, DbUnionStatement};

#[derive(Debug, Clone)]
pub struct DbQuery {
    statement: Arc<DbQueryStatement>,
    provenance: Provenance,
    sequential_key: Arc<OnceLock<Arc<SequentialKey>>>,
}

impl DbQuery {
    pub fn new(statement: Arc<DbQueryStatement>) -> Self {
        Self {
            statement,
            provenance: Provenance::new(),
            sequential_key: Arc::new(OnceLock::new()),
        }
    }

    pub fn statement(&self) -> &Arc<DbQueryStatement> {
        &self.statement
    }

    fn derive(&self, stmt: DbQueryStatement) -> DbQuery {
        let query = DbQuery::new(Arc::new(stmt));
        query.provenance.update_original(Some(&self.provenance));
        query
    }

    /// Rows matching `predicate`, an expression over this query's model.
    pub fn filter(&self, predicate: &Column) -> Result<DbQuery> {
        let stmt = QueryBuilder::new(self.model())
            .from_query(self)?
            .filter(predicate)?
            .build_select()?;
        Ok(self.derive(DbQueryStatement::Select(stmt)))
    }

    /// The same rows ordered by `sorts`, replacing any existing order.
    pub fn order_by(&self, sorts: &[ColumnSort]) -> Result<DbQuery> {
        if sorts.is_empty() {
            return Err(Error::argument("order_by requires at least one column"));
        }
        let stmt = sorts
            .iter()
            .try_fold(QueryBuilder::new(self.model()).from_query(self)?, |b, s| {
                b.order_by(s.column(), s.direction())
            })?
            .build_select()?;
        Ok(self.derive(DbQueryStatement::Select(stmt)))
    }

    /// Skip the first `rows` rows.
    pub fn skip(&self, rows: u64) -> Result<DbQuery> {
        self.page(Some(rows), None)
    }

    /// Keep at most `rows` rows.
    pub fn take(&self, rows: u64) -> Result<DbQuery> {
        self.page(None, Some(rows))
    }

    /// Paging needs a stable order: the query's own, completed by the
    /// model's [`stable_order`] so ties cannot reorder rows between pages.
    fn page(&self, offset: Option<u64>, fetch: Option<u64>) -> Result<DbQuery> {
        let stable = stable_order(self.model());
        if let Some(s) = self.statement.as_select() {
            if s.fetch.is_none() && s.group_by.is_empty() && !s.order_by.is_empty() {
                let mut order_by = s.order_by.clone();
                for sort in &stable {
                    let Some(expr) = s.source_of(sort.column()) else {
                        continue;
                    };
                    let ordered = expr
                        .as_column()
                        .is_some_and(|c| order_by.iter().any(|i| i.expr.as_column() == Some(c)));
                    if !ordered {
                        order_by.push(DbSortItem {
                            expr,
                            direction: sort.direction(),
                        });
                    }
                }
                let next = DbSelectStatement {
                    offset: match offset {
                        Some(n) => Some(s.offset.unwrap_or(0) + n),
                        None => s.offset,
                    },
                    fetch,
                    order_by,
                    ..s.clone()
                };
                return Ok(self.derive(DbQueryStatement::Select(next)));
            }
        }
        let mut builder = QueryBuilder::new(self.model()).from_query(self)?;
        if !builder.has_order() && stable.is_empty() {
            return Err(Error::argument(format!(
                "paging {} requires an order or a stored column",
                self.model().type_name()
            )));
        }
        for sort in &stable {
            builder = builder.then_by(sort.column(), sort.direction())?;
        }
        if let Some(n) = offset {
            builder = builder.offset(n)?;
        }
        if let Some(n) = fetch {
            builder = builder.fetch(n)?;
        }
        Ok(self.derive(DbQueryStatement::Select(builder.build_select()?)))
    }

    /// `self UNION other`.
    pub fn union(&self, other: &DbQuery) -> Result<DbQuery> {
        self.combine(other, false)
    }

    /// `self UNION ALL other`.
    pub fn union_all(&self, other: &DbQuery) -> Result<DbQuery> {
        self.combine(other, true)
    }

    fn combine(&self, other: &DbQuery, all: bool) -> Result<DbQuery> {
        if !self.model().is_schema_compatible(other.model()) {
            return Err(Error::argument(format!(
                "cannot union {} with {}",
                self.model().type_name(),
                other.model().type_name()
            )));
        }
        let model = self.model().clone_schema()?;
        tracing::debug!(model = %model.type_name(), all, "Built union statement");
        let query = DbQuery::new(Arc::new(DbQueryStatement::Union(DbUnionStatement {
            model,
            left: self.statement.remove_system_columns(),
            right: other.statement.remove_system_columns(),
            all,
            system_columns_removed: false,
        })));
        // two origins: no single source can be proven
        query.provenance.update_original(None);
        Ok(query)
    }

    /// The sequential key of this query, derived once and reused. `prefix`
    /// names the temporary table on first use.
    pub fn sequential_key(&self, prefix: &str) -> Result<Arc<SequentialKey>> {
        if let Some(key) = self.sequential_key.get() {
            return Ok(Arc::clone(key));
        }
        let key = Arc::new(SequentialKey::derive(&self.statement, prefix)?);
        Ok(Arc::clone(self.sequential_key.get_or_init(|| key)))
    }

    /// Rows of child model `name` for the rows of this query.
    pub fn child_query(&self, name: &str, prefix: &str) -> Result<DbQuery> {
        self.sequential_key(prefix)?.child_query(self, name)
    }

    pub fn to_sql(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        SqlGenerator::new(dialect).query(&self.statement)
    }
}

/// The order that identifies each row of `model`: its primary key members, or
/// every stored non-system column ascending when it has no primary key.
pub(crate) fn stable_order(model: &Model) -> Vec<ColumnSort> {
    match model.primary_key() {
        Some(pk) => pk
            .members()
            .iter()
            .map(|m| {
                let direction = match m.direction() {
                    SortDirection::Unspecified => SortDirection::Ascending,
                    other => other,
                };
                ColumnSort::new(m.column().clone(), direction)
            })
            .collect(),
        None => model
            .columns()
            .iter()
            .filter(|c| c.is_stored_member() && !c.is_system())
            .map(ColumnSort::asc)
            .collect(),
    }
}

impl DataSource for DbQuery {
    fn model(&self) -> &Model {
        self.statement.model()
    }

    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn kind(&self) -> DataSourceKind {
        DataSourceKind::Query
    }
}
