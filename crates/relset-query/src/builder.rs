//! The query builder.
//!
//! [`QueryBuilder`] assembles a [`DbSelectStatement`] in two states: empty,
//! then "has FROM" once a source is attached. Every other operation requires
//! a FROM source and may be repeated in any order. Building consumes the
//! builder and produces an immutable statement.
//!
//! A query used as a FROM source is merged into the new statement when it has
//! no paging or grouping; otherwise it is wrapped as a derived table with its
//! system columns removed. Expressions written against a merged query's model
//! are rewritten to the expressions that produce those columns.
//!
//! Insert, update and delete statements go through the same machinery and
//! differ only in their projection and in one extra join.

use std::sync::Arc;

use relset_core::{
    Column, ColumnMapping, DataSource, DbExpr, Error, FunctionKey, KeyMapping, Model, ModelId,
    Result, SortDirection,
};

use crate::query::DbQuery;
use crate::statement::{
    DbColumnMapping, DbDeleteStatement, DbFromClause, DbInsertStatement, DbJoinClause,
    DbQueryStatement, DbSelectStatement, DbSortItem, DbUpdateStatement,
};
use crate::table::DbTable;

/// A query merged into the statement under construction. Columns of `model`
/// are replaced by the expressions in `mappings`.
#[derive(Debug, Clone)]
struct Inlined {
    model: Model,
    mappings: Vec<DbColumnMapping>,
}

/// The extra join a mutation adds to its source.
enum ExtraJoin<'a> {
    None,
    /// Join the parent table of a child target on the parent relationship.
    Parent(&'a DbTable),
    /// Join the target table on a key mapping.
    Key(&'a DbTable, &'a KeyMapping),
}

#[derive(Debug)]
pub struct QueryBuilder {
    model: Model,
    from: Option<DbFromClause>,
    scope: Vec<ModelId>,
    inlined: Option<Inlined>,
    select: Option<Vec<DbColumnMapping>>,
    select_inherited: bool,
    where_clause: Option<DbExpr>,
    order_by: Vec<DbSortItem>,
    order_inherited: bool,
    offset: Option<u64>,
    fetch: Option<u64>,
}

impl QueryBuilder {
    /// Start a statement whose result rows have the shape of `model`.
    pub fn new(model: &Model) -> Self {
        Self {
            model: model.clone(),
            from: None,
            scope: Vec::new(),
            inlined: None,
            select: None,
            select_inherited: false,
            where_clause: None,
            order_by: Vec::new(),
            order_inherited: false,
            offset: None,
            fetch: None,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    fn require_empty(&self, op: &str) -> Result<()> {
        if self.from.is_some() {
            return Err(Error::invalid_state(format!(
                "{} requires a builder without a FROM source",
                op
            )));
        }
        Ok(())
    }

    fn require_from(&self, op: &str) -> Result<()> {
        if self.from.is_none() {
            return Err(Error::invalid_state(format!(
                "{} requires a FROM source",
                op
            )));
        }
        Ok(())
    }

    /// Read from a table.
    pub fn from_table(mut self, table: &DbTable) -> Result<Self> {
        self.require_empty("from_table")?;
        self.scope = vec![table.model().id()];
        self.from = Some(DbFromClause::Table(table.table_ref().clone()));
        Ok(self)
    }

    /// Read from another query.
    pub fn from_query(self, query: &DbQuery) -> Result<Self> {
        self.from_statement(query.statement())
    }

    /// Read from a statement, merging it when possible.
    pub fn from_statement(mut self, stmt: &Arc<DbQueryStatement>) -> Result<Self> {
        self.require_empty("from_query")?;
        match stmt.as_select() {
            Some(s) if s.is_inlinable() => {
                self.from = Some(s.from.clone());
                self.scope = s.from.exposed_models();
                if let Some(list) = &s.select {
                    self.scope.push(s.model.id());
                    self.inlined = Some(Inlined {
                        model: s.model.clone(),
                        mappings: list.clone(),
                    });
                }
                self.where_clause.clone_from(&s.where_clause);
                self.order_by.clone_from(&s.order_by);
                self.order_inherited = true;
                if self.model == s.model {
                    self.select.clone_from(&s.select);
                    self.select_inherited = true;
                }
                tracing::debug!(model = %s.model.type_name(), "Merged query into statement");
            }
            _ => {
                let derived = stmt.remove_system_columns();
                tracing::debug!(model = %derived.model().type_name(), "Wrapped query as derived table");
                self.scope = vec![derived.model().id()];
                self.from = Some(DbFromClause::Derived(derived));
            }
        }
        Ok(self)
    }

    /// Inner join a table. Each mapping pairs a column in scope (source) with
    /// a column of the joined table (target).
    pub fn inner_join(self, table: &DbTable, on: &[ColumnMapping]) -> Result<Self> {
        self.join(DbFromClause::Table(table.table_ref().clone()), on)
    }

    /// Inner join another query as a derived table.
    pub fn inner_join_query(self, query: &DbQuery, on: &[ColumnMapping]) -> Result<Self> {
        let derived = query.statement().remove_system_columns();
        self.join(DbFromClause::Derived(derived), on)
    }

    fn join(mut self, right: DbFromClause, on: &[ColumnMapping]) -> Result<Self> {
        self.require_from("inner_join")?;
        if on.is_empty() {
            return Err(Error::argument("a join requires at least one column pair"));
        }
        let right_models = right.exposed_models();
        let mut predicate: Option<DbExpr> = None;
        for pair in on {
            let source = self.lower(pair.source())?;
            let target = pair.target();
            if !target.model_id().is_some_and(|id| right_models.contains(&id)) {
                return Err(Error::argument(format!(
                    "join column '{}' does not belong to the joined source",
                    target.name()
                )));
            }
            let eq = source.equal(DbExpr::Column(target.clone()));
            predicate = Some(match predicate {
                Some(p) => p.and(eq),
                None => eq,
            });
        }
        let (Some(left), Some(on)) = (self.from.take(), predicate) else {
            return Err(Error::invalid_state("join without a FROM source"));
        };
        self.scope.extend(right_models);
        self.from = Some(DbFromClause::Join(Box::new(DbJoinClause { left, right, on })));
        Ok(self)
    }

    /// Lower a column expression, checking that it only reads models in scope.
    fn lower(&self, column: &Column) -> Result<DbExpr> {
        let expr = column.db_expr();
        // row-order aggregates have no portable SQL form
        if let Some(key) = [FunctionKey::FIRST, FunctionKey::LAST]
            .into_iter()
            .find(|k| expr.calls(*k))
        {
            return Err(Error::argument(format!(
                "'{}' uses {}, which has no SQL translation",
                column.name(),
                key.name()
            )));
        }
        for c in expr.columns() {
            if c.is_local() {
                return Err(Error::argument(format!(
                    "local column '{}' cannot be used in a statement",
                    c.name()
                )));
            }
            if !c.model_id().is_some_and(|id| self.scope.contains(&id)) {
                let owner = c
                    .model()
                    .map_or_else(|| "a dropped model".to_string(), |m| m.type_name().to_string());
                return Err(Error::scope(format!(
                    "column '{}' of {} is not in scope of the {} statement",
                    c.name(),
                    owner,
                    self.model.type_name()
                )));
            }
        }
        Ok(self.substitute(&expr))
    }

    fn substitute(&self, expr: &DbExpr) -> DbExpr {
        let Some(inlined) = &self.inlined else {
            return expr.clone();
        };
        expr.substitute(&mut |c: &Column| {
            if c.model_id() != Some(inlined.model.id()) {
                return None;
            }
            Some(
                inlined
                    .mappings
                    .iter()
                    .find(|m| m.target == *c)
                    .map_or_else(|| DbExpr::null(c.data_type()), |m| m.source.clone()),
            )
        })
    }

    /// Project `source` into `target`, a stored column of the builder's model.
    pub fn select(mut self, source: &Column, target: &Column) -> Result<Self> {
        self.require_from("select")?;
        if target.model_id() != Some(self.model.id()) {
            return Err(Error::mapping(format!(
                "column '{}' is not a column of {}",
                target.name(),
                self.model.type_name()
            )));
        }
        ColumnMapping::new(source, target)?;
        let expr = self.lower(source)?;
        if self.select_inherited {
            self.select = None;
            self.select_inherited = false;
        }
        let list = self.select.get_or_insert_with(Vec::new);
        if list.iter().any(|m| m.target == *target) {
            return Err(Error::mapping(format!(
                "column '{}' is selected twice",
                target.name()
            )));
        }
        list.push(DbColumnMapping {
            source: expr,
            target: target.clone(),
        });
        Ok(self)
    }

    pub fn select_mappings(self, mappings: &[ColumnMapping]) -> Result<Self> {
        mappings
            .iter()
            .try_fold(self, |b, m| b.select(m.source(), m.target()))
    }

    /// Add a WHERE predicate, ANDed with any existing one.
    pub fn filter(mut self, predicate: &Column) -> Result<Self> {
        self.require_from("filter")?;
        if predicate.data_type() != relset_core::DataType::Boolean {
            return Err(Error::argument(format!(
                "filter requires a BOOLEAN expression, found {}",
                predicate.data_type()
            )));
        }
        if predicate.contains_aggregate() {
            return Err(Error::argument("filter expressions cannot contain aggregates"));
        }
        let expr = self.lower(predicate)?;
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        Ok(self)
    }

    /// Append an ORDER BY item. The first call replaces any ordering inherited
    /// from a merged query.
    pub fn order_by(mut self, column: &Column, direction: SortDirection) -> Result<Self> {
        self.require_from("order_by")?;
        let expr = self.lower(column)?;
        if self.order_inherited {
            self.order_by.clear();
            self.order_inherited = false;
        }
        self.order_by.push(DbSortItem { expr, direction });
        Ok(self)
    }

    /// Append an ORDER BY item that only breaks ties. Inherited ordering is
    /// kept and a column already ordered on is skipped.
    pub fn then_by(mut self, column: &Column, direction: SortDirection) -> Result<Self> {
        self.require_from("then_by")?;
        let expr = self.lower(column)?;
        if let Some(c) = expr.as_column() {
            if self.order_by.iter().any(|i| i.expr.as_column() == Some(c)) {
                return Ok(self);
            }
        }
        self.order_by.push(DbSortItem { expr, direction });
        Ok(self)
    }

    /// Whether an ORDER BY is present, explicit or inherited.
    pub fn has_order(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn offset(mut self, rows: u64) -> Result<Self> {
        self.require_from("offset")?;
        self.offset = Some(rows);
        Ok(self)
    }

    pub fn fetch(mut self, rows: u64) -> Result<Self> {
        self.require_from("fetch")?;
        self.fetch = Some(rows);
        Ok(self)
    }

    pub fn build_select(self) -> Result<DbSelectStatement> {
        self.finish()
    }

    /// `INSERT INTO target SELECT ...`. With `parent`, the source is also
    /// joined to the parent table on the target's parent relationship so only
    /// rows with an existing parent are inserted.
    pub fn build_insert(
        self,
        target: &DbTable,
        parent: Option<&DbTable>,
    ) -> Result<DbInsertStatement> {
        let extra = parent.map_or(ExtraJoin::None, ExtraJoin::Parent);
        let (target, select) = self.build_mutation(target, true, extra)?;
        Ok(DbInsertStatement { target, select })
    }

    /// `UPDATE target SET ... FROM source` joined on `key`.
    pub fn build_update(self, target: &DbTable, key: &KeyMapping) -> Result<DbUpdateStatement> {
        let (target, select) = self.build_mutation(target, true, ExtraJoin::Key(target, key))?;
        Ok(DbUpdateStatement { target, select })
    }

    /// `DELETE FROM target` where a source row matches on `key`.
    pub fn build_delete(self, target: &DbTable, key: &KeyMapping) -> Result<DbDeleteStatement> {
        let (target, select) = self.build_mutation(target, false, ExtraJoin::Key(target, key))?;
        Ok(DbDeleteStatement { target, select })
    }

    fn build_mutation(
        mut self,
        target: &DbTable,
        projected: bool,
        extra: ExtraJoin<'_>,
    ) -> Result<(crate::statement::DbTableRef, DbSelectStatement)> {
        if self.model != *target.model() {
            return Err(Error::invalid_state(format!(
                "statement model {} does not match target table {}",
                self.model.type_name(),
                target.name()
            )));
        }
        if projected {
            if self.select.as_ref().is_none_or(Vec::is_empty) {
                return Err(Error::mapping(format!(
                    "no columns mapped into {}",
                    target.name()
                )));
            }
        } else {
            self.select = None;
            self.select_inherited = false;
        }
        let builder = match extra {
            ExtraJoin::None => self,
            ExtraJoin::Parent(parent) => self.join_parent(parent)?,
            ExtraJoin::Key(table, key) => {
                if key.target().model().as_ref() != Some(table.model()) {
                    return Err(Error::argument(format!(
                        "key {} does not belong to table {}",
                        key.target().key_type(),
                        table.name()
                    )));
                }
                self.join(
                    DbFromClause::Table(table.table_ref().clone()),
                    &key.column_mappings(),
                )?
            }
        };
        let select = builder.finish()?;
        Ok((target.table_ref().clone(), select))
    }

    fn join_parent(mut self, parent: &DbTable) -> Result<Self> {
        self.require_from("parent join")?;
        let relationship = self.model.parent_relationship().ok_or_else(|| {
            Error::argument(format!("{} has no parent model", self.model.type_name()))
        })?;
        let mut predicate: Option<DbExpr> = None;
        for pair in relationship.relationship() {
            let child_column = pair.source();
            let source = self
                .select
                .iter()
                .flatten()
                .find(|m| m.target == *child_column)
                .map(|m| m.source.clone())
                .ok_or_else(|| {
                    Error::mapping(format!(
                        "relationship column '{}' is not mapped",
                        child_column.name()
                    ))
                })?;
            let parent_column = pair.target().translate_to(parent.model())?;
            let eq = source.equal(DbExpr::Column(parent_column));
            predicate = Some(match predicate {
                Some(p) => p.and(eq),
                None => eq,
            });
        }
        let (Some(left), Some(on)) = (self.from.take(), predicate) else {
            return Err(Error::invalid_state("parent relationship is empty"));
        };
        tracing::debug!(
            child = %self.model.type_name(),
            parent = %parent.name(),
            "Joined parent table for child insert"
        );
        self.scope.push(parent.model().id());
        self.from = Some(DbFromClause::Join(Box::new(DbJoinClause {
            left,
            right: DbFromClause::Table(parent.table_ref().clone()),
            on,
        })));
        Ok(self)
    }

    fn finish(self) -> Result<DbSelectStatement> {
        let Some(from) = self.from else {
            return Err(Error::invalid_state("statement has no FROM source"));
        };
        if self.select.is_none() && !from.exposes(&self.model) {
            return Err(Error::invalid_state(format!(
                "{} is not a FROM source, a select list is required",
                self.model.type_name()
            )));
        }
        let group_by = match &self.select {
            Some(list) if list.iter().any(|m| m.source.contains_aggregate()) => list
                .iter()
                .filter(|m| !m.source.contains_aggregate() && !m.source.columns().is_empty())
                .map(|m| m.source.clone())
                .collect(),
            _ => Vec::new(),
        };
        tracing::debug!(
            model = %self.model.type_name(),
            projected = self.select.as_ref().map_or(0, Vec::len),
            grouped = !group_by.is_empty(),
            "Built select statement"
        );
        Ok(DbSelectStatement {
            model: self.model,
            select: self.select,
            from,
            where_clause: self.where_clause,
            group_by,
            order_by: self.order_by,
            offset: self.offset,
            fetch: self.fetch,
            system_columns_removed: false,
        })
    }
}
