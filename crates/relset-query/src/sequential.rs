//! Sequential keys.
//!
//! A sequential key is a temporary table holding the primary key of every row
//! a query returns (every stored column for a keyless model), numbered by an auto-increment system column in the
//! query's order. Child queries join it to fetch exactly the children of the
//! parent rows, in parent order, even when the parent query is paged.

use std::sync::Arc;

use relset_core::{
    Column, ColumnDef, ColumnMapping, DataSource, DataType, Error, ModelBuilder, Result,
    SortDirection,
};

use crate::builder::QueryBuilder;
use crate::query::{DbQuery, stable_order};
use crate::statement::{DbColumnMapping, DbInsertStatement, DbQueryStatement};
use crate::table::DbTable;

/// Name of the row number column of sequential key tables.
pub const ROW_ID: &str = "sys_row_id";

/// Temporary table correlating rows of a query with its child queries.
#[derive(Debug)]
pub struct SequentialKey {
    table: DbTable,
    row_id: Column,
    key_columns: Vec<(Column, Column)>,
    populate: DbInsertStatement,
}

impl SequentialKey {
    /// Derive the key table and its populating insert for `stmt`.
    pub(crate) fn derive(stmt: &Arc<DbQueryStatement>, prefix: &str) -> Result<Self> {
        let model = stmt.model();
        let identity: Vec<Column> = stable_order(model)
            .iter()
            .map(|s| s.column().clone())
            .collect();
        if identity.is_empty() {
            return Err(Error::argument(format!(
                "a sequential key requires a primary key or a stored column on {}",
                model.type_name()
            )));
        }
        let key_model = ModelBuilder::new(format!("{}SeqKey", model.type_name()))
            .table(format!("{}{}_{}", prefix, model.table_name(), model.id().get()))
            .column(
                ColumnDef::new(ROW_ID, DataType::BigInt)
                    .auto_increment()
                    .system(),
            )
            .columns(identity.iter().map(|c| {
                let def = ColumnDef::new(c.name(), c.data_type());
                if c.is_nullable() { def.nullable() } else { def }
            }))
            .primary_key("PK_SequentialKey", &[(ROW_ID, SortDirection::Ascending)])
            .build()?;
        let table = DbTable::temporary(&key_model, key_model.table_name());
        let row_id = key_model.require_column(ROW_ID)?;
        let key_columns = identity
            .iter()
            .map(|c| Ok((c.clone(), key_model.require_column(c.name())?)))
            .collect::<Result<Vec<_>>>()?;

        let populate = match stmt.as_select() {
            Some(select) => {
                let mappings = key_columns
                    .iter()
                    .map(|(source, target)| {
                        let expr = select.source_of(source).ok_or_else(|| {
                            Error::invalid_state(format!(
                                "key column '{}' is not selected",
                                source.name()
                            ))
                        })?;
                        Ok(DbColumnMapping {
                            source: expr,
                            target: target.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                DbInsertStatement {
                    target: table.table_ref().clone(),
                    select: select.with_projection(&key_model, mappings),
                }
            }
            None => key_columns
                .iter()
                .try_fold(
                    QueryBuilder::new(&key_model).from_statement(stmt)?,
                    |b, (source, target)| b.select(source, target),
                )?
                .build_insert(&table, None)?,
        };
        tracing::debug!(
            model = %model.type_name(),
            table = %table.name(),
            "Derived sequential key"
        );
        Ok(Self {
            table,
            row_id,
            key_columns,
            populate,
        })
    }

    /// The temporary table.
    pub fn table(&self) -> &DbTable {
        &self.table
    }

    /// The row number column.
    pub fn row_id(&self) -> &Column {
        &self.row_id
    }

    /// `(query key column, key table column)` pairs.
    pub fn key_columns(&self) -> &[(Column, Column)] {
        &self.key_columns
    }

    /// Insert filling the table from the query, in query order.
    pub fn populate(&self) -> &DbInsertStatement {
        &self.populate
    }

    /// Rows of child model `name` belonging to the rows of `parent`, ordered by
    /// parent position, then by the child's primary key.
    pub fn child_query(&self, parent: &DbQuery, name: &str) -> Result<DbQuery> {
        let child = parent.model().child(name).ok_or_else(|| {
            Error::argument(format!(
                "{} has no child model '{}'",
                parent.model().type_name(),
                name
            ))
        })?;
        let child_model = child.model();
        let child_table = DbTable::new(child_model);
        let mut on = Vec::with_capacity(child.relationship().len());
        for pair in child.relationship() {
            let key_column = self
                .key_columns
                .iter()
                .find(|(p, _)| p == pair.target())
                .map(|(_, k)| k)
                .ok_or_else(|| {
                    Error::argument(format!(
                        "relationship column '{}' is not part of the primary key of {}",
                        pair.target().name(),
                        parent.model().type_name()
                    ))
                })?;
            on.push(ColumnMapping::new(pair.source(), key_column)?);
        }
        let mut builder = QueryBuilder::new(child_model)
            .from_table(&child_table)?
            .inner_join(&self.table, &on)?
            .order_by(&self.row_id, SortDirection::Ascending)?;
        if let Some(pk) = child_model.primary_key() {
            for member in pk.members() {
                let direction = match member.direction() {
                    SortDirection::Unspecified => SortDirection::Ascending,
                    other => other,
                };
                builder = builder.order_by(member.column(), direction)?;
            }
        }
        let query = DbQuery::new(Arc::new(DbQueryStatement::Select(builder.build_select()?)));
        query.provenance().update_original(Some(parent.provenance()));
        Ok(query)
    }
}
