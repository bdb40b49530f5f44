//! Database tables as data sources.

use std::sync::Arc;

use relset_core::{DataSource, DataSourceKind, Model, Provenance, Result};

use crate::builder::QueryBuilder;
use crate::query::DbQuery;
use crate::statement::{DbQueryStatement, DbTableRef};

/// A table bound to a model instance. Clones share one provenance, so a
/// mutation through any clone bumps the revision seen by all of them.
#[derive(Debug, Clone)]
pub struct DbTable {
    table: DbTableRef,
    temporary: bool,
    provenance: Provenance,
}

impl DbTable {
    /// The model's own table.
    pub fn new(model: &Model) -> Self {
        Self {
            table: DbTableRef::new(model, model.table_name()),
            temporary: false,
            provenance: Provenance::new(),
        }
    }

    /// A temporary table with an explicit name.
    pub fn temporary(model: &Model, name: impl Into<String>) -> Self {
        Self {
            table: DbTableRef::new(model, name),
            temporary: true,
            provenance: Provenance::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn table_ref(&self) -> &DbTableRef {
        &self.table
    }

    /// `SELECT` of every column of the table.
    pub fn query(&self) -> Result<DbQuery> {
        let stmt = QueryBuilder::new(self.table.model())
            .from_table(self)?
            .build_select()?;
        let query = DbQuery::new(Arc::new(DbQueryStatement::Select(stmt)));
        query.provenance().update_original(Some(&self.provenance));
        Ok(query)
    }

    /// The same table bound to another instance of its model. The provenance
    /// stays shared.
    pub(crate) fn rebind(&self, model: &Model) -> DbTable {
        Self {
            table: DbTableRef::new(model, self.table.name()),
            temporary: self.temporary,
            provenance: self.provenance.clone(),
        }
    }

    /// The table of this table's parent model, if the model is a child.
    pub fn parent_table(&self) -> Option<DbTable> {
        self.table.model().parent().map(|m| DbTable::new(&m))
    }
}

impl DataSource for DbTable {
    fn model(&self) -> &Model {
        self.table.model()
    }

    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn kind(&self) -> DataSourceKind {
        DataSourceKind::Table
    }
}
