//! Async execution of relset statements over a database connection.
//!
//! The [`Session`] owns a [`Connection`] and turns data sources into SQL
//! round trips: it fills data sets from queries (child data sets included),
//! and runs insert, update and delete statements against tables.
//!
//! # Design Philosophy
//!
//! - **Statements stay pure**: everything that builds SQL lives in
//!   `relset-query`; the session only renders and executes.
//! - **Cancel-correct**: every operation takes a `Cx` and checks for
//!   cancellation before and after each round trip.
//! - **Revisions track writes**: every executed mutation bumps the target
//!   table's revision, which invalidates provenance links through it.
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(conn);
//! let recent = DbTable::new(&orders).query()?.take(10)?;
//! let data = session.to_dataset(&cx, &recent).await;
//! ```

mod fill;

use std::sync::Arc;

use asupersync::{Cx, Outcome};
use relset_core::{
    ChildModel, Column, ColumnMapper, Connection, DataSet, DataSource, Error, Row, RowReader,
    Value,
};
use relset_query::{
    DbQuery, DbTable, Dialect, SequentialKey, SqlGenerator, delete_statement, insert_statement,
    update_statement,
};

/// Unwrap a `Result` inside a function returning `Outcome`.
macro_rules! ready {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        }
    };
}

/// Await an `Outcome`, returning early on anything but success.
macro_rules! attempt {
    ($e:expr) => {
        match $e.await {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    };
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// SQL dialect of the connection.
    pub dialect: Dialect,
    /// Prefix of the temporary tables created for sequential keys.
    pub temp_table_prefix: String,
    /// Whether `to_dataset` also loads child data sets.
    pub fill_children: bool,
    /// Whether a child insert may skip the parent join when the source
    /// provably derives from the parent table.
    pub provenance_shortcuts: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            temp_table_prefix: "tmp_".to_string(),
            fill_children: true,
            provenance_shortcuts: true,
        }
    }
}

impl SessionConfig {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn temp_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_table_prefix = prefix.into();
        self
    }

    pub fn fill_children(mut self, enabled: bool) -> Self {
        self.fill_children = enabled;
        self
    }

    pub fn provenance_shortcuts(mut self, enabled: bool) -> Self {
        self.provenance_shortcuts = enabled;
        self
    }
}

// ============================================================================
// Session
// ============================================================================

/// One level of a data set being filled with its children.
struct FillFrame {
    query: DbQuery,
    data: DataSet,
    /// Relationship to the frame below; `None` for the root.
    child: Option<ChildModel>,
    /// Sequential key table, once created.
    key: Option<Arc<SequentialKey>>,
    next_child: usize,
}

/// Executes statements over a connection.
pub struct Session<C: Connection> {
    connection: C,
    config: SessionConfig,
}

impl<C: Connection> Session<C> {
    /// Create a session with default configuration.
    pub fn new(connection: C) -> Self {
        Self::with_config(connection, SessionConfig::default())
    }

    pub fn with_config(connection: C, config: SessionConfig) -> Self {
        Self { connection, config }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn sql(&self) -> SqlGenerator {
        SqlGenerator::new(self.config.dialect)
    }

    async fn query_rows(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<Vec<Row>, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        tracing::debug!(sql = %sql, params = params.len(), "Running query");
        let rows = attempt!(self.connection.query(cx, sql, params));
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        Outcome::Ok(rows)
    }

    async fn execute(&self, cx: &Cx, sql: &str, params: &[Value]) -> Outcome<u64, Error> {
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        tracing::debug!(sql = %sql, params = params.len(), "Executing statement");
        let count = attempt!(self.connection.execute(cx, sql, params));
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        Outcome::Ok(count)
    }

    /// Load the rows of `query` into a new data set, without children.
    async fn read_dataset(&self, cx: &Cx, query: &DbQuery) -> Outcome<DataSet, Error> {
        let (sql, params) = ready!(query.to_sql(self.config.dialect));
        let rows = attempt!(self.query_rows(cx, &sql, &params));
        let columns = query.statement().output_columns();
        let mut data = DataSet::new(query.model());
        data.provenance().update_original(Some(query.provenance()));

        let mut reader = RowReader::new(rows);
        let mut positions: Option<Vec<usize>> = None;
        while reader.advance() {
            if positions.is_none() {
                let names = ready!(reader.current()).column_names();
                let found = columns
                    .iter()
                    .map(|c| {
                        names.iter().position(|n| n == c.name()).ok_or_else(|| {
                            Error::query(format!("result has no column '{}'", c.name()), sql.as_str())
                        })
                    })
                    .collect::<Result<Vec<_>, Error>>();
                positions = Some(ready!(found));
            }
            let ordinal = data.add_row();
            for (column, &position) in columns.iter().zip(positions.iter().flatten()) {
                let value = ready!(
                    reader
                        .get_value(position, column.data_type())
                        .map_err(|e| e.with_column(column.name()))
                );
                ready!(data.set(ordinal, column, value));
            }
        }
        tracing::debug!(
            model = %query.model().type_name(),
            rows = data.len(),
            "Loaded data set"
        );
        Outcome::Ok(data)
    }

    /// Run `query` and collect its rows into a data set whose provenance
    /// links back to the query.
    ///
    /// With `fill_children`, every child data set is loaded too: the parent
    /// keys go into a temporary sequential key table, each child query joins
    /// it, and the child rows are distributed to their parents. The temporary
    /// tables are dropped afterwards.
    #[tracing::instrument(level = "debug", skip(self, cx, query))]
    pub async fn to_dataset(&self, cx: &Cx, query: &DbQuery) -> Outcome<DataSet, Error> {
        let root = attempt!(self.read_dataset(cx, query));
        if !self.config.fill_children || root.model().children().is_empty() {
            return Outcome::Ok(root);
        }
        let mut stack = vec![FillFrame {
            query: query.clone(),
            data: root,
            child: None,
            key: None,
            next_child: 0,
        }];
        let outcome = self.fill(cx, &mut stack).await;
        if !matches!(outcome, Outcome::Ok(_)) {
            self.drop_keys(cx, &stack).await;
        }
        outcome
    }

    /// Depth-first fill of every frame's children. A frame is complete once
    /// all its child models are loaded; it is then moved into its parent.
    async fn fill(&self, cx: &Cx, stack: &mut Vec<FillFrame>) -> Outcome<DataSet, Error> {
        loop {
            let Some(frame) = stack.last_mut() else {
                return Outcome::Err(Error::invalid_state("fill stack is empty"));
            };
            let model = frame.data.model().clone();
            if frame.next_child < model.children().len() && !frame.data.is_empty() {
                let child = model.children()[frame.next_child].clone();
                frame.next_child += 1;
                let key = match &frame.key {
                    Some(key) => Arc::clone(key),
                    None => {
                        let key = ready!(frame.query.sequential_key(&self.config.temp_table_prefix));
                        frame.key = Some(Arc::clone(&key));
                        attempt!(self.create_temp_table(cx, key.table()));
                        let (sql, params) = ready!(self.sql().insert(key.populate()));
                        let n = attempt!(self.execute(cx, &sql, &params));
                        key.table().provenance().bump();
                        tracing::debug!(table = %key.table().name(), rows = n, "Populated sequential key");
                        key
                    }
                };
                let child_query = ready!(key.child_query(&frame.query, child.name()));
                let data = attempt!(self.read_dataset(cx, &child_query));
                stack.push(FillFrame {
                    query: child_query,
                    data,
                    child: Some(child),
                    key: None,
                    next_child: 0,
                });
                continue;
            }

            if let Some(key) = stack.last().and_then(|f| f.key.clone()) {
                attempt!(self.drop_temp_table(cx, key.table()));
                if let Some(frame) = stack.last_mut() {
                    frame.key = None;
                }
            }
            let Some(done) = stack.pop() else {
                return Outcome::Err(Error::invalid_state("fill stack is empty"));
            };
            let Some(child) = done.child else {
                return Outcome::Ok(done.data);
            };
            let Some(parent) = stack.last_mut() else {
                return Outcome::Err(Error::invalid_state("child frame has no parent"));
            };
            ready!(fill::distribute(&mut parent.data, &child, &done.data));
        }
    }

    /// Best-effort removal of the key tables still alive after a failed or
    /// cancelled fill. The drops go straight to the connection, skipping the
    /// cancellation checks of [`Session::execute`].
    async fn drop_keys(&self, cx: &Cx, stack: &[FillFrame]) {
        for key in stack.iter().rev().filter_map(|f| f.key.as_ref()) {
            let sql = self.sql().drop_table(key.table());
            match self.connection.execute(cx, &sql, &[]).await {
                Outcome::Ok(_) => tracing::debug!(sql = %sql, "Dropped sequential key table"),
                Outcome::Err(e) => {
                    tracing::warn!(table = %key.table().name(), error = %e, "Failed to drop sequential key table");
                }
                Outcome::Cancelled(_) | Outcome::Panicked(_) => {
                    tracing::warn!(table = %key.table().name(), "Sequential key table drop interrupted");
                }
            }
        }
    }

    /// Create a temporary table from its model.
    #[tracing::instrument(level = "debug", skip(self, cx, table), fields(table = %table.name()))]
    pub async fn create_temp_table(&self, cx: &Cx, table: &DbTable) -> Outcome<(), Error> {
        if !table.is_temporary() {
            return Outcome::Err(Error::argument(format!(
                "{} is not a temporary table",
                table.name()
            )));
        }
        let sql = self.sql().create_table(table);
        attempt!(self.execute(cx, &sql, &[]));
        tracing::info!(sql = %sql, "Created temporary table");
        Outcome::Ok(())
    }

    /// Drop a temporary table if it exists.
    pub async fn drop_temp_table(&self, cx: &Cx, table: &DbTable) -> Outcome<(), Error> {
        if !table.is_temporary() {
            return Outcome::Err(Error::argument(format!(
                "{} is not a temporary table",
                table.name()
            )));
        }
        let sql = self.sql().drop_table(table);
        attempt!(self.execute(cx, &sql, &[]));
        tracing::debug!(sql = %sql, "Dropped temporary table");
        Outcome::Ok(())
    }

    /// `INSERT INTO target SELECT ... FROM source`. A child `target` only
    /// receives rows whose parent exists in `parent` (default: the parent
    /// model's table).
    #[tracing::instrument(level = "debug", skip_all, fields(table = %target.name()))]
    pub async fn insert(
        &self,
        cx: &Cx,
        source: &DbQuery,
        target: &DbTable,
        parent: Option<&DbTable>,
    ) -> Outcome<u64, Error> {
        let stmt = ready!(insert_statement(
            source,
            target,
            parent,
            self.config.provenance_shortcuts
        ));
        let (sql, params) = ready!(self.sql().insert(&stmt));
        let n = attempt!(self.execute(cx, &sql, &params));
        target.provenance().bump();
        tracing::info!(sql = %sql, rows = n, "Inserted rows");
        Outcome::Ok(n)
    }

    /// Update the rows of `target` matching `source` on primary key.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %target.name()))]
    pub async fn update(&self, cx: &Cx, source: &DbQuery, target: &DbTable) -> Outcome<u64, Error> {
        let stmt = ready!(update_statement(source, target));
        let (sql, params) = ready!(self.sql().update(&stmt));
        let n = attempt!(self.execute(cx, &sql, &params));
        target.provenance().bump();
        tracing::info!(sql = %sql, rows = n, "Updated rows");
        Outcome::Ok(n)
    }

    /// Delete the rows of `target` whose primary key appears in `source`.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %target.name()))]
    pub async fn delete(&self, cx: &Cx, source: &DbQuery, target: &DbTable) -> Outcome<u64, Error> {
        let stmt = ready!(delete_statement(source, target));
        let (sql, params) = ready!(self.sql().delete(&stmt));
        let n = attempt!(self.execute(cx, &sql, &params));
        target.provenance().bump();
        tracing::info!(sql = %sql, rows = n, "Deleted rows");
        Outcome::Ok(n)
    }

    /// Insert every row of `data`, then the rows of its child data sets into
    /// the matching child tables.
    ///
    /// Database-generated columns are left to the database and read back
    /// after each row (`RETURNING`, or `LAST_INSERT_ID()` on MySQL). Child
    /// rows take their relationship columns from the inserted parent, so
    /// generated keys flow down to every descendant.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %target.name()))]
    pub async fn insert_dataset(
        &self,
        cx: &Cx,
        data: &DataSet,
        target: &DbTable,
    ) -> Outcome<u64, Error> {
        let mut work: Vec<(&DataSet, DbTable, Vec<(Column, Value)>)> =
            vec![(data, target.clone(), Vec::new())];
        let mut total = 0;
        while let Some((set, table, inherited)) = work.pop() {
            let mappings = ready!(
                ColumnMapper::new(set.model(), table.model())
                    .auto_select_insertable()
                    .build()
            );
            let targets: Vec<Column> = mappings.iter().map(|m| m.target().clone()).collect();
            let generated: Vec<Column> = table
                .model()
                .columns()
                .iter()
                .filter(|c| c.is_auto_increment())
                .cloned()
                .collect();
            for row in set.rows() {
                let mut values = ready!(
                    mappings
                        .iter()
                        .map(|m| row.get(m.source()))
                        .collect::<Result<Vec<_>, Error>>()
                );
                for (column, value) in &inherited {
                    if let Some(i) = targets.iter().position(|t| t == column) {
                        values[i] = value.clone();
                    }
                }
                let keys = attempt!(self.insert_row(cx, &table, &targets, values, &generated));
                total += 1;

                for child in set.model().children() {
                    let (Some(rows), Some(child_target)) =
                        (row.child(child.name()), table.model().child(child.name()))
                    else {
                        continue;
                    };
                    if rows.is_empty() {
                        continue;
                    }
                    let mut links = Vec::with_capacity(child_target.relationship().len());
                    for pair in child_target.relationship() {
                        let parent_column = pair.target();
                        let known = keys
                            .iter()
                            .chain(inherited.iter())
                            .find(|(c, _)| c == parent_column)
                            .map(|(_, v)| v.clone());
                        let value = match known {
                            Some(v) => v,
                            None => match set.model().match_column(parent_column) {
                                Some(c) => ready!(row.get(&c)),
                                None => continue,
                            },
                        };
                        links.push((pair.source().clone(), value));
                    }
                    work.push((rows, DbTable::new(child_target.model()), links));
                }
            }
        }
        target.provenance().bump();
        tracing::info!(rows = total, "Inserted data set");
        Outcome::Ok(total)
    }

    /// Insert one row and return the values of its `generated` columns.
    async fn insert_row(
        &self,
        cx: &Cx,
        table: &DbTable,
        columns: &[Column],
        values: Vec<Value>,
        generated: &[Column],
    ) -> Outcome<Vec<(Column, Value)>, Error> {
        if generated.is_empty() {
            let (sql, params) = ready!(self.sql().insert_values(table.table_ref(), columns, values));
            attempt!(self.execute(cx, &sql, &params));
            return Outcome::Ok(Vec::new());
        }
        let (sql, rows) = if self.config.dialect == Dialect::Mysql {
            let (sql, params) = ready!(self.sql().insert_values(table.table_ref(), columns, values));
            attempt!(self.execute(cx, &sql, &params));
            let Some(first) = generated.first() else {
                return Outcome::Ok(Vec::new());
            };
            let id_sql = self.sql().last_insert_id(first);
            let rows = attempt!(self.query_rows(cx, &id_sql, &[]));
            (id_sql, rows)
        } else {
            let (sql, params) = ready!(self.sql().insert_values_returning(
                table.table_ref(),
                columns,
                values,
                generated
            ));
            let rows = attempt!(self.query_rows(cx, &sql, &params));
            (sql, rows)
        };
        let Some(row) = rows.first() else {
            return Outcome::Err(Error::query(
                format!("insert into {} returned no generated key", table.name()),
                sql.as_str(),
            ));
        };
        let mut keys = Vec::with_capacity(generated.len());
        for column in generated {
            // LAST_INSERT_ID only reports the first generated column
            let Some(value) = row.get_by_name(column.name()) else {
                continue;
            };
            let value = ready!(value.cast(column.data_type()));
            tracing::debug!(table = %table.name(), column = %column.name(), value = ?value, "Read back generated key");
            keys.push((column.clone(), value));
        }
        Outcome::Ok(keys)
    }

    /// Update the rows of `target` from `data`, one statement per row,
    /// matching on primary key.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %target.name()))]
    pub async fn update_dataset(
        &self,
        cx: &Cx,
        data: &DataSet,
        target: &DbTable,
    ) -> Outcome<u64, Error> {
        let mappings = ready!(
            ColumnMapper::new(data.model(), target.model())
                .auto_select_updatable()
                .build()
        );
        let key = ready!(relset_query::key_mapping(data.model(), target.model()));
        let mut total = 0;
        for row in data.rows() {
            let set = ready!(
                mappings
                    .iter()
                    .map(|m| Ok((m.target().clone(), row.get(m.source())?)))
                    .collect::<Result<Vec<_>, Error>>()
            );
            let key_values = ready!(
                key.column_mappings()
                    .iter()
                    .map(|m| Ok((m.target().clone(), row.get(m.source())?)))
                    .collect::<Result<Vec<_>, Error>>()
            );
            let (sql, params) =
                ready!(self.sql().update_values(target.table_ref(), set, key_values));
            total += attempt!(self.execute(cx, &sql, &params));
        }
        target.provenance().bump();
        tracing::info!(rows = total, "Updated rows from data set");
        Outcome::Ok(total)
    }

    /// Delete the rows of `target` whose primary key appears in `data`.
    #[tracing::instrument(level = "debug", skip_all, fields(table = %target.name()))]
    pub async fn delete_dataset(
        &self,
        cx: &Cx,
        data: &DataSet,
        target: &DbTable,
    ) -> Outcome<u64, Error> {
        let key = ready!(relset_query::key_mapping(data.model(), target.model()));
        let mut total = 0;
        for row in data.rows() {
            let key_values = ready!(
                key.column_mappings()
                    .iter()
                    .map(|m| Ok((m.target().clone(), row.get(m.source())?)))
                    .collect::<Result<Vec<_>, Error>>()
            );
            let (sql, params) = ready!(self.sql().delete_values(target.table_ref(), key_values));
            total += attempt!(self.execute(cx, &sql, &params));
        }
        target.provenance().bump();
        tracing::info!(rows = total, "Deleted rows from data set");
        Outcome::Ok(total)
    }
}
