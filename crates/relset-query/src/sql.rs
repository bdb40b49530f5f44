//! SQL text generation.
//!
//! [`SqlGenerator`] walks statement trees and backend expressions and
//! produces `(sql, params)` pairs. Function keys select the SQL operator or
//! function. Every FROM source gets an alias `tN`; column references resolve
//! to the alias of the source exposing their model, searching enclosing
//! statements outward.

use relset_core::{
    Column, DataType, DbExpr, Error, FunctionKey, ModelId, Result, SortDirection, Value,
    quote_ident, quote_ident_mysql,
};

use crate::statement::{
    DbDeleteStatement, DbFromClause, DbInsertStatement, DbQueryStatement, DbSelectStatement,
    DbTableRef, DbUpdateStatement,
};
use crate::table::DbTable;

/// SQL dialect: placeholder style, identifier quoting, paging and DDL types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// `$1` placeholders, double-quoted identifiers.
    #[default]
    Postgres,
    /// `?1` placeholders, double-quoted identifiers.
    Sqlite,
    /// `?` placeholders, backtick-quoted identifiers.
    Mysql,
}

impl Dialect {
    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::Sqlite => format!("?{}", index),
            Dialect::Mysql => "?".to_string(),
        }
    }

    pub fn quote(self, ident: &str) -> String {
        match self {
            Dialect::Mysql => quote_ident_mysql(ident),
            Dialect::Postgres | Dialect::Sqlite => quote_ident(ident),
        }
    }

    /// Column type used in CREATE TABLE.
    pub fn column_type(self, ty: DataType) -> &'static str {
        match (self, ty) {
            (Dialect::Postgres, DataType::TinyInt) => "SMALLINT",
            (Dialect::Postgres, DataType::Bytes) => "BYTEA",
            (Dialect::Sqlite, DataType::Boolean) => "INTEGER",
            (Dialect::Sqlite, DataType::TimestampTz) => "TIMESTAMP",
            (Dialect::Sqlite, DataType::Uuid) => "TEXT",
            (Dialect::Mysql, DataType::Int) => "INT",
            (Dialect::Mysql, DataType::Float) => "FLOAT",
            (Dialect::Mysql, DataType::Double) => "DOUBLE",
            (Dialect::Mysql, DataType::Timestamp) => "DATETIME",
            (Dialect::Mysql, DataType::TimestampTz) => "TIMESTAMP",
            (Dialect::Mysql, DataType::Uuid) => "CHAR(36)",
            _ => ty.sql_name(),
        }
    }

    fn cast_type(self, ty: DataType) -> &'static str {
        if self != Dialect::Mysql {
            return self.column_type(ty);
        }
        match ty {
            DataType::Boolean
            | DataType::TinyInt
            | DataType::SmallInt
            | DataType::Int
            | DataType::BigInt => "SIGNED",
            DataType::Text | DataType::Uuid => "CHAR",
            DataType::Bytes => "BINARY",
            other => self.column_type(other),
        }
    }
}

struct Binding {
    model: ModelId,
    alias: String,
    system_removed: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Every column of the statement model, named after it.
    Model,
    /// Only the mapping sources, in mapping order.
    Mapped,
}

/// Renders statements to SQL text and parameters.
pub struct SqlGenerator {
    dialect: Dialect,
    params: Vec<Value>,
    frames: Vec<Vec<Binding>>,
    next_alias: usize,
}

impl SqlGenerator {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
            frames: Vec::new(),
            next_alias: 0,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn finish(self, sql: String) -> (String, Vec<Value>) {
        tracing::trace!(sql = %sql, params = self.params.len(), "Generated SQL");
        (sql, self.params)
    }

    /// A query statement.
    pub fn query(mut self, stmt: &DbQueryStatement) -> Result<(String, Vec<Value>)> {
        let sql = self.write_query(stmt)?;
        Ok(self.finish(sql))
    }

    /// A select statement.
    pub fn select(mut self, stmt: &DbSelectStatement) -> Result<(String, Vec<Value>)> {
        let sql = self.write_select(stmt, Shape::Model)?;
        Ok(self.finish(sql))
    }

    /// `INSERT INTO ... SELECT ...`
    pub fn insert(mut self, stmt: &DbInsertStatement) -> Result<(String, Vec<Value>)> {
        let columns = Self::mapped_targets(&stmt.select)?
            .iter()
            .map(|c| self.dialect.quote(c.name()))
            .collect::<Vec<_>>()
            .join(", ");
        let select = self.write_select(&stmt.select, Shape::Mapped)?;
        let sql = format!(
            "INSERT INTO {} ({}) {}",
            self.dialect.quote(stmt.target.name()),
            columns,
            select
        );
        Ok(self.finish(sql))
    }

    /// `UPDATE ... SET ... FROM ...` (`UPDATE ... INNER JOIN ... SET ...` for
    /// MySQL).
    pub fn update(mut self, stmt: &DbUpdateStatement) -> Result<(String, Vec<Value>)> {
        self.frames.push(Vec::new());
        let result = self.write_update(stmt);
        self.frames.pop();
        Ok(self.finish(result?))
    }

    /// `DELETE FROM target WHERE EXISTS (SELECT 1 FROM source WHERE ...)`
    pub fn delete(mut self, stmt: &DbDeleteStatement) -> Result<(String, Vec<Value>)> {
        self.frames.push(Vec::new());
        let result = self.write_delete(stmt);
        self.frames.pop();
        Ok(self.finish(result?))
    }

    fn write_update(&mut self, stmt: &DbUpdateStatement) -> Result<String> {
        let select = &stmt.select;
        let (source, target_from, on) = Self::split_target_join(select)?;
        let mappings = select
            .select
            .as_deref()
            .ok_or_else(|| Error::invalid_state("update statement has no SET list"))?;
        self.register(target_from);
        self.register(source);
        let target_alias = self.from_alias(stmt.target.model().id())?;
        let table = format!(
            "{} AS {}",
            self.dialect.quote(stmt.target.name()),
            target_alias
        );

        if self.dialect == Dialect::Mysql {
            let from = self.write_from(source)?;
            let on = self.write_expr(on)?;
            let mut sets = Vec::with_capacity(mappings.len());
            for m in mappings {
                let value = self.write_expr(&m.source)?;
                sets.push(format!(
                    "{}.{} = {}",
                    target_alias,
                    self.dialect.quote(m.target.name()),
                    value
                ));
            }
            let mut sql = format!(
                "UPDATE {} INNER JOIN {} ON {} SET {}",
                table,
                from,
                on,
                sets.join(", ")
            );
            if let Some(w) = &select.where_clause {
                sql.push_str(" WHERE ");
                sql.push_str(&self.write_expr(w)?);
            }
            return Ok(sql);
        }

        let mut sets = Vec::with_capacity(mappings.len());
        for m in mappings {
            let value = self.write_expr(&m.source)?;
            sets.push(format!("{} = {}", self.dialect.quote(m.target.name()), value));
        }
        let from = self.write_from(source)?;
        let mut sql = format!(
            "UPDATE {} SET {} FROM {} WHERE {}",
            table,
            sets.join(", "),
            from,
            self.write_expr(on)?
        );
        if let Some(w) = &select.where_clause {
            sql.push_str(" AND ");
            sql.push_str(&self.write_expr(w)?);
        }
        Ok(sql)
    }

    fn write_delete(&mut self, stmt: &DbDeleteStatement) -> Result<String> {
        let select = &stmt.select;
        let (source, target_from, on) = Self::split_target_join(select)?;
        self.register(target_from);
        self.register(source);
        let target_alias = self.from_alias(stmt.target.model().id())?;
        let table = format!(
            "{} AS {}",
            self.dialect.quote(stmt.target.name()),
            target_alias
        );
        let head = if self.dialect == Dialect::Mysql {
            format!("DELETE {} FROM {}", target_alias, table)
        } else {
            format!("DELETE FROM {}", table)
        };
        let from = self.write_from(source)?;
        let mut condition = self.write_expr(on)?;
        if let Some(w) = &select.where_clause {
            condition.push_str(" AND ");
            condition.push_str(&self.write_expr(w)?);
        }
        Ok(format!(
            "{} WHERE EXISTS (SELECT 1 FROM {} WHERE {})",
            head, from, condition
        ))
    }

    /// Single-row `INSERT ... VALUES`.
    pub fn insert_values(
        mut self,
        table: &DbTableRef,
        columns: &[Column],
        values: Vec<Value>,
    ) -> Result<(String, Vec<Value>)> {
        let sql = self.write_insert_values(table, columns, values)?;
        Ok(self.finish(sql))
    }

    /// Single-row `INSERT ... VALUES ... RETURNING`, reading back `returning`
    /// (typically database-generated columns). MySQL has no RETURNING; use
    /// [`SqlGenerator::last_insert_id`] after a plain insert there.
    pub fn insert_values_returning(
        mut self,
        table: &DbTableRef,
        columns: &[Column],
        values: Vec<Value>,
        returning: &[Column],
    ) -> Result<(String, Vec<Value>)> {
        if self.dialect == Dialect::Mysql {
            return Err(Error::argument("MySQL does not support INSERT ... RETURNING"));
        }
        if returning.is_empty() {
            return Err(Error::argument(format!(
                "insert into {} returns no columns",
                table.name()
            )));
        }
        let mut sql = self.write_insert_values(table, columns, values)?;
        let names: Vec<String> = returning
            .iter()
            .map(|c| self.dialect.quote(c.name()))
            .collect();
        sql.push_str(" RETURNING ");
        sql.push_str(&names.join(", "));
        Ok(self.finish(sql))
    }

    /// Query for the value the last insert on this connection generated,
    /// labelled as `column`.
    pub fn last_insert_id(self, column: &Column) -> String {
        let function = match self.dialect {
            Dialect::Postgres => "lastval()",
            Dialect::Sqlite => "last_insert_rowid()",
            Dialect::Mysql => "LAST_INSERT_ID()",
        };
        format!("SELECT {} AS {}", function, self.dialect.quote(column.name()))
    }

    fn write_insert_values(
        &mut self,
        table: &DbTableRef,
        columns: &[Column],
        values: Vec<Value>,
    ) -> Result<String> {
        if columns.len() != values.len() {
            return Err(Error::argument(format!(
                "{} columns given for {} values",
                columns.len(),
                values.len()
            )));
        }
        let table_name = self.dialect.quote(table.name());
        if columns.is_empty() {
            return Ok(match self.dialect {
                Dialect::Mysql => format!("INSERT INTO {} () VALUES ()", table_name),
                Dialect::Postgres | Dialect::Sqlite => {
                    format!("INSERT INTO {} DEFAULT VALUES", table_name)
                }
            });
        }
        let names = columns
            .iter()
            .map(|c| self.dialect.quote(c.name()))
            .collect::<Vec<_>>()
            .join(", ");
        let mut placeholders = Vec::with_capacity(values.len());
        for v in values {
            self.params.push(v);
            placeholders.push(self.dialect.placeholder(self.params.len()));
        }
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table_name,
            names,
            placeholders.join(", ")
        ))
    }

    /// Single-row `UPDATE ... SET ... WHERE key`.
    pub fn update_values(
        mut self,
        table: &DbTableRef,
        set: Vec<(Column, Value)>,
        key: Vec<(Column, Value)>,
    ) -> Result<(String, Vec<Value>)> {
        if set.is_empty() || key.is_empty() {
            return Err(Error::argument(format!(
                "update of {} needs at least one column and one key column",
                table.name()
            )));
        }
        let mut assignments = Vec::with_capacity(set.len());
        for (c, v) in set {
            let p = self.write_param(&v);
            assignments.push(format!("{} = {}", self.dialect.quote(c.name()), p));
        }
        let condition = self.key_condition(key);
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.dialect.quote(table.name()),
            assignments.join(", "),
            condition
        );
        Ok(self.finish(sql))
    }

    /// Single-row `DELETE ... WHERE key`.
    pub fn delete_values(
        mut self,
        table: &DbTableRef,
        key: Vec<(Column, Value)>,
    ) -> Result<(String, Vec<Value>)> {
        if key.is_empty() {
            return Err(Error::argument(format!(
                "delete from {} needs at least one key column",
                table.name()
            )));
        }
        let condition = self.key_condition(key);
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.dialect.quote(table.name()),
            condition
        );
        Ok(self.finish(sql))
    }

    fn key_condition(&mut self, key: Vec<(Column, Value)>) -> String {
        let mut parts = Vec::with_capacity(key.len());
        for (c, v) in key {
            let p = self.write_param(&v);
            parts.push(format!("{} = {}", self.dialect.quote(c.name()), p));
        }
        parts.join(" AND ")
    }

    /// `CREATE [TEMPORARY] TABLE` for the table's model.
    pub fn create_table(self, table: &DbTable) -> String {
        let d = self.dialect;
        let model = table.table_ref().model();
        let pk: Vec<Column> = model
            .primary_key()
            .map(|k| k.columns().cloned().collect())
            .unwrap_or_default();
        let inline_pk = d == Dialect::Sqlite
            && pk.len() == 1
            && pk.iter().all(Column::is_auto_increment);

        let mut defs = Vec::with_capacity(model.columns().len() + 1);
        for c in model.columns() {
            let name = d.quote(c.name());
            let def = if c.is_auto_increment() {
                match d {
                    Dialect::Postgres => format!(
                        "{} {} GENERATED BY DEFAULT AS IDENTITY",
                        name,
                        d.column_type(c.data_type())
                    ),
                    Dialect::Sqlite if inline_pk => {
                        format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name)
                    }
                    Dialect::Sqlite => format!("{} {}", name, d.column_type(c.data_type())),
                    Dialect::Mysql => format!(
                        "{} {} NOT NULL AUTO_INCREMENT",
                        name,
                        d.column_type(c.data_type())
                    ),
                }
            } else if c.is_nullable() {
                format!("{} {}", name, d.column_type(c.data_type()))
            } else {
                format!("{} {} NOT NULL", name, d.column_type(c.data_type()))
            };
            defs.push(def);
        }
        if !pk.is_empty() && !inline_pk {
            let names: Vec<String> = pk.iter().map(|c| d.quote(c.name())).collect();
            defs.push(format!("PRIMARY KEY ({})", names.join(", ")));
        }
        let head = if table.is_temporary() {
            "CREATE TEMPORARY TABLE"
        } else {
            "CREATE TABLE"
        };
        format!("{} {} ({})", head, d.quote(table.name()), defs.join(", "))
    }

    pub fn drop_table(self, table: &DbTable) -> String {
        format!("DROP TABLE IF EXISTS {}", self.dialect.quote(table.name()))
    }

    fn mapped_targets(select: &DbSelectStatement) -> Result<Vec<Column>> {
        match select.select.as_deref() {
            Some(list) if !list.is_empty() => Ok(list.iter().map(|m| m.target.clone()).collect()),
            _ => Err(Error::invalid_state("insert statement has no column list")),
        }
    }

    /// The source, target table and join predicate of a mutation's FROM.
    fn split_target_join(
        select: &DbSelectStatement,
    ) -> Result<(&DbFromClause, &DbFromClause, &DbExpr)> {
        match &select.from {
            DbFromClause::Join(j) if matches!(j.right, DbFromClause::Table(_)) => {
                Ok((&j.left, &j.right, &j.on))
            }
            _ => Err(Error::invalid_state(
                "mutation statement is not joined to its target table",
            )),
        }
    }

    fn next_alias(&mut self) -> String {
        let alias = format!("t{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    /// Assign aliases to every source of `from` in the current frame.
    fn register(&mut self, from: &DbFromClause) {
        let binding = match from {
            DbFromClause::Join(j) => {
                self.register(&j.left);
                self.register(&j.right);
                return;
            }
            DbFromClause::Table(t) => Binding {
                model: t.model().id(),
                alias: self.next_alias(),
                system_removed: false,
            },
            DbFromClause::Derived(s) => Binding {
                model: s.model().id(),
                alias: self.next_alias(),
                system_removed: s.system_columns_removed(),
            },
        };
        if let Some(frame) = self.frames.last_mut() {
            frame.push(binding);
        }
    }

    fn from_alias(&self, model: ModelId) -> Result<String> {
        self.frames
            .last()
            .and_then(|f| f.iter().find(|b| b.model == model))
            .map(|b| b.alias.clone())
            .ok_or_else(|| Error::invalid_state(format!("no FROM alias for model {}", model)))
    }

    fn write_query(&mut self, stmt: &DbQueryStatement) -> Result<String> {
        match stmt {
            DbQueryStatement::Select(s) => self.write_select(s, Shape::Model),
            DbQueryStatement::Union(u) => {
                let left = self.write_query(&u.left)?;
                let left_alias = self.next_alias();
                let right = self.write_query(&u.right)?;
                let right_alias = self.next_alias();
                Ok(format!(
                    "SELECT * FROM ({}) AS {} UNION{} SELECT * FROM ({}) AS {}",
                    left,
                    left_alias,
                    if u.all { " ALL" } else { "" },
                    right,
                    right_alias
                ))
            }
        }
    }

    fn write_select(&mut self, s: &DbSelectStatement, shape: Shape) -> Result<String> {
        self.frames.push(Vec::new());
        self.register(&s.from);
        let result = self.write_select_body(s, shape);
        self.frames.pop();
        result
    }

    fn write_select_body(&mut self, s: &DbSelectStatement, shape: Shape) -> Result<String> {
        let mut items = Vec::new();
        match shape {
            Shape::Model => {
                for c in s.model.columns() {
                    if s.system_columns_removed && c.is_system() {
                        continue;
                    }
                    let expr = match &s.select {
                        None => self.write_column(c)?,
                        Some(list) => match list.iter().find(|m| m.target == *c) {
                            Some(m) => self.write_expr(&m.source)?,
                            None => "NULL".to_string(),
                        },
                    };
                    items.push(format!("{} AS {}", expr, self.dialect.quote(c.name())));
                }
            }
            Shape::Mapped => {
                for m in s.select.iter().flatten() {
                    items.push(self.write_expr(&m.source)?);
                }
            }
        }
        if items.is_empty() {
            return Err(Error::invalid_state(format!(
                "select of {} has no columns",
                s.model.type_name()
            )));
        }

        let mut sql = format!("SELECT {} FROM {}", items.join(", "), self.write_from(&s.from)?);
        if let Some(w) = &s.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&self.write_expr(w)?);
        }
        if !s.group_by.is_empty() {
            let mut groups = Vec::with_capacity(s.group_by.len());
            for g in &s.group_by {
                groups.push(self.write_expr(g)?);
            }
            sql.push_str(" GROUP BY ");
            sql.push_str(&groups.join(", "));
        }
        if !s.order_by.is_empty() {
            let mut orders = Vec::with_capacity(s.order_by.len());
            for o in &s.order_by {
                let e = self.write_expr(&o.expr)?;
                orders.push(match o.direction {
                    SortDirection::Descending => format!("{} DESC", e),
                    SortDirection::Ascending => format!("{} ASC", e),
                    SortDirection::Unspecified => e,
                });
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }
        sql.push_str(&self.paging(s.offset, s.fetch));
        Ok(sql)
    }

    fn paging(&self, offset: Option<u64>, fetch: Option<u64>) -> String {
        match (offset, fetch) {
            (None, None) => String::new(),
            (None, Some(n)) => format!(" LIMIT {}", n),
            (Some(m), Some(n)) => format!(" LIMIT {} OFFSET {}", n, m),
            (Some(m), None) => match self.dialect {
                Dialect::Postgres => format!(" OFFSET {}", m),
                Dialect::Sqlite => format!(" LIMIT -1 OFFSET {}", m),
                Dialect::Mysql => format!(" LIMIT {} OFFSET {}", u64::MAX, m),
            },
        }
    }

    fn write_from(&mut self, from: &DbFromClause) -> Result<String> {
        match from {
            DbFromClause::Table(t) => Ok(format!(
                "{} AS {}",
                self.dialect.quote(t.name()),
                self.from_alias(t.model().id())?
            )),
            DbFromClause::Derived(s) => {
                let alias = self.from_alias(s.model().id())?;
                Ok(format!("({}) AS {}", self.write_query(s)?, alias))
            }
            DbFromClause::Join(j) => {
                let left = self.write_from(&j.left)?;
                let right = self.write_from(&j.right)?;
                let on = self.write_expr(&j.on)?;
                Ok(format!("{} INNER JOIN {} ON {}", left, right, on))
            }
        }
    }

    fn write_column(&self, column: &Column) -> Result<String> {
        let binding = column.model_id().and_then(|id| {
            self.frames
                .iter()
                .rev()
                .find_map(|f| f.iter().find(|b| b.model == id))
        });
        match binding {
            Some(b) if b.system_removed && column.is_system() => Ok("NULL".to_string()),
            Some(b) => Ok(format!("{}.{}", b.alias, self.dialect.quote(column.name()))),
            None => Err(Error::scope(format!(
                "column '{}' is not exposed by any FROM source",
                column.name()
            ))),
        }
    }

    fn write_param(&mut self, value: &Value) -> String {
        self.params.push(value.clone());
        self.dialect.placeholder(self.params.len())
    }

    fn write_literal(&mut self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::TinyInt(_)
            | Value::SmallInt(_)
            | Value::Int(_)
            | Value::BigInt(_)
            | Value::Float(_)
            | Value::Double(_) => value.to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            other => self.write_param(other),
        }
    }

    fn write_expr(&mut self, expr: &DbExpr) -> Result<String> {
        match expr {
            DbExpr::Column(c) => self.write_column(c),
            DbExpr::Param { value, .. } => Ok(self.write_param(value)),
            DbExpr::Const { value, .. } => Ok(self.write_literal(value)),
            DbExpr::Case {
                whens, otherwise, ..
            } => {
                let mut sql = String::from("CASE");
                for (condition, value) in whens {
                    sql.push_str(" WHEN ");
                    sql.push_str(&self.write_expr(condition)?);
                    sql.push_str(" THEN ");
                    sql.push_str(&self.write_expr(value)?);
                }
                sql.push_str(" ELSE ");
                sql.push_str(&self.write_expr(otherwise)?);
                sql.push_str(" END");
                Ok(sql)
            }
            DbExpr::Cast { operand, data_type } => Ok(format!(
                "CAST({} AS {})",
                self.write_expr(operand)?,
                self.dialect.cast_type(*data_type)
            )),
            DbExpr::Call { key, args, .. } => self.write_call(*key, args),
        }
    }

    fn write_call(&mut self, key: FunctionKey, args: &[DbExpr]) -> Result<String> {
        let mut rendered = Vec::with_capacity(args.len());
        for a in args {
            rendered.push(self.write_expr(a)?);
        }
        let arg = |i: usize| -> Result<&str> {
            rendered.get(i).map(String::as_str).ok_or_else(|| {
                Error::invalid_state(format!("{} is missing operand {}", key, i))
            })
        };
        let binary = |op: &str| -> Result<String> { Ok(format!("({} {} {})", arg(0)?, op, arg(1)?)) };
        match key {
            FunctionKey::ADD => binary("+"),
            FunctionKey::SUB => binary("-"),
            FunctionKey::MUL => binary("*"),
            FunctionKey::DIV => binary("/"),
            FunctionKey::MOD => binary("%"),
            FunctionKey::EQ => binary("="),
            FunctionKey::NE => binary("<>"),
            FunctionKey::LT => binary("<"),
            FunctionKey::LE => binary("<="),
            FunctionKey::GT => binary(">"),
            FunctionKey::GE => binary(">="),
            FunctionKey::AND => binary("AND"),
            FunctionKey::OR => binary("OR"),
            FunctionKey::NEGATE => Ok(format!("(-{})", arg(0)?)),
            FunctionKey::NOT => Ok(format!("(NOT {})", arg(0)?)),
            FunctionKey::IS_NULL => Ok(format!("({} IS NULL)", arg(0)?)),
            FunctionKey::IS_NOT_NULL => Ok(format!("({} IS NOT NULL)", arg(0)?)),
            FunctionKey::IF_NULL => Ok(format!("COALESCE({}, {})", arg(0)?, arg(1)?)),
            FunctionKey::CONCAT if self.dialect == Dialect::Mysql => {
                Ok(format!("CONCAT({}, {})", arg(0)?, arg(1)?))
            }
            FunctionKey::CONCAT => binary("||"),
            FunctionKey::COUNT_ROWS => Ok("COUNT(*)".to_string()),
            FunctionKey::COUNT => Ok(format!("COUNT({})", arg(0)?)),
            FunctionKey::SUM => Ok(format!("SUM({})", arg(0)?)),
            FunctionKey::AVG => Ok(format!("AVG({})", arg(0)?)),
            FunctionKey::MIN => Ok(format!("MIN({})", arg(0)?)),
            FunctionKey::MAX => Ok(format!("MAX({})", arg(0)?)),
            other => Err(Error::argument(format!("{} has no SQL translation", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
        assert_eq!(Dialect::Sqlite.placeholder(2), "?2");
        assert_eq!(Dialect::Mysql.placeholder(2), "?");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(Dialect::Postgres.quote("order"), "\"order\"");
        assert_eq!(Dialect::Mysql.quote("order"), "`order`");
    }

    #[test]
    fn test_offset_without_limit() {
        let g = SqlGenerator::new(Dialect::Sqlite);
        assert_eq!(g.paging(Some(5), None), " LIMIT -1 OFFSET 5");
        let g = SqlGenerator::new(Dialect::Postgres);
        assert_eq!(g.paging(Some(5), None), " OFFSET 5");
        assert_eq!(g.paging(Some(5), Some(10)), " LIMIT 10 OFFSET 5");
    }

    #[test]
    fn test_insert_reading_back_generated_key() {
        use relset_core::{ColumnDef, ModelBuilder};

        let m = ModelBuilder::new("Ticket")
            .table("tickets")
            .column(ColumnDef::new("id", DataType::BigInt).auto_increment())
            .column(ColumnDef::new("title", DataType::Text))
            .build()
            .unwrap();
        let table = DbTableRef::new(&m, "tickets");
        let id = m.column("id").unwrap();
        let title = m.column("title").unwrap();

        let (sql, params) = SqlGenerator::new(Dialect::Sqlite)
            .insert_values_returning(&table, &[title], vec![Value::from("a")], &[id.clone()])
            .unwrap();
        assert_eq!(sql, "INSERT INTO \"tickets\" (\"title\") VALUES (?1) RETURNING \"id\"");
        assert_eq!(params, vec![Value::from("a")]);

        let (sql, _) = SqlGenerator::new(Dialect::Postgres)
            .insert_values_returning(&table, &[], Vec::new(), &[id.clone()])
            .unwrap();
        assert_eq!(sql, "INSERT INTO \"tickets\" DEFAULT VALUES RETURNING \"id\"");

        assert!(
            SqlGenerator::new(Dialect::Mysql)
                .insert_values_returning(&table, &[], Vec::new(), &[id.clone()])
                .is_err()
        );
        assert_eq!(
            SqlGenerator::new(Dialect::Mysql).last_insert_id(&id),
            "SELECT LAST_INSERT_ID() AS `id`"
        );
    }

    #[test]
    fn test_literals() {
        let mut g = SqlGenerator::new(Dialect::Postgres);
        assert_eq!(g.write_literal(&Value::Text("it's".into())), "'it''s'");
        assert_eq!(g.write_literal(&Value::Int(3)), "3");
        assert_eq!(g.write_literal(&Value::Null), "NULL");
        assert_eq!(g.write_literal(&Value::Bytes(vec![1])), "$1");
        assert_eq!(g.params, vec![Value::Bytes(vec![1])]);
    }
}
