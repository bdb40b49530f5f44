//! Composable query statements and SQL rendering for relset.
//!
//! `relset-query` is the **statement layer** of the workspace. It turns
//! models and column expressions from `relset-core` into immutable statement
//! trees and renders them as parameterized SQL.
//!
//! # Role In The Architecture
//!
//! - **Data sources**: `DbTable` and `DbQuery` are the database-side data
//!   sources. Composing a query (filter, order, paging, union) returns a new
//!   query linked to its origin through provenance.
//! - **Builder**: `QueryBuilder` merges simple source queries into the new
//!   statement and wraps the rest as derived tables, with system columns
//!   hidden.
//! - **Mutations**: insert, update and delete statements reuse the select
//!   machinery with one extra join each.
//! - **Sequential keys**: a temporary table of parent keys in query order
//!   drives child queries.
//! - **SQL**: `SqlGenerator` renders statements for PostgreSQL, SQLite or
//!   MySQL.
//!
//! Nothing here talks to a database; `relset-session` executes the SQL.

pub mod builder;
pub mod mutation;
pub mod query;
pub mod sequential;
pub mod sql;
pub mod statement;
pub mod table;

pub use builder::QueryBuilder;
pub use mutation::{
    delete_statement, insert_statement, key_mapping, needs_parent_join, update_statement,
};
pub use query::DbQuery;
pub use sequential::SequentialKey;
pub use sql::{Dialect, SqlGenerator};
pub use statement::{
    DbColumnMapping, DbDeleteStatement, DbFromClause, DbInsertStatement, DbJoinClause,
    DbQueryStatement, DbSelectStatement, DbSortItem, DbTableRef, DbUnionStatement,
    DbUpdateStatement,
};
pub use table::DbTable;
