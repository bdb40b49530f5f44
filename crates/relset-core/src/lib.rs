//! Core models, columns, expressions and data sets for relset.
//!
//! `relset-core` is the **foundation layer** of the workspace. It defines the
//! typed data model every other crate builds on.
//!
//! # Role In The Architecture
//!
//! - **Schema layer**: `Model`, `Column`, `CandidateKey` and `PrimaryKey`
//!   describe tables and their parent/child structure.
//! - **Expressions**: every derived column is an expression node that can be
//!   evaluated against an in-memory row or lowered to a `DbExpr` for SQL.
//! - **Data sets**: `DataSet` and `DataRow` hold rows in memory, aggregate
//!   over child rows and read/write JSON.
//! - **Provenance**: every data source records the source it was derived
//!   from so later statements can take shortcuts safely.
//! - **Structured concurrency**: re-exports `Cx` and `Outcome` from asupersync
//!   so every backend call is cancel-correct.
//!
//! # Who Uses This Crate
//!
//! - `relset-query` turns models and columns into statements and SQL.
//! - `relset-session` executes statements through a `Connection` and fills
//!   data sets.
//!
//! Most applications should use the `relset` facade.

pub use asupersync::{Cx, Outcome};

pub mod aggregate;
pub mod column;
pub mod columns;
pub mod comparer;
pub mod connection;
pub mod dataset;
pub mod db_expr;
pub mod error;
pub mod expr;
pub mod identifiers;
pub mod json;
pub mod keys;
pub mod mapping;
pub mod model;
pub mod provenance;
pub mod row;
pub mod types;
pub mod value;

pub use aggregate::{AggFunc, Aggregator};
pub use column::{Column, ColumnDef, ColumnId, ColumnKind};
pub use columns::Columns;
pub use comparer::RowComparer;
pub use connection::Connection;
pub use dataset::{DataRow, DataSet, JsonFilter, RowEvent, RowEventKind};
pub use db_expr::DbExpr;
pub use error::{Error, QueryError, Result, TypeError};
pub use expr::{CaseBuilder, ExprNode, FunctionKey};
pub use identifiers::{is_valid_identifier, quote_ident, quote_ident_mysql, validate_identifier};
pub use json::JsonValue;
pub use keys::{CandidateKey, ColumnSort, KeyMapping, PrimaryKey, SortDirection};
pub use mapping::{ColumnMapper, ColumnMapping};
pub use model::{ChildModel, Model, ModelBuilder, ModelId, ModelType, WeakModel};
pub use provenance::{DataSource, DataSourceKind, Provenance};
pub use row::{Row, RowReader};
pub use types::DataType;
pub use value::{Value, ValueKey};
