//! Typed data models, composable query statements and in-memory data sets for
//! relational databases.
//!
//! This is the facade crate. It re-exports:
//!
//! - [`relset_core`]: models, columns, expressions, data sets,
//!   keys, provenance and the `Connection` contract.
//! - [`relset_query`]: statements, the query builder, sequential
//!   keys and SQL rendering.
//! - [`relset_session`]: async execution over a connection.
//!
//! Most code only needs the prelude:
//!
//! ```ignore
//! use relset::prelude::*;
//!
//! let contact = ModelBuilder::new("Contact")
//!     .column(ColumnDef::new("id", DataType::Int))
//!     .column(ColumnDef::new("age", DataType::Int).nullable())
//!     .primary_key("PK_Contact", &[("id", SortDirection::Ascending)])
//!     .build()?;
//! let age = contact.require_column("age")?;
//! let adults = DbTable::new(&contact)
//!     .query()?
//!     .filter(&age.greater_equal(&Column::param(18)?)?)?;
//! let data = Session::new(conn).to_dataset(&cx, &adults).await;
//! ```

pub use relset_core;
pub use relset_query;
pub use relset_session;

pub use relset_core::{
    CandidateKey, Column, ColumnDef, ColumnMapper, ColumnMapping, ColumnSort, Connection, Cx,
    DataRow, DataSet, DataSource, DataType, Error, JsonFilter, KeyMapping, Model, ModelBuilder,
    Outcome, PrimaryKey, Provenance, Result, Row, RowComparer, SortDirection, Value,
};
pub use relset_query::{DbQuery, DbTable, Dialect, QueryBuilder, SqlGenerator};
pub use relset_session::{Session, SessionConfig};

/// Everything needed to declare models, compose queries and run them.
pub mod prelude {
    pub use relset_core::{
        CaseBuilder, Column, ColumnDef, ColumnMapper, ColumnSort, Connection, Cx, DataRow,
        DataSet, DataSource, DataType, Error, JsonFilter, KeyMapping, Model, ModelBuilder,
        Outcome, Result, Row, RowComparer, SortDirection, Value,
    };
    pub use relset_query::{DbQuery, DbTable, Dialect};
    pub use relset_session::{Session, SessionConfig};
}
