//! Statements that change tables from a query source.
//!
//! The columns moved are picked by [`ColumnMapper`] and rows are matched on
//! primary keys. Inserting into a child table joins the parent table unless
//! the source provably reads that parent already.
//!
//! A table that the source already reads through the same model instance is
//! rebound to a fresh instance first, so both sides get their own alias.

use relset_core::{ColumnMapper, DataSource, Error, KeyMapping, Model, Result};

use crate::builder::QueryBuilder;
use crate::query::DbQuery;
use crate::statement::{DbDeleteStatement, DbInsertStatement, DbUpdateStatement};
use crate::table::DbTable;

/// Whether rows from `source` must be joined to `parent` before being
/// inserted into one of its child tables.
///
/// The join is skipped only when every link from `source` back to its origin
/// is still valid and the origin is `parent` itself.
pub fn needs_parent_join(source: &dyn DataSource, parent: &DbTable) -> bool {
    let origin = source.provenance().ultimate_origin();
    if origin.ptr_eq(parent.provenance()) {
        tracing::debug!(
            source = %source.model().type_name(),
            parent = %parent.name(),
            "Source derives from parent table, skipping parent join"
        );
        return false;
    }
    true
}

/// Whether `source` reads `model`'s instance directly.
fn reads_model(source: &DbQuery, model: &Model) -> bool {
    source.model() == model
        || source
            .statement()
            .as_select()
            .is_some_and(|s| s.from().exposes(model))
}

/// `table`, rebound to a fresh instance of its model when `source` already
/// reads that instance.
fn distinct_from(source: &DbQuery, table: &DbTable) -> Result<DbTable> {
    if !reads_model(source, table.model()) {
        return Ok(table.clone());
    }
    let twin = table.model().clone_schema()?;
    tracing::debug!(
        table = %table.name(),
        model = %table.model().type_name(),
        "Source reads the target instance, rebinding table"
    );
    Ok(table.rebind(&twin))
}

/// Map `source`'s primary key onto `target`'s.
pub fn key_mapping(source: &Model, target: &Model) -> Result<KeyMapping> {
    let (Some(source_pk), Some(target_pk)) = (source.primary_key(), target.primary_key()) else {
        return Err(Error::argument(format!(
            "matching rows of {} and {} requires primary keys on both",
            source.type_name(),
            target.type_name()
        )));
    };
    KeyMapping::new(source_pk.as_key(), target_pk.as_key())
}

/// `INSERT INTO target SELECT ... FROM source`.
///
/// A child `target` is joined to `parent` (or its model's parent table when
/// `None`). With `shortcuts`, the join is dropped when the source provably
/// derives from that parent table.
pub fn insert_statement(
    source: &DbQuery,
    target: &DbTable,
    parent: Option<&DbTable>,
    shortcuts: bool,
) -> Result<DbInsertStatement> {
    let mappings = ColumnMapper::new(source.model(), target.model())
        .auto_select_insertable()
        .build()?;
    let parent = match (target.model().parent_relationship(), parent) {
        (None, _) => None,
        (Some(_), Some(p)) => Some(p.clone()),
        (Some(_), None) => target.parent_table(),
    };
    let parent = parent
        .filter(|p| !shortcuts || needs_parent_join(source, p))
        .map(|p| distinct_from(source, &p))
        .transpose()?;
    QueryBuilder::new(target.model())
        .from_query(source)?
        .select_mappings(&mappings)?
        .build_insert(target, parent.as_ref())
}

/// `UPDATE target` from the rows of `source` with the same primary key.
pub fn update_statement(source: &DbQuery, target: &DbTable) -> Result<DbUpdateStatement> {
    let target = &distinct_from(source, target)?;
    let mappings = ColumnMapper::new(source.model(), target.model())
        .auto_select_updatable()
        .build()?;
    let key = key_mapping(source.model(), target.model())?;
    QueryBuilder::new(target.model())
        .from_query(source)?
        .select_mappings(&mappings)?
        .build_update(target, &key)
}

/// `DELETE FROM target` the rows whose primary key appears in `source`.
pub fn delete_statement(source: &DbQuery, target: &DbTable) -> Result<DbDeleteStatement> {
    let target = &distinct_from(source, target)?;
    let key = key_mapping(source.model(), target.model())?;
    QueryBuilder::new(target.model())
        .from_query(source)?
        .build_delete(target, &key)
}
