//! Column mappings and the column mapper.
//!
//! A [`ColumnMapping`] describes how one target column is populated: from a
//! source column or from an expression standing in for a missing one. The
//! [`ColumnMapper`] accumulates mappings between a source and a target model
//! and validates everything when it is built.

use std::fmt;

use crate::column::Column;
use crate::error::{Error, Result};
use crate::model::Model;

/// A (source, target) column pair. The target is always a stored member.
#[derive(Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    source: Column,
    target: Column,
}

impl ColumnMapping {
    /// Map `source` onto `target`; the data types must match and the target
    /// must be a stored model column.
    pub fn new(source: &Column, target: &Column) -> Result<Self> {
        if !target.is_stored_member() {
            return Err(Error::mapping(format!(
                "mapping target '{}' is not a stored model column",
                target.name()
            )));
        }
        if source.data_type() != target.data_type() {
            return Err(Error::mapping(format!(
                "cannot map '{}' ({}) to '{}' ({})",
                source.name(),
                source.data_type(),
                target.name(),
                target.data_type()
            )));
        }
        Ok(Self::from_parts(source.clone(), target.clone()))
    }

    pub(crate) fn from_parts(source: Column, target: Column) -> Self {
        Self { source, target }
    }

    pub fn source(&self) -> &Column {
        &self.source
    }

    pub fn target(&self) -> &Column {
        &self.target
    }

    /// The same mapping with both sides swapped.
    pub fn reversed(&self) -> Self {
        Self::from_parts(self.target.clone(), self.source.clone())
    }
}

impl fmt::Debug for ColumnMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} -> {:?}", self.source, self.target)
    }
}

/// Accumulates column mappings from a source model into a target model.
///
/// Problems found by [`ColumnMapper::select`] are kept and reported by
/// [`ColumnMapper::build`], so selections can be chained.
///
/// # Example
///
/// ```
/// use relset_core::{ColumnDef, ColumnMapper, DataType, ModelBuilder};
///
/// let source = ModelBuilder::new("Draft")
///     .column(ColumnDef::new("name", DataType::Text).declared_by("Contact"))
///     .build()
///     .unwrap();
/// let target = ModelBuilder::new("Contact")
///     .column(ColumnDef::new("id", DataType::Int).auto_increment())
///     .column(ColumnDef::new("name", DataType::Text))
///     .build()
///     .unwrap();
///
/// let mappings = ColumnMapper::new(&source, &target)
///     .auto_select_insertable()
///     .build()
///     .unwrap();
/// assert_eq!(mappings.len(), 1);
/// ```
pub struct ColumnMapper {
    source: Model,
    target: Model,
    mappings: Vec<ColumnMapping>,
    error: Option<Error>,
}

impl ColumnMapper {
    pub fn new(source: &Model, target: &Model) -> Self {
        Self {
            source: source.clone(),
            target: target.clone(),
            mappings: Vec::new(),
            error: None,
        }
    }

    pub fn source_model(&self) -> &Model {
        &self.source
    }

    pub fn target_model(&self) -> &Model {
        &self.target
    }

    /// Map `source` (a source-model column or an expression over it, or a
    /// parameter) onto `target`, a column of the target model.
    pub fn select(mut self, source: &Column, target: &Column) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.try_select(source, target) {
                self.error = Some(e);
            }
        }
        self
    }

    fn try_select(&mut self, source: &Column, target: &Column) -> Result<()> {
        if target.model_id() != Some(self.target.id()) {
            return Err(Error::mapping(format!(
                "column '{}' is not a column of target model {}",
                target.name(),
                self.target.type_name()
            )));
        }
        if let Some(foreign) = source
            .scalar_source_models()
            .into_iter()
            .find(|m| *m != self.source)
        {
            return Err(Error::mapping(format!(
                "source column '{}' reads model {}, expected {}",
                source.name(),
                foreign.type_name(),
                self.source.type_name()
            )));
        }
        let mapping = ColumnMapping::new(source, target)?;
        if self.mappings.iter().any(|m| m.target == mapping.target) {
            return Err(Error::mapping(format!(
                "target column '{}' is mapped twice",
                target.name()
            )));
        }
        self.mappings.push(mapping);
        Ok(())
    }

    /// Map every insertable target column (not system, not database
    /// generated) that has a matching source column.
    pub fn auto_select_insertable(self) -> Self {
        self.auto_select(|_, c| !c.is_system() && !c.is_auto_increment())
    }

    /// Map every updatable target column (insertable and not part of the
    /// primary key) that has a matching source column.
    pub fn auto_select_updatable(self) -> Self {
        self.auto_select(|target, c| {
            let in_pk = target
                .primary_key()
                .is_some_and(|pk| pk.columns().any(|k| k == c));
            !c.is_system() && !c.is_auto_increment() && !in_pk
        })
    }

    fn auto_select(mut self, eligible: impl Fn(&Model, &Column) -> bool) -> Self {
        let target = self.target.clone();
        for column in target.columns() {
            if !eligible(&target, column) || self.mappings.iter().any(|m| m.target == *column) {
                continue;
            }
            let Some(source) = self.source.match_column(column) else {
                tracing::trace!(column = %column.id(), "No source column for auto-mapping");
                continue;
            };
            if source.data_type() != column.data_type() {
                continue;
            }
            self.mappings
                .push(ColumnMapping::from_parts(source, column.clone()));
        }
        self
    }

    /// Validate and return the mappings. Zero mappings is an error.
    pub fn build(self) -> Result<Vec<ColumnMapping>> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.mappings.is_empty() {
            return Err(Error::mapping(format!(
                "no columns mapped from {} to {}",
                self.source.type_name(),
                self.target.type_name()
            )));
        }
        Ok(self.mappings)
    }
}

impl fmt::Debug for ColumnMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnMapper")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("mappings", &self.mappings)
            .finish_non_exhaustive()
    }
}
