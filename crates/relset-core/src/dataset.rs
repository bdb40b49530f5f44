//! In-memory data sets.
//!
//! A [`DataSet`] holds the rows of one model. Every row carries one child
//! data set per child model, so a data set is a tree mirroring the model's
//! parent/child structure. Row ordinals are kept contiguous: inserting or
//! removing a row renumbers the rows after it.
//!
//! Each insert or remove bumps the data set's revision exactly once and then
//! notifies the registered observers, in registration order, before the call
//! returns.

use std::fmt;

use crate::column::Column;
use crate::error::{Error, Result};
use crate::expr::aggregate_rows;
use crate::json::{JsonValue, escape_into};
use crate::model::{ChildModel, Model, ModelId};
use crate::provenance::{DataSource, DataSourceKind, Provenance};
use crate::value::Value;

/// One row of a data set.
pub struct DataRow {
    model: Option<Model>,
    ordinal: Option<usize>,
    values: Vec<Value>,
    locals: Vec<Value>,
    children: Vec<DataSet>,
}

impl DataRow {
    fn new(model: &Model) -> Self {
        Self {
            model: Some(model.clone()),
            ordinal: None,
            values: vec![Value::Null; model.columns().len()],
            locals: vec![Value::Null; model.local_columns().len()],
            children: model
                .children()
                .iter()
                .map(|c| DataSet::new(c.model()))
                .collect(),
        }
    }

    /// The owning model; `None` once the row was removed from its data set.
    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    pub fn ordinal(&self) -> Option<usize> {
        self.ordinal
    }

    pub fn is_detached(&self) -> bool {
        self.model.is_none()
    }

    /// Stored values in column ordinal order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Local values in local column ordinal order.
    pub fn locals(&self) -> &[Value] {
        &self.locals
    }

    /// Evaluate a member or expression column on this row.
    pub fn get(&self, column: &Column) -> Result<Value> {
        column.eval(self)
    }

    /// Set a member column, converting the value to the column type.
    pub fn set(&mut self, column: &Column, value: impl Into<Value>) -> Result<()> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| Error::invalid_state("row is detached from its data set"))?;
        let (Some(ordinal), Some(model_id)) = (column.ordinal(), column.model_id()) else {
            return Err(Error::argument(format!(
                "expression column '{}' cannot be assigned",
                column.name()
            )));
        };
        if model_id != model.id() {
            return Err(Error::argument(format!(
                "column '{}' does not belong to model {}",
                column.name(),
                model.type_name()
            )));
        }
        let value = value
            .into()
            .cast(column.data_type())
            .map_err(|e| e.with_column(column.name()))?;
        let slot = if column.is_local() {
            self.locals.get_mut(ordinal)
        } else {
            self.values.get_mut(ordinal)
        };
        match slot {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::invalid_state(format!(
                "ordinal {} out of range",
                ordinal
            ))),
        }
    }

    pub fn children(&self) -> &[DataSet] {
        &self.children
    }

    /// Child data set by child model name.
    pub fn child(&self, name: &str) -> Option<&DataSet> {
        let index = self.child_index(name)?;
        self.children.get(index)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut DataSet> {
        let index = self.child_index(name)?;
        self.children.get_mut(index)
    }

    fn child_index(&self, name: &str) -> Option<usize> {
        self.model
            .as_ref()?
            .children()
            .iter()
            .position(|c| c.name() == name)
    }

    /// Primary key values, when the model declares a key.
    pub fn primary_key_values(&self) -> Option<Vec<Value>> {
        let pk = self.model.as_ref()?.primary_key()?;
        pk.columns()
            .map(|c| c.ordinal().and_then(|o| self.values.get(o).cloned()))
            .collect()
    }

    /// Rows of model `scope` found below this row.
    pub(crate) fn collect_descendants<'a>(&'a self, scope: ModelId, out: &mut Vec<&'a DataRow>) {
        for child in &self.children {
            if child.model.id() == scope {
                out.extend(child.rows.iter());
            } else {
                for row in &child.rows {
                    row.collect_descendants(scope, out);
                }
            }
        }
    }

    fn copy_from(&mut self, source: &DataRow) -> Result<()> {
        self.values.clone_from(&source.values);
        self.locals.clone_from(&source.locals);
        for (target, child) in self.children.iter_mut().zip(&source.children) {
            for row in &child.rows {
                target.append_copy(row)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DataRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataRow")
            .field("ordinal", &self.ordinal)
            .field("values", &self.values)
            .field("children", &self.children.len())
            .finish()
    }
}

/// Structural change of a data set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEventKind {
    Inserted,
    Removed,
}

/// Notification sent to data set observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowEvent {
    pub kind: RowEventKind,
    /// Ordinal the row was inserted at or removed from.
    pub ordinal: usize,
    /// Revision of the data set after the change.
    pub revision: u64,
}

type Observer = Box<dyn FnMut(&RowEvent) + Send + Sync>;

/// Ordered rows of one model.
pub struct DataSet {
    model: Model,
    rows: Vec<DataRow>,
    provenance: Provenance,
    observers: Vec<Observer>,
}

impl DataSet {
    pub fn new(model: &Model) -> Self {
        Self {
            model: model.clone(),
            rows: Vec::new(),
            provenance: Provenance::new(),
            observers: Vec::new(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn row(&self, ordinal: usize) -> Option<&DataRow> {
        self.rows.get(ordinal)
    }

    pub fn row_mut(&mut self, ordinal: usize) -> Option<&mut DataRow> {
        self.rows.get_mut(ordinal)
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Register an observer called after every row insert or remove.
    pub fn on_row_event(&mut self, observer: impl FnMut(&RowEvent) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Append an empty row and return its ordinal.
    pub fn add_row(&mut self) -> usize {
        let ordinal = self.rows.len();
        self.rows.push(DataRow::new(&self.model));
        self.after_insert(ordinal);
        ordinal
    }

    /// Insert an empty row at `ordinal`, shifting later rows up.
    pub fn insert_row(&mut self, ordinal: usize) -> Result<usize> {
        if ordinal > self.rows.len() {
            return Err(Error::argument(format!(
                "cannot insert at {} into a data set of {} rows",
                ordinal,
                self.rows.len()
            )));
        }
        self.rows.insert(ordinal, DataRow::new(&self.model));
        self.after_insert(ordinal);
        Ok(ordinal)
    }

    /// Remove the row at `ordinal` and return it detached.
    pub fn remove_row(&mut self, ordinal: usize) -> Result<DataRow> {
        if ordinal >= self.rows.len() {
            return Err(Error::argument(format!(
                "no row {} in a data set of {} rows",
                ordinal,
                self.rows.len()
            )));
        }
        let mut row = self.rows.remove(ordinal);
        row.model = None;
        row.ordinal = None;
        self.renumber(ordinal);
        let revision = self.provenance.bump();
        tracing::trace!(model = %self.model.type_name(), ordinal, revision, "Row removed");
        self.notify(RowEvent {
            kind: RowEventKind::Removed,
            ordinal,
            revision,
        });
        Ok(row)
    }

    fn after_insert(&mut self, ordinal: usize) {
        self.renumber(ordinal);
        let revision = self.provenance.bump();
        tracing::trace!(model = %self.model.type_name(), ordinal, revision, "Row inserted");
        self.notify(RowEvent {
            kind: RowEventKind::Inserted,
            ordinal,
            revision,
        });
    }

    fn renumber(&mut self, from: usize) {
        for (i, row) in self.rows.iter_mut().enumerate().skip(from) {
            row.ordinal = Some(i);
        }
    }

    fn notify(&mut self, event: RowEvent) {
        for observer in &mut self.observers {
            observer(&event);
        }
    }

    fn row_or_err(&self, ordinal: usize) -> Result<&DataRow> {
        self.rows
            .get(ordinal)
            .ok_or_else(|| Error::argument(format!("no row {}", ordinal)))
    }

    /// Set a member column of row `ordinal`.
    pub fn set(&mut self, ordinal: usize, column: &Column, value: impl Into<Value>) -> Result<()> {
        self.rows
            .get_mut(ordinal)
            .ok_or_else(|| Error::argument(format!("no row {}", ordinal)))?
            .set(column, value)
    }

    /// Evaluate a column on row `ordinal`.
    pub fn get(&self, ordinal: usize, column: &Column) -> Result<Value> {
        self.row_or_err(ordinal)?.get(column)
    }

    /// Evaluate an aggregate column over this data set's rows (or over the
    /// descendant rows of the aggregated model).
    pub fn aggregate(&self, column: &Column) -> Result<Value> {
        let column = column.translate_to(&self.model)?;
        let Some((func, operand, scope)) = column.expression().and_then(|n| n.as_aggregate())
        else {
            return Err(Error::argument(format!(
                "column '{}' is not an aggregate",
                column.name()
            )));
        };
        if scope.id() == self.model.id() {
            return aggregate_rows(func, operand, column.data_type(), &self.rows);
        }
        let mut rows = Vec::new();
        for row in &self.rows {
            row.collect_descendants(scope.id(), &mut rows);
        }
        if rows.is_empty() {
            let scope_model = scope
                .upgrade()
                .ok_or_else(|| Error::invalid_state("aggregate scope model was dropped"))?;
            if !scope_model.is_self_or_descendant_of(&self.model) {
                return Err(Error::argument(format!(
                    "aggregate over {} is out of scope for {}",
                    scope_model.type_name(),
                    self.model.type_name()
                )));
            }
        }
        aggregate_rows(func, operand, column.data_type(), rows)
    }

    /// Sort rows in place and renumber them.
    pub fn sort(&mut self, comparer: &crate::comparer::RowComparer) -> Result<()> {
        let mut failure = None;
        self.rows.sort_by(|a, b| match comparer.compare(a, b) {
            Ok(ord) => ord,
            Err(e) => {
                failure.get_or_insert(e);
                std::cmp::Ordering::Equal
            }
        });
        self.renumber(0);
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Append a copy of `source` (a row of a schema-compatible model),
    /// including its child rows.
    pub fn append_copy(&mut self, source: &DataRow) -> Result<usize> {
        let source_model = source
            .model()
            .ok_or_else(|| Error::invalid_state("cannot copy a detached row"))?;
        if !source_model.is_schema_compatible(&self.model) {
            return Err(Error::argument(format!(
                "cannot copy a {} row into a {} data set",
                source_model.type_name(),
                self.model.type_name()
            )));
        }
        let ordinal = self.add_row();
        self.rows[ordinal].copy_from(source)?;
        Ok(ordinal)
    }

    /// Serialize every row as a JSON array of objects.
    pub fn to_json(&self) -> Result<String> {
        let mut out = String::new();
        self.write_json(&mut out, None)?;
        Ok(out)
    }

    /// Serialize with a member filter.
    pub fn to_json_filtered(&self, filter: &JsonFilter) -> Result<String> {
        let mut out = String::new();
        self.write_json(&mut out, Some(filter))?;
        Ok(out)
    }

    fn write_json(&self, out: &mut String, filter: Option<&JsonFilter>) -> Result<()> {
        out.push('[');
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push('{');
            let mut first = true;
            let mut key = |out: &mut String, name: &str| {
                if !first {
                    out.push(',');
                }
                first = false;
                out.push('"');
                escape_into(out, name);
                out.push_str("\":");
            };
            for column in self.model.columns() {
                if filter.is_some_and(|f| !f.includes_column(&self.model, column)) {
                    continue;
                }
                key(out, column.name());
                let ordinal = column.ordinal().unwrap_or_default();
                let value = row.values.get(ordinal).unwrap_or(&Value::Null);
                column
                    .data_type()
                    .serialize(value)
                    .map_err(|e| e.with_column(column.name()))?
                    .write_to(out);
            }
            for (child, data) in self.model.children().iter().zip(&row.children) {
                if filter.is_some_and(|f| !f.includes_child(child)) {
                    continue;
                }
                key(out, child.name());
                data.write_json(out, filter)?;
            }
            out.push('}');
        }
        out.push(']');
        Ok(())
    }

    /// Read a JSON array of row objects produced by [`DataSet::to_json`].
    pub fn from_json(model: &Model, json: &str) -> Result<DataSet> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        let mut ds = DataSet::new(model);
        ds.read_json(&parsed)?;
        Ok(ds)
    }

    fn read_json(&mut self, doc: &serde_json::Value) -> Result<()> {
        let serde_json::Value::Array(items) = doc else {
            return Err(Error::format("a data set must be a JSON array"));
        };
        for item in items {
            let serde_json::Value::Object(members) = item else {
                return Err(Error::format("a data set row must be a JSON object"));
            };
            let ordinal = self.add_row();
            for (name, value) in members {
                if let Some(column) = self.model.column(name) {
                    let token = JsonValue::from_serde(value)?;
                    let parsed = column
                        .data_type()
                        .deserialize(&token)
                        .map_err(|e| e.with_column(name))?;
                    self.rows[ordinal].set(&column, parsed)?;
                } else if let Some(child) = self.rows[ordinal].child_mut(name) {
                    child.read_json(value)?;
                } else {
                    return Err(Error::format(format!(
                        "unknown member '{}' for model {}",
                        name,
                        self.model.type_name()
                    )));
                }
            }
        }
        Ok(())
    }
}

impl DataSource for DataSet {
    fn model(&self) -> &Model {
        &self.model
    }

    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn kind(&self) -> DataSourceKind {
        DataSourceKind::DataSet
    }
}

impl fmt::Debug for DataSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSet")
            .field("model", &self.model)
            .field("rows", &self.rows)
            .field("revision", &self.provenance.revision())
            .finish_non_exhaustive()
    }
}

/// Restricts which members appear in a data set JSON document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonFilter {
    /// Only members with these names, at every level.
    Explicit(Vec<String>),
    /// Columns only, no child data sets.
    NoChildDataSet,
    /// Primary key columns only.
    PrimaryKeyOnly,
    /// Members accepted by both filters.
    And(Box<JsonFilter>, Box<JsonFilter>),
}

impl JsonFilter {
    pub fn explicit<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        JsonFilter::Explicit(names.into_iter().map(Into::into).collect())
    }

    pub fn and(self, other: JsonFilter) -> Self {
        JsonFilter::And(Box::new(self), Box::new(other))
    }

    fn includes_column(&self, model: &Model, column: &Column) -> bool {
        match self {
            JsonFilter::Explicit(names) => names.iter().any(|n| n == column.name()),
            JsonFilter::NoChildDataSet => true,
            JsonFilter::PrimaryKeyOnly => model
                .primary_key()
                .is_some_and(|pk| pk.columns().any(|c| c == column)),
            JsonFilter::And(a, b) => a.includes_column(model, column) && b.includes_column(model, column),
        }
    }

    fn includes_child(&self, child: &ChildModel) -> bool {
        match self {
            JsonFilter::Explicit(names) => names.iter().any(|n| n == child.name()),
            JsonFilter::NoChildDataSet | JsonFilter::PrimaryKeyOnly => false,
            JsonFilter::And(a, b) => a.includes_child(child) && b.includes_child(child),
        }
    }
}
