//! Models: declared row schemas with columns, keys and child models.
//!
//! A [`Model`] is an immutable, reference-counted schema instance. Columns are
//! created by the model that owns them and point back to it weakly, so a
//! column is attached to exactly one model and its ordinal never changes.
//!
//! Two model instances built from the same declaration share a [`ModelType`];
//! [`Model::clone_schema`] creates a fresh instance of the same type. Column
//! expressions written against one instance are carried to another with
//! [`Column::translate_to`], which caches results on the target model so the
//! translations are dropped together with it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use crate::column::{Column, ColumnDef, ColumnInner, ColumnKind};
use crate::error::{Error, Result};
use crate::identifiers::validate_identifier;
use crate::keys::{CandidateKey, ColumnSort, PrimaryKey, SortDirection};
use crate::mapping::ColumnMapping;

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a model instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(u64);

impl ModelId {
    fn next() -> Self {
        ModelId(NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Debug)]
pub(crate) struct ModelSpec {
    type_name: Arc<str>,
    table: Arc<str>,
    columns: Vec<ColumnDef>,
    locals: Vec<ColumnDef>,
    primary_key: Option<KeySpec>,
    children: Vec<ChildSpec>,
}

#[derive(Debug)]
struct KeySpec {
    key_type: Arc<str>,
    members: Vec<(usize, SortDirection)>,
}

#[derive(Debug)]
struct ChildSpec {
    name: Arc<str>,
    spec: Arc<ModelSpec>,
    /// (child column ordinal, parent column ordinal)
    relationship: Vec<(usize, usize)>,
}

/// The declared type of a model. Instances created by
/// [`Model::clone_schema`] share their type.
#[derive(Clone)]
pub struct ModelType(Arc<ModelSpec>);

impl ModelType {
    pub fn name(&self) -> &str {
        &self.0.type_name
    }
}

impl PartialEq for ModelType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ModelType {}

impl Hash for ModelType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelType").field(&self.name()).finish()
    }
}

pub(crate) struct ModelInner {
    pub(crate) id: ModelId,
    spec: Arc<ModelSpec>,
    columns: Vec<Column>,
    locals: Vec<Column>,
    primary_key: Option<PrimaryKey>,
    children: Vec<ChildModel>,
    parent: OnceLock<ParentLink>,
    /// Expression uid to its translation here. The weak handle tells whether
    /// the source expression is still alive.
    translations: Mutex<HashMap<u64, (Weak<ColumnInner>, Column)>>,
}

struct ParentLink {
    model: Weak<ModelInner>,
    child_index: usize,
}

/// A child model attached to its parent through a relationship.
#[derive(Clone)]
pub struct ChildModel {
    name: Arc<str>,
    model: Model,
    relationship: Vec<ColumnMapping>,
}

impl ChildModel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Mappings from child columns (source) to parent columns (target).
    pub fn relationship(&self) -> &[ColumnMapping] {
        &self.relationship
    }
}

impl fmt::Debug for ChildModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildModel")
            .field("name", &self.name)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// A model instance.
#[derive(Clone)]
pub struct Model(pub(crate) Arc<ModelInner>);

/// A non-owning model handle.
#[derive(Clone)]
pub struct WeakModel {
    inner: Weak<ModelInner>,
    id: ModelId,
}

impl WeakModel {
    pub fn upgrade(&self) -> Option<Model> {
        self.inner.upgrade().map(Model)
    }

    pub fn id(&self) -> ModelId {
        self.id
    }
}

impl fmt::Debug for WeakModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakModel({})", self.id)
    }
}

impl Model {
    pub fn id(&self) -> ModelId {
        self.0.id
    }

    pub fn model_type(&self) -> ModelType {
        ModelType(Arc::clone(&self.0.spec))
    }

    pub fn type_name(&self) -> &str {
        &self.0.spec.type_name
    }

    pub fn table_name(&self) -> &str {
        &self.0.spec.table
    }

    /// Stored columns in ordinal order.
    pub fn columns(&self) -> &[Column] {
        &self.0.columns
    }

    /// Local (in-memory only) columns in ordinal order.
    pub fn local_columns(&self) -> &[Column] {
        &self.0.locals
    }

    /// Find a stored or local column by name.
    pub fn column(&self, name: &str) -> Option<Column> {
        self.0
            .columns
            .iter()
            .chain(self.0.locals.iter())
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Like [`Model::column`] but reports a missing column as an argument error.
    pub fn require_column(&self, name: &str) -> Result<Column> {
        self.column(name).ok_or_else(|| {
            Error::argument(format!(
                "model {} has no column '{}'",
                self.type_name(),
                name
            ))
        })
    }

    pub fn primary_key(&self) -> Option<&PrimaryKey> {
        self.0.primary_key.as_ref()
    }

    pub fn children(&self) -> &[ChildModel] {
        &self.0.children
    }

    pub fn child(&self, name: &str) -> Option<&ChildModel> {
        self.0.children.iter().find(|c| c.name() == name)
    }

    /// Position of a child model among this model's children.
    pub fn child_index(&self, child: &Model) -> Option<usize> {
        self.0.children.iter().position(|c| c.model == *child)
    }

    /// The parent model, if this model is attached as a child and the parent
    /// is still alive.
    pub fn parent(&self) -> Option<Model> {
        self.0.parent.get().and_then(|p| p.model.upgrade()).map(Model)
    }

    /// The relationship attaching this model to its parent.
    pub fn parent_relationship(&self) -> Option<ChildModel> {
        let link = self.0.parent.get()?;
        let parent = link.model.upgrade()?;
        parent.children.get(link.child_index).cloned()
    }

    /// Whether both instances were built from the same declaration.
    pub fn is_schema_compatible(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.0.spec, &other.0.spec)
    }

    pub fn downgrade(&self) -> WeakModel {
        WeakModel {
            inner: Arc::downgrade(&self.0),
            id: self.0.id,
        }
    }

    /// Whether `self` is `other` or one of its descendants.
    pub fn is_self_or_descendant_of(&self, other: &Model) -> bool {
        let mut current = Some(self.clone());
        while let Some(m) = current {
            if m == *other {
                return true;
            }
            current = m.parent();
        }
        false
    }

    /// Find the model of type `ty` in this model's tree: itself first, then its
    /// descendants breadth first.
    pub fn resolve_compatible(&self, ty: &ModelType) -> Option<Model> {
        let mut queue = std::collections::VecDeque::from([self.clone()]);
        while let Some(m) = queue.pop_front() {
            if m.model_type() == *ty {
                return Some(m);
            }
            queue.extend(m.children().iter().map(|c| c.model.clone()));
        }
        None
    }

    /// Create a fresh instance of this model's type, with fresh children.
    pub fn clone_schema(&self) -> Result<Model> {
        let model = assemble(&self.0.spec, None)?;
        tracing::debug!(
            model = %self.type_name(),
            source = %self.id(),
            clone = %model.id(),
            "Cloned model schema"
        );
        Ok(model)
    }

    /// Find the column of this model that corresponds to `target` by identity:
    /// an exact id match first, then a unique original-id match.
    ///
    /// Returns `None` when nothing matches or when several columns share the
    /// target's original id.
    pub fn match_column(&self, target: &Column) -> Option<Column> {
        if let Some(c) = self.0.columns.iter().find(|c| c.id() == target.id()) {
            return Some(c.clone());
        }
        let mut candidates = self
            .0
            .columns
            .iter()
            .filter(|c| c.original_id() == target.original_id());
        let first = candidates.next()?;
        if candidates.next().is_some() {
            tracing::warn!(
                model = %self.type_name(),
                column = %target.original_id(),
                "Ambiguous original id match skipped"
            );
            return None;
        }
        Some(first.clone())
    }

    pub(crate) fn cached_translation(&self, uid: u64) -> Option<Column> {
        self.0
            .translations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&uid)
            .map(|(_, column)| column.clone())
    }

    /// Cache `translated` as the translation of `source`, dropping entries
    /// whose source expression no longer exists.
    pub(crate) fn store_translation(&self, source: &Column, translated: Column) {
        let mut cache = self
            .0
            .translations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = cache.len();
        cache.retain(|_, (origin, _)| origin.strong_count() > 0);
        if cache.len() < before {
            tracing::trace!(
                model = %self.type_name(),
                pruned = before - cache.len(),
                "Pruned stale column translations"
            );
        }
        cache.insert(source.uid(), (Arc::downgrade(&source.0), translated));
    }

    #[cfg(test)]
    pub(crate) fn translation_count(&self) -> usize {
        self.0
            .translations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop every cached column translation targeting this model.
    pub fn clear_translation_cache(&self) {
        self.0
            .translations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Model {}

impl Hash for Model {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("type", &self.type_name())
            .field("table", &self.table_name())
            .field("id", &self.0.id)
            .finish()
    }
}

/// Declares a model type.
///
/// # Example
///
/// ```
/// use relset_core::{ColumnDef, DataType, ModelBuilder, SortDirection};
///
/// let line = ModelBuilder::new("OrderLine")
///     .column(ColumnDef::new("order_id", DataType::Int))
///     .column(ColumnDef::new("line_no", DataType::Int))
///     .primary_key("PK_OrderLine", &[("order_id", SortDirection::Ascending), ("line_no", SortDirection::Ascending)])
///     .build()
///     .unwrap();
///
/// let order = ModelBuilder::new("Order")
///     .table("orders")
///     .column(ColumnDef::new("id", DataType::Int).auto_increment())
///     .primary_key("PK_Order", &[("id", SortDirection::Ascending)])
///     .child("lines", &line, &[("order_id", "id")])
///     .build()
///     .unwrap();
///
/// assert_eq!(line.parent().unwrap(), order);
/// ```
#[derive(Debug)]
pub struct ModelBuilder {
    type_name: String,
    table: Option<String>,
    columns: Vec<ColumnDef>,
    primary_key: Option<(String, Vec<(String, SortDirection)>)>,
    children: Vec<(String, Model, Vec<(String, String)>)>,
}

impl ModelBuilder {
    /// Start declaring a model type. The table name defaults to the type name.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            table: None,
            columns: Vec::new(),
            primary_key: None,
            children: Vec::new(),
        }
    }

    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    /// Add a stored, system or local column.
    pub fn column(mut self, def: ColumnDef) -> Self {
        self.columns.push(def);
        self
    }

    pub fn columns(mut self, defs: impl IntoIterator<Item = ColumnDef>) -> Self {
        self.columns.extend(defs);
        self
    }

    /// Declare the primary key by column name.
    pub fn primary_key(mut self, key_type: &str, columns: &[(&str, SortDirection)]) -> Self {
        self.primary_key = Some((
            key_type.to_string(),
            columns.iter().map(|(n, d)| ((*n).to_string(), *d)).collect(),
        ));
        self
    }

    /// Attach a child model. `relationship` pairs child column names with
    /// parent column names.
    pub fn child(mut self, name: &str, model: &Model, relationship: &[(&str, &str)]) -> Self {
        self.children.push((
            name.to_string(),
            model.clone(),
            relationship
                .iter()
                .map(|(c, p)| ((*c).to_string(), (*p).to_string()))
                .collect(),
        ));
        self
    }

    pub fn build(self) -> Result<Model> {
        validate_identifier("model", &self.type_name)?;
        let table = self.table.unwrap_or_else(|| self.type_name.clone());
        validate_identifier("table", &table)?;

        let mut seen = HashSet::new();
        for def in &self.columns {
            validate_identifier("column", def.name())?;
            if !seen.insert(def.name().to_string()) {
                return Err(Error::argument(format!(
                    "duplicate column '{}' in model {}",
                    def.name(),
                    self.type_name
                )));
            }
        }
        let (locals, columns): (Vec<ColumnDef>, Vec<ColumnDef>) = self
            .columns
            .into_iter()
            .partition(|d| d.kind() == ColumnKind::Local);

        let stored_ordinal = |name: &str| -> Result<usize> {
            columns.iter().position(|d| d.name() == name).ok_or_else(|| {
                Error::argument(format!(
                    "model {} has no stored column '{}'",
                    self.type_name, name
                ))
            })
        };

        let primary_key = match &self.primary_key {
            Some((key_type, members)) => {
                if members.is_empty() {
                    return Err(Error::argument(format!(
                        "primary key of {} must not be empty",
                        self.type_name
                    )));
                }
                let members = members
                    .iter()
                    .map(|(name, dir)| stored_ordinal(name).map(|o| (o, *dir)))
                    .collect::<Result<Vec<_>>>()?;
                Some(KeySpec {
                    key_type: Arc::from(key_type.as_str()),
                    members,
                })
            }
            None => None,
        };

        let mut children = Vec::with_capacity(self.children.len());
        let mut instances = Vec::with_capacity(self.children.len());
        for (name, model, relationship) in &self.children {
            validate_identifier("child", name)?;
            if !seen.insert(name.clone()) {
                return Err(Error::argument(format!(
                    "child '{}' collides with another member of {}",
                    name, self.type_name
                )));
            }
            if model.0.parent.get().is_some() || instances.contains(model) {
                return Err(Error::argument(format!(
                    "model {} is already attached to a parent",
                    model.type_name()
                )));
            }
            if relationship.is_empty() {
                return Err(Error::argument(format!(
                    "child '{}' needs at least one relationship column",
                    name
                )));
            }
            let mut pairs = Vec::with_capacity(relationship.len());
            for (child_col, parent_col) in relationship {
                let c = model
                    .0
                    .columns
                    .iter()
                    .position(|c| c.name() == child_col)
                    .ok_or_else(|| {
                        Error::argument(format!(
                            "child model {} has no stored column '{}'",
                            model.type_name(),
                            child_col
                        ))
                    })?;
                let p = stored_ordinal(parent_col)?;
                if model.0.columns[c].data_type() != columns[p].data_type() {
                    return Err(Error::argument(format!(
                        "relationship column '{}' ({}) does not match '{}' ({})",
                        child_col,
                        model.0.columns[c].data_type(),
                        parent_col,
                        columns[p].data_type()
                    )));
                }
                pairs.push((c, p));
            }
            children.push(ChildSpec {
                name: Arc::from(name.as_str()),
                spec: Arc::clone(&model.0.spec),
                relationship: pairs,
            });
            instances.push(model.clone());
        }

        let spec = Arc::new(ModelSpec {
            type_name: Arc::from(self.type_name.as_str()),
            table: Arc::from(table.as_str()),
            columns,
            locals,
            primary_key,
            children,
        });
        assemble(&spec, Some(instances))
    }
}

/// Instantiate a model from its declaration. Children are either the given
/// instances or fresh instances of the child declarations.
fn assemble(spec: &Arc<ModelSpec>, children: Option<Vec<Model>>) -> Result<Model> {
    let children = match children {
        Some(c) => c,
        None => spec
            .children
            .iter()
            .map(|c| assemble(&c.spec, None))
            .collect::<Result<Vec<_>>>()?,
    };

    let id = ModelId::next();
    let inner = Arc::new_cyclic(|weak: &Weak<ModelInner>| {
        let columns: Vec<Column> = spec
            .columns
            .iter()
            .enumerate()
            .map(|(i, d)| Column::member(d, &spec.type_name, weak.clone(), id, i))
            .collect();
        let locals: Vec<Column> = spec
            .locals
            .iter()
            .enumerate()
            .map(|(i, d)| Column::member(d, &spec.type_name, weak.clone(), id, i))
            .collect();
        let primary_key = spec.primary_key.as_ref().map(|k| {
            PrimaryKey::from_key(CandidateKey::from_sorted(
                Arc::clone(&k.key_type),
                k.members
                    .iter()
                    .map(|(o, d)| ColumnSort::new(columns[*o].clone(), *d))
                    .collect(),
            ))
        });
        let children = spec
            .children
            .iter()
            .zip(&children)
            .map(|(cs, model)| ChildModel {
                name: Arc::clone(&cs.name),
                model: model.clone(),
                relationship: cs
                    .relationship
                    .iter()
                    .map(|(c, p)| {
                        ColumnMapping::from_parts(model.0.columns[*c].clone(), columns[*p].clone())
                    })
                    .collect(),
            })
            .collect();
        ModelInner {
            id,
            spec: Arc::clone(spec),
            columns,
            locals,
            primary_key,
            children,
            parent: OnceLock::new(),
            translations: Mutex::new(HashMap::new()),
        }
    });

    for (index, child) in children.iter().enumerate() {
        child
            .0
            .parent
            .set(ParentLink {
                model: Arc::downgrade(&inner),
                child_index: index,
            })
            .map_err(|_| {
                Error::argument(format!(
                    "model {} is already attached to a parent",
                    child.type_name()
                ))
            })?;
    }

    Ok(Model(inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn customer() -> Model {
        ModelBuilder::new("Customer")
            .column(ColumnDef::new("id", DataType::Int).auto_increment())
            .column(ColumnDef::new("name", DataType::Text))
            .column(ColumnDef::new("selected", DataType::Boolean).local())
            .primary_key("PK_Customer", &[("id", SortDirection::Ascending)])
            .build()
            .unwrap()
    }

    #[test]
    fn test_columns_are_attached_with_fixed_ordinals() {
        let m = customer();
        assert_eq!(m.columns().len(), 2);
        assert_eq!(m.local_columns().len(), 1);
        let name = m.column("name").unwrap();
        assert_eq!(name.ordinal(), Some(1));
        assert_eq!(name.model().unwrap(), m);
        assert_eq!(m.column("selected").unwrap().kind(), ColumnKind::Local);
    }

    #[test]
    fn test_clone_schema_shares_type_not_identity() {
        let m = customer();
        let c = m.clone_schema().unwrap();
        assert_ne!(m, c);
        assert!(m.is_schema_compatible(&c));
        assert_eq!(m.model_type(), c.model_type());
        assert_eq!(
            m.column("id").unwrap().id(),
            c.column("id").unwrap().id()
        );
    }

    #[test]
    fn test_translation_cache_drops_dead_expressions() {
        let m = customer();
        let copy = m.clone_schema().unwrap();
        let name = m.column("name").unwrap();

        let upper = name.concat(&Column::constant("!").unwrap()).unwrap();
        let first = upper.translate_to(&copy).unwrap();
        assert!(Arc::ptr_eq(&first.0, &upper.translate_to(&copy).unwrap().0));
        assert_eq!(copy.translation_count(), 1);
        drop(upper);

        let padded = name.concat(&Column::constant(" ").unwrap()).unwrap();
        padded.translate_to(&copy).unwrap();
        assert_eq!(copy.translation_count(), 1);
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let err = ModelBuilder::new("Dup")
            .column(ColumnDef::new("a", DataType::Int))
            .column(ColumnDef::new("a", DataType::Text))
            .build()
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_unknown_primary_key_column_rejected() {
        let err = ModelBuilder::new("Bad")
            .column(ColumnDef::new("a", DataType::Int))
            .primary_key("PK_Bad", &[("b", SortDirection::Unspecified)])
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn test_child_attaches_once() {
        let line = ModelBuilder::new("Line")
            .column(ColumnDef::new("customer_id", DataType::Int))
            .build()
            .unwrap();
        let parent = ModelBuilder::new("Customer")
            .column(ColumnDef::new("id", DataType::Int))
            .child("lines", &line, &[("customer_id", "id")])
            .build()
            .unwrap();
        assert_eq!(line.parent().unwrap(), parent);
        assert_eq!(line.parent_relationship().unwrap().name(), "lines");
        assert!(line.is_self_or_descendant_of(&parent));

        let again = ModelBuilder::new("Other")
            .column(ColumnDef::new("id", DataType::Int))
            .child("lines", &line, &[("customer_id", "id")])
            .build();
        assert!(again.is_err());
    }

    #[test]
    fn test_clone_schema_clones_children() {
        let line = ModelBuilder::new("Line")
            .column(ColumnDef::new("customer_id", DataType::Int))
            .build()
            .unwrap();
        let parent = ModelBuilder::new("Customer")
            .column(ColumnDef::new("id", DataType::Int))
            .child("lines", &line, &[("customer_id", "id")])
            .build()
            .unwrap();
        let copy = parent.clone_schema().unwrap();
        let copy_line = copy.child("lines").unwrap().model().clone();
        assert_ne!(copy_line, line);
        assert!(copy_line.is_schema_compatible(&line));
        assert_eq!(copy_line.parent().unwrap(), copy);
        assert_eq!(
            copy.resolve_compatible(&line.model_type()).unwrap(),
            copy_line
        );
    }

    #[test]
    fn test_relationship_type_mismatch_rejected() {
        let line = ModelBuilder::new("Line")
            .column(ColumnDef::new("customer_id", DataType::Text))
            .build()
            .unwrap();
        let err = ModelBuilder::new("Customer")
            .column(ColumnDef::new("id", DataType::Int))
            .child("lines", &line, &[("customer_id", "id")])
            .build();
        assert!(err.is_err());
        assert!(line.parent().is_none());
    }
}
