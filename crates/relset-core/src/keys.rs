//! Candidate keys, primary keys and key mappings.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::column::Column;
use crate::error::{Error, Result};
use crate::mapping::ColumnMapping;
use crate::model::Model;

/// Sort direction of a key member or ORDER BY item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Unspecified,
    Ascending,
    Descending,
}

impl SortDirection {
    /// Apply the direction to an ascending comparison result.
    pub fn apply(self, ord: std::cmp::Ordering) -> std::cmp::Ordering {
        match self {
            SortDirection::Descending => ord.reverse(),
            SortDirection::Unspecified | SortDirection::Ascending => ord,
        }
    }
}

/// A column with a sort direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSort {
    column: Column,
    direction: SortDirection,
}

impl ColumnSort {
    pub fn new(column: Column, direction: SortDirection) -> Self {
        Self { column, direction }
    }

    pub fn asc(column: &Column) -> Self {
        Self::new(column.clone(), SortDirection::Ascending)
    }

    pub fn desc(column: &Column) -> Self {
        Self::new(column.clone(), SortDirection::Descending)
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    pub fn direction(&self) -> SortDirection {
        self.direction
    }
}

/// An ordered, non-empty set of member columns of one model that identifies
/// rows.
///
/// `key_type` names the concrete key (for instance `PK_Order`); key mappings
/// require both sides to carry the same name.
#[derive(Clone, PartialEq, Eq)]
pub struct CandidateKey {
    key_type: Arc<str>,
    members: Arc<[ColumnSort]>,
}

impl CandidateKey {
    /// Validate and create a key.
    ///
    /// Fails when the key is empty, when a member is not a stored model
    /// column, or when members belong to different models.
    pub fn new(key_type: &str, members: Vec<ColumnSort>) -> Result<Self> {
        let Some(first) = members.first() else {
            return Err(Error::argument(format!("candidate key {} is empty", key_type)));
        };
        let Some(model_id) = first.column.model_id() else {
            return Err(Error::argument(format!(
                "candidate key {} member '{}' is not a model column",
                key_type,
                first.column.name()
            )));
        };
        for m in &members {
            if !m.column.is_stored_member() {
                return Err(Error::argument(format!(
                    "candidate key {} member '{}' is not a stored model column",
                    key_type,
                    m.column.name()
                )));
            }
            if m.column.model_id() != Some(model_id) {
                return Err(Error::argument(format!(
                    "candidate key {} mixes columns of different models",
                    key_type
                )));
            }
        }
        Ok(Self::from_sorted(Arc::from(key_type), members))
    }

    /// Create a key whose members were validated by the caller.
    pub(crate) fn from_sorted(key_type: Arc<str>, members: Vec<ColumnSort>) -> Self {
        Self {
            key_type,
            members: members.into(),
        }
    }

    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    pub fn members(&self) -> &[ColumnSort] {
        &self.members
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.members.iter().map(ColumnSort::column)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The model every member belongs to.
    pub fn model(&self) -> Option<Model> {
        self.members.first().and_then(|m| m.column.model())
    }

    /// Pair this key with `target` position by position.
    ///
    /// Only the shape is checked (equal arity, equal data types). Callers are
    /// responsible for the pairing being meaningful.
    pub fn unsafe_join(&self, target: &CandidateKey) -> Result<Vec<ColumnMapping>> {
        if self.len() != target.len() {
            return Err(Error::argument(format!(
                "cannot join key {} ({} columns) with key {} ({} columns)",
                self.key_type,
                self.len(),
                target.key_type,
                target.len()
            )));
        }
        self.columns()
            .zip(target.columns())
            .map(|(s, t)| {
                if s.data_type() == t.data_type() {
                    Ok(ColumnMapping::from_parts(s.clone(), t.clone()))
                } else {
                    Err(Error::argument(format!(
                        "key column '{}' ({}) does not match '{}' ({})",
                        s.name(),
                        s.data_type(),
                        t.name(),
                        t.data_type()
                    )))
                }
            })
            .collect()
    }

    /// The same key translated to another instance of its model type.
    pub fn translate_to(&self, target: &Model) -> Result<CandidateKey> {
        let members = self
            .members
            .iter()
            .map(|m| Ok(ColumnSort::new(m.column.translate_to(target)?, m.direction)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_sorted(Arc::clone(&self.key_type), members))
    }
}

impl fmt::Debug for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateKey")
            .field("key_type", &self.key_type)
            .field("members", &self.members)
            .finish()
    }
}

/// The primary key of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey(CandidateKey);

impl PrimaryKey {
    pub fn new(key_type: &str, members: Vec<ColumnSort>) -> Result<Self> {
        CandidateKey::new(key_type, members).map(PrimaryKey)
    }

    pub(crate) fn from_key(key: CandidateKey) -> Self {
        PrimaryKey(key)
    }

    pub fn as_key(&self) -> &CandidateKey {
        &self.0
    }
}

impl Deref for PrimaryKey {
    type Target = CandidateKey;

    fn deref(&self) -> &CandidateKey {
        &self.0
    }
}

/// A pairing of two keys of the same concrete key type.
#[derive(Debug, Clone)]
pub struct KeyMapping {
    source: CandidateKey,
    target: CandidateKey,
}

impl KeyMapping {
    /// Fails unless both keys have the same key type and arity.
    pub fn new(source: &CandidateKey, target: &CandidateKey) -> Result<Self> {
        if source.key_type != target.key_type {
            return Err(Error::argument(format!(
                "key mapping requires keys of the same type, found {} and {}",
                source.key_type, target.key_type
            )));
        }
        if source.len() != target.len() {
            return Err(Error::argument(format!(
                "key mapping {} requires equal arity, found {} and {}",
                source.key_type,
                source.len(),
                target.len()
            )));
        }
        Ok(Self {
            source: source.clone(),
            target: target.clone(),
        })
    }

    pub fn source(&self) -> &CandidateKey {
        &self.source
    }

    pub fn target(&self) -> &CandidateKey {
        &self.target
    }

    /// Positional pairs `source[i] -> target[i]`.
    pub fn column_mappings(&self) -> Vec<ColumnMapping> {
        self.source
            .columns()
            .zip(self.target.columns())
            .map(|(s, t)| ColumnMapping::from_parts(s.clone(), t.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnDef;
    use crate::model::ModelBuilder;
    use crate::types::DataType;

    fn pair() -> (Model, Model) {
        let build = |name: &str| {
            ModelBuilder::new(name)
                .column(ColumnDef::new("a", DataType::Int))
                .column(ColumnDef::new("b", DataType::Text))
                .column(ColumnDef::new("c", DataType::Int))
                .primary_key("PK_Pair", &[("a", SortDirection::Ascending), ("b", SortDirection::Descending)])
                .build()
                .unwrap()
        };
        (build("Left"), build("Right"))
    }

    #[test]
    fn test_empty_key_rejected() {
        let err = CandidateKey::new("K", vec![]).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_mixed_models_rejected() {
        let (l, r) = pair();
        let err = CandidateKey::new(
            "K",
            vec![
                ColumnSort::asc(&l.column("a").unwrap()),
                ColumnSort::asc(&r.column("b").unwrap()),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn test_expression_member_rejected() {
        let (l, _) = pair();
        let a = l.column("a").unwrap();
        let e = a.add(&a).unwrap();
        assert!(CandidateKey::new("K", vec![ColumnSort::asc(&e)]).is_err());
    }

    #[test]
    fn test_key_mapping_pairs_positionally() {
        let (l, r) = pair();
        let mapping = KeyMapping::new(l.primary_key().unwrap(), r.primary_key().unwrap()).unwrap();
        let pairs = mapping.column_mappings();
        assert_eq!(pairs.len(), 2);
        for (i, p) in pairs.iter().enumerate() {
            assert_eq!(p.source(), l.primary_key().unwrap().members()[i].column());
            assert_eq!(p.target(), r.primary_key().unwrap().members()[i].column());
        }
    }

    #[test]
    fn test_key_mapping_requires_same_key_type() {
        let (l, r) = pair();
        let other = CandidateKey::new(
            "IX_Other",
            vec![
                ColumnSort::asc(&r.column("a").unwrap()),
                ColumnSort::asc(&r.column("b").unwrap()),
            ],
        )
        .unwrap();
        assert!(KeyMapping::new(l.primary_key().unwrap(), &other).is_err());
    }

    #[test]
    fn test_unsafe_join_checks_shape() {
        let (l, r) = pair();
        let swapped = CandidateKey::new(
            "K",
            vec![
                ColumnSort::asc(&r.column("b").unwrap()),
                ColumnSort::asc(&r.column("a").unwrap()),
            ],
        )
        .unwrap();
        assert!(l.primary_key().unwrap().unsafe_join(&swapped).is_err());
        let shaped = CandidateKey::new(
            "K",
            vec![
                ColumnSort::asc(&r.column("c").unwrap()),
                ColumnSort::asc(&r.column("b").unwrap()),
            ],
        )
        .unwrap();
        let joined = l.primary_key().unwrap().unsafe_join(&shaped).unwrap();
        assert_eq!(joined[0].target(), &r.column("c").unwrap());
        let short = CandidateKey::new("K", vec![ColumnSort::asc(&r.column("a").unwrap())]).unwrap();
        assert!(l.primary_key().unwrap().unsafe_join(&short).is_err());
    }
}
