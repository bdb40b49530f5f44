//! Column sets.
//!
//! A [`Columns`] value is a small ordered set of distinct columns. A single
//! column converts into a one-element set without allocating. Once sealed, a
//! set is never changed in place: `add`, `remove` and `clear` hand back a new,
//! unsealed set and leave every clone of the sealed one untouched.

use std::fmt;
use std::sync::Arc;

use crate::column::Column;

#[derive(Clone, Default)]
enum Repr {
    #[default]
    Empty,
    Single(Column),
    Many(Arc<Vec<Column>>),
}

/// An ordered set of distinct columns with copy-on-write after sealing.
#[derive(Clone, Default)]
pub struct Columns {
    repr: Repr,
    sealed: bool,
}

impl Columns {
    /// An empty, unsealed set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Empty => 0,
            Repr::Single(_) => 1,
            Repr::Many(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, column: &Column) -> bool {
        self.as_slice().contains(column)
    }

    pub fn as_slice(&self) -> &[Column] {
        match &self.repr {
            Repr::Empty => &[],
            Repr::Single(c) => std::slice::from_ref(c),
            Repr::Many(v) => v.as_slice(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Column> {
        self.as_slice().iter()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Freeze the set. Later changes produce new sets.
    pub fn seal(mut self) -> Self {
        self.sealed = true;
        self
    }

    /// Add a column. Adding a member already present returns the set as is.
    pub fn add(self, column: Column) -> Self {
        if self.contains(&column) {
            return self;
        }
        if self.sealed {
            let mut items = self.as_slice().to_vec();
            items.push(column);
            return Self::from_vec(items);
        }
        let repr = match self.repr {
            Repr::Empty => Repr::Single(column),
            Repr::Single(existing) => Repr::Many(Arc::new(vec![existing, column])),
            Repr::Many(mut items) => {
                Arc::make_mut(&mut items).push(column);
                Repr::Many(items)
            }
        };
        Self {
            repr,
            sealed: false,
        }
    }

    /// Remove a column if present.
    pub fn remove(self, column: &Column) -> Self {
        if !self.contains(column) {
            return self;
        }
        let items: Vec<Column> = self
            .as_slice()
            .iter()
            .filter(|c| *c != column)
            .cloned()
            .collect();
        Self::from_vec(items)
    }

    /// Remove every column.
    pub fn clear(self) -> Self {
        Self::new()
    }

    /// In-place add used while collecting; a sealed set is replaced by an
    /// unsealed copy.
    pub(crate) fn push(&mut self, column: Column) {
        let current = std::mem::take(self);
        *self = current.add(column);
    }

    fn from_vec(mut items: Vec<Column>) -> Self {
        let repr = match items.len() {
            0 => Repr::Empty,
            1 => match items.pop() {
                Some(c) => Repr::Single(c),
                None => Repr::Empty,
            },
            _ => Repr::Many(Arc::new(items)),
        };
        Self {
            repr,
            sealed: false,
        }
    }
}

impl From<Column> for Columns {
    fn from(column: Column) -> Self {
        Self {
            repr: Repr::Single(column),
            sealed: false,
        }
    }
}

impl FromIterator<Column> for Columns {
    fn from_iter<I: IntoIterator<Item = Column>>(iter: I) -> Self {
        let mut set = Columns::new();
        for c in iter {
            set.push(c);
        }
        set
    }
}

impl<'a> IntoIterator for &'a Columns {
    type Item = &'a Column;
    type IntoIter = std::slice::Iter<'a, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl PartialEq for Columns {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Columns {}

impl fmt::Debug for Columns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
