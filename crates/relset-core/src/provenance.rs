//! Data source provenance.
//!
//! Every data source (table, query, data set) owns a [`Provenance`]: a
//! revision counter bumped on each structural mutation, and at most one weak
//! link to the source it was derived from, stamped with that source's
//! revision at capture time. A link whose source has moved past the stamp is
//! stale and reads as absent.
//!
//! Links are write-once: recording a second origin, or recording `None`,
//! freezes the link to "no origin" for good.
//!
//! Provenance only ever enables shortcuts. Callers must keep a correct path
//! for the case where no origin can be proven.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::model::Model;

/// Kind of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSourceKind {
    Table,
    Query,
    DataSet,
}

/// Anything rows can be read from.
pub trait DataSource {
    fn model(&self) -> &Model;

    fn provenance(&self) -> &Provenance;

    fn kind(&self) -> DataSourceKind;
}

enum Origin {
    Unset,
    Linked {
        source: Weak<ProvenanceState>,
        revision: u64,
    },
    Frozen,
}

struct ProvenanceState {
    revision: AtomicU64,
    origin: Mutex<Origin>,
}

/// Revision counter plus original-source link of one data source.
#[derive(Clone)]
pub struct Provenance(Arc<ProvenanceState>);

impl Default for Provenance {
    fn default() -> Self {
        Self::new()
    }
}

impl Provenance {
    /// Revision 0, no origin.
    pub fn new() -> Self {
        Provenance(Arc::new(ProvenanceState {
            revision: AtomicU64::new(0),
            origin: Mutex::new(Origin::Unset),
        }))
    }

    pub fn revision(&self) -> u64 {
        self.0.revision.load(Ordering::Acquire)
    }

    /// Record one structural mutation.
    pub fn bump(&self) -> u64 {
        self.0.revision.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record the source this one was derived from.
    ///
    /// Only the first call with a source links; any later call, or a call
    /// with `None`, freezes the link permanently.
    pub fn update_original(&self, source: Option<&Provenance>) {
        let mut origin = self.0.origin.lock().unwrap_or_else(PoisonError::into_inner);
        match (&*origin, source) {
            (Origin::Unset, Some(src)) if !src.ptr_eq(self) => {
                *origin = Origin::Linked {
                    source: Arc::downgrade(&src.0),
                    revision: src.revision(),
                };
            }
            (Origin::Frozen, _) => {}
            _ => {
                tracing::debug!("Provenance link frozen");
                *origin = Origin::Frozen;
            }
        }
    }

    /// The source this one was derived from, if the link exists and the
    /// source has not changed since it was captured.
    pub fn original(&self) -> Option<Provenance> {
        let origin = self.0.origin.lock().unwrap_or_else(PoisonError::into_inner);
        let Origin::Linked { source, revision } = &*origin else {
            return None;
        };
        let source = Provenance(source.upgrade()?);
        if source.revision() == *revision {
            Some(source)
        } else {
            None
        }
    }

    /// Revision captured with the link: `None` when never linked, `-1` once
    /// frozen.
    pub fn original_revision(&self) -> Option<i64> {
        match &*self.0.origin.lock().unwrap_or_else(PoisonError::into_inner) {
            Origin::Unset => None,
            Origin::Linked { revision, .. } => Some(*revision as i64),
            Origin::Frozen => Some(-1),
        }
    }

    /// Follow valid links as far as they go. A stale or dropped link ends the
    /// walk at the last source reached, which may be `self`.
    pub fn ultimate_origin(&self) -> Provenance {
        let mut current = self.clone();
        let mut visited = vec![Arc::as_ptr(&self.0)];
        loop {
            let had_link = matches!(current.original_revision(), Some(r) if r >= 0);
            match current.original() {
                Some(next) => {
                    if visited.contains(&Arc::as_ptr(&next.0)) {
                        return current;
                    }
                    visited.push(Arc::as_ptr(&next.0));
                    current = next;
                }
                None => {
                    if had_link {
                        tracing::warn!(
                            revision = current.revision(),
                            "Stale provenance link truncated"
                        );
                    }
                    return current;
                }
            }
        }
    }

    /// Whether both handles refer to the same data source.
    pub fn ptr_eq(&self, other: &Provenance) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provenance")
            .field("revision", &self.revision())
            .field("original_revision", &self.original_revision())
            .finish()
    }
}
