//! Search evaluation
//!
//! Candidate records, the assertion chain, and the per-search entry cache.

use std::collections::HashMap;
use std::sync::Arc;

use crate::action::ActionContext;
use crate::error::{DirError, Result};

use super::entry::{Dn, Entry, EntryId};
use super::scope::SearchScope;
use super::Partition;

// =============================================================================
// Filters
// =============================================================================

/// The filter shapes the partition evaluates natively. Anything richer is
/// decomposed by the caller before it reaches the storage layer.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Attribute equality
    Eq { attr: String, value: Vec<u8> },

    /// Conjunction
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(attr: impl AsRef<str>, value: impl Into<Vec<u8>>) -> Self {
        Filter::Eq {
            attr: attr.as_ref().to_lowercase(),
            value: value.into(),
        }
    }

    /// Flatten into equality predicates
    pub(crate) fn predicates(&self) -> Vec<(String, Vec<u8>)> {
        match self {
            Filter::Eq { attr, value } => vec![(attr.clone(), value.clone())],
            Filter::And(parts) => parts.iter().flat_map(|f| f.predicates()).collect(),
        }
    }
}

// =============================================================================
// Candidate records
// =============================================================================

/// A candidate produced during search: an entry id plus the entry itself
/// once some assertion has resuscitated it.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    id: EntryId,
    entry: Option<Arc<Entry>>,
}

impl IndexRecord {
    pub fn new(id: EntryId) -> Self {
        Self { id, entry: None }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    /// The resuscitated entry, if an assertion has fetched it
    pub fn entry(&self) -> Option<&Arc<Entry>> {
        self.entry.as_ref()
    }
}

// =============================================================================
// Search context
// =============================================================================

/// Per-search evaluation state: the acting partition and action plus a
/// bounded entry cache keyed by entry id, so a chain of assertions fetches
/// each candidate at most once.
pub struct SearchContext<'a> {
    partition: &'a Partition,
    action: &'a ActionContext,
    cache: HashMap<EntryId, Arc<Entry>>,
    capacity: usize,
}

impl<'a> SearchContext<'a> {
    pub fn new(partition: &'a Partition, action: &'a ActionContext, capacity: usize) -> Self {
        Self {
            partition,
            action,
            cache: HashMap::new(),
            capacity,
        }
    }

    /// Fetch the candidate's entry, populating both the record and the
    /// cache. An id the master table no longer knows is a consistency
    /// violation (the index handed us a dangling reference), reported as
    /// such rather than treated as "no match".
    pub fn resuscitate(&mut self, record: &mut IndexRecord) -> Result<Arc<Entry>> {
        if let Some(entry) = &record.entry {
            return Ok(Arc::clone(entry));
        }

        let entry = match self.cache.get(&record.id) {
            Some(entry) => Arc::clone(entry),
            None => {
                let fetched = self
                    .partition
                    .master_entry(self.action, record.id)?
                    .ok_or_else(|| {
                        DirError::Consistency(format!(
                            "index candidate {} has no master table row",
                            record.id
                        ))
                    })?;
                let entry = Arc::new(fetched);
                if self.cache.len() < self.capacity {
                    self.cache.insert(record.id, Arc::clone(&entry));
                }
                entry
            }
        };

        record.entry = Some(Arc::clone(&entry));
        Ok(entry)
    }

    /// Number of entries currently cached (test observability)
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

// =============================================================================
// Assertions
// =============================================================================

/// A predicate over a candidate record. Assertions run in a fixed chain
/// ordered cheapest-first; each may resuscitate the entry through the
/// shared context.
pub trait IndexAssertion {
    fn assert_candidate(
        &self,
        search: &mut SearchContext<'_>,
        record: &mut IndexRecord,
    ) -> Result<bool>;
}

/// Retains candidates whose DN falls inside the search scope
pub struct ScopeAssertion {
    base: Dn,
    scope: SearchScope,
}

impl ScopeAssertion {
    pub fn new(base: Dn, scope: SearchScope) -> Self {
        Self { base, scope }
    }
}

impl IndexAssertion for ScopeAssertion {
    fn assert_candidate(
        &self,
        search: &mut SearchContext<'_>,
        record: &mut IndexRecord,
    ) -> Result<bool> {
        let entry = search.resuscitate(record)?;
        Ok(self.scope.matches(&self.base, entry.dn()))
    }
}

/// Retains candidates holding a given attribute value
pub struct EqualityAssertion {
    attr: String,
    value: Vec<u8>,
}

impl EqualityAssertion {
    pub fn new(attr: impl AsRef<str>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            attr: attr.as_ref().to_lowercase(),
            value: value.into(),
        }
    }
}

impl IndexAssertion for EqualityAssertion {
    fn assert_candidate(
        &self,
        search: &mut SearchContext<'_>,
        record: &mut IndexRecord,
    ) -> Result<bool> {
        let entry = search.resuscitate(record)?;
        Ok(entry.has_value(&self.attr, &self.value))
    }
}

// =============================================================================
// Search iterator
// =============================================================================

/// Lazy sequence of accepted candidates. Tied to the action the search was
/// begun under; not restartable.
pub struct SearchIterator<'a> {
    context: SearchContext<'a>,
    candidates: std::vec::IntoIter<EntryId>,
    assertions: Vec<Box<dyn IndexAssertion + 'a>>,
}

impl<'a> SearchIterator<'a> {
    pub(crate) fn new(
        context: SearchContext<'a>,
        candidates: Vec<EntryId>,
        assertions: Vec<Box<dyn IndexAssertion + 'a>>,
    ) -> Self {
        Self {
            context,
            candidates: candidates.into_iter(),
            assertions,
        }
    }
}

impl<'a> Iterator for SearchIterator<'a> {
    type Item = Result<IndexRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        'candidates: for id in self.candidates.by_ref() {
            let mut record = IndexRecord::new(id);
            for assertion in &self.assertions {
                match assertion.assert_candidate(&mut self.context, &mut record) {
                    Ok(true) => {}
                    Ok(false) => continue 'candidates,
                    Err(e) => return Some(Err(e)),
                }
            }
            return Some(Ok(record));
        }
        None
    }
}
