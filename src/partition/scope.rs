//! Search scope
//!
//! DN-based scope evaluation for search candidates.

use crate::error::{DirError, Result};

use super::entry::Dn;

/// How far below the search base a candidate may lie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// The base entry only
    Object,

    /// Direct children of the base: exactly one more RDN
    OneLevel,

    /// The base and everything under it
    Subtree,
}

impl SearchScope {
    /// Whether `candidate` falls inside this scope relative to `base`
    pub fn matches(&self, base: &Dn, candidate: &Dn) -> bool {
        match self {
            SearchScope::Object => candidate == base,
            SearchScope::OneLevel => {
                candidate.component_count() == base.component_count() + 1
                    && candidate.is_descendant_of(base)
            }
            SearchScope::Subtree => candidate.is_descendant_of(base),
        }
    }
}

impl TryFrom<u32> for SearchScope {
    type Error = DirError;

    /// Decode a wire scope value. An unrecognized discriminant is a fatal
    /// input error, never a default.
    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(SearchScope::Object),
            1 => Ok(SearchScope::OneLevel),
            2 => Ok(SearchScope::Subtree),
            other => Err(DirError::Usage(format!(
                "unrecognized search scope: {}",
                other
            ))),
        }
    }
}
