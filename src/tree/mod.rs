//! Tuple & Index Module
//!
//! The ordered key→value abstraction shared by the master table and every
//! secondary index.
//!
//! ## Responsibilities
//! - `Tuple`: the universal storage unit
//! - `TupleComparator`: pluggable ordering, fixed per tree at construction
//! - `BTree`: page-backed ordered map over the action layer

mod btree;

pub use btree::{BTree, TreeCursor};

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::codec::{Codec, IntCodec};

/// An ordered key-value pair. Keys are unique within one tree; ordering is
/// defined by the tree's comparator. Tuples are immutable once read;
/// `set_key`/`set_value` exist for node rebuilds and are never used on a
/// tuple shared between threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    key: Vec<u8>,
    value: Vec<u8>,
}

impl Tuple {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn set_key(&mut self, key: Vec<u8>) {
        self.key = key;
    }

    pub fn set_value(&mut self, value: Vec<u8>) {
        self.value = value;
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.key, self.value)
    }
}

/// Ordering strategy for one tree, resolved at construction time.
///
/// The order must be total and consistent with the serialized byte form:
/// a tree re-opened from disk keeps the order it was built with.
pub trait TupleComparator: Send + Sync {
    /// Compare two serialized keys
    fn compare_key(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Compare two serialized values. Most trees never order by value; the
    /// default is plain byte order.
    fn compare_value(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Lexicographic byte ordering. Correct for any key encoding whose byte
/// order matches its logical order (big-endian ids, normalized DNs,
/// length-prefixed index keys).
pub struct BytesComparator;

impl TupleComparator for BytesComparator {
    fn compare_key(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Numeric ordering over minimal two's-complement integer keys, where raw
/// byte order and numeric order disagree.
pub struct IntComparator;

impl TupleComparator for IntComparator {
    fn compare_key(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (IntCodec.deserialize(a), IntCodec.deserialize(b)) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            // Undecodable keys sort after valid ones, stably by bytes.
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        }
    }
}
