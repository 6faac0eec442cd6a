//! Page-backed B-tree
//!
//! Each tree is a header page (root indirection) plus node pages. Nodes are
//! bincode-encoded; page ids are stable across splits, so root changes are
//! the only header updates and every structural change stays inside the
//! acting action's write set.
//!
//! Deletion does not rebalance: underfull and empty leaves stay in the leaf
//! chain and are skipped by cursors. Splits keep the chain intact (the new
//! right leaf inherits the left leaf's next pointer).

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::action::{ActionContext, ActionRecordManager};
use crate::error::{DirError, Result};
use crate::rm::PageId;

use super::{Tuple, TupleComparator};

/// Minimum node order (max tuples per node before a split)
const MIN_ORDER: usize = 4;

#[derive(Serialize, Deserialize)]
enum Node {
    /// Separator keys plus child pointers; `children.len() == keys.len() + 1`
    /// and `keys[i]` is the smallest key reachable under `children[i + 1]`.
    Internal {
        keys: Vec<Vec<u8>>,
        children: Vec<PageId>,
    },

    /// Sorted tuples plus the next leaf in key order
    Leaf {
        tuples: Vec<Tuple>,
        next: Option<PageId>,
    },
}

#[derive(Serialize, Deserialize)]
struct TreeHeader {
    root: PageId,
}

/// Outcome of a recursive insert below some node
enum InsertOutcome {
    Done,
    /// The child split: propagate the separator and new right sibling
    Split { sep: Vec<u8>, right: PageId },
}

/// A B-tree handle: header page id plus the comparator and order fixed at
/// construction. The handle itself holds no pages; every operation goes
/// through an action.
pub struct BTree {
    header_page: PageId,
    cmp: Arc<dyn TupleComparator>,
    order: usize,
}

impl BTree {
    /// Create an empty tree inside the given action
    pub fn create(
        arm: &ActionRecordManager,
        ctx: &ActionContext,
        cmp: Arc<dyn TupleComparator>,
        order: usize,
    ) -> Result<Self> {
        if order < MIN_ORDER {
            return Err(DirError::Config(format!(
                "btree order {} below minimum {}",
                order, MIN_ORDER
            )));
        }

        let root = arm.alloc_page_id();
        let header_page = arm.alloc_page_id();
        let tree = Self {
            header_page,
            cmp,
            order,
        };
        tree.store_node(
            arm,
            ctx,
            root,
            &Node::Leaf {
                tuples: Vec::new(),
                next: None,
            },
        )?;
        tree.store_header(arm, ctx, &TreeHeader { root })?;
        Ok(tree)
    }

    /// Re-open an existing tree from its header page
    pub fn open(header_page: PageId, cmp: Arc<dyn TupleComparator>, order: usize) -> Result<Self> {
        if order < MIN_ORDER {
            return Err(DirError::Config(format!(
                "btree order {} below minimum {}",
                order, MIN_ORDER
            )));
        }
        Ok(Self {
            header_page,
            cmp,
            order,
        })
    }

    /// Page id of the tree's header (persisted by the owner)
    pub fn header_page(&self) -> PageId {
        self.header_page
    }

    // -------------------------------------------------------------------------
    // Point operations
    // -------------------------------------------------------------------------

    /// Look up the value stored under `key`
    pub fn get(
        &self,
        arm: &ActionRecordManager,
        ctx: &ActionContext,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let leaf_id = self.find_leaf(arm, ctx, key)?;
        match self.load_node(arm, ctx, leaf_id)? {
            Node::Leaf { tuples, .. } => {
                Ok(
                    match tuples.binary_search_by(|t| self.cmp.compare_key(t.key(), key)) {
                        Ok(idx) => Some(tuples[idx].value().to_vec()),
                        Err(_) => None,
                    },
                )
            }
            Node::Internal { .. } => Err(self.corrupt("leaf expected", leaf_id)),
        }
    }

    /// Insert a tuple, replacing the value if the key already exists
    pub fn insert(
        &self,
        arm: &ActionRecordManager,
        ctx: &ActionContext,
        tuple: Tuple,
    ) -> Result<()> {
        let mut header = self.load_header(arm, ctx)?;
        match self.insert_below(arm, ctx, header.root, tuple)? {
            InsertOutcome::Done => Ok(()),
            InsertOutcome::Split { sep, right } => {
                // Root split: grow the tree by one level.
                let new_root = arm.alloc_page_id();
                self.store_node(
                    arm,
                    ctx,
                    new_root,
                    &Node::Internal {
                        keys: vec![sep],
                        children: vec![header.root, right],
                    },
                )?;
                header.root = new_root;
                self.store_header(arm, ctx, &header)
            }
        }
    }

    /// Remove the tuple under `key`, returning its value if it was present
    pub fn remove(
        &self,
        arm: &ActionRecordManager,
        ctx: &ActionContext,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let leaf_id = self.find_leaf(arm, ctx, key)?;
        match self.load_node(arm, ctx, leaf_id)? {
            Node::Leaf { mut tuples, next } => {
                match tuples.binary_search_by(|t| self.cmp.compare_key(t.key(), key)) {
                    Ok(idx) => {
                        let removed = tuples.remove(idx);
                        self.store_node(arm, ctx, leaf_id, &Node::Leaf { tuples, next })?;
                        Ok(Some(removed.into_parts().1))
                    }
                    Err(_) => Ok(None),
                }
            }
            Node::Internal { .. } => Err(self.corrupt("leaf expected", leaf_id)),
        }
    }

    // -------------------------------------------------------------------------
    // Range scans
    // -------------------------------------------------------------------------

    /// Cursor over tuples in key order, from `from` (inclusive, or the
    /// smallest key) to `to` (inclusive, or the largest). The cursor is tied
    /// to the given action's snapshot and is not restartable.
    pub fn scan<'a>(
        &self,
        arm: &'a ActionRecordManager,
        ctx: &'a ActionContext,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<TreeCursor<'a>> {
        let (leaf_id, start) = match from {
            Some(key) => {
                let leaf_id = self.find_leaf(arm, ctx, key)?;
                let start = match self.load_node(arm, ctx, leaf_id)? {
                    Node::Leaf { tuples, .. } => {
                        match tuples.binary_search_by(|t| self.cmp.compare_key(t.key(), key)) {
                            Ok(idx) | Err(idx) => idx,
                        }
                    }
                    Node::Internal { .. } => return Err(self.corrupt("leaf expected", leaf_id)),
                };
                (leaf_id, start)
            }
            None => (self.leftmost_leaf(arm, ctx)?, 0),
        };

        let mut cursor = TreeCursor {
            arm,
            ctx,
            cmp: Arc::clone(&self.cmp),
            to: to.map(|k| k.to_vec()),
            pending: Vec::new().into_iter(),
            next_leaf: Some(leaf_id),
            skip: start,
            done: false,
        };
        cursor.advance_leaf()?;
        Ok(cursor)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn insert_below(
        &self,
        arm: &ActionRecordManager,
        ctx: &ActionContext,
        page: PageId,
        tuple: Tuple,
    ) -> Result<InsertOutcome> {
        match self.load_node(arm, ctx, page)? {
            Node::Leaf { mut tuples, next } => {
                match tuples.binary_search_by(|t| self.cmp.compare_key(t.key(), tuple.key())) {
                    Ok(idx) => {
                        let (_, value) = tuple.into_parts();
                        tuples[idx].set_value(value);
                    }
                    Err(idx) => tuples.insert(idx, tuple),
                }

                if tuples.len() <= self.order {
                    self.store_node(arm, ctx, page, &Node::Leaf { tuples, next })?;
                    return Ok(InsertOutcome::Done);
                }

                // Split: move the upper half to a new right sibling, which
                // takes over this leaf's position in the chain.
                let mid = tuples.len() / 2;
                let right_tuples = tuples.split_off(mid);
                let sep = right_tuples[0].key().to_vec();
                let right = arm.alloc_page_id();
                self.store_node(
                    arm,
                    ctx,
                    right,
                    &Node::Leaf {
                        tuples: right_tuples,
                        next,
                    },
                )?;
                self.store_node(
                    arm,
                    ctx,
                    page,
                    &Node::Leaf {
                        tuples,
                        next: Some(right),
                    },
                )?;
                Ok(InsertOutcome::Split { sep, right })
            }

            Node::Internal {
                mut keys,
                mut children,
            } => {
                let idx = self.child_index(&keys, tuple.key());
                match self.insert_below(arm, ctx, children[idx], tuple)? {
                    InsertOutcome::Done => Ok(InsertOutcome::Done),
                    InsertOutcome::Split { sep, right } => {
                        keys.insert(idx, sep);
                        children.insert(idx + 1, right);

                        if keys.len() <= self.order {
                            self.store_node(arm, ctx, page, &Node::Internal { keys, children })?;
                            return Ok(InsertOutcome::Done);
                        }

                        // Split the internal node; the middle key moves up.
                        let mid = keys.len() / 2;
                        let sep_up = keys[mid].clone();
                        let right_keys = keys.split_off(mid + 1);
                        keys.truncate(mid);
                        let right_children = children.split_off(mid + 1);

                        let right_id = arm.alloc_page_id();
                        self.store_node(
                            arm,
                            ctx,
                            right_id,
                            &Node::Internal {
                                keys: right_keys,
                                children: right_children,
                            },
                        )?;
                        self.store_node(arm, ctx, page, &Node::Internal { keys, children })?;
                        Ok(InsertOutcome::Split {
                            sep: sep_up,
                            right: right_id,
                        })
                    }
                }
            }
        }
    }

    /// Index of the child covering `key`: the count of separators <= key
    fn child_index(&self, keys: &[Vec<u8>], key: &[u8]) -> usize {
        keys.partition_point(|sep| self.cmp.compare_key(sep, key) != Ordering::Greater)
    }

    fn find_leaf(
        &self,
        arm: &ActionRecordManager,
        ctx: &ActionContext,
        key: &[u8],
    ) -> Result<PageId> {
        let mut page = self.load_header(arm, ctx)?.root;
        loop {
            match self.load_node(arm, ctx, page)? {
                Node::Leaf { .. } => return Ok(page),
                Node::Internal { keys, children } => {
                    page = children[self.child_index(&keys, key)];
                }
            }
        }
    }

    fn leftmost_leaf(&self, arm: &ActionRecordManager, ctx: &ActionContext) -> Result<PageId> {
        let mut page = self.load_header(arm, ctx)?.root;
        loop {
            match self.load_node(arm, ctx, page)? {
                Node::Leaf { .. } => return Ok(page),
                Node::Internal { children, .. } => page = children[0],
            }
        }
    }

    fn load_header(&self, arm: &ActionRecordManager, ctx: &ActionContext) -> Result<TreeHeader> {
        let image = arm
            .read_page(ctx, self.header_page)?
            .ok_or_else(|| self.corrupt("header page missing", self.header_page))?;
        Ok(bincode::deserialize(&image)?)
    }

    fn store_header(
        &self,
        arm: &ActionRecordManager,
        ctx: &ActionContext,
        header: &TreeHeader,
    ) -> Result<()> {
        arm.write_page(ctx, self.header_page, Bytes::from(bincode::serialize(header)?))
    }

    fn load_node(
        &self,
        arm: &ActionRecordManager,
        ctx: &ActionContext,
        id: PageId,
    ) -> Result<Node> {
        let image = arm
            .read_page(ctx, id)?
            .ok_or_else(|| self.corrupt("node page missing", id))?;
        Ok(bincode::deserialize(&image)?)
    }

    fn store_node(
        &self,
        arm: &ActionRecordManager,
        ctx: &ActionContext,
        id: PageId,
        node: &Node,
    ) -> Result<()> {
        arm.write_page(ctx, id, Bytes::from(bincode::serialize(node)?))
    }

    fn corrupt(&self, what: &str, page: PageId) -> DirError {
        DirError::Storage(format!(
            "tree {} corrupt: {} (page {})",
            self.header_page, what, page
        ))
    }
}

/// Forward cursor over a tree's tuples, bound to one action's snapshot
pub struct TreeCursor<'a> {
    arm: &'a ActionRecordManager,
    ctx: &'a ActionContext,
    cmp: Arc<dyn TupleComparator>,
    to: Option<Vec<u8>>,

    pending: std::vec::IntoIter<Tuple>,
    next_leaf: Option<PageId>,

    /// Tuples to skip at the front of the first leaf
    skip: usize,
    done: bool,
}

impl<'a> TreeCursor<'a> {
    /// Load the next leaf in the chain into `pending`
    fn advance_leaf(&mut self) -> Result<()> {
        while let Some(id) = self.next_leaf.take() {
            let image = self.arm.read_page(self.ctx, id)?.ok_or_else(|| {
                DirError::Storage(format!("leaf page {} missing during scan", id))
            })?;
            match bincode::deserialize::<Node>(&image)? {
                Node::Leaf { mut tuples, next } => {
                    if self.skip > 0 {
                        tuples.drain(..self.skip.min(tuples.len()));
                        self.skip = 0;
                    }
                    self.next_leaf = next;
                    if !tuples.is_empty() {
                        self.pending = tuples.into_iter();
                        return Ok(());
                    }
                    // Empty leaf (all tuples deleted): keep walking the chain.
                }
                Node::Internal { .. } => {
                    return Err(DirError::Storage(format!(
                        "page {} in leaf chain is not a leaf",
                        id
                    )));
                }
            }
        }
        self.done = true;
        Ok(())
    }
}

impl<'a> Iterator for TreeCursor<'a> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            match self.pending.next() {
                Some(tuple) => {
                    if let Some(to) = &self.to {
                        if self.cmp.compare_key(tuple.key(), to) == Ordering::Greater {
                            self.done = true;
                            return None;
                        }
                    }
                    return Some(Ok(tuple));
                }
                None => {
                    if let Err(e) = self.advance_leaf() {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}
