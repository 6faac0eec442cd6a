//! Partition Module
//!
//! The indexed entry store: a master table (entry-id → entry), a DN table
//! (normalized DN → entry-id), and one secondary index per configured
//! attribute (attribute value → entry-id).
//!
//! ## Responsibilities
//! - Assign entry ids monotonically; never reuse them
//! - Keep master and index trees consistent: every index tuple resolves to
//!   exactly one live master row
//! - Apply mutations in a fixed deterministic order (master, DN table, then
//!   indices in configured order) so log replay reproduces identical state
//! - Serve lookup by DN and index-backed scoped search
//! - Report, never repair, consistency violations
//!
//! ## Index key layout
//! ```text
//! ┌────────────┬─────────────┬────────────┐
//! │ len(4, BE) │ value bytes │ id (8, BE) │
//! └────────────┴─────────────┴────────────┘
//! ```
//! Equal values cluster; a range scan over [value | id=0, value | id=MAX]
//! enumerates every id holding the value.

pub mod entry;
pub mod scope;
pub mod search;

pub use entry::{Dn, Entry, EntryId};
pub use scope::SearchScope;
pub use search::{
    EqualityAssertion, Filter, IndexAssertion, IndexRecord, ScopeAssertion, SearchContext,
    SearchIterator,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::action::{ActionContext, ActionRecordManager};
use crate::codec::{Codec, U64Codec};
use crate::config::Config;
use crate::error::{DirError, Result};
use crate::rm::{PageId, DIRECTORY_PAGE};
use crate::tree::{BTree, BytesComparator, Tuple};

/// Partition-level configuration (consumed at open)
#[derive(Debug, Clone, Default)]
pub struct PartitionConfig {
    /// Attributes to maintain secondary indices for, in a stable order
    pub indexed_attrs: Vec<String>,
}

impl PartitionConfig {
    pub fn new(indexed_attrs: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let mut attrs: Vec<String> = Vec::new();
        for attr in indexed_attrs {
            let attr = attr.as_ref().to_lowercase();
            if !attrs.contains(&attr) {
                attrs.push(attr);
            }
        }
        Self {
            indexed_attrs: attrs,
        }
    }
}

/// Persisted map of tree names to header pages, kept in the reserved
/// directory page.
#[derive(Serialize, Deserialize)]
struct TreeDirectory {
    master: PageId,
    dn: PageId,
    indices: Vec<(String, PageId)>,
}

/// The B-tree partition: the store the interceptor chain talks to
pub struct Partition {
    arm: Arc<ActionRecordManager>,
    config: Config,

    master: BTree,
    dn_tree: BTree,

    /// Secondary indices in configured order
    indices: Vec<(String, BTree)>,

    /// Next entry id, seeded from the largest master key at open
    next_entry_id: AtomicU64,
}

impl Partition {
    /// Open or create the partition's trees.
    ///
    /// Creates missing trees (first open, or newly configured indices) in a
    /// single action; on a plain reopen the action commits nothing.
    pub fn open(
        arm: Arc<ActionRecordManager>,
        config: Config,
        pconfig: PartitionConfig,
    ) -> Result<Self> {
        let order = config.btree_order;
        let guard = arm.guarded_action(false, "partition-open")?;
        let ctx = Arc::clone(guard.context());

        let existing: Option<TreeDirectory> = match arm.read_page(&ctx, DIRECTORY_PAGE)? {
            Some(image) => Some(bincode::deserialize(&image)?),
            None => None,
        };

        let cmp = || Arc::new(BytesComparator) as Arc<dyn crate::tree::TupleComparator>;
        let (master, dn_tree, mut directory, mut dirty) = match existing {
            Some(dir) => (
                BTree::open(dir.master, cmp(), order)?,
                BTree::open(dir.dn, cmp(), order)?,
                dir,
                false,
            ),
            None => {
                let master = BTree::create(&arm, &ctx, cmp(), order)?;
                let dn_tree = BTree::create(&arm, &ctx, cmp(), order)?;
                let directory = TreeDirectory {
                    master: master.header_page(),
                    dn: dn_tree.header_page(),
                    indices: Vec::new(),
                };
                tracing::info!("created partition master and dn tables");
                (master, dn_tree, directory, true)
            }
        };

        let mut indices = Vec::with_capacity(pconfig.indexed_attrs.len());
        for attr in &pconfig.indexed_attrs {
            let header = directory
                .indices
                .iter()
                .find(|(name, _)| name == attr)
                .map(|(_, page)| *page);
            let tree = match header {
                Some(page) => BTree::open(page, cmp(), order)?,
                None => {
                    let tree = BTree::create(&arm, &ctx, cmp(), order)?;
                    directory.indices.push((attr.clone(), tree.header_page()));
                    dirty = true;
                    tracing::info!(attr = attr.as_str(), "created secondary index");
                    tree
                }
            };
            indices.push((attr.clone(), tree));
        }

        for (name, _) in &directory.indices {
            if !pconfig.indexed_attrs.contains(name) {
                tracing::warn!(attr = name.as_str(), "index exists but is not configured");
            }
        }

        if dirty {
            arm.write_page(
                &ctx,
                DIRECTORY_PAGE,
                Bytes::from(bincode::serialize(&directory)?),
            )?;
        }

        // Seed the entry id allocator past the largest id in the master
        // table; ids are monotone across restarts and never reused.
        let mut last_id = 0u64;
        for tuple in master.scan(&arm, &ctx, None, None)? {
            last_id = U64Codec.deserialize(tuple?.key())?;
        }

        guard.commit()?;

        Ok(Self {
            arm,
            config,
            master,
            dn_tree,
            indices,
            next_entry_id: AtomicU64::new(last_id + 1),
        })
    }

    /// The underlying action layer (begin/end/abort live there)
    pub fn arm(&self) -> &Arc<ActionRecordManager> {
        &self.arm
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Insert an entry, assigning its id.
    ///
    /// Writes land in a fixed order (master, DN table, indices in configured
    /// order) so a replayed commit reproduces the same tree state.
    pub fn insert(&self, ctx: &ActionContext, entry: &Entry) -> Result<EntryId> {
        if self.dn_tree.get(&self.arm, ctx, entry.dn().as_bytes())?.is_some() {
            return Err(DirError::Storage(format!(
                "entry already exists: {}",
                entry.dn()
            )));
        }

        let id = self.next_entry_id.fetch_add(1, Ordering::SeqCst);

        self.master.insert(
            &self.arm,
            ctx,
            Tuple::new(U64Codec.serialize(&id), entry.to_bytes()?),
        )?;
        self.dn_tree.insert(
            &self.arm,
            ctx,
            Tuple::new(entry.dn().as_bytes().to_vec(), U64Codec.serialize(&id)),
        )?;
        for (attr, tree) in &self.indices {
            if let Some(values) = entry.get(attr) {
                for value in values {
                    tree.insert(&self.arm, ctx, Tuple::new(index_key(value, id), Vec::new()))?;
                }
            }
        }

        tracing::debug!(id, dn = %entry.dn(), "inserted entry");
        Ok(id)
    }

    /// Delete an entry and every index tuple derived from it
    pub fn delete(&self, ctx: &ActionContext, id: EntryId) -> Result<()> {
        let entry = self
            .master_entry(ctx, id)?
            .ok_or(DirError::EntryNotFound)?;

        for (attr, tree) in &self.indices {
            if let Some(values) = entry.get(attr) {
                for value in values {
                    tree.remove(&self.arm, ctx, &index_key(value, id))?;
                }
            }
        }
        self.dn_tree.remove(&self.arm, ctx, entry.dn().as_bytes())?;
        self.master.remove(&self.arm, ctx, &U64Codec.serialize(&id))?;

        tracing::debug!(id, dn = %entry.dn(), "deleted entry");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Fetch an entry from the master table by id
    pub fn master_entry(&self, ctx: &ActionContext, id: EntryId) -> Result<Option<Entry>> {
        match self.master.get(&self.arm, ctx, &U64Codec.serialize(&id))? {
            Some(bytes) => Ok(Some(Entry::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Resolve a DN to its entry id
    pub fn entry_id(&self, ctx: &ActionContext, dn: &Dn) -> Result<Option<EntryId>> {
        match self.dn_tree.get(&self.arm, ctx, dn.as_bytes())? {
            Some(bytes) => Ok(Some(U64Codec.deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Look up an entry by DN, optionally projecting to the named
    /// attributes.
    pub fn lookup(
        &self,
        ctx: &ActionContext,
        dn: &Dn,
        attr_ids: Option<&[&str]>,
    ) -> Result<Entry> {
        let id = self
            .entry_id(ctx, dn)?
            .ok_or(DirError::EntryNotFound)?;
        let entry = self.master_entry(ctx, id)?.ok_or_else(|| {
            DirError::Consistency(format!(
                "dn table maps {} to id {} but the master table has no such row",
                dn, id
            ))
        })?;
        Ok(match attr_ids {
            Some(ids) => entry.project(ids),
            None => entry,
        })
    }

    /// Ids of entries holding `value` for an indexed attribute
    pub fn lookup_ids(&self, ctx: &ActionContext, attr: &str, value: &[u8]) -> Result<Vec<EntryId>> {
        let attr = attr.to_lowercase();
        let tree = self
            .indices
            .iter()
            .find(|(name, _)| *name == attr)
            .map(|(_, tree)| tree)
            .ok_or_else(|| DirError::Usage(format!("attribute {} is not indexed", attr)))?;

        let from = index_key(value, 0);
        let to = index_key(value, u64::MAX);
        let mut ids = Vec::new();
        for tuple in tree.scan(&self.arm, ctx, Some(&from), Some(&to))? {
            ids.push(index_key_id(tuple?.key())?);
        }
        Ok(ids)
    }

    /// Index-backed scoped search.
    ///
    /// Candidates come from the most selective equality predicate that has
    /// an index (or a full master scan when none does); the remaining
    /// predicates and the scope run as an assertion chain sharing one entry
    /// cache, scope first.
    pub fn search<'a>(
        &'a self,
        ctx: &'a ActionContext,
        base: &Dn,
        scope: SearchScope,
        filter: &Filter,
    ) -> Result<SearchIterator<'a>> {
        let predicates = filter.predicates();

        let indexed = predicates
            .iter()
            .position(|(attr, _)| self.indices.iter().any(|(name, _)| name == attr));

        let candidates = match indexed {
            Some(pos) => {
                let (attr, value) = &predicates[pos];
                self.lookup_ids(ctx, attr, value)?
            }
            None => {
                // No usable index: evaluate everything against the master
                // table.
                let mut ids = Vec::new();
                for tuple in self.master.scan(&self.arm, ctx, None, None)? {
                    ids.push(U64Codec.deserialize(tuple?.key())?);
                }
                ids
            }
        };

        let mut assertions: Vec<Box<dyn IndexAssertion + 'a>> =
            vec![Box::new(ScopeAssertion::new(base.clone(), scope))];
        for (pos, (attr, value)) in predicates.iter().enumerate() {
            if Some(pos) == indexed {
                continue; // already satisfied by candidate generation
            }
            assertions.push(Box::new(EqualityAssertion::new(attr, value.clone())));
        }

        Ok(SearchIterator::new(
            SearchContext::new(self, ctx, self.config.search_cache_size),
            candidates,
            assertions,
        ))
    }

    // -------------------------------------------------------------------------
    // Consistency
    // -------------------------------------------------------------------------

    /// Walk every index tuple and report dangling or stale references.
    ///
    /// Violations are reported, never repaired: silent repair could mask
    /// data loss.
    pub fn verify(&self, ctx: &ActionContext) -> Result<()> {
        let mut violations = Vec::new();

        for tuple in self.dn_tree.scan(&self.arm, ctx, None, None)? {
            let tuple = tuple?;
            let id = U64Codec.deserialize(tuple.value())?;
            if self.master_entry(ctx, id)?.is_none() {
                violations.push(format!("dn tuple -> missing entry {}", id));
            }
        }

        for (attr, tree) in &self.indices {
            for tuple in tree.scan(&self.arm, ctx, None, None)? {
                let tuple = tuple?;
                let id = index_key_id(tuple.key())?;
                let value = index_key_value(tuple.key())?;
                match self.master_entry(ctx, id)? {
                    None => violations.push(format!(
                        "index {} value tuple -> missing entry {}",
                        attr, id
                    )),
                    Some(entry) if !entry.has_value(attr, value) => violations.push(format!(
                        "index {} tuple -> entry {} lacks the indexed value",
                        attr, id
                    )),
                    Some(_) => {}
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            for v in &violations {
                tracing::warn!(violation = v.as_str(), "index consistency violation");
            }
            Err(DirError::Consistency(violations.join("; ")))
        }
    }
}

// =============================================================================
// Index key encoding
// =============================================================================

/// Compose an index key: value length, value bytes, entry id
fn index_key(value: &[u8], id: EntryId) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + value.len() + 8);
    key.extend_from_slice(&(value.len() as u32).to_be_bytes());
    key.extend_from_slice(value);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn index_key_id(key: &[u8]) -> Result<EntryId> {
    if key.len() < 12 {
        return Err(DirError::Storage(format!(
            "index key too short: {} bytes",
            key.len()
        )));
    }
    let arr: [u8; 8] = key[key.len() - 8..].try_into().unwrap();
    Ok(u64::from_be_bytes(arr))
}

fn index_key_value(key: &[u8]) -> Result<&[u8]> {
    if key.len() < 12 {
        return Err(DirError::Storage(format!(
            "index key too short: {} bytes",
            key.len()
        )));
    }
    let len = u32::from_be_bytes(key[0..4].try_into().unwrap()) as usize;
    if key.len() != 4 + len + 8 {
        return Err(DirError::Storage("index key length mismatch".to_string()));
    }
    Ok(&key[4..4 + len])
}
