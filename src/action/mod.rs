//! Action Module
//!
//! The transaction layer: snapshot-isolated actions over the record manager,
//! made durable by the write-ahead log.
//!
//! ## Responsibilities
//! - Begin/end/abort actions with snapshot isolation
//! - Buffer page writes per action; publish them only on commit
//! - Frame each commit as one log record and force it durable before the
//!   pages become visible (log append happens-before page publish)
//! - Replay committed actions from the log on open
//! - Checkpoint the page store and retire log segments behind it
//!
//! ## Concurrency Model
//! Any number of actions may be open concurrently, each owned by one thread
//! at a time. A thread holds at most one *current* action (thread-local,
//! explicitly transferable via unset/set). Commits are serialized by a
//! single commit lock so log order always equals publish order. Write-write
//! conflicts between overlapping actions resolve last-commit-wins at the
//! page level; callers that can race on one logical entry must serialize
//! above this layer.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{DirError, Result};
use crate::log::{Log, UserLogRecord};
use crate::rm::{PageId, PageSnapshot, RecordManager};

const CHECKPOINT_FILENAME: &str = "pages.chk";

thread_local! {
    static CURRENT_ACTION: RefCell<Option<Arc<ActionContext>>> = const { RefCell::new(None) };
}

// =============================================================================
// Action context
// =============================================================================

/// Lifecycle of one action: active until exactly one of end or abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionState {
    Active,
    Committed,
    Aborted,
}

/// One logical transaction: a consistent snapshot plus, for read/write
/// actions, a private page write buffer.
///
/// A context is owned by one thread at a time; ownership moves by unsetting
/// it on the old thread and setting it on the new one. Calling end and abort
/// concurrently against one context is a caller error and undefined.
pub struct ActionContext {
    id: u64,

    read_only: bool,

    /// Debugging tag naming the originator
    who_started: String,

    /// Committed pages as of `begin_action`
    snapshot: PageSnapshot,

    /// Buffered page writes; `None` for read-only actions
    writes: Option<Mutex<HashMap<PageId, Bytes>>>,

    state: Mutex<ActionState>,
}

impl ActionContext {
    /// Unique id of this action
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The originator tag given to `begin_action`
    pub fn who_started(&self) -> &str {
        &self.who_started
    }

    fn ensure_active(&self) -> Result<()> {
        match *self.state.lock() {
            ActionState::Active => Ok(()),
            other => Err(DirError::Usage(format!(
                "action {} ({}) is {:?}, not active",
                self.id, self.who_started, other
            ))),
        }
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("id", &self.id)
            .field("read_only", &self.read_only)
            .field("who_started", &self.who_started)
            .field("state", &*self.state.lock())
            .finish()
    }
}

// =============================================================================
// Action record manager
// =============================================================================

/// The record manager with action semantics layered on: begin/end/abort,
/// durable commits through the log, recovery on open.
pub struct ActionRecordManager {
    rm: RecordManager,

    /// The write-ahead log (exclusive access for appends and scans)
    log: Mutex<Log>,

    /// Serializes commits so replay order equals publish order
    commit_lock: Mutex<()>,

    next_action_id: AtomicU64,
}

impl ActionRecordManager {
    /// Open the store under `config.data_dir`, recovering committed actions
    /// from the log.
    ///
    /// Recovery loads the newest page checkpoint (if any), then replays every
    /// valid commit record after the checkpoint anchor, stopping at the
    /// log's valid prefix.
    pub fn open(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let (rm, replay_from) = RecordManager::open(config.data_dir.join(CHECKPOINT_FILENAME))?;
        let mut log = Log::open(
            &config.data_dir,
            config.log_suffix.clone(),
            config.log_buffer_size,
            config.log_file_size,
        )?;

        // Replay committed actions appended after the checkpoint.
        let mut replayed = 0u64;
        let mut scanner = log.begin_scan(replay_from)?;
        while let Some(record) = scanner.next_record()? {
            let writes: Vec<(PageId, Vec<u8>)> = bincode::deserialize(record.data())?;
            let mut publish = Vec::with_capacity(writes.len());
            for (id, image) in writes {
                rm.note_page_id(id);
                publish.push((id, Bytes::from(image)));
            }
            rm.publish(publish);
            replayed += 1;
        }
        if replayed > 0 {
            tracing::info!(actions = replayed, from = %replay_from, "replayed committed actions");
        }

        Ok(Self {
            rm,
            log: Mutex::new(log),
            commit_lock: Mutex::new(()),
            next_action_id: AtomicU64::new(1),
        })
    }

    // -------------------------------------------------------------------------
    // Action lifecycle
    // -------------------------------------------------------------------------

    /// Begin a new action and bind it as the calling thread's current one.
    ///
    /// Read-only actions allocate no write buffer. Beginning an action while
    /// the thread already has a current one is a usage error.
    pub fn begin_action(&self, read_only: bool, who_started: &str) -> Result<Arc<ActionContext>> {
        let already_bound = CURRENT_ACTION.with(|c| c.borrow().is_some());
        if already_bound {
            return Err(DirError::Usage(
                "thread already has a current action".to_string(),
            ));
        }

        let ctx = Arc::new(ActionContext {
            id: self.next_action_id.fetch_add(1, Ordering::SeqCst),
            read_only,
            who_started: who_started.to_string(),
            snapshot: self.rm.snapshot(),
            writes: if read_only {
                None
            } else {
                Some(Mutex::new(HashMap::new()))
            },
            state: Mutex::new(ActionState::Active),
        });

        CURRENT_ACTION.with(|c| *c.borrow_mut() = Some(Arc::clone(&ctx)));
        tracing::debug!(action = ctx.id, who = who_started, read_only, "began action");
        Ok(ctx)
    }

    /// Bind a transferred context as this thread's current action
    pub fn set_current_action_context(&self, ctx: &Arc<ActionContext>) -> Result<()> {
        CURRENT_ACTION.with(|c| {
            let mut current = c.borrow_mut();
            if current.is_some() {
                return Err(DirError::Usage(
                    "thread already has a current action".to_string(),
                ));
            }
            *current = Some(Arc::clone(ctx));
            Ok(())
        })
    }

    /// Unbind the thread's current action; fails if `ctx` is not actually
    /// the current one.
    pub fn unset_current_action_context(&self, ctx: &Arc<ActionContext>) -> Result<()> {
        CURRENT_ACTION.with(|c| {
            let mut current = c.borrow_mut();
            match current.as_ref() {
                Some(bound) if Arc::ptr_eq(bound, ctx) => {
                    *current = None;
                    Ok(())
                }
                _ => Err(DirError::Usage(format!(
                    "action {} is not the thread's current action",
                    ctx.id
                ))),
            }
        })
    }

    /// The calling thread's current action, if any
    pub fn current_action_context(&self) -> Option<Arc<ActionContext>> {
        CURRENT_ACTION.with(|c| c.borrow().clone())
    }

    /// Commit an action.
    ///
    /// For read/write actions the buffered pages are framed as one log
    /// record and forced durable before they are published; success here
    /// means the commit survives a crash. For read-only actions this just
    /// releases the snapshot.
    pub fn end_action(&self, ctx: &Arc<ActionContext>) -> Result<()> {
        let mut state = ctx.state.lock();
        if *state != ActionState::Active {
            return Err(DirError::Usage(format!(
                "end of non-active action {} ({:?})",
                ctx.id, *state
            )));
        }

        let buffered = ctx
            .writes
            .as_ref()
            .map(|w| std::mem::take(&mut *w.lock()))
            .unwrap_or_default();

        if buffered.is_empty() {
            *state = ActionState::Committed;
            drop(state);
            self.unbind_if_current(ctx);
            return Ok(());
        }

        let mut writes: Vec<(PageId, Bytes)> = buffered.into_iter().collect();
        writes.sort_unstable_by_key(|(id, _)| *id);
        let payload_pages: Vec<(PageId, Vec<u8>)> = writes
            .iter()
            .map(|(id, image)| (*id, image.to_vec()))
            .collect();
        let payload = bincode::serialize(&payload_pages)?;

        // Log append happens-before page publish; the commit lock keeps the
        // two in the same order across concurrent committers.
        let commit_result = {
            let _commit = self.commit_lock.lock();
            let mut record = UserLogRecord::new(payload);
            match self.log.lock().append(&mut record, true) {
                Ok(()) => {
                    self.rm.publish(writes);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        match commit_result {
            Ok(()) => {
                *state = ActionState::Committed;
                drop(state);
                self.unbind_if_current(ctx);
                tracing::debug!(action = ctx.id, "committed action");
                Ok(())
            }
            Err(e) => {
                // A failed append forces the abort; nothing was published.
                *state = ActionState::Aborted;
                drop(state);
                self.unbind_if_current(ctx);
                tracing::warn!(action = ctx.id, error = %e, "commit failed, action aborted");
                Err(e)
            }
        }
    }

    /// Abort an action, discarding its buffered writes. Has no visible
    /// effect on the store. May be called from a thread other than the one
    /// that began the action, provided no `end_action` races it.
    pub fn abort_action(&self, ctx: &Arc<ActionContext>) -> Result<()> {
        let mut state = ctx.state.lock();
        if *state != ActionState::Active {
            return Err(DirError::Usage(format!(
                "abort of non-active action {} ({:?})",
                ctx.id, *state
            )));
        }
        if let Some(writes) = &ctx.writes {
            writes.lock().clear();
        }
        *state = ActionState::Aborted;
        drop(state);
        self.unbind_if_current(ctx);
        tracing::debug!(action = ctx.id, "aborted action");
        Ok(())
    }

    /// Begin an action wrapped in an RAII guard that aborts on drop
    pub fn guarded_action(&self, read_only: bool, who_started: &str) -> Result<ActionGuard<'_>> {
        let ctx = self.begin_action(read_only, who_started)?;
        Ok(ActionGuard {
            arm: self,
            ctx,
            finished: false,
        })
    }

    fn unbind_if_current(&self, ctx: &Arc<ActionContext>) {
        CURRENT_ACTION.with(|c| {
            let mut current = c.borrow_mut();
            if current.as_ref().is_some_and(|bound| Arc::ptr_eq(bound, ctx)) {
                *current = None;
            }
        });
    }

    // -------------------------------------------------------------------------
    // Page access (used by the tree layer)
    // -------------------------------------------------------------------------

    /// Read a page through an action: its own buffered write if present,
    /// otherwise its snapshot.
    pub fn read_page(&self, ctx: &ActionContext, id: PageId) -> Result<Option<Bytes>> {
        ctx.ensure_active()?;
        if let Some(writes) = &ctx.writes {
            if let Some(image) = writes.lock().get(&id) {
                return Ok(Some(image.clone()));
            }
        }
        Ok(ctx.snapshot.get(&id).cloned())
    }

    /// Buffer a page write in the action. Invisible to every other action
    /// until commit.
    pub fn write_page(&self, ctx: &ActionContext, id: PageId, image: Bytes) -> Result<()> {
        ctx.ensure_active()?;
        let writes = ctx.writes.as_ref().ok_or_else(|| {
            DirError::Usage(format!(
                "write through read-only action {} ({})",
                ctx.id, ctx.who_started
            ))
        })?;
        writes.lock().insert(id, image);
        Ok(())
    }

    /// Allocate a fresh page id
    pub fn alloc_page_id(&self) -> PageId {
        self.rm.alloc_page_id()
    }

    // -------------------------------------------------------------------------
    // Checkpoint / shutdown
    // -------------------------------------------------------------------------

    /// Checkpoint the committed pages and retire log segments wholly behind
    /// the checkpoint anchor.
    ///
    /// Taken under the commit lock so the snapshot and the anchor agree;
    /// open actions are unaffected (they read their own snapshots, never the
    /// log).
    pub fn checkpoint(&self) -> Result<()> {
        let _commit = self.commit_lock.lock();
        let anchor = self.log.lock().head_anchor();
        let snapshot = self.rm.snapshot();
        self.rm.write_checkpoint(&snapshot, anchor)?;
        self.log.lock().purge_before(anchor)?;
        Ok(())
    }

    /// Flush and sync the log, consuming the manager
    pub fn close(self) -> Result<()> {
        self.log.into_inner().close()
    }
}

// =============================================================================
// RAII guard
// =============================================================================

/// Scopes an action: unless `commit` is called, dropping the guard aborts
/// the action and unbinds it on every exit path, including panics and early
/// returns.
pub struct ActionGuard<'a> {
    arm: &'a ActionRecordManager,
    ctx: Arc<ActionContext>,
    finished: bool,
}

impl<'a> ActionGuard<'a> {
    /// The guarded context
    pub fn context(&self) -> &Arc<ActionContext> {
        &self.ctx
    }

    /// Commit the guarded action
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.arm.end_action(&self.ctx)
    }

    /// Abort the guarded action explicitly
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        self.arm.abort_action(&self.ctx)
    }
}

impl std::ops::Deref for ActionGuard<'_> {
    type Target = ActionContext;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.arm.abort_action(&self.ctx);
        }
    }
}
