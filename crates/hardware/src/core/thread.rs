//! Thread Table.
//!
//! The table is the sole owner of every software thread's state. Scheduling
//! collections hold only ids:
//! 1. **Ready queue:** FIFO of threads waiting for a hart.
//! 2. **Blocked list:** Threads joining another thread, in blocking order.
//! 3. **Completed map:** Threads that finished here or migrated away, keyed by id.
//!
//! A running thread is referenced from exactly one hart slot, which the
//! scheduler owns. A thread id is never held by two of these places at once.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use tracing::debug;

use crate::common::constants::STACK_ALIGN;
use crate::common::reg::{REG_SP, REG_TP};
use crate::common::{RegisterFile, SchedError};
use crate::soc::memory::segments::SegmentId;

/// Identifier of a software thread, unique within a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Lifecycle state of a thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// Created, not yet registered with a scheduling collection.
    Start,
    /// Waiting in the ready queue.
    Ready,
    /// Assigned to a hart.
    Running,
    /// Waiting for another thread to complete.
    Blocked,
    /// Shipped to another node.
    Migrated,
    /// Finished on this node.
    Done,
}

impl ThreadState {
    /// Returns `true` for the states that place a thread in the completed map.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Migrated | Self::Done)
    }

    /// Returns `true` if the lifecycle allows moving from `self` to `to`.
    pub const fn can_become(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Start, Self::Ready | Self::Blocked)
                | (Self::Ready, Self::Running)
                | (Self::Running, Self::Ready | Self::Blocked | Self::Migrated | Self::Done)
                | (Self::Blocked, Self::Ready)
        )
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "Start",
            Self::Ready => "Ready",
            Self::Running => "Running",
            Self::Blocked => "Blocked",
            Self::Migrated => "Migrated",
            Self::Done => "Done",
        };
        f.write_str(name)
    }
}

/// One software thread.
#[derive(Clone, Debug)]
pub struct Thread {
    /// Thread id.
    pub id: ThreadId,
    /// Creating thread, `None` for the main thread.
    pub parent: Option<ThreadId>,
    /// Lifecycle state.
    pub state: ThreadState,
    /// Owned stack and TLS segment, if the thread has one.
    pub segment: Option<SegmentId>,
    /// Register snapshot.
    pub regs: RegisterFile,
    /// Thread this one is joining.
    pub waiting_on: Option<ThreadId>,
}

/// Owner of all thread state on a node.
#[derive(Debug, Default)]
pub struct ThreadTable {
    threads: HashMap<ThreadId, Thread>,
    ready: VecDeque<ThreadId>,
    blocked: Vec<ThreadId>,
    completed: BTreeMap<ThreadId, ThreadState>,
    next_id: u32,
}

impl ThreadTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh(
        &mut self,
        parent: Option<ThreadId>,
        start: u64,
        stack_top: u64,
        segment: Option<SegmentId>,
    ) -> ThreadId {
        let id = ThreadId(self.next_id);
        self.next_id += 1;
        let mut regs = RegisterFile::new();
        regs.pc = start;
        let sp = stack_top & !(STACK_ALIGN - 1);
        regs.write(REG_SP, sp);
        regs.write(REG_TP, sp);
        let _ = self.threads.insert(
            id,
            Thread {
                id,
                parent,
                state: ThreadState::Start,
                segment,
                regs,
                waiting_on: None,
            },
        );
        id
    }

    /// Creates a thread and appends it to the ready queue.
    ///
    /// The program counter is `start`; the stack and thread pointers are
    /// `stack_top` rounded down to the stack alignment.
    pub fn create(
        &mut self,
        parent: Option<ThreadId>,
        start: u64,
        stack_top: u64,
        segment: Option<SegmentId>,
    ) -> ThreadId {
        let id = self.fresh(parent, start, stack_top, segment);
        if let Some(thread) = self.threads.get_mut(&id) {
            thread.state = ThreadState::Ready;
        }
        self.ready.push_back(id);
        debug!(tid = %id, parent = ?parent, pc = format_args!("{start:#x}"), "thread created");
        id
    }

    /// Creates a thread that starts out joining `target`.
    ///
    /// # Errors
    ///
    /// Returns `SchedError::UnknownThread` if `target` was never issued.
    pub fn create_blocked(
        &mut self,
        parent: Option<ThreadId>,
        start: u64,
        stack_top: u64,
        target: ThreadId,
    ) -> Result<ThreadId, SchedError> {
        if !self.threads.contains_key(&target) {
            return Err(SchedError::UnknownThread(target));
        }
        let id = self.fresh(parent, start, stack_top, None);
        if let Some(thread) = self.threads.get_mut(&id) {
            thread.state = ThreadState::Blocked;
            thread.waiting_on = Some(target);
        }
        self.blocked.push(id);
        debug!(tid = %id, waiting_on = %target, "thread created blocked");
        Ok(id)
    }

    /// Looks up a thread.
    pub fn get(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(&id)
    }

    /// Looks up a thread mutably.
    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(&id)
    }

    /// Current state of a thread.
    pub fn state(&self, id: ThreadId) -> Option<ThreadState> {
        self.threads.get(&id).map(|t| t.state)
    }

    /// Moves `id` to `to` after checking the lifecycle allows it.
    ///
    /// Only the state changes; queue membership is the caller's concern.
    ///
    /// # Errors
    ///
    /// `SchedError::UnknownThread` or `SchedError::ImpossibleTransition`.
    pub fn transition(&mut self, id: ThreadId, core: usize, to: ThreadState) -> Result<(), SchedError> {
        let thread = self.threads.get_mut(&id).ok_or(SchedError::UnknownThread(id))?;
        let from = thread.state;
        if !from.can_become(to) {
            return Err(SchedError::ImpossibleTransition {
                tid: id,
                core,
                from,
                to,
            });
        }
        thread.state = to;
        debug!(tid = %id, core, %from, %to, "thread transition");
        Ok(())
    }

    /// Pops the head of the ready queue and marks it running.
    ///
    /// # Errors
    ///
    /// Propagates a lifecycle violation if the queued thread is not ready.
    pub fn pop_ready(&mut self, core: usize) -> Result<Option<ThreadId>, SchedError> {
        let Some(id) = self.ready.pop_front() else {
            return Ok(None);
        };
        self.transition(id, core, ThreadState::Running)?;
        Ok(Some(id))
    }

    /// Returns a running thread to the back of the ready queue.
    ///
    /// # Errors
    ///
    /// Propagates a lifecycle violation.
    pub fn requeue(&mut self, id: ThreadId, core: usize) -> Result<(), SchedError> {
        self.transition(id, core, ThreadState::Ready)?;
        self.ready.push_back(id);
        Ok(())
    }

    /// Blocks a running thread until `target` completes.
    ///
    /// # Errors
    ///
    /// `SchedError::UnknownThread` if `target` was never issued, otherwise a
    /// lifecycle violation.
    pub fn block(&mut self, id: ThreadId, core: usize, target: ThreadId) -> Result<(), SchedError> {
        if !self.threads.contains_key(&target) {
            return Err(SchedError::UnknownThread(target));
        }
        self.transition(id, core, ThreadState::Blocked)?;
        if let Some(thread) = self.threads.get_mut(&id) {
            thread.waiting_on = Some(target);
        }
        self.blocked.push(id);
        Ok(())
    }

    /// Moves a running thread into the completed map as `Done` or `Migrated`.
    ///
    /// # Errors
    ///
    /// Propagates a lifecycle violation, including a non-terminal `state`.
    pub fn complete(&mut self, id: ThreadId, core: usize, state: ThreadState) -> Result<(), SchedError> {
        if !state.is_terminal() {
            let from = self.state(id).ok_or(SchedError::UnknownThread(id))?;
            return Err(SchedError::ImpossibleTransition {
                tid: id,
                core,
                from,
                to: state,
            });
        }
        self.transition(id, core, state)?;
        let _ = self.completed.insert(id, state);
        Ok(())
    }

    /// Wakes every blocked thread whose join target is in the completed map.
    ///
    /// Woken threads join the back of the ready queue in blocking order.
    ///
    /// # Returns
    ///
    /// The woken thread ids.
    pub fn check_blocked(&mut self) -> Vec<ThreadId> {
        let mut woken = Vec::new();
        let mut still = Vec::with_capacity(self.blocked.len());
        for id in std::mem::take(&mut self.blocked) {
            let satisfied = self
                .threads
                .get(&id)
                .and_then(|t| t.waiting_on)
                .is_some_and(|target| self.completed.contains_key(&target));
            if satisfied {
                if let Some(thread) = self.threads.get_mut(&id) {
                    thread.state = ThreadState::Ready;
                    thread.waiting_on = None;
                }
                self.ready.push_back(id);
                woken.push(id);
            } else {
                still.push(id);
            }
        }
        self.blocked = still;
        if !woken.is_empty() {
            debug!(woken = ?woken, "join satisfied");
        }
        woken
    }

    /// Ids in the ready queue, head first.
    pub fn ready(&self) -> Vec<ThreadId> {
        self.ready.iter().copied().collect()
    }

    /// Ids in the blocked list.
    pub fn blocked(&self) -> &[ThreadId] {
        &self.blocked
    }

    /// The completed map.
    pub const fn completed(&self) -> &BTreeMap<ThreadId, ThreadState> {
        &self.completed
    }

    /// Returns `true` if `id` is in the completed map.
    pub fn is_completed(&self, id: ThreadId) -> bool {
        self.completed.contains_key(&id)
    }

    /// Returns `true` if no thread is waiting for a hart.
    pub fn ready_is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// Returns `true` if no thread is blocked.
    pub fn blocked_is_empty(&self) -> bool {
        self.blocked.is_empty()
    }

    /// Number of threads ever created.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Returns `true` if no thread was ever created.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}
