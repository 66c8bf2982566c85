use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::action::RowAction;
use crate::latch::CountdownLatch;
use crate::timestamp::Timestamp;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IsolationLevel {
    ReadUncommitted = 0,
    ReadCommitted = 1,
    RepeatableRead = 2,
    Serializable = 3,
}

impl IsolationLevel {
    fn from_u8(value: u8) -> IsolationLevel {
        match value {
            0 => IsolationLevel::ReadUncommitted,
            1 => IsolationLevel::ReadCommitted,
            2 => IsolationLevel::RepeatableRead,
            _ => IsolationLevel::Serializable,
        }
    }

    /// Read locks outlive the statement under the stricter levels.
    pub fn holds_reads_to_transaction_end(self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }
}

/// A savepoint marks a position in the recorded action list together with
/// the action timestamp current when it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint {
    pub index: usize,
    pub timestamp: Timestamp,
}

/// Transaction-scoped state owned by the session thread. Only that thread
/// mutates it, but the manager reads it under its own mutex during commit
/// and wait-queue re-evaluation, hence the `Mutex`.
#[derive(Debug, Default)]
pub struct SessionTx {
    pub actions: Vec<RowAction>,
    pub savepoints: Vec<Savepoint>,
    /// Index into `actions` where the current statement started.
    pub action_index: usize,
}

/// One unit of execution. A session runs on its own thread; the lock
/// manager references sessions by id and never owns them.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    isolation: AtomicU8,
    aborted: AtomicBool,
    in_transaction: AtomicBool,
    /// True while a statement is running on the session thread; cleared
    /// while the thread is parked on the latch.
    executing: AtomicBool,
    /// Routine/trigger nesting depth; statement-end lock release is
    /// suppressed inside nested contexts.
    depth: AtomicU32,
    transaction_ts: AtomicU64,
    transaction_end_ts: AtomicU64,
    action_ts: AtomicU64,
    action_start_ts: AtomicU64,
    /// Scratch flag used by wait-queue re-evaluation: set when a release
    /// granted this session its lock in the current round.
    resumed: AtomicBool,
    latch: CountdownLatch,
    tx: Mutex<SessionTx>,
}

impl Session {
    pub fn new(id: SessionId, isolation: IsolationLevel) -> Session {
        Session {
            id,
            isolation: AtomicU8::new(isolation as u8),
            aborted: AtomicBool::new(false),
            in_transaction: AtomicBool::new(false),
            executing: AtomicBool::new(false),
            depth: AtomicU32::new(0),
            transaction_ts: AtomicU64::new(0),
            transaction_end_ts: AtomicU64::new(0),
            action_ts: AtomicU64::new(0),
            action_start_ts: AtomicU64::new(0),
            resumed: AtomicBool::new(false),
            latch: CountdownLatch::new(),
            tx: Mutex::new(SessionTx::default()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        IsolationLevel::from_u8(self.isolation.load(Ordering::SeqCst))
    }

    /// Takes effect for subsequent transactions; must not be changed while
    /// a transaction is active.
    pub fn set_isolation(&self, isolation: IsolationLevel) {
        self.isolation.store(isolation as u8, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn mark_aborted(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn clear_abort(&self) {
        self.aborted.store(false, Ordering::SeqCst);
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    pub(crate) fn set_in_transaction(&self, active: bool) {
        self.in_transaction.store(active, Ordering::SeqCst);
    }

    pub fn executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    pub(crate) fn set_executing(&self, executing: bool) {
        self.executing.store(executing, Ordering::SeqCst);
    }

    pub fn nesting_depth(&self) -> u32 {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn enter_routine(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    pub fn exit_routine(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn transaction_timestamp(&self) -> Timestamp {
        self.transaction_ts.load(Ordering::SeqCst)
    }

    pub(crate) fn set_transaction_timestamp(&self, ts: Timestamp) {
        self.transaction_ts.store(ts, Ordering::SeqCst);
    }

    pub fn transaction_end_timestamp(&self) -> Timestamp {
        self.transaction_end_ts.load(Ordering::SeqCst)
    }

    pub(crate) fn set_transaction_end_timestamp(&self, ts: Timestamp) {
        self.transaction_end_ts.store(ts, Ordering::SeqCst);
    }

    pub fn action_timestamp(&self) -> Timestamp {
        self.action_ts.load(Ordering::SeqCst)
    }

    pub(crate) fn set_action_timestamp(&self, ts: Timestamp) {
        self.action_ts.store(ts, Ordering::SeqCst);
    }

    pub fn action_start_timestamp(&self) -> Timestamp {
        self.action_start_ts.load(Ordering::SeqCst)
    }

    pub(crate) fn set_action_start_timestamp(&self, ts: Timestamp) {
        self.action_start_ts.store(ts, Ordering::SeqCst);
    }

    pub(crate) fn resumed(&self) -> bool {
        self.resumed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_resumed(&self, resumed: bool) {
        self.resumed.store(resumed, Ordering::SeqCst);
    }

    pub fn latch(&self) -> &CountdownLatch {
        &self.latch
    }

    pub fn tx_state(&self) -> MutexGuard<'_, SessionTx> {
        self.tx.lock().unwrap()
    }

    /// Number of actions recorded in the current transaction.
    pub fn action_count(&self) -> usize {
        self.tx_state().actions.len()
    }
}
