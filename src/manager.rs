use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::action::RowAction;
use crate::error::TxnError;
use crate::lock::conflict;
use crate::lock::deadlock::{DeadlockOracle, WaitForOracle};
use crate::lock::table::RowLockTable;
use crate::lock::wait::{self, SessionMap, WaitGraph};
use crate::lock::{LockMode, ResourceId};
use crate::session::{IsolationLevel, Savepoint, Session, SessionId};
use crate::statement::{SchemaClock, Statement, StatementRecompiler};
use crate::store::{Row, RowId, RowStore};
use crate::timestamp::{Timestamp, TimestampOracle};
use crate::undo;

/// Lock table and wait-for graph, guarded together: every lock decision
/// and every wait-queue re-evaluation is one critical section.
#[derive(Debug, Default)]
struct LockState {
    table: RowLockTable,
    waits: WaitGraph,
}

/// Row-granularity two-phase-locking transaction manager. Sessions run on
/// their own threads and call in per statement; blocking happens on the
/// session's latch, never while holding the manager mutex.
///
/// There is no in-core wait timeout. A caller layering one above the
/// latch wait must treat expiry exactly like a deadlock denial: mark the
/// session aborted and roll back.
pub struct TransactionManager<S: RowStore> {
    store: Arc<S>,
    schema: Arc<dyn SchemaClock>,
    recompiler: Arc<dyn StatementRecompiler>,
    oracle: Box<dyn DeadlockOracle>,
    ts: TimestampOracle,
    sessions: SessionMap,
    state: Mutex<LockState>,
    next_session_id: AtomicU64,
    active_transactions: AtomicU64,
}

impl<S: RowStore> TransactionManager<S> {
    pub fn new(
        store: Arc<S>,
        schema: Arc<dyn SchemaClock>,
        recompiler: Arc<dyn StatementRecompiler>,
    ) -> TransactionManager<S> {
        Self::with_oracle(store, schema, recompiler, Box::new(WaitForOracle::new()))
    }

    pub fn with_oracle(
        store: Arc<S>,
        schema: Arc<dyn SchemaClock>,
        recompiler: Arc<dyn StatementRecompiler>,
        oracle: Box<dyn DeadlockOracle>,
    ) -> TransactionManager<S> {
        TransactionManager {
            store,
            schema,
            recompiler,
            oracle,
            ts: TimestampOracle::new(),
            sessions: DashMap::with_capacity(16),
            state: Mutex::new(LockState::default()),
            next_session_id: AtomicU64::new(1),
            active_transactions: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ------------------------------------------------------------------
    // sessions
    // ------------------------------------------------------------------

    pub fn new_session(&self, isolation: IsolationLevel) -> Arc<Session> {
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session::new(id, isolation));
        self.sessions.insert(id, session.clone());
        session
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|s| Arc::clone(s.value()))
    }

    /// Deregisters an idle session, dropping any stray lock or wait-graph
    /// bookkeeping it left behind.
    pub fn remove_session(&self, id: SessionId) {
        let mut state = self.state.lock().unwrap();
        state.table.release_all(id);
        state.waits.unregister(id);
        drop(state);
        self.sessions.remove(&id);
    }

    // ------------------------------------------------------------------
    // transaction lifecycle
    // ------------------------------------------------------------------

    pub fn begin_transaction(&self, session: &Session) {
        if !session.in_transaction() {
            let ts = self.ts.next();
            session.set_action_timestamp(ts);
            session.set_transaction_timestamp(ts);
            session.set_in_transaction(true);
            self.active_transactions.fetch_add(1, Ordering::SeqCst);
            debug!("session {} begins transaction at {}", session.id(), ts);
        }
    }

    /// Stamps the statement's timestamps once its locks are granted; also
    /// starts the transaction implicitly for the first statement.
    pub fn begin_action_resume(&self, session: &Session) {
        let ts = self.ts.next();
        session.set_action_timestamp(ts);
        session.set_action_start_timestamp(ts);
        if !session.in_transaction() {
            session.set_transaction_timestamp(ts);
            session.set_in_transaction(true);
            self.active_transactions.fetch_add(1, Ordering::SeqCst);
        }
        session.set_executing(true);
        let mut tx = session.tx_state();
        tx.action_index = tx.actions.len();
    }

    /// Pre-statement lock acquisition at table granularity. Only
    /// SERIALIZABLE sessions lock here; the others lock per row.
    pub fn begin_action(
        &self,
        session: &Arc<Session>,
        statement: &Statement,
    ) -> crate::Result<Statement> {
        if session.is_aborted() {
            return Err(TxnError::Aborted(session.id()));
        }
        let statement = self.refresh_statement(session, statement)?;
        if session.isolation() == IsolationLevel::Serializable {
            self.acquire(session, ResourceId::Table(statement.table), statement.mode)?;
        }
        Ok(statement)
    }

    /// Requests permission to touch one row. Blocks the calling thread
    /// while conflicting holders exist; a deadlock denial marks the
    /// session aborted and surfaces as an error, and the statement must
    /// not execute.
    pub fn begin_action_row(
        &self,
        session: &Arc<Session>,
        statement: &Statement,
        row_id: RowId,
    ) -> crate::Result<Statement> {
        if session.is_aborted() {
            return Err(TxnError::Aborted(session.id()));
        }
        let statement = self.refresh_statement(session, statement)?;
        let resource = if session.isolation() == IsolationLevel::Serializable {
            ResourceId::Table(statement.table)
        } else {
            ResourceId::Row(row_id)
        };
        self.acquire(session, resource, statement.mode)?;
        Ok(statement)
    }

    /// Two-phase-commit hook: stamps the prepare point.
    pub fn prepare_commit_actions(&self, session: &Session) {
        session.set_action_timestamp(self.ts.next());
    }

    pub fn commit_transaction(&self, session: &Arc<Session>) -> crate::Result<()> {
        if session.is_aborted() {
            return Err(TxnError::Aborted(session.id()));
        }

        let mut state = self.state.lock().unwrap();

        let commit_ts = self.ts.next();
        session.set_action_timestamp(commit_ts);
        session.set_transaction_end_timestamp(commit_ts);
        self.close_transaction(session);

        {
            let mut tx = session.tx_state();
            for action in tx.actions.iter_mut() {
                action.commit(session)?;
            }
            tx.actions.clear();
            tx.savepoints.clear();
            tx.action_index = 0;
        }
        self.store.persist_commit(session);

        self.release_transaction_locks(&mut *state, session);
        debug!("session {} committed at {}", session.id(), commit_ts);
        Ok(())
    }

    pub fn rollback(&self, session: &Arc<Session>) -> crate::Result<()> {
        session.clear_abort();
        let ts = self.ts.next();
        session.set_action_timestamp(ts);
        session.set_transaction_end_timestamp(ts);

        undo::rollback_partial(
            session,
            self.store.as_ref(),
            0,
            session.transaction_timestamp(),
        )?;
        self.close_transaction(session);

        let mut state = self.state.lock().unwrap();
        self.release_transaction_locks(&mut *state, session);
        drop(state);

        let mut tx = session.tx_state();
        tx.savepoints.clear();
        tx.action_index = 0;
        drop(tx);
        debug!("session {} rolled back at {}", session.id(), ts);
        Ok(())
    }

    /// Records a savepoint at the current position in the action list and
    /// returns its index.
    pub fn savepoint(&self, session: &Session) -> usize {
        let mut tx = session.tx_state();
        let index = tx.actions.len();
        tx.savepoints.push(Savepoint {
            index,
            timestamp: session.action_timestamp(),
        });
        tx.savepoints.len() - 1
    }

    /// Undoes only the actions recorded after savepoint `index`; earlier
    /// state and locks are untouched. Savepoints past `index` are dropped.
    pub fn rollback_savepoint(&self, session: &Arc<Session>, index: usize) -> crate::Result<()> {
        let (start, timestamp) = {
            let mut tx = session.tx_state();
            let savepoint = *tx.savepoints.get(index).ok_or_else(|| {
                TxnError::Invariant(format!(
                    "session {} has no savepoint {}",
                    session.id(),
                    index
                ))
            })?;
            tx.savepoints.truncate(index + 1);
            (savepoint.index, savepoint.timestamp)
        };
        undo::rollback_partial(session, self.store.as_ref(), start, timestamp)
    }

    /// Undoes the current statement's actions and releases only that
    /// statement's locks.
    pub fn rollback_action(&self, session: &Arc<Session>, row_id: RowId) -> crate::Result<()> {
        let start = session.tx_state().action_index;
        undo::rollback_partial(
            session,
            self.store.as_ref(),
            start,
            session.action_start_timestamp(),
        )?;
        self.end_action(session, row_id);
        Ok(())
    }

    /// End-of-statement lock release. Under READ COMMITTED and READ
    /// UNCOMMITTED the statement's read lock on the row is given up and
    /// waiters are re-evaluated; the stricter levels keep read locks to
    /// transaction end. No-op inside nested routine/trigger contexts.
    pub fn end_action(&self, session: &Arc<Session>, row_id: RowId) {
        // inside a routine the outer statement is still in flight: neither
        // release anything nor clear its statement marker
        if session.nesting_depth() > 0 {
            return;
        }
        if session.executing() {
            match session.isolation() {
                IsolationLevel::ReadUncommitted | IsolationLevel::ReadCommitted => {
                    self.end_action_release(session, row_id);
                }
                IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {}
            }
        }
        session.set_executing(false);
    }

    // ------------------------------------------------------------------
    // row actions
    // ------------------------------------------------------------------

    pub fn add_insert_action(&self, session: &Session, row: Row) -> crate::Result<()> {
        self.store.index_row(session, &row);
        let action = RowAction::insert(session, &row);
        session.tx_state().actions.push(action);
        Ok(())
    }

    pub fn add_delete_action(&self, session: &Session, row_id: RowId) -> crate::Result<()> {
        let row = self.store.get(row_id).ok_or_else(|| {
            TxnError::Invariant(format!(
                "session {} deletes missing row {}",
                session.id(),
                row_id
            ))
        })?;
        let action = RowAction::delete(session, &row);
        session.tx_state().actions.push(action);
        self.store.delete(session, row_id);
        Ok(())
    }

    pub fn add_update_action(&self, session: &Session, row: Row) -> crate::Result<()> {
        let before = self.store.get(row.id).ok_or_else(|| {
            TxnError::Invariant(format!(
                "session {} updates missing row {}",
                session.id(),
                row.id
            ))
        })?;
        let action = RowAction::update(session, &before);
        session.tx_state().actions.push(action);
        self.store.index_row(session, &row);
        Ok(())
    }

    // ------------------------------------------------------------------
    // inspection
    // ------------------------------------------------------------------

    pub fn write_holder(&self, resource: ResourceId) -> Option<SessionId> {
        self.state.lock().unwrap().table.write_holder(resource)
    }

    pub fn read_holders(&self, resource: ResourceId) -> Vec<SessionId> {
        self.state.lock().unwrap().table.read_holders(resource).to_vec()
    }

    pub fn holds_any_locks(&self, session: &Session) -> bool {
        self.state.lock().unwrap().table.holds_any(session.id())
    }

    pub fn active_transactions(&self) -> u64 {
        self.active_transactions.load(Ordering::SeqCst)
    }

    pub fn global_change_timestamp(&self) -> Timestamp {
        self.ts.current()
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    fn refresh_statement(
        &self,
        session: &Session,
        statement: &Statement,
    ) -> crate::Result<Statement> {
        if statement.compile_timestamp < self.schema.schema_change_timestamp() {
            match self.recompiler.recompile(session, statement) {
                Some(fresh) => {
                    debug!(
                        "statement {} recompiled for session {}",
                        statement.id,
                        session.id()
                    );
                    Ok(fresh)
                }
                None => Err(TxnError::StaleStatement(statement.id)),
            }
        } else {
            Ok(statement.clone())
        }
    }

    /// Lock acquisition loop. Decisions are made under the manager mutex;
    /// the mutex is dropped before the thread parks on its latch, and the
    /// whole check is redone on wakeup because a releaser may have granted
    /// the lock on this session's behalf, or the blocker set may have
    /// changed entirely.
    fn acquire(
        &self,
        session: &Arc<Session>,
        resource: ResourceId,
        mode: LockMode,
    ) -> crate::Result<()> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if session.is_aborted() {
                    return Err(TxnError::Aborted(session.id()));
                }
                let LockState { table, waits } = &mut *state;
                if table.holds(resource, session.id(), mode) {
                    return Ok(());
                }
                let blockers = conflict::blockers(
                    table,
                    session.id(),
                    session.isolation(),
                    resource,
                    mode,
                );
                if blockers.is_empty() {
                    table.acquire(resource, session.id(), mode);
                    trace!(
                        "session {} acquired {:?} on {:?}",
                        session.id(),
                        mode,
                        resource
                    );
                    return Ok(());
                }
                if !self.oracle.is_safe_to_wait(waits, session.id(), &blockers) {
                    session.mark_aborted();
                    info!(
                        "session {} denied {:?} on {:?}: waiting on {:?} would deadlock",
                        session.id(),
                        mode,
                        resource,
                        blockers
                    );
                    return Err(TxnError::Deadlock(session.id()));
                }
                waits.register(session.id(), resource, mode, &blockers);
                session.latch().set_count(blockers.len() as u64);
                debug!(
                    "session {} waiting for {:?} on {:?} behind {:?}",
                    session.id(),
                    mode,
                    resource,
                    blockers
                );
            }
            session.latch().await_zero(|| session.is_aborted());
            if session.is_aborted() {
                return Err(TxnError::Aborted(session.id()));
            }
        }
    }

    fn close_transaction(&self, session: &Session) {
        if session.in_transaction() {
            session.set_in_transaction(false);
            self.active_transactions.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// End-of-transaction release: every lock goes, then the wait queue is
    /// re-evaluated if anyone was parked behind this session. SERIALIZABLE
    /// sessions release their table-granularity locks through the same
    /// path.
    fn release_transaction_locks(&self, state: &mut LockState, session: &Session) {
        let LockState { table, waits } = state;
        table.release_all(session.id());
        waits.unregister(session.id());
        if waits.has_waiters(session.id()) {
            wait::reset_locks_and_latches(
                table,
                waits,
                &self.sessions,
                self.oracle.as_ref(),
                session,
            );
        }
    }

    fn end_action_release(&self, session: &Arc<Session>, row_id: RowId) {
        let mut state = self.state.lock().unwrap();
        let LockState { table, waits } = &mut *state;
        let resource = ResourceId::Row(row_id);

        // a read satisfied by the session's own write lock has no read
        // entry, so this only gives up the statement's shared claim
        table.release_read(resource, session.id());

        if !waits.has_waiters(session.id()) {
            return;
        }
        // if our write lock on the row is what they wait on, nothing can
        // be granted before transaction end
        if table.write_holder(resource) == Some(session.id()) {
            return;
        }
        for edge in waits.edges_of(session.id()) {
            if let Some(waiter) = self.sessions.get(&edge.waiter) {
                if !waiter.is_aborted() && waiter.executing() {
                    // a waiter's own statement is still in flight
                    return;
                }
            }
        }
        wait::reset_latches_mid_transaction(
            table,
            waits,
            &self.sessions,
            self.oracle.as_ref(),
            session,
        );
    }
}
