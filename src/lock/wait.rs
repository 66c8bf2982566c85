use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::lock::conflict;
use crate::lock::deadlock::DeadlockOracle;
use crate::lock::table::RowLockTable;
use crate::lock::{LockMode, ResourceId};
use crate::session::{Session, SessionId};

pub(crate) type SessionMap = DashMap<SessionId, Arc<Session>>;

/// One edge of the wait-for graph: `waiter` is blocked on the resource
/// while the keying session holds a conflicting lock on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitEdge {
    pub waiter: SessionId,
    pub resource: ResourceId,
    pub mode: LockMode,
}

/// Wait-for graph owned by the lock manager, keyed by the blocking
/// session. Sessions are referenced by id only; the graph holds no session
/// state of its own.
#[derive(Debug, Default)]
pub struct WaitGraph {
    edges: HashMap<SessionId, Vec<WaitEdge>>,
}

impl WaitGraph {
    pub fn new() -> WaitGraph {
        WaitGraph::default()
    }

    /// Registers `waiter` as blocked on each of `blockers`. Any previous
    /// registration of the waiter is dropped first, so its latch count and
    /// its edge count always agree.
    pub fn register(
        &mut self,
        waiter: SessionId,
        resource: ResourceId,
        mode: LockMode,
        blockers: &[SessionId],
    ) {
        self.unregister(waiter);
        let edge = WaitEdge {
            waiter,
            resource,
            mode,
        };
        for &blocker in blockers {
            self.edges.entry(blocker).or_insert_with(Vec::new).push(edge);
        }
    }

    /// Drops every edge naming `waiter`.
    pub fn unregister(&mut self, waiter: SessionId) {
        for edges in self.edges.values_mut() {
            edges.retain(|e| e.waiter != waiter);
        }
        self.edges.retain(|_, edges| !edges.is_empty());
    }

    /// Removes and returns the edges of sessions waiting on `blocker`.
    pub fn take_edges(&mut self, blocker: SessionId) -> Vec<WaitEdge> {
        self.edges.remove(&blocker).unwrap_or_default()
    }

    pub fn edges_of(&self, blocker: SessionId) -> &[WaitEdge] {
        self.edges.get(&blocker).map_or(&[], |v| v.as_slice())
    }

    pub fn has_waiters(&self, blocker: SessionId) -> bool {
        !self.edges_of(blocker).is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Full wait-queue re-evaluation after an end-of-transaction release. The
/// releaser is out of the picture: its edges are consumed, its latch is
/// cleared.
pub(crate) fn reset_locks_and_latches(
    table: &mut RowLockTable,
    graph: &mut WaitGraph,
    sessions: &SessionMap,
    oracle: &dyn DeadlockOracle,
    releaser: &Session,
) {
    let edges = graph.take_edges(releaser.id());
    releaser.latch().set_count(0);
    requeue(table, graph, sessions, oracle, &edges);
}

/// Re-evaluation after a mid-transaction release (statement-end read
/// unlock). The waiter list is snapshotted and cleared up front because
/// re-registration may attach new edges to the releaser itself, which
/// still holds locks.
pub(crate) fn reset_latches_mid_transaction(
    table: &mut RowLockTable,
    graph: &mut WaitGraph,
    sessions: &SessionMap,
    oracle: &dyn DeadlockOracle,
    releaser: &Session,
) {
    let edges = graph.take_edges(releaser.id());
    requeue(table, graph, sessions, oracle, &edges);
}

/// Two passes over the resolved edges. First: waiters for whom this was
/// the last outstanding blocker get an immediate grant attempt. Second:
/// everyone not granted and not aborted is re-registered against the new
/// lock-table state, which can introduce wait edges distinct from the
/// original ones.
fn requeue(
    table: &mut RowLockTable,
    graph: &mut WaitGraph,
    sessions: &SessionMap,
    oracle: &dyn DeadlockOracle,
    edges: &[WaitEdge],
) {
    for edge in edges {
        let waiter = match sessions.get(&edge.waiter) {
            Some(s) => Arc::clone(s.value()),
            None => continue,
        };
        waiter.set_resumed(false);
        if waiter.is_aborted() {
            continue;
        }
        if waiter.latch().count() == 1 {
            let blockers = conflict::blockers(
                table,
                waiter.id(),
                waiter.isolation(),
                edge.resource,
                edge.mode,
            );
            if blockers.is_empty() {
                table.acquire(edge.resource, waiter.id(), edge.mode);
                waiter.set_resumed(true);
                trace!(
                    "session {} granted {:?} on {:?} by release",
                    waiter.id(),
                    edge.mode,
                    edge.resource
                );
            }
        }
    }

    for edge in edges {
        let waiter = match sessions.get(&edge.waiter) {
            Some(s) => Arc::clone(s.value()),
            None => continue,
        };
        if waiter.resumed() || waiter.is_aborted() {
            graph.unregister(waiter.id());
            waiter.latch().set_count(0);
            continue;
        }
        let blockers = conflict::blockers(
            table,
            waiter.id(),
            waiter.isolation(),
            edge.resource,
            edge.mode,
        );
        if blockers.is_empty() {
            // freed without a pass-one grant; the waiter retries on wakeup
            graph.unregister(waiter.id());
            waiter.latch().set_count(0);
            continue;
        }
        if !oracle.is_safe_to_wait(graph, waiter.id(), &blockers) {
            info!(
                "session {} re-queued into a deadlock, denied",
                waiter.id()
            );
            waiter.mark_aborted();
            graph.unregister(waiter.id());
            waiter.latch().set_count(0);
            continue;
        }
        graph.register(waiter.id(), edge.resource, edge.mode, &blockers);
        waiter.latch().set_count(blockers.len() as u64);
        debug!(
            "session {} re-queued on {:?}, now behind {} session(s)",
            waiter.id(),
            edge.resource,
            blockers.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_replaces_previous_edges() {
        let mut graph = WaitGraph::new();
        let r = ResourceId::Row(1);
        graph.register(10, r, LockMode::Write, &[1, 2]);
        assert_eq!(graph.edges_of(1).len(), 1);
        assert_eq!(graph.edges_of(2).len(), 1);

        graph.register(10, r, LockMode::Write, &[2]);
        assert!(graph.edges_of(1).is_empty());
        assert_eq!(graph.edges_of(2).len(), 1);
    }

    #[test]
    fn take_edges_consumes() {
        let mut graph = WaitGraph::new();
        let r = ResourceId::Row(1);
        graph.register(10, r, LockMode::Read, &[1]);
        graph.register(11, r, LockMode::Write, &[1]);
        let taken = graph.take_edges(1);
        assert_eq!(taken.len(), 2);
        assert!(graph.is_empty());
    }

    #[test]
    fn unregister_drops_all_edges_of_waiter() {
        let mut graph = WaitGraph::new();
        graph.register(10, ResourceId::Row(1), LockMode::Write, &[1, 2]);
        graph.register(11, ResourceId::Row(2), LockMode::Write, &[1]);
        graph.unregister(10);
        assert_eq!(graph.edges_of(1).len(), 1);
        assert_eq!(graph.edges_of(1)[0].waiter, 11);
        assert!(graph.edges_of(2).is_empty());
    }
}
