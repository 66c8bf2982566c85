use std::collections::HashSet;

use crate::lock::wait::WaitGraph;
use crate::session::SessionId;

/// Decides whether a session may safely start waiting on its direct
/// blockers, i.e. whether the new wait edges would close a cycle in the
/// wait-for graph. Denial always lands on the arriving session; an
/// implementation must never have an existing holder preempted.
pub trait DeadlockOracle: Send + Sync {
    fn is_safe_to_wait(
        &self,
        graph: &WaitGraph,
        requester: SessionId,
        blockers: &[SessionId],
    ) -> bool;
}

/// Depth-first search over the wait-for graph: starting from the
/// requester, follow the sessions transitively waiting on it. If any of
/// them is a prospective blocker, the new edges would form a cycle.
#[derive(Debug, Default)]
pub struct WaitForOracle;

impl WaitForOracle {
    pub fn new() -> WaitForOracle {
        WaitForOracle
    }
}

impl DeadlockOracle for WaitForOracle {
    fn is_safe_to_wait(
        &self,
        graph: &WaitGraph,
        requester: SessionId,
        blockers: &[SessionId],
    ) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![requester];
        while let Some(current) = stack.pop() {
            for edge in graph.edges_of(current) {
                if blockers.contains(&edge.waiter) {
                    return false;
                }
                if visited.insert(edge.waiter) {
                    stack.push(edge.waiter);
                }
            }
        }
        true
    }
}
