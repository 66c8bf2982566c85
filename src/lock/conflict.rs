use crate::lock::table::RowLockTable;
use crate::lock::{LockMode, ResourceId};
use crate::session::{IsolationLevel, SessionId};

/// Computes the direct set of sessions blocking the requested access.
/// Empty means the access is immediately grantable.
pub(crate) fn blockers(
    table: &RowLockTable,
    requester: SessionId,
    isolation: IsolationLevel,
    resource: ResourceId,
    mode: LockMode,
) -> Vec<SessionId> {
    let mut result = Vec::new();
    match mode {
        LockMode::Read => {
            // reads never block under READ UNCOMMITTED
            if isolation == IsolationLevel::ReadUncommitted {
                return result;
            }
            if let Some(holder) = table.write_holder(resource) {
                if holder != requester {
                    result.push(holder);
                }
            }
        }
        LockMode::Write => {
            if let Some(holder) = table.write_holder(resource) {
                if holder != requester {
                    result.push(holder);
                }
            }
            for &holder in table.read_holders(resource) {
                if holder != requester && !result.contains(&holder) {
                    result.push(holder);
                }
            }
        }
    }
    result
}
