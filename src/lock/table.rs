use std::collections::HashMap;

use crate::lock::{LockMode, ResourceId};
use crate::session::SessionId;

/// Per-resource lock bookkeeping: at most one exclusive holder, plus a
/// multiset of shared holders. All mutation happens under the manager
/// mutex; this type itself carries no synchronization.
#[derive(Debug, Default)]
pub(crate) struct RowLockTable {
    write: HashMap<ResourceId, SessionId>,
    read: HashMap<ResourceId, Vec<SessionId>>,
}

impl RowLockTable {
    pub fn new() -> RowLockTable {
        RowLockTable::default()
    }

    pub fn acquire(&mut self, resource: ResourceId, session: SessionId, mode: LockMode) {
        match mode {
            LockMode::Read => self.acquire_read(resource, session),
            LockMode::Write => self.acquire_write(resource, session),
        }
    }

    /// Records a shared claim. A READ UNCOMMITTED reader claims past a
    /// foreign write holder, so no exclusivity can be asserted here.
    pub fn acquire_read(&mut self, resource: ResourceId, session: SessionId) {
        self.read.entry(resource).or_insert_with(Vec::new).push(session);
    }

    pub fn acquire_write(&mut self, resource: ResourceId, session: SessionId) {
        debug_assert!(
            self.write.get(&resource).map_or(true, |&w| w == session),
            "double write grant on {:?}",
            resource
        );
        debug_assert!(
            self.read
                .get(&resource)
                .map_or(true, |readers| readers.iter().all(|&r| r == session)),
            "write grant with foreign readers on {:?}",
            resource
        );
        self.write.insert(resource, session);
    }

    /// Removes one shared claim; a session that read the same resource in
    /// several statements keeps its remaining claims.
    pub fn release_read(&mut self, resource: ResourceId, session: SessionId) {
        if let Some(holders) = self.read.get_mut(&resource) {
            if let Some(pos) = holders.iter().position(|&s| s == session) {
                holders.remove(pos);
            }
            if holders.is_empty() {
                self.read.remove(&resource);
            }
        }
    }

    /// Drops every lock the session holds, across all resources.
    pub fn release_all(&mut self, session: SessionId) {
        self.write.retain(|_, &mut holder| holder != session);
        for holders in self.read.values_mut() {
            holders.retain(|&s| s != session);
        }
        self.read.retain(|_, holders| !holders.is_empty());
    }

    pub fn write_holder(&self, resource: ResourceId) -> Option<SessionId> {
        self.write.get(&resource).copied()
    }

    pub fn read_holders(&self, resource: ResourceId) -> &[SessionId] {
        self.read.get(&resource).map_or(&[], |v| v.as_slice())
    }

    /// True when the session already has the requested access, including a
    /// read satisfied by its own write lock.
    pub fn holds(&self, resource: ResourceId, session: SessionId, mode: LockMode) -> bool {
        let writes = self.write_holder(resource) == Some(session);
        match mode {
            LockMode::Write => writes,
            LockMode::Read => writes || self.read_holders(resource).contains(&session),
        }
    }

    pub fn holds_any(&self, session: SessionId) -> bool {
        self.write.values().any(|&s| s == session)
            || self.read.values().any(|holders| holders.contains(&session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const R1: ResourceId = ResourceId::Row(1);
    const R2: ResourceId = ResourceId::Row(2);

    #[test]
    fn single_write_holder() {
        let mut table = RowLockTable::new();
        table.acquire_write(R1, 1);
        assert_eq!(table.write_holder(R1), Some(1));
        assert_eq!(table.write_holder(R2), None);
        assert!(table.holds(R1, 1, LockMode::Write));
        assert!(!table.holds(R1, 2, LockMode::Write));
    }

    #[test]
    fn shared_readers_form_a_multiset() {
        let mut table = RowLockTable::new();
        table.acquire_read(R1, 1);
        table.acquire_read(R1, 2);
        table.acquire_read(R1, 1);
        assert_eq!(table.read_holders(R1), &[1, 2, 1]);

        table.release_read(R1, 1);
        assert_eq!(table.read_holders(R1), &[2, 1]);
        assert!(table.holds(R1, 1, LockMode::Read));
    }

    #[test]
    fn read_claim_recorded_past_foreign_writer() {
        // the dirty-read path: claim coexists with another session's
        // exclusive lock
        let mut table = RowLockTable::new();
        table.acquire_write(R1, 1);
        table.acquire_read(R1, 2);
        assert_eq!(table.write_holder(R1), Some(1));
        assert_eq!(table.read_holders(R1), &[2]);
        table.release_all(2);
        assert_eq!(table.write_holder(R1), Some(1));
    }

    #[test]
    fn own_write_lock_covers_reads() {
        let mut table = RowLockTable::new();
        table.acquire_write(R1, 1);
        assert!(table.holds(R1, 1, LockMode::Read));
        assert!(!table.holds(R1, 2, LockMode::Read));
    }

    #[test]
    fn release_all_clears_every_entry() {
        let mut table = RowLockTable::new();
        table.acquire_write(R1, 1);
        table.acquire_read(R2, 1);
        table.acquire_read(R2, 2);
        table.release_all(1);
        assert!(!table.holds_any(1));
        assert_eq!(table.write_holder(R1), None);
        assert_eq!(table.read_holders(R2), &[2]);
    }

    #[test]
    fn table_and_row_resources_are_distinct() {
        let mut table = RowLockTable::new();
        table.acquire_write(ResourceId::Row(5), 1);
        table.acquire_write(ResourceId::Table(5), 2);
        assert_eq!(table.write_holder(ResourceId::Row(5)), Some(1));
        assert_eq!(table.write_holder(ResourceId::Table(5)), Some(2));
    }
}
