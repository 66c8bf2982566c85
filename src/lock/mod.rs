pub(crate) mod conflict;
pub mod deadlock;
pub(crate) mod table;
pub mod wait;

use crate::store::{RowId, TableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared access; compatible with other readers.
    Read,
    /// Exclusive access; conflicts with every other lock.
    Write,
}

/// What a lock attaches to. Row granularity is the normal case;
/// SERIALIZABLE sessions lock at table granularity through the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Row(RowId),
    Table(TableId),
}
