use dashmap::DashMap;

use crate::session::Session;

pub type RowId = u64;
pub type TableId = u64;

/// A physical row as the store hands it out: identity plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: RowId,
    pub table: TableId,
    pub data: Vec<u8>,
}

impl Row {
    pub fn new(id: RowId, table: TableId, data: Vec<u8>) -> Row {
        Row { id, table, data }
    }
}

/// Resulting visible state of a row after merging an undone action against
/// the rollback timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowRestore {
    /// The action predates the rollback point; the row stays as it is.
    Keep,
    /// Undoing an insert: the row disappears.
    Remove,
    /// Undoing a delete or update: the row returns to this state.
    Restore(Row),
}

/// Physical row storage, consumed as a given contract. Visibility changes
/// are driven exclusively by commit and undo.
pub trait RowStore: Send + Sync {
    fn get(&self, row_id: RowId) -> Option<Row>;

    /// Removes the row from the visible set (delete statement execution).
    fn delete(&self, session: &Session, row_id: RowId);

    /// Makes the row visible (insert/update statement execution).
    fn index_row(&self, session: &Session, row: &Row);

    /// Restores the physical row to the merged post-rollback state.
    fn rollback_row(&self, session: &Session, row_id: RowId, restore: RowRestore);

    /// Storage-level commit bookkeeping, invoked once per commit.
    fn persist_commit(&self, session: &Session);
}

/// In-memory store used by the tests and as a reference implementation.
#[derive(Debug, Default)]
pub struct MemStore {
    rows: DashMap<RowId, Row>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    pub fn contains(&self, row_id: RowId) -> bool {
        self.rows.contains_key(&row_id)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl RowStore for MemStore {
    fn get(&self, row_id: RowId) -> Option<Row> {
        self.rows.get(&row_id).map(|r| r.clone())
    }

    fn delete(&self, session: &Session, row_id: RowId) {
        trace!("session {} deletes row {}", session.id(), row_id);
        self.rows.remove(&row_id);
    }

    fn index_row(&self, session: &Session, row: &Row) {
        trace!("session {} indexes row {}", session.id(), row.id);
        self.rows.insert(row.id, row.clone());
    }

    fn rollback_row(&self, session: &Session, row_id: RowId, restore: RowRestore) {
        trace!("session {} restores row {}: {:?}", session.id(), row_id, restore);
        match restore {
            RowRestore::Keep => {}
            RowRestore::Remove => {
                self.rows.remove(&row_id);
            }
            RowRestore::Restore(row) => {
                self.rows.insert(row_id, row);
            }
        }
    }

    fn persist_commit(&self, session: &Session) {
        trace!("session {} commit persisted", session.id());
    }
}
