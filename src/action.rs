use crate::error::TxnError;
use crate::session::Session;
use crate::store::{Row, RowId, RowRestore, TableId};
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Placeholder with no remaining effect; skipped by undo.
    None,
    Insert,
    Delete,
    /// A delete already made permanent by commit; skipped by undo.
    DeleteFinal,
    Update,
}

/// Record of one row mutation within a transaction, carrying enough state
/// to make the change permanent on commit or undo it on rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowAction {
    pub kind: ActionKind,
    pub row_id: RowId,
    pub table: TableId,
    /// Action timestamp at the moment the change was recorded.
    pub timestamp: Timestamp,
    /// In-memory reference to the affected row: the inserted row for an
    /// insert, the pre-image for a delete or update.
    pub memory_row: Option<Row>,
}

impl RowAction {
    pub fn insert(session: &Session, row: &Row) -> RowAction {
        RowAction {
            kind: ActionKind::Insert,
            row_id: row.id,
            table: row.table,
            timestamp: session.action_timestamp(),
            memory_row: Some(row.clone()),
        }
    }

    pub fn delete(session: &Session, row: &Row) -> RowAction {
        RowAction {
            kind: ActionKind::Delete,
            row_id: row.id,
            table: row.table,
            timestamp: session.action_timestamp(),
            memory_row: Some(row.clone()),
        }
    }

    pub fn update(session: &Session, before: &Row) -> RowAction {
        RowAction {
            kind: ActionKind::Update,
            row_id: before.id,
            table: before.table,
            timestamp: session.action_timestamp(),
            memory_row: Some(before.clone()),
        }
    }

    /// Makes the recorded change permanent. Called once per action, in
    /// original order, during commit.
    pub fn commit(&mut self, session: &Session) -> crate::Result<()> {
        match self.kind {
            ActionKind::Insert => {
                if self.memory_row.is_none() {
                    return Err(TxnError::Invariant(format!(
                        "session {} commits insert of row {} with no recorded row",
                        session.id(),
                        self.row_id
                    )));
                }
            }
            ActionKind::Delete => {
                self.kind = ActionKind::DeleteFinal;
            }
            _ => {}
        }
        Ok(())
    }

    /// Marks the action undone with respect to `timestamp`. Call after
    /// `merge_rollback`: an undone action has no remaining effect.
    pub fn rollback(&mut self, session: &Session, timestamp: Timestamp) {
        trace!(
            "session {} rolls back {:?} on row {} to {}",
            session.id(),
            self.kind,
            self.row_id,
            timestamp
        );
        self.kind = ActionKind::None;
    }

    /// Merges the undone action against the rollback timestamp, yielding
    /// the row's resulting visible state.
    pub fn merge_rollback(&self, timestamp: Timestamp, row: &Row) -> RowRestore {
        if self.timestamp < timestamp {
            return RowRestore::Keep;
        }
        match self.kind {
            ActionKind::Insert => RowRestore::Remove,
            ActionKind::Delete | ActionKind::Update => {
                RowRestore::Restore(self.memory_row.clone().unwrap_or_else(|| row.clone()))
            }
            ActionKind::None | ActionKind::DeleteFinal => RowRestore::Keep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::IsolationLevel;

    fn session() -> Session {
        let s = Session::new(1, IsolationLevel::ReadCommitted);
        s.set_action_timestamp(5);
        s
    }

    #[test]
    fn commit_finalizes_delete() {
        let s = session();
        let row = Row::new(1, 1, vec![]);
        let mut action = RowAction::delete(&s, &row);
        action.commit(&s).unwrap();
        assert_eq!(action.kind, ActionKind::DeleteFinal);
    }

    #[test]
    fn commit_insert_without_row_is_invariant_violation() {
        let s = session();
        let row = Row::new(1, 1, vec![]);
        let mut action = RowAction::insert(&s, &row);
        action.memory_row = None;
        let err = action.commit(&s).unwrap_err();
        assert!(matches!(err, TxnError::Invariant(_)));
    }

    #[test]
    fn rollback_marks_action_undone() {
        let s = session();
        let row = Row::new(1, 1, vec![]);
        let mut action = RowAction::delete(&s, &row);
        action.rollback(&s, 5);
        assert_eq!(action.kind, ActionKind::None);
        // once undone, the action contributes nothing further
        assert_eq!(action.merge_rollback(5, &row), RowRestore::Keep);
    }

    #[test]
    fn merge_undoes_insert_as_remove() {
        let s = session();
        let row = Row::new(1, 1, vec![]);
        let action = RowAction::insert(&s, &row);
        assert_eq!(action.merge_rollback(5, &row), RowRestore::Remove);
    }

    #[test]
    fn merge_restores_pre_image_for_update() {
        let s = session();
        let before = Row::new(1, 1, b"before".to_vec());
        let current = Row::new(1, 1, b"after".to_vec());
        let action = RowAction::update(&s, &before);
        assert_eq!(
            action.merge_rollback(5, &current),
            RowRestore::Restore(before)
        );
    }

    #[test]
    fn merge_keeps_actions_before_rollback_point() {
        let s = session();
        let row = Row::new(1, 1, vec![]);
        let action = RowAction::insert(&s, &row);
        // recorded at ts 5, rolling back to ts 9: untouched
        assert_eq!(action.merge_rollback(9, &row), RowRestore::Keep);
    }
}
