use crate::action::ActionKind;
use crate::session::Session;
use crate::store::RowStore;
use crate::timestamp::Timestamp;

/// Replays the session's recorded actions in reverse from the end of the
/// list down to `start`, restoring every touched row to its state as of
/// `timestamp`, then truncates the list to `start`. All-or-nothing: a
/// failure here would leave the database inconsistent, so there is no
/// partial-success path.
pub(crate) fn rollback_partial<S: RowStore>(
    session: &Session,
    store: &S,
    start: usize,
    timestamp: Timestamp,
) -> crate::Result<()> {
    let mut tx = session.tx_state();
    let limit = tx.actions.len();
    if start >= limit {
        return Ok(());
    }

    debug!(
        "session {} undoing actions {}..{} to {}",
        session.id(),
        start,
        limit,
        timestamp
    );

    for i in (start..limit).rev() {
        let action = &mut tx.actions[i];
        if matches!(action.kind, ActionKind::None | ActionKind::DeleteFinal) {
            continue;
        }
        let row = match action.memory_row.clone().or_else(|| store.get(action.row_id)) {
            Some(row) => row,
            None => continue,
        };
        let restore = action.merge_rollback(timestamp, &row);
        action.rollback(session, timestamp);
        store.rollback_row(session, action.row_id, restore);
    }

    tx.actions.truncate(start);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::RowAction;
    use crate::session::IsolationLevel;
    use crate::store::{MemStore, Row};

    fn insert(session: &Session, store: &MemStore, id: u64, data: &[u8], ts: u64) {
        session.set_action_timestamp(ts);
        let row = Row::new(id, 1, data.to_vec());
        store.index_row(session, &row);
        session.tx_state().actions.push(RowAction::insert(session, &row));
    }

    #[test]
    fn undoes_in_reverse_down_to_start() {
        let session = Session::new(1, IsolationLevel::ReadCommitted);
        let store = MemStore::new();
        insert(&session, &store, 1, b"a", 10);
        insert(&session, &store, 2, b"b", 11);
        insert(&session, &store, 3, b"c", 12);

        rollback_partial(&session, &store, 1, 11).unwrap();

        assert!(store.contains(1));
        assert!(!store.contains(2));
        assert!(!store.contains(3));
        assert_eq!(session.action_count(), 1);
    }

    #[test]
    fn noop_when_start_is_at_the_end() {
        let session = Session::new(1, IsolationLevel::ReadCommitted);
        let store = MemStore::new();
        insert(&session, &store, 1, b"a", 10);
        rollback_partial(&session, &store, 1, 10).unwrap();
        assert!(store.contains(1));
        assert_eq!(session.action_count(), 1);
    }

    #[test]
    fn skips_finalized_deletes() {
        let session = Session::new(1, IsolationLevel::ReadCommitted);
        let store = MemStore::new();
        insert(&session, &store, 1, b"a", 10);
        {
            let mut tx = session.tx_state();
            tx.actions[0].kind = ActionKind::DeleteFinal;
        }
        rollback_partial(&session, &store, 0, 10).unwrap();
        // a finalized delete must not be resurrected
        assert!(store.contains(1));
        assert_eq!(session.action_count(), 0);
    }

    #[test]
    fn restores_update_pre_image() {
        let session = Session::new(1, IsolationLevel::ReadCommitted);
        let store = MemStore::new();
        insert(&session, &store, 1, b"old", 10);

        session.set_action_timestamp(11);
        let before = store.get(1).unwrap();
        let after = Row::new(1, 1, b"new".to_vec());
        store.index_row(&session, &after);
        session.tx_state().actions.push(RowAction::update(&session, &before));

        rollback_partial(&session, &store, 1, 11).unwrap();
        assert_eq!(store.get(1).unwrap().data, b"old".to_vec());
        assert_eq!(session.action_count(), 1);
    }

    #[test]
    fn restores_deleted_row() {
        let session = Session::new(1, IsolationLevel::ReadCommitted);
        let store = MemStore::new();
        insert(&session, &store, 1, b"a", 10);

        session.set_action_timestamp(11);
        let row = store.get(1).unwrap();
        session.tx_state().actions.push(RowAction::delete(&session, &row));
        store.delete(&session, 1);
        assert!(!store.contains(1));

        rollback_partial(&session, &store, 1, 11).unwrap();
        assert_eq!(store.get(1).unwrap().data, b"a".to_vec());
    }
}
