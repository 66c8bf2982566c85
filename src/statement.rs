use std::sync::atomic::{AtomicU64, Ordering};

use crate::lock::LockMode;
use crate::session::Session;
use crate::store::TableId;
use crate::timestamp::Timestamp;

/// A compiled statement, reduced to what the lock protocol needs: the
/// table it touches, its access mode and its compile timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub id: u64,
    pub table: TableId,
    pub mode: LockMode,
    pub compile_timestamp: Timestamp,
}

impl Statement {
    pub fn new(id: u64, table: TableId, mode: LockMode, compile_timestamp: Timestamp) -> Statement {
        Statement {
            id,
            table,
            mode,
            compile_timestamp,
        }
    }
}

/// Reports the timestamp of the last schema change. A statement compiled
/// before it must be recompiled before locking.
pub trait SchemaClock: Send + Sync {
    fn schema_change_timestamp(&self) -> Timestamp;
}

/// Recompiles a stale statement on behalf of a session. Returning `None`
/// means the statement no longer exists and must not run.
pub trait StatementRecompiler: Send + Sync {
    fn recompile(&self, session: &Session, statement: &Statement) -> Option<Statement>;
}

/// Schema clock backed by a bumpable counter; DDL bumps the epoch.
#[derive(Debug, Default)]
pub struct SchemaEpoch {
    epoch: AtomicU64,
}

impl SchemaEpoch {
    pub fn new() -> SchemaEpoch {
        SchemaEpoch::default()
    }

    pub fn bump(&self, ts: Timestamp) {
        self.epoch.store(ts, Ordering::SeqCst);
    }
}

impl SchemaClock for SchemaEpoch {
    fn schema_change_timestamp(&self) -> Timestamp {
        self.epoch.load(Ordering::SeqCst)
    }
}

/// Recompiler that reissues the same statement stamped at the current
/// schema epoch. Stands in for the statement manager of a full engine.
pub struct ReissueRecompiler {
    schema: std::sync::Arc<SchemaEpoch>,
}

impl ReissueRecompiler {
    pub fn new(schema: std::sync::Arc<SchemaEpoch>) -> ReissueRecompiler {
        ReissueRecompiler { schema }
    }
}

impl StatementRecompiler for ReissueRecompiler {
    fn recompile(&self, session: &Session, statement: &Statement) -> Option<Statement> {
        trace!(
            "recompiling statement {} for session {}",
            statement.id,
            session.id()
        );
        let mut fresh = statement.clone();
        fresh.compile_timestamp = self.schema.schema_change_timestamp();
        Some(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::IsolationLevel;
    use std::sync::Arc;

    #[test]
    fn schema_epoch_advances() {
        let schema = SchemaEpoch::new();
        assert_eq!(schema.schema_change_timestamp(), 0);
        schema.bump(42);
        assert_eq!(schema.schema_change_timestamp(), 42);
    }

    #[test]
    fn reissue_stamps_current_epoch() {
        let schema = Arc::new(SchemaEpoch::new());
        schema.bump(10);
        let recompiler = ReissueRecompiler::new(schema.clone());
        let session = Session::new(1, IsolationLevel::ReadCommitted);
        let stale = Statement::new(5, 1, LockMode::Read, 3);
        let fresh = recompiler.recompile(&session, &stale).unwrap();
        assert_eq!(fresh.compile_timestamp, 10);
        assert_eq!(fresh.id, stale.id);
    }
}
