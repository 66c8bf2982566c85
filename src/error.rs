use crate::session::SessionId;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TxnError {
    #[error("deadlock detected, session {0} must roll back")]
    Deadlock(SessionId),

    #[error("session {0} is marked for rollback")]
    Aborted(SessionId),

    #[error("statement {0} is stale and could not be recompiled")]
    StaleStatement(u64),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl TxnError {
    /// True for concurrency-control aborts that the session recovers from
    /// by rolling back, as opposed to fatal invariant violations.
    pub fn must_rollback(&self) -> bool {
        matches!(self, TxnError::Deadlock(_) | TxnError::Aborted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::TxnError;

    #[test]
    fn rollback_classification() {
        assert!(TxnError::Deadlock(1).must_rollback());
        assert!(TxnError::Aborted(2).must_rollback());
        assert!(!TxnError::StaleStatement(3).must_rollback());
        assert!(!TxnError::Invariant("bad".to_string()).must_rollback());
    }
}
