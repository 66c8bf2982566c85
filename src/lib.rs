#[macro_use]
extern crate log;

pub use manager::TransactionManager;
pub use session::{IsolationLevel, Session, SessionId};

pub mod action;
pub mod error;
pub mod latch;
pub mod lock;
pub mod manager;
pub mod session;
pub mod statement;
pub mod store;
pub mod timestamp;
mod undo;

pub type Result<T> = std::result::Result<T, error::TxnError>;
