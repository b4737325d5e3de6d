//! Typed errors for the daemon core.

use thiserror::Error;

/// Errors raised while handling an inbound message or maintaining
/// state. Categories map to the recovery policy: everything except
/// `Checkpoint` is logged and dropped without touching state.
#[derive(Debug, Error)]
pub enum XymonError {
    #[error("empty message")]
    EmptyMessage,

    #[error("malformed command: {0}")]
    Malformed(String),

    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("unknown test: {0}")]
    UnknownTest(String),

    #[error("bad color token: {0}")]
    BadColor(String),

    #[error("sender {sender} not permitted to run {command}")]
    NotPermitted { sender: String, command: String },

    #[error("message exceeds size ceiling ({size} > {limit} bytes)")]
    Oversize { size: usize, limit: usize },

    #[error("checkpoint failure: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
