use thiserror::Error;

/// Crate-wide result alias. Every public entry point returns this.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("address {address} is out of range (next free address is {nfa})")]
    OutOfRange { address: u64, nfa: u64 },

    #[error("malformed block at address {address}: {reason}")]
    Malformed { address: u64, reason: String },

    #[error("key not found")]
    NotFound,

    #[error("node at address {address} is full, cannot insert without a prior split")]
    NodeFull { address: u64 },

    #[error("serialized record exceeds block capacity ({capacity} bytes needed, {available} available)")]
    OverflowBlock { capacity: usize, available: usize },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}
