//! Error types shared across the crate
use thiserror::Error;

pub type DkgResult<T> = Result<T, DkgError>;

/// Cryptographic and protocol-state errors.
/// None of these are worth retrying: the inputs will not change by themselves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DkgError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid {what} length: required {expected}, actual {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("pairing check failed for {0}")]
    PairingCheck(&'static str),
    #[error("invalid proof for {0}")]
    InvalidProof(&'static str),
    #[error("unknown participant {0}")]
    UnknownParticipant(String),
    #[error("encoding failure: {0}")]
    Encoding(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    #[error("key not found")]
    KeyNotFound,
    #[error("database failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("rpc timeout")]
    Timeout,
    #[error("rpc failure: {0}")]
    Rpc(String),
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatcherError {
    #[error("transaction {0} went stale")]
    Stale(String),
    #[error("transaction {0} reverted")]
    Reverted(String),
    #[error("watcher failure: {0}")]
    Failure(String),
    #[error("cancelled while waiting for receipt")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("admin handler failure: {0}")]
pub struct AdminError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("task is not scheduled")]
    NotScheduled,
    #[error("wrong start/end height parameters for task")]
    WrongParams,
    #[error("the task is already expired")]
    TaskExpired,
    #[error("scheduler is closed")]
    Closed,
    #[error("failed to persist scheduler state: {0}")]
    Persistence(String),
}

/// Failure to apply a contract event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error(transparent)]
    Dkg(#[from] DkgError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
