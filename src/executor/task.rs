use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::DkgConfig,
    error::{AdminError, ChainError, DkgError, WatcherError},
    layer1::{AdminHandler, ChainClient, Database, SubscribeOptions, Transaction},
};

/// Error of a task step. Recoverable errors are retried by the task manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TaskErr {
    message: String,
    recoverable: bool,
}

impl TaskErr {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: false,
        }
    }

    pub fn killed() -> Self {
        Self::fatal("task killed")
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

// rpc hiccups are transient
impl From<ChainError> for TaskErr {
    fn from(err: ChainError) -> Self {
        Self::recoverable(err.to_string())
    }
}

impl From<WatcherError> for TaskErr {
    fn from(err: WatcherError) -> Self {
        match err {
            WatcherError::Stale(_) | WatcherError::Cancelled => Self::fatal(err.to_string()),
            WatcherError::Reverted(_) | WatcherError::Failure(_) => {
                Self::recoverable(err.to_string())
            }
        }
    }
}

// only storage failures can go away by themselves
impl From<DkgError> for TaskErr {
    fn from(err: DkgError) -> Self {
        match err {
            DkgError::Db(_) => Self::recoverable(err.to_string()),
            _ => Self::fatal(err.to_string()),
        }
    }
}

impl From<AdminError> for TaskErr {
    fn from(err: AdminError) -> Self {
        Self::recoverable(err.to_string())
    }
}

/// Everything a running task may touch.
#[derive(Clone)]
pub struct TaskContext {
    pub id: Uuid,
    pub start: u64,
    pub end: u64,
    pub db: Arc<dyn Database>,
    pub chain: Arc<dyn ChainClient>,
    pub admin: Arc<dyn AdminHandler>,
    pub dkg: DkgConfig,
    pub cancel: CancellationToken,
}

/// A unit of work driven by the task manager: `prepare` once, then
/// `should_execute` / `execute` until done.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &'static str;

    /// whether several instances with this name may run at the same time
    fn allow_multi_execution(&self) -> bool {
        false
    }

    /// `None` uses the executor defaults
    fn subscribe_options(&self) -> Option<SubscribeOptions> {
        None
    }

    /// Build and persist whatever the transaction needs. Must be idempotent.
    async fn prepare(&mut self, ctx: &TaskContext) -> Result<(), TaskErr>;

    /// Perform the on-chain action, `None` if there is nothing to send.
    async fn execute(&self, ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr>;

    /// Side-effect free: whether the condition driving the task still holds.
    async fn should_execute(&self, ctx: &TaskContext) -> Result<bool, TaskErr>;
}

/// Sent back to the scheduler once a task is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResponse {
    pub id: Uuid,
    pub err: Option<TaskErr>,
}
