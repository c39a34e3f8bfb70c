//! Supervises a single task: prepare, execute, watch the transaction, report back.
use std::{
    future::Future,
    sync::{Arc, Mutex},
};

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use super::{
    retry::RetryError,
    task::{Task, TaskContext, TaskErr, TaskResponse},
};
use crate::{
    config::ExecutorConfig,
    error::WatcherError,
    layer1::{ReceiptStatus, TransactionWatcher},
};

/// The channel tasks report on. Closing it is idempotent and
/// later responses are dropped instead of failing the sender.
#[derive(Debug)]
pub struct TaskResponseChan {
    sender: Mutex<Option<mpsc::UnboundedSender<TaskResponse>>>,
}

impl TaskResponseChan {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TaskResponse>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                sender: Mutex::new(Some(sender)),
            }),
            receiver,
        )
    }

    /// Returns `false` if the channel is closed.
    pub fn add(&self, response: TaskResponse) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard
                .as_ref()
                .map(|sender| sender.send(response).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn close(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            if guard.take().is_some() {
                debug!("task response channel closed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }
}

/// Drive `task` to completion and send exactly one response.
pub async fn manage_task<T: Task>(
    task: T,
    ctx: TaskContext,
    watcher: Arc<dyn TransactionWatcher>,
    config: ExecutorConfig,
    responses: Arc<TaskResponseChan>,
) {
    let name = task.name();
    info!(task_id = %ctx.id, task = name, "task started");

    // prepare needs the task mutably inside a retried closure
    let task = AsyncMutex::new(task);
    let prepared = prepare(&task, name, &ctx, &config).await;
    let task = task.into_inner();
    let res = match prepared {
        Ok(()) => execute(&task, &ctx, watcher.as_ref(), &config).await,
        Err(err) => Err(err),
    };

    finish(&ctx, name, res, &responses);
}

/// Run a task step unless the task is killed first.
async fn cancellable<V>(
    ctx: &TaskContext,
    step: impl Future<Output = Result<V, TaskErr>>,
) -> Result<V, TaskErr> {
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(TaskErr::killed()),
        res = step => res,
    }
}

/// Fold a [`RetryPolicy::run`](super::retry::RetryPolicy::run) outcome into the task result.
fn settle<V>(ctx: &TaskContext, name: &str, step: &str, res: Result<V, RetryError<TaskErr>>) -> Result<V, TaskErr> {
    match res {
        Ok(value) => Ok(value),
        Err(RetryError::Exhausted(err)) => {
            warn!(task_id = %ctx.id, task = name, "{} out of retries: {}", step, err);
            Err(err)
        }
        Err(RetryError::Fatal(err)) if err == TaskErr::killed() => Err(err),
        Err(RetryError::Fatal(err)) => {
            error!(task_id = %ctx.id, task = name, "{} failed: {}", step, err);
            Err(err)
        }
        Err(RetryError::Cancelled) => Err(TaskErr::killed()),
    }
}

async fn prepare<T: Task>(
    task: &AsyncMutex<T>,
    name: &str,
    ctx: &TaskContext,
    config: &ExecutorConfig,
) -> Result<(), TaskErr> {
    let res = config
        .prepare_retry
        .run(&ctx.cancel, TaskErr::is_recoverable, |attempt| async move {
            let mut task = task.lock().await;
            let res = cancellable(ctx, task.prepare(ctx)).await;
            if let Err(err) = &res {
                if err.is_recoverable() {
                    warn!(task_id = %ctx.id, task = name, attempt, "prepare failed: {}", err);
                }
            }
            res
        })
        .await;
    settle(ctx, name, "prepare", res)
}

/// `should_execute` with its own retries. Running out of retries means "yes":
/// the task might still have work to do.
async fn should_execute<T: Task>(task: &T, ctx: &TaskContext, config: &ExecutorConfig) -> Result<bool, TaskErr> {
    match config
        .monitor_retry
        .run(&ctx.cancel, TaskErr::is_recoverable, |_| {
            cancellable(ctx, task.should_execute(ctx))
        })
        .await
    {
        Ok(should) => Ok(should),
        Err(RetryError::Exhausted(err)) => {
            warn!(task_id = %ctx.id, task = task.name(), "could not check task status, assuming it should run: {}", err);
            Ok(true)
        }
        Err(RetryError::Fatal(err)) => Err(err),
        Err(RetryError::Cancelled) => Err(TaskErr::killed()),
    }
}

/// One execute attempt: check, send, wait for the receipt.
async fn execute_once<T: Task>(
    task: &T,
    ctx: &TaskContext,
    watcher: &dyn TransactionWatcher,
    config: &ExecutorConfig,
    attempt: usize,
) -> Result<(), TaskErr> {
    if !should_execute(task, ctx, config).await? {
        info!(task_id = %ctx.id, task = task.name(), "nothing left to do");
        return Ok(());
    }

    let tx = match cancellable(ctx, task.execute(ctx)).await {
        Ok(Some(tx)) => tx,
        Ok(None) => return Ok(()),
        Err(err) => {
            if err.is_recoverable() {
                warn!(task_id = %ctx.id, task = task.name(), attempt, "execute failed: {}", err);
            }
            return Err(err);
        }
    };

    debug!(task_id = %ctx.id, task = task.name(), tx = %tx.hash, "waiting for receipt");
    let subscribe = task.subscribe_options().unwrap_or(config.subscribe);
    let err = match watcher.subscribe_and_wait(&tx, subscribe, &ctx.cancel).await {
        Ok(receipt) if receipt.status == ReceiptStatus::Success => {
            info!(task_id = %ctx.id, task = task.name(), tx = %tx.hash, block = receipt.block_number, "transaction mined");
            return Ok(());
        }
        Ok(_) => TaskErr::recoverable(format!("transaction {} reverted", tx.hash)),
        Err(WatcherError::Cancelled) => return Err(TaskErr::killed()),
        Err(err) => err.into(),
    };
    if err.is_recoverable() {
        warn!(task_id = %ctx.id, task = task.name(), attempt, tx = %tx.hash, "transaction not mined: {}", err);
    }
    Err(err)
}

async fn execute<T: Task>(
    task: &T,
    ctx: &TaskContext,
    watcher: &dyn TransactionWatcher,
    config: &ExecutorConfig,
) -> Result<(), TaskErr> {
    let res = config
        .execute_retry
        .run(&ctx.cancel, TaskErr::is_recoverable, |attempt| {
            execute_once(task, ctx, watcher, config, attempt)
        })
        .await;
    settle(ctx, task.name(), "execute", res)
}

fn finish(ctx: &TaskContext, name: &str, res: Result<(), TaskErr>, responses: &TaskResponseChan) {
    match &res {
        Ok(()) => info!(task_id = %ctx.id, task = name, "task done"),
        Err(err) => warn!(task_id = %ctx.id, task = name, "task done with error: {}", err),
    }
    if !responses.add(TaskResponse {
        id: ctx.id,
        err: res.err(),
    }) {
        warn!(task_id = %ctx.id, task = name, "response channel closed, dropping task response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DkgConfig,
        crypto_tools::hash,
        executor::retry::RetryPolicy,
        layer1::{
            memory::{MemoryChain, MemoryDb, MemoryWatcher, RecordingAdmin},
            Address, ContractCall, Transaction,
        },
    };
    use async_trait::async_trait;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    /// Fails `prepare` and `execute` a configurable number of times.
    #[derive(Default)]
    struct FlakyTask {
        prepare_failures: usize,
        execute_failures: usize,
        fatal: bool,
        send_tx: bool,
        should_execute: bool,
        prepares: AtomicUsize,
        executes: AtomicUsize,
    }

    #[async_trait]
    impl Task for FlakyTask {
        fn name(&self) -> &'static str {
            "Flaky"
        }

        async fn prepare(&mut self, _ctx: &TaskContext) -> Result<(), TaskErr> {
            let n = self.prepares.fetch_add(1, Ordering::SeqCst);
            if n < self.prepare_failures {
                if self.fatal {
                    return Err(TaskErr::fatal("broken"));
                }
                return Err(TaskErr::recoverable("flaky prepare"));
            }
            Ok(())
        }

        async fn execute(&self, _ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr> {
            let n = self.executes.fetch_add(1, Ordering::SeqCst);
            if n < self.execute_failures {
                return Err(TaskErr::recoverable("flaky execute"));
            }
            Ok(self.send_tx.then(|| Transaction {
                hash: hash::Output::from([1; 32]),
                from: Address::default(),
                nonce: 0,
                call: ContractCall::Complete,
            }))
        }

        async fn should_execute(&self, _ctx: &TaskContext) -> Result<bool, TaskErr> {
            Ok(self.should_execute)
        }
    }

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            prepare_retry: RetryPolicy::new(3, Duration::from_millis(10)),
            execute_retry: RetryPolicy::new(3, Duration::from_millis(10)),
            monitor_retry: RetryPolicy::new(2, Duration::from_millis(10)),
            ..Default::default()
        }
    }

    fn context() -> TaskContext {
        TaskContext {
            id: Uuid::new_v4(),
            start: 0,
            end: 0,
            db: Arc::new(MemoryDb::new()),
            chain: Arc::new(MemoryChain::new(Vec::new())),
            admin: Arc::new(RecordingAdmin::default()),
            dkg: DkgConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    async fn run(task: FlakyTask, ctx: TaskContext, watcher: Arc<MemoryWatcher>) -> TaskResponse {
        let (responses, mut receiver) = TaskResponseChan::new();
        manage_task(task, ctx, watcher, config(), responses).await;
        receiver.recv().await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let task = FlakyTask {
            prepare_failures: 2,
            execute_failures: 2,
            send_tx: true,
            should_execute: true,
            ..Default::default()
        };
        let ctx = context();
        let id = ctx.id;
        let watcher = Arc::new(MemoryWatcher::default());
        let response = run(task, ctx, watcher.clone()).await;
        assert_eq!(response, TaskResponse { id, err: None });
        assert_eq!(watcher.subscriptions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_prepare_stops() {
        let task = FlakyTask {
            prepare_failures: 1,
            fatal: true,
            should_execute: true,
            ..Default::default()
        };
        let response = run(task, context(), Arc::new(MemoryWatcher::default())).await;
        assert_eq!(response.err, Some(TaskErr::fatal("broken")));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let task = FlakyTask {
            execute_failures: 10,
            should_execute: true,
            ..Default::default()
        };
        let response = run(task, context(), Arc::new(MemoryWatcher::default())).await;
        assert_eq!(response.err, Some(TaskErr::recoverable("flaky execute")));
    }

    #[tokio::test(start_paused = true)]
    async fn skips_when_nothing_to_do() {
        let task = FlakyTask {
            send_tx: true,
            should_execute: false,
            ..Default::default()
        };
        let watcher = Arc::new(MemoryWatcher::default());
        let response = run(task, context(), watcher.clone()).await;
        assert_eq!(response.err, None);
        assert_eq!(watcher.subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reverted_then_mined() {
        let task = FlakyTask {
            send_tx: true,
            should_execute: true,
            ..Default::default()
        };
        let watcher = Arc::new(MemoryWatcher::default());
        watcher.revert_next(1);
        let response = run(task, context(), watcher.clone()).await;
        assert_eq!(response.err, None);
        assert_eq!(watcher.subscriptions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_transaction_is_fatal() {
        let task = FlakyTask {
            send_tx: true,
            should_execute: true,
            ..Default::default()
        };
        let watcher = Arc::new(MemoryWatcher::default());
        watcher.stale_next(1);
        let response = run(task, context(), watcher.clone()).await;
        assert!(!response.err.unwrap().is_recoverable());
        assert_eq!(watcher.subscriptions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn killed_task_reports() {
        let task = FlakyTask {
            execute_failures: 10,
            should_execute: true,
            ..Default::default()
        };
        let ctx = context();
        ctx.cancel.cancel();
        let response = run(task, ctx, Arc::new(MemoryWatcher::default())).await;
        assert_eq!(response.err, Some(TaskErr::killed()));
    }

    /// Its chain call never returns.
    struct HangingTask {
        executes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Task for HangingTask {
        fn name(&self) -> &'static str {
            "Hanging"
        }

        async fn prepare(&mut self, _ctx: &TaskContext) -> Result<(), TaskErr> {
            Ok(())
        }

        async fn execute(&self, _ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr> {
            self.executes.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn should_execute(&self, _ctx: &TaskContext) -> Result<bool, TaskErr> {
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn kill_interrupts_hung_execute() {
        let executes = Arc::new(AtomicUsize::new(0));
        let task = HangingTask {
            executes: executes.clone(),
        };
        let ctx = context();
        let cancel = ctx.cancel.clone();
        let (responses, mut receiver) = TaskResponseChan::new();
        let manager = tokio::spawn(manage_task(
            task,
            ctx,
            Arc::new(MemoryWatcher::default()),
            config(),
            responses,
        ));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(executes.load(Ordering::SeqCst), 1);
        assert!(receiver.try_recv().is_err());

        cancel.cancel();
        manager.await.unwrap();
        let response = receiver.recv().await.unwrap();
        assert_eq!(response.err, Some(TaskErr::killed()));
        assert_eq!(executes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_channel_drops_responses() {
        let (responses, _receiver) = TaskResponseChan::new();
        let response = TaskResponse {
            id: Uuid::new_v4(),
            err: None,
        };
        assert!(responses.add(response.clone()));
        responses.close();
        responses.close();
        assert!(responses.is_closed());
        assert!(!responses.add(response));
    }
}
