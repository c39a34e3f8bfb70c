//! Persistent, height-driven task scheduler.
//!
//! Tasks are scheduled for a `[start, end)` window of block heights; `0`
//! means unbounded on that side. A single loop owns the schedule: it starts
//! tasks whose window is open, cancels the ones that outlived it and drops the
//! ones that never answered. The schedule is persisted after every change.
use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    manager::{manage_task, TaskResponseChan},
    task::{Task, TaskContext, TaskResponse},
};
use crate::{
    config::Config,
    error::{DbError, SchedulerError},
    layer1::{self, AdminHandler, ChainClient, Database, TransactionWatcher},
};

pub const PREFIX_TASK_SCHEDULER_STATE: &[u8] = b"executor/scheduler/state";

const REQUEST_BUFFER: usize = 64;

/// What the scheduler needs from a task besides [`Task`] itself.
pub trait SchedulableTask: Task + Clone + Serialize + DeserializeOwned + 'static {}

impl<T> SchedulableTask for T where T: Task + Clone + Serialize + DeserializeOwned + 'static {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry<T> {
    pub id: Uuid,
    pub start: u64,
    pub end: u64,
    #[serde(skip)]
    pub is_running: bool,
    #[serde(skip)]
    cancel: Option<CancellationToken>,
    pub wrapped_task: T,
}

#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
struct PersistedSchedule<T> {
    schedule: BTreeMap<Uuid, ScheduleEntry<T>>,
    last_height_seen: u64,
}

/// Partition of the schedule at some height, as computed by [`TaskScheduler::find_tasks`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoundTasks {
    pub to_start: Vec<Uuid>,
    pub expired: Vec<Uuid>,
    pub unresponsive: Vec<Uuid>,
}

enum Request<T> {
    Schedule {
        start: u64,
        end: u64,
        task: T,
        reply: oneshot::Sender<Result<Uuid, SchedulerError>>,
    },
    KillByName {
        name: String,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
}

/// Cloneable front end to a running [`TaskScheduler`].
#[derive(Debug)]
pub struct TaskSchedulerHandle<T> {
    requests: mpsc::Sender<Request<T>>,
    cancel: CancellationToken,
}

impl<T> Clone for TaskSchedulerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Schedule { start, end, .. } => write!(f, "Schedule[{}, {})", start, end),
            Request::KillByName { name, .. } => write!(f, "KillByName({})", name),
        }
    }
}

impl<T> TaskSchedulerHandle<T> {
    pub async fn schedule_task(&self, start: u64, end: u64, task: T) -> Result<Uuid, SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Schedule {
                start,
                end,
                task,
                reply,
            })
            .await
            .map_err(|_| SchedulerError::Closed)?;
        response.await.map_err(|_| SchedulerError::Closed)?
    }

    pub async fn kill_task_by_name(&self, name: &str) -> Result<(), SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::KillByName {
                name: name.to_string(),
                reply,
            })
            .await
            .map_err(|_| SchedulerError::Closed)?;
        response.await.map_err(|_| SchedulerError::Closed)?
    }

    /// Stop the scheduler and every task it runs.
    pub fn close(&self) {
        self.cancel.cancel()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct TaskScheduler<T> {
    schedule: BTreeMap<Uuid, ScheduleEntry<T>>,
    last_height_seen: u64,
    db: Arc<dyn Database>,
    chain: Arc<dyn ChainClient>,
    admin: Arc<dyn AdminHandler>,
    watcher: Arc<dyn TransactionWatcher>,
    config: Config,
    cancel: CancellationToken,
    requests: mpsc::Receiver<Request<T>>,
    responses: Arc<TaskResponseChan>,
    response_rx: mpsc::UnboundedReceiver<TaskResponse>,
}

impl<T: SchedulableTask> TaskScheduler<T> {
    pub fn new(
        db: Arc<dyn Database>,
        chain: Arc<dyn ChainClient>,
        admin: Arc<dyn AdminHandler>,
        watcher: Arc<dyn TransactionWatcher>,
        config: Config,
    ) -> (Self, TaskSchedulerHandle<T>) {
        let (request_tx, requests) = mpsc::channel(REQUEST_BUFFER);
        let (responses, response_rx) = TaskResponseChan::new();
        let cancel = CancellationToken::new();
        let handle = TaskSchedulerHandle {
            requests: request_tx,
            cancel: cancel.clone(),
        };
        let scheduler = Self {
            schedule: BTreeMap::new(),
            last_height_seen: 0,
            db,
            chain,
            admin,
            watcher,
            config,
            cancel,
            requests,
            responses,
            response_rx,
        };
        (scheduler, handle)
    }

    /// Load the persisted schedule and run the scheduler loop on its own tokio task.
    pub fn start(mut self) -> Result<JoinHandle<()>, SchedulerError> {
        self.load_state()?;
        info!(tasks = self.schedule.len(), "task scheduler starting");
        Ok(tokio::spawn(self.run()))
    }

    async fn run(mut self) {
        let mut ticker = time::interval(self.config.executor.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(request) = self.requests.recv() => self.handle_request(request),
                Some(response) = self.response_rx.recv() => self.handle_response(response),
                _ = ticker.tick() => self.tick().await,
            }
        }

        self.close();
    }

    fn handle_request(&mut self, request: Request<T>) {
        debug!("scheduler request {:?}", request);
        // requesters that went away do not care about the answer
        match request {
            Request::Schedule {
                start,
                end,
                task,
                reply,
            } => {
                let _ = reply.send(self.schedule(start, end, task));
            }
            Request::KillByName { name, reply } => {
                let _ = reply.send(self.kill_task_by_name(&name));
            }
        }
    }

    fn handle_response(&mut self, response: TaskResponse) {
        if let Some(err) = &response.err {
            warn!(task_id = %response.id, "task finished with error: {}", err);
        }
        if self.remove(&response.id).is_err() {
            debug!(task_id = %response.id, "response for a task no longer scheduled");
        }
    }

    async fn tick(&mut self) {
        let height = match time::timeout(
            self.config.executor.network_timeout,
            self.chain.current_height(),
        )
        .await
        {
            Ok(Ok(height)) => height,
            Ok(Err(err)) => {
                warn!("could not get current height: {}", err);
                return;
            }
            Err(_) => {
                warn!("timed out getting current height");
                return;
            }
        };
        self.last_height_seen = height;

        let found = self.find_tasks(height);

        for id in found.unresponsive {
            warn!(task_id = %id, height, "removing unresponsive task");
            if let Some(entry) = self.schedule.get(&id) {
                entry.stop();
            }
            let _ = self.remove(&id);
        }

        for id in found.expired {
            let running = self.schedule.get(&id).map(|entry| {
                entry.stop();
                entry.is_running
            });
            if running == Some(false) {
                info!(task_id = %id, height, "removing task that expired before it started");
                let _ = self.remove(&id);
            } else {
                debug!(task_id = %id, height, "cancelling expired task");
            }
        }

        for id in found.to_start {
            self.start_task(&id);
        }

        self.persist();
    }

    /// Insert `task` for the `[start, end)` window and return its id.
    pub fn schedule(&mut self, start: u64, end: u64, task: T) -> Result<Uuid, SchedulerError> {
        if start != 0 && end != 0 && start >= end {
            return Err(SchedulerError::WrongParams);
        }
        if end != 0 && end <= self.last_height_seen {
            return Err(SchedulerError::TaskExpired);
        }

        let id = Uuid::new_v4();
        info!(task_id = %id, task = task.name(), start, end, "task scheduled");
        self.schedule.insert(
            id,
            ScheduleEntry {
                id,
                start,
                end,
                is_running: false,
                cancel: None,
                wrapped_task: task,
            },
        );
        self.persist();
        Ok(id)
    }

    pub fn remove(&mut self, id: &Uuid) -> Result<(), SchedulerError> {
        if self.schedule.remove(id).is_none() {
            return Err(SchedulerError::NotScheduled);
        }
        self.persist();
        Ok(())
    }

    /// Cancel running tasks called `name` and drop the ones not started yet.
    ///
    /// A cancelled task stays scheduled, so it still holds its name, until its
    /// manager answers or it is swept as unresponsive.
    pub fn kill_task_by_name(&mut self, name: &str) -> Result<(), SchedulerError> {
        let mut cancelled = 0;
        let mut removed = 0;
        self.schedule.retain(|_, entry| {
            if entry.wrapped_task.name() != name {
                return true;
            }
            if entry.is_running {
                entry.stop();
                cancelled += 1;
                true
            } else {
                removed += 1;
                false
            }
        });
        if cancelled + removed > 0 {
            info!(task = name, cancelled, removed, "tasks killed");
            self.persist();
        }
        Ok(())
    }

    pub fn find_tasks(&self, height: u64) -> FoundTasks {
        let tolerance = self.config.executor.height_tolerance_before_removing;
        let mut taken: HashSet<&str> = self
            .schedule
            .values()
            .filter(|entry| entry.is_running)
            .map(|entry| entry.wrapped_task.name())
            .collect();

        let mut found = FoundTasks::default();
        for (id, entry) in &self.schedule {
            if entry.end != 0 && entry.end.saturating_add(tolerance) <= height {
                found.unresponsive.push(*id);
            } else if entry.end != 0 && entry.end <= height {
                found.expired.push(*id);
            } else if entry.start <= height && !entry.is_running {
                let task = &entry.wrapped_task;
                if task.allow_multi_execution() || taken.insert(task.name()) {
                    found.to_start.push(*id);
                }
            }
        }
        found
    }

    pub fn start_task(&mut self, id: &Uuid) {
        let cancel = self.cancel.child_token();
        let Some(entry) = self.schedule.get_mut(id) else {
            return;
        };
        entry.is_running = true;
        entry.cancel = Some(cancel.clone());

        let ctx = TaskContext {
            id: entry.id,
            start: entry.start,
            end: entry.end,
            db: self.db.clone(),
            chain: self.chain.clone(),
            admin: self.admin.clone(),
            dkg: self.config.dkg,
            cancel,
        };
        tokio::spawn(manage_task(
            entry.wrapped_task.clone(),
            ctx,
            self.watcher.clone(),
            self.config.executor.clone(),
            self.responses.clone(),
        ));
    }

    /// Cancel every task and clear the schedule.
    pub fn purge(&mut self) {
        for entry in self.schedule.values() {
            entry.stop();
        }
        self.schedule.clear();
        self.persist();
    }

    fn close(&mut self) {
        self.cancel.cancel();
        self.purge();
        self.responses.close();
        info!("task scheduler closed");
    }

    fn persist(&self) {
        if let Err(err) = self.persist_state() {
            error!("{}", err);
        }
    }

    pub fn persist_state(&self) -> Result<(), SchedulerError> {
        let raw = serde_json::to_vec(&PersistedSchedule {
            schedule: self.schedule.clone(),
            last_height_seen: self.last_height_seen,
        })
        .map_err(|err| SchedulerError::Persistence(err.to_string()))?;
        layer1::set_value(self.db.as_ref(), PREFIX_TASK_SCHEDULER_STATE, raw)
            .map_err(|err| SchedulerError::Persistence(err.to_string()))
    }

    pub fn load_state(&mut self) -> Result<(), SchedulerError> {
        let raw = match layer1::get_value(self.db.as_ref(), PREFIX_TASK_SCHEDULER_STATE) {
            Ok(raw) => raw,
            Err(DbError::KeyNotFound) => return Ok(()),
            Err(err) => {
                error!("failed to load scheduler state: {}", err);
                return Err(SchedulerError::Persistence(err.to_string()));
            }
        };
        let persisted: PersistedSchedule<T> = serde_json::from_slice(&raw).map_err(|err| {
            error!("failed to decode scheduler state: {}", err);
            SchedulerError::Persistence(err.to_string())
        })?;
        self.schedule = persisted.schedule;
        self.last_height_seen = persisted.last_height_seen;
        Ok(())
    }

    pub fn last_height_seen(&self) -> u64 {
        self.last_height_seen
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScheduleEntry<T>> {
        self.schedule.values()
    }
}

impl<T> ScheduleEntry<T> {
    fn stop(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}
