//! Executor and protocol settings.
//!
//! Every field has a default, so a partial JSON document is a valid config.
use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{
    error::{DkgError, DkgResult},
    executor::retry::{duration_millis, RetryPolicy},
    layer1::SubscribeOptions,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// how often the scheduler polls the chain height
    #[serde(with = "duration_millis")]
    pub tick_interval: Duration,
    /// upper bound on a single height query
    #[serde(with = "duration_millis")]
    pub network_timeout: Duration,
    /// blocks past `end` after which a task is presumed stuck and dropped
    pub height_tolerance_before_removing: u64,
    pub prepare_retry: RetryPolicy,
    pub execute_retry: RetryPolicy,
    /// retries of `should_execute` before assuming the task still has work to do
    pub monitor_retry: RetryPolicy,
    pub subscribe: SubscribeOptions,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(3),
            network_timeout: Duration::from_secs(1),
            height_tolerance_before_removing: 50,
            prepare_retry: RetryPolicy::new(10, Duration::from_secs(1)),
            execute_retry: RetryPolicy::new(20, Duration::from_secs(5)),
            monitor_retry: RetryPolicy::new(10, Duration::from_secs(1)),
            subscribe: SubscribeOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DkgConfig {
    /// blocks after the phase start before leader election starts widening
    pub desperation_delay: u64,
    /// larger values widen the leader window more slowly
    pub desperation_factor: u64,
}

impl Default for DkgConfig {
    fn default() -> Self {
        Self {
            desperation_delay: 10,
            desperation_factor: 40,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub dkg: DkgConfig,
}

impl Config {
    pub fn from_json(json: &str) -> DkgResult<Self> {
        serde_json::from_str(json).map_err(|err| {
            error!("invalid config: {}", err);
            DkgError::Encoding(err.to_string())
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> DkgResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| {
            error!("cannot read config {}: {}", path.display(), err);
            DkgError::Encoding(err.to_string())
        })?;
        Self::from_json(&json)
    }
}
