//! The ETHDKG tasks, one per protocol action.
//!
//! Every task reloads [`DkgState`] from the store at the start of each call,
//! keeps locally generated material in our own [`Participant`] entry and
//! never trusts its in-memory copy across calls.
//!
//! [`Participant`]: super::state::Participant
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::{
    leader,
    state::{DkgState, Participant, Phase},
};
use crate::{
    crypto_tools::hash,
    error::DkgResult,
    executor::task::{Task, TaskContext, TaskErr},
    layer1::{CallOpts, ContractCall, SubscribeOptions, Transaction},
};

mod completion;
mod dispute_gpkj;
mod dispute_missing;
mod dispute_share_distribution;
mod gpkj_submission;
mod keyshare_submission;
mod mpk_submission;
mod register;
mod share_distribution;

pub use completion::CompletionTask;
pub use dispute_gpkj::DisputeGpkjTask;
pub use dispute_missing::{
    DisputeMissingGpkjTask, DisputeMissingKeySharesTask, DisputeMissingRegistrationTask,
    DisputeMissingShareDistributionTask,
};
pub use dispute_share_distribution::DisputeShareDistributionTask;
pub use gpkj_submission::GpkjSubmissionTask;
pub use keyshare_submission::KeyShareSubmissionTask;
pub use mpk_submission::MpkSubmissionTask;
pub use register::RegisterTask;
pub use share_distribution::ShareDistributionTask;

pub mod names {
    //! Task names, as persisted and as used to kill tasks.
    pub const REGISTER: &str = "Register";
    pub const DISPUTE_MISSING_REGISTRATION: &str = "DisputeMissingRegistration";
    pub const SHARE_DISTRIBUTION: &str = "ShareDistribution";
    pub const DISPUTE_MISSING_SHARE_DISTRIBUTION: &str = "DisputeMissingShareDistribution";
    pub const DISPUTE_SHARE_DISTRIBUTION: &str = "DisputeShareDistribution";
    pub const KEY_SHARE_SUBMISSION: &str = "KeyShareSubmission";
    pub const DISPUTE_MISSING_KEY_SHARES: &str = "DisputeMissingKeyShares";
    pub const MPK_SUBMISSION: &str = "MPKSubmission";
    pub const GPKJ_SUBMISSION: &str = "GPKjSubmission";
    pub const DISPUTE_MISSING_GPKJ: &str = "DisputeMissingGPKj";
    pub const DISPUTE_GPKJ: &str = "DisputeGPKj";
    pub const COMPLETION: &str = "Completion";
}

fn load(ctx: &TaskContext) -> Result<DkgState, TaskErr> {
    Ok(DkgState::load(ctx.db.as_ref())?)
}

fn modify<T>(
    ctx: &TaskContext,
    f: impl FnOnce(&mut DkgState) -> DkgResult<T>,
) -> Result<T, TaskErr> {
    Ok(DkgState::modify(ctx.db.as_ref(), f)?)
}

/// Fatal unless the local state is in one of `phases`.
fn expect_phase(state: &DkgState, phases: &[Phase], task: &str) -> Result<(), TaskErr> {
    if phases.contains(&state.phase) {
        return Ok(());
    }
    error!(task, phase = %state.phase, "task running in the wrong phase");
    Err(TaskErr::fatal(format!(
        "{} cannot run in phase {}",
        task, state.phase
    )))
}

fn own(state: &DkgState) -> Result<&Participant, TaskErr> {
    Ok(state.participant(&state.account)?)
}

async fn call_opts(ctx: &TaskContext, state: &DkgState) -> Result<CallOpts, TaskErr> {
    Ok(ctx.chain.call_opts(&state.account).await?)
}

async fn send(ctx: &TaskContext, state: &DkgState, call: ContractCall) -> Result<Transaction, TaskErr> {
    let opts = ctx.chain.transaction_opts(&state.account).await?;
    Ok(ctx.chain.send(&opts, call).await?)
}

/// Leader election for the task window starting at `ctx.start`.
async fn am_i_leading(
    ctx: &TaskContext,
    state: &DkgState,
    start_block_hash: &hash::Output,
) -> Result<bool, TaskErr> {
    if state.index == 0 {
        return Ok(false);
    }
    let height = ctx.chain.current_height().await?;
    let blocks = leader::blocks_since_desperation(height, ctx.start, ctx.dkg.desperation_delay);
    Ok(leader::am_i_leading(
        state.number_of_validators,
        state.index - 1,
        blocks,
        start_block_hash,
        ctx.dkg.desperation_factor,
    ))
}

macro_rules! dkg_tasks {
    ($($variant:ident($task:ty)),+ $(,)?) => {
        /// Every ETHDKG task, tagged by name for persistence.
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(tag = "name")]
        pub enum DkgTask {
            $($variant($task)),+
        }

        $(
            impl From<$task> for DkgTask {
                fn from(task: $task) -> Self {
                    DkgTask::$variant(task)
                }
            }
        )+

        #[async_trait]
        impl Task for DkgTask {
            fn name(&self) -> &'static str {
                match self {
                    $(DkgTask::$variant(task) => task.name()),+
                }
            }

            fn allow_multi_execution(&self) -> bool {
                match self {
                    $(DkgTask::$variant(task) => task.allow_multi_execution()),+
                }
            }

            fn subscribe_options(&self) -> Option<SubscribeOptions> {
                match self {
                    $(DkgTask::$variant(task) => task.subscribe_options()),+
                }
            }

            async fn prepare(&mut self, ctx: &TaskContext) -> Result<(), TaskErr> {
                match self {
                    $(DkgTask::$variant(task) => task.prepare(ctx).await),+
                }
            }

            async fn execute(&self, ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr> {
                match self {
                    $(DkgTask::$variant(task) => task.execute(ctx).await),+
                }
            }

            async fn should_execute(&self, ctx: &TaskContext) -> Result<bool, TaskErr> {
                match self {
                    $(DkgTask::$variant(task) => task.should_execute(ctx).await),+
                }
            }
        }
    };
}

dkg_tasks! {
    Register(RegisterTask),
    DisputeMissingRegistration(DisputeMissingRegistrationTask),
    ShareDistribution(ShareDistributionTask),
    DisputeMissingShareDistribution(DisputeMissingShareDistributionTask),
    DisputeShareDistribution(DisputeShareDistributionTask),
    KeyShareSubmission(KeyShareSubmissionTask),
    DisputeMissingKeyShares(DisputeMissingKeySharesTask),
    MPKSubmission(MpkSubmissionTask),
    GPKjSubmission(GpkjSubmissionTask),
    DisputeMissingGPKj(DisputeMissingGpkjTask),
    DisputeGPKj(DisputeGpkjTask),
    Completion(CompletionTask),
}
