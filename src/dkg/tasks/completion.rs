use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{am_i_leading, call_opts, expect_phase, load, names, send};
use crate::{
    crypto_tools::hash,
    dkg::state::Phase,
    executor::task::{Task, TaskContext, TaskErr},
    layer1::{ContractCall, Transaction},
};

/// Closes the run once the gpkj dispute window is over; leader-elected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionTask {
    pub start_block_hash: Option<hash::Output>,
}

#[async_trait]
impl Task for CompletionTask {
    fn name(&self) -> &'static str {
        names::COMPLETION
    }

    async fn prepare(&mut self, ctx: &TaskContext) -> Result<(), TaskErr> {
        if self.start_block_hash.is_none() {
            self.start_block_hash = Some(ctx.chain.block_hash(ctx.start).await?);
        }
        Ok(())
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr> {
        let state = load(ctx)?;
        expect_phase(&state, &[Phase::DisputeGPKJSubmission], self.name())?;
        let start_block_hash = self
            .start_block_hash
            .ok_or_else(|| TaskErr::fatal("start block hash not prepared"))?;

        if !am_i_leading(ctx, &state, &start_block_hash).await? {
            return Err(TaskErr::recoverable("not leading completion yet"));
        }

        info!(account = %state.account, "leading completion");
        Ok(Some(send(ctx, &state, ContractCall::Complete).await?))
    }

    async fn should_execute(&self, ctx: &TaskContext) -> Result<bool, TaskErr> {
        let state = load(ctx)?;
        if state.phase != Phase::DisputeGPKJSubmission {
            return Ok(false);
        }
        let opts = call_opts(ctx, &state).await?;
        Ok(ctx.chain.phase(&opts).await? != Phase::Completion)
    }
}
