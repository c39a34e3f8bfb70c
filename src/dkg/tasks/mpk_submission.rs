use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{am_i_leading, call_opts, expect_phase, load, modify, names, send};
use crate::{
    crypto_tools::{
        bls::{G1, G2},
        hash,
    },
    dkg::{generate, state::Phase},
    error::DkgError,
    executor::task::{Task, TaskContext, TaskErr},
    layer1::{ContractCall, Transaction},
};

/// Computes the master public key from all key shares; one leader-elected
/// validator submits it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpkSubmissionTask {
    /// hash of the first block of the task window, seeds the leader election
    pub start_block_hash: Option<hash::Output>,
}

#[async_trait]
impl Task for MpkSubmissionTask {
    fn name(&self) -> &'static str {
        names::MPK_SUBMISSION
    }

    async fn prepare(&mut self, ctx: &TaskContext) -> Result<(), TaskErr> {
        if self.start_block_hash.is_none() {
            self.start_block_hash = Some(ctx.chain.block_hash(ctx.start).await?);
        }

        modify(ctx, |state| {
            if state.phase != Phase::MPKSubmission {
                return Err(DkgError::InvalidArgument(format!(
                    "cannot submit the master public key in phase {}",
                    state.phase
                )));
            }
            if !state.master_public_key.is_identity() {
                debug!("master public key already computed");
                return Ok(());
            }

            let (g1s, g2s): (Vec<G1>, Vec<G2>) = state
                .sorted_participants()
                .iter()
                .map(|p| (p.key_share_g1, p.key_share_g2))
                .unzip();
            if g1s.iter().any(|g1| g1.is_identity()) {
                return Err(DkgError::Missing("key share"));
            }
            state.master_public_key = generate::generate_master_public_key(&g1s, &g2s)?;
            info!("computed master public key");
            Ok(())
        })
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr> {
        let state = load(ctx)?;
        expect_phase(&state, &[Phase::MPKSubmission], self.name())?;
        let start_block_hash = self
            .start_block_hash
            .ok_or_else(|| TaskErr::fatal("start block hash not prepared"))?;

        if !am_i_leading(ctx, &state, &start_block_hash).await? {
            return Err(TaskErr::recoverable("not leading master public key submission yet"));
        }

        info!(account = %state.account, "leading master public key submission");
        let call = ContractCall::SubmitMasterPublicKey {
            master_public_key: state.master_public_key,
        };
        Ok(Some(send(ctx, &state, call).await?))
    }

    async fn should_execute(&self, ctx: &TaskContext) -> Result<bool, TaskErr> {
        let state = load(ctx)?;
        if state.phase != Phase::MPKSubmission {
            return Ok(false);
        }
        if state.master_public_key.is_identity() {
            return Err(TaskErr::fatal("empty master public key"));
        }
        let opts = call_opts(ctx, &state).await?;
        let on_chain = ctx.chain.master_public_key_hash(&opts).await?;
        Ok(on_chain != hash::master_public_key_hash(&state.master_public_key))
    }
}
