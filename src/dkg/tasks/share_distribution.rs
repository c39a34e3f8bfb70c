use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{call_opts, expect_phase, load, modify, names, own, send};
use crate::{
    dkg::{generate, state::Phase},
    error::DkgError,
    executor::task::{Task, TaskContext, TaskErr},
    layer1::{ContractCall, Transaction},
};

/// Deals our polynomial: encrypted shares to every other participant plus commitments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareDistributionTask {}

#[async_trait]
impl Task for ShareDistributionTask {
    fn name(&self) -> &'static str {
        names::SHARE_DISTRIBUTION
    }

    async fn prepare(&mut self, ctx: &TaskContext) -> Result<(), TaskErr> {
        modify(ctx, |state| {
            if state.phase != Phase::ShareDistribution {
                return Err(DkgError::InvalidArgument(format!(
                    "cannot distribute shares in phase {}",
                    state.phase
                )));
            }
            if !state.secret_value.is_zero() && !state.private_coefficients.is_empty() {
                debug!("shares already dealt");
                return Ok(());
            }

            let dealt =
                generate::generate_shares(&state.transport_private_key, &state.sorted_participants())?;
            let account = state.account;
            let participant = state
                .participants
                .get_mut(&account)
                .ok_or_else(|| DkgError::UnknownParticipant(account.to_string()))?;
            participant.encrypted_shares = dealt.encrypted_shares;
            participant.commitments = dealt.commitments;
            state.secret_value = dealt.private_coefficients[0];
            state.private_coefficients = dealt.private_coefficients;
            info!(account = %account, "dealt shares");
            Ok(())
        })
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr> {
        let state = load(ctx)?;
        expect_phase(&state, &[Phase::ShareDistribution], self.name())?;
        let participant = own(&state)?;
        let call = ContractCall::DistributeShares {
            encrypted_shares: participant.encrypted_shares.clone(),
            commitments: participant.commitments.clone(),
        };
        Ok(Some(send(ctx, &state, call).await?))
    }

    async fn should_execute(&self, ctx: &TaskContext) -> Result<bool, TaskErr> {
        let state = load(ctx)?;
        if state.phase != Phase::ShareDistribution {
            return Ok(false);
        }
        let participant = own(&state)?;
        let (distributed_shares_hash, _, _) = generate::compute_distributed_shares_hash(
            &participant.encrypted_shares,
            &participant.commitments,
        )?;
        let opts = call_opts(ctx, &state).await?;
        let on_chain = ctx.chain.participant_state(&opts, &state.account).await?;
        Ok(on_chain.distributed_shares_hash != distributed_shares_hash)
    }
}
