use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{call_opts, expect_phase, load, modify, names, own, send};
use crate::{
    dkg::{generate, state::Phase},
    error::DkgError,
    executor::task::{Task, TaskContext, TaskErr},
    layer1::{ContractCall, Transaction},
};

const PHASES: [Phase; 2] = [Phase::DisputeShareDistribution, Phase::KeyShareSubmission];

/// Publishes `h1 * s` and `g2 * s` for our secret value `s`, with a proof tying
/// them to our first commitment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShareSubmissionTask {}

#[async_trait]
impl Task for KeyShareSubmissionTask {
    fn name(&self) -> &'static str {
        names::KEY_SHARE_SUBMISSION
    }

    async fn prepare(&mut self, ctx: &TaskContext) -> Result<(), TaskErr> {
        modify(ctx, |state| {
            if !PHASES.contains(&state.phase) {
                return Err(DkgError::InvalidArgument(format!(
                    "cannot submit key shares in phase {}",
                    state.phase
                )));
            }
            let secret_value = state.secret_value;
            let account = state.account;
            let participant = state
                .participants
                .get_mut(&account)
                .ok_or_else(|| DkgError::UnknownParticipant(account.to_string()))?;
            if participant.key_share_g1.is_identity() {
                let key_share = generate::generate_key_share(&secret_value)?;
                participant.key_share_g1 = key_share.g1;
                participant.key_share_g1_proof = key_share.g1_proof;
                participant.key_share_g2 = key_share.g2;
                info!(account = %account, "generated key share");
            }
            Ok(())
        })
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr> {
        let state = load(ctx)?;
        expect_phase(&state, &PHASES, self.name())?;
        let participant = own(&state)?;
        let call = ContractCall::SubmitKeyShare {
            key_share_g1: participant.key_share_g1,
            key_share_g1_proof: participant.key_share_g1_proof,
            key_share_g2: participant.key_share_g2,
        };
        Ok(Some(send(ctx, &state, call).await?))
    }

    async fn should_execute(&self, ctx: &TaskContext) -> Result<bool, TaskErr> {
        let state = load(ctx)?;
        if !PHASES.contains(&state.phase) {
            return Ok(false);
        }
        let participant = own(&state)?;
        let opts = call_opts(ctx, &state).await?;
        let on_chain = ctx.chain.participant_state(&opts, &state.account).await?;
        Ok(on_chain.key_share != participant.key_share_g1)
    }
}
