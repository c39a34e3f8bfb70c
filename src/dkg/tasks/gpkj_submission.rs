use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{call_opts, expect_phase, load, modify, names, own, send};
use crate::{
    dkg::{generate, state::Phase},
    error::DkgError,
    executor::task::{Task, TaskContext, TaskErr},
    layer1::{ContractCall, CurveSpec, Transaction},
};

/// Derives our group key pair from every share dealt to us, hands the private
/// half to the consensus layer and publishes `gpkj`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpkjSubmissionTask {}

#[async_trait]
impl Task for GpkjSubmissionTask {
    fn name(&self) -> &'static str {
        names::GPKJ_SUBMISSION
    }

    async fn prepare(&mut self, ctx: &TaskContext) -> Result<(), TaskErr> {
        let group_private_key = modify(ctx, |state| {
            if state.phase != Phase::GPKJSubmission {
                return Err(DkgError::InvalidArgument(format!(
                    "cannot submit gpkj in phase {}",
                    state.phase
                )));
            }
            if !state.group_private_key.is_zero() {
                debug!("group keys already computed");
                return Ok(state.group_private_key);
            }

            let participants = state.sorted_participants();
            let encrypted_shares: Vec<_> = participants
                .iter()
                .map(|p| p.encrypted_shares.clone())
                .collect();
            let (group_private_key, group_public_key) = generate::generate_group_keys(
                &state.transport_private_key,
                &state.private_coefficients,
                &encrypted_shares,
                state.index,
                &participants,
            )?;

            let account = state.account;
            let participant = state
                .participants
                .get_mut(&account)
                .ok_or_else(|| DkgError::UnknownParticipant(account.to_string()))?;
            participant.gpkj = group_public_key;
            state.group_private_key = group_private_key;
            info!(account = %account, "computed group keys");
            Ok(group_private_key)
        })?;

        ctx.admin
            .add_private_key(&group_private_key.to_bytes(), CurveSpec::Bls12381)?;
        Ok(())
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr> {
        let state = load(ctx)?;
        expect_phase(&state, &[Phase::GPKJSubmission], self.name())?;
        let call = ContractCall::SubmitGpkj {
            gpkj: own(&state)?.gpkj,
        };
        Ok(Some(send(ctx, &state, call).await?))
    }

    async fn should_execute(&self, ctx: &TaskContext) -> Result<bool, TaskErr> {
        let state = load(ctx)?;
        if state.phase != Phase::GPKJSubmission {
            return Ok(false);
        }
        let gpkj = own(&state)?.gpkj;
        let opts = call_opts(ctx, &state).await?;
        let on_chain = ctx.chain.participant_state(&opts, &state.account).await?;
        Ok(on_chain.gpkj != gpkj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto_tools::bls::G2,
        dkg::{generate::categorize_group_signers, tasks::test_utils::*},
    };

    #[tokio::test]
    async fn group_keys_handed_over_and_published() {
        let n = 5;
        let ceremony = Ceremony::registered(n);
        ceremony.distribute().await;
        ceremony.submit_key_shares().await;
        ceremony.submit_master_public_key().await;

        for node in 0..n {
            let ctx = ceremony.ctx(node, 60, 70);
            let mut task = GpkjSubmissionTask::default();
            task.prepare(&ctx).await.unwrap();
            // preparing twice hands over the same key
            task.prepare(&ctx).await.unwrap();

            let state = ceremony.state(node);
            let keys = ceremony.nodes[node].admin.keys();
            assert_eq!(keys.len(), 2);
            let expected = (state.group_private_key.to_bytes().to_vec(), CurveSpec::Bls12381);
            assert_eq!(keys[0], expected);
            assert_eq!(keys[0], keys[1]);

            assert!(task.should_execute(&ctx).await.unwrap());
            task.execute(&ctx).await.unwrap().unwrap();
            assert!(!task.should_execute(&ctx).await.unwrap());
            assert_eq!(
                ceremony.chain.participant(&ceremony.nodes[node].account).unwrap().gpkj,
                ceremony.own(node).gpkj
            );
        }

        let participants = ceremony.state(0).sorted_participants();
        let gpkjs: Vec<G2> = (0..n).map(|node| ceremony.own(node).gpkj).collect();
        let commitments: Vec<_> = participants.iter().map(|p| p.commitments.clone()).collect();
        let signers = categorize_group_signers(&gpkjs, &participants, &commitments).unwrap();
        assert_eq!(signers.honest.len(), n);
    }

    #[tokio::test]
    async fn wrong_phase() {
        let ceremony = Ceremony::registered(4);
        let ctx = ceremony.ctx(0, 0, 0);
        let mut task = GpkjSubmissionTask::default();
        assert!(!task.prepare(&ctx).await.unwrap_err().is_recoverable());
        assert!(!task.should_execute(&ctx).await.unwrap());
        assert!(ceremony.nodes[0].admin.keys().is_empty());
    }
}
