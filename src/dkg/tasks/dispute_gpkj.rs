use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{call_opts, load, modify, names, send};
use crate::{
    crypto_tools::bls::G2,
    dkg::{
        generate,
        state::{DkgState, Phase},
    },
    error::{DkgError, DkgResult},
    executor::task::{Task, TaskContext, TaskErr},
    layer1::{Address, ContractCall, Transaction},
};

const PHASES: [Phase; 2] = [Phase::GPKJSubmission, Phase::DisputeGPKJSubmission];

/// Checks the gpkj one validator published against everybody's commitments
/// and accuses it if the two disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeGpkjTask {
    pub address: Address,
}

impl DisputeGpkjTask {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

fn categorize(state: &mut DkgState) -> DkgResult<()> {
    let participants = state.sorted_participants();
    let gpkjs: Vec<G2> = participants.iter().map(|p| p.gpkj).collect();
    let commitments: Vec<_> = participants.iter().map(|p| p.commitments.clone()).collect();
    let signers = generate::categorize_group_signers(&gpkjs, &participants, &commitments)?;
    if signers.honest.len() + signers.dishonest.len() + signers.missing.len() != participants.len() {
        return Err(DkgError::LengthMismatch {
            what: "categorized signers",
            expected: participants.len(),
            actual: signers.honest.len() + signers.dishonest.len() + signers.missing.len(),
        });
    }
    state.honest_validators = signers.honest;
    state.dishonest_validators = signers.dishonest;
    Ok(())
}

#[async_trait]
impl Task for DisputeGpkjTask {
    fn name(&self) -> &'static str {
        names::DISPUTE_GPKJ
    }

    fn allow_multi_execution(&self) -> bool {
        true
    }

    async fn prepare(&mut self, ctx: &TaskContext) -> Result<(), TaskErr> {
        modify(ctx, |state| {
            if !PHASES.contains(&state.phase) {
                return Err(DkgError::InvalidArgument(format!(
                    "cannot dispute gpkj in phase {}",
                    state.phase
                )));
            }
            if state.inverse.is_empty() {
                state.inverse = generate::inverse_array_for_user_count(state.number_of_validators)?;
            }
            categorize(state)
        })
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr> {
        let state = load(ctx)?;
        if !state
            .dishonest_validators
            .iter()
            .any(|p| p.address == self.address)
        {
            debug!(accused = %self.address, "gpkj is not dishonest");
            return Ok(None);
        }

        let opts = call_opts(ctx, &state).await?;
        if !ctx.chain.is_validator(&opts, &self.address).await? {
            return Ok(None);
        }

        let participants = state.sorted_participants();
        let mut encrypted_shares_hashes = Vec::with_capacity(participants.len());
        for participant in &participants {
            let (_, encrypted_shares_hash, _) = generate::compute_distributed_shares_hash(
                &participant.encrypted_shares,
                &participant.commitments,
            )?;
            encrypted_shares_hashes.push(encrypted_shares_hash);
        }

        warn!(accused = %self.address, "accusing validator of a bad gpkj");
        let call = ContractCall::AccuseParticipantSubmittedBadGpkj {
            validators: participants.iter().map(|p| p.address).collect(),
            encrypted_shares_hashes,
            commitments: participants.iter().map(|p| p.commitments.clone()).collect(),
            dishonest: self.address,
        };
        Ok(Some(send(ctx, &state, call).await?))
    }

    async fn should_execute(&self, ctx: &TaskContext) -> Result<bool, TaskErr> {
        let state = load(ctx)?;
        if state.phase != Phase::DisputeGPKJSubmission {
            return Ok(false);
        }
        let opts = call_opts(ctx, &state).await?;
        Ok(ctx.chain.is_validator(&opts, &self.address).await?)
    }
}
