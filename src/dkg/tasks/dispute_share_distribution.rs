use async_trait::async_trait;
use blstrs::G1Projective;
use group::Group;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{call_opts, load, modify, names, send};
use crate::{
    crypto_tools::{cipher, zkp::chaum_pedersen},
    dkg::{generate, state::Phase},
    error::DkgError,
    executor::task::{Task, TaskContext, TaskErr},
    layer1::{ContractCall, Transaction},
};

/// Checks the share every dealer sent us and accuses the ones that do not
/// match their commitments, revealing the shared transport key with a DLEQ proof.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeShareDistributionTask {}

#[async_trait]
impl Task for DisputeShareDistributionTask {
    fn name(&self) -> &'static str {
        names::DISPUTE_SHARE_DISTRIBUTION
    }

    async fn prepare(&mut self, ctx: &TaskContext) -> Result<(), TaskErr> {
        modify(ctx, |state| {
            if state.phase != Phase::ShareDistribution
                && state.phase != Phase::DisputeShareDistribution
            {
                return Err(DkgError::InvalidArgument(format!(
                    "cannot check shares in phase {}",
                    state.phase
                )));
            }
            if state.transport_private_key.is_zero() {
                return Err(DkgError::Missing("transport private key"));
            }

            for participant in state.sorted_participants() {
                if participant.distributed_shares_hash.is_zero() {
                    continue;
                }
                let valid = match generate::verify_distributed_shares(state, &participant) {
                    Ok(valid) => valid,
                    Err(err) => {
                        warn!(dealer = %participant, "malformed distribution: {}", err);
                        false
                    }
                };
                if !valid {
                    warn!(dealer = %participant, "invalid share");
                    state.bad_shares.insert(participant.address, participant);
                }
            }
            Ok(())
        })
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr> {
        let state = load(ctx)?;
        let opts = call_opts(ctx, &state).await?;

        let private_key = state.transport_private_key;
        let g1 = G1Projective::generator();
        let public_key = g1 * private_key.as_ref();

        let mut last = None;
        for dealer in state.bad_shares.values() {
            if !ctx.chain.is_validator(&opts, &dealer.address).await? {
                debug!(dealer = %dealer, "already removed");
                continue;
            }

            let shared_key = cipher::shared_key(&private_key, &dealer.public_key);
            let stmt = chaum_pedersen::Statement {
                base1: &g1,
                base2: dealer.public_key.as_ref(),
                target1: &public_key,
                target2: shared_key.as_ref(),
            };
            let shared_key_proof = chaum_pedersen::prove(
                &stmt,
                &chaum_pedersen::Witness {
                    scalar: private_key.as_ref(),
                },
            );

            warn!(dealer = %dealer, "accusing dealer of bad shares");
            let call = ContractCall::AccuseParticipantDistributedBadShares {
                dishonest: dealer.address,
                encrypted_shares: dealer.encrypted_shares.clone(),
                commitments: dealer.commitments.clone(),
                shared_key,
                shared_key_proof,
            };
            last = Some(send(ctx, &state, call).await?);
        }
        Ok(last)
    }

    async fn should_execute(&self, ctx: &TaskContext) -> Result<bool, TaskErr> {
        let state = load(ctx)?;
        if state.phase != Phase::DisputeShareDistribution {
            return Ok(false);
        }
        let opts = call_opts(ctx, &state).await?;
        let accused = ctx.chain.bad_participants(&opts).await?;
        Ok(accused < state.bad_shares.len() as u64)
    }
}
