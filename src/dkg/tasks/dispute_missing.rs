//! Accusations against validators that skipped a phase.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{call_opts, load, names, send};
use crate::{
    dkg::state::{DkgState, Participant, Phase},
    executor::task::{TaskContext, TaskErr},
    layer1::{Address, ContractCall, Transaction},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Missing {
    Registration,
    ShareDistribution,
    KeyShares,
    Gpkj,
}

impl Missing {
    fn phase(self) -> Phase {
        match self {
            Missing::Registration => Phase::RegistrationOpen,
            Missing::ShareDistribution => Phase::ShareDistribution,
            Missing::KeyShares => Phase::KeyShareSubmission,
            Missing::Gpkj => Phase::GPKJSubmission,
        }
    }

    fn has_material(self, participant: &Participant) -> bool {
        match self {
            Missing::Registration => !participant.public_key.is_identity(),
            Missing::ShareDistribution => !participant.distributed_shares_hash.is_zero(),
            Missing::KeyShares => {
                !participant.key_share_g1.is_identity()
                    && !participant.key_share_g1_proof.is_empty()
                    && !participant.key_share_g2.is_identity()
            }
            Missing::Gpkj => !participant.gpkj.is_identity(),
        }
    }

    fn accusation(self, accused: Vec<Address>) -> ContractCall {
        match self {
            Missing::Registration => ContractCall::AccuseParticipantNotRegistered { accused },
            Missing::ShareDistribution => {
                ContractCall::AccuseParticipantDidNotDistributeShares { accused }
            }
            Missing::KeyShares => ContractCall::AccuseParticipantDidNotSubmitKeyShares { accused },
            Missing::Gpkj => ContractCall::AccuseParticipantDidNotSubmitGpkj { accused },
        }
    }

    fn is_missing(self, state: &DkgState, validator: &Address) -> bool {
        match state.participants.get(validator) {
            None => true,
            Some(participant) => {
                participant.nonce != state.nonce
                    || participant.phase != self.phase()
                    || !self.has_material(participant)
            }
        }
    }

    /// Validators still in the pool that did not act in this phase.
    async fn accusable(self, ctx: &TaskContext, state: &DkgState) -> Result<Vec<Address>, TaskErr> {
        let opts = call_opts(ctx, state).await?;
        let validators = ctx.chain.validator_addresses(&opts).await?;
        Ok(validators
            .into_iter()
            .filter(|validator| self.is_missing(state, validator))
            .collect())
    }

    async fn execute(self, ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr> {
        let state = load(ctx)?;
        let accused = self.accusable(ctx, &state).await?;
        if accused.is_empty() {
            info!(missing = ?self, "no one to accuse");
            return Ok(None);
        }
        warn!(missing = ?self, ?accused, "accusing validators");
        Ok(Some(send(ctx, &state, self.accusation(accused)).await?))
    }

    async fn should_execute(self, ctx: &TaskContext) -> Result<bool, TaskErr> {
        let state = load(ctx)?;
        Ok(!self.accusable(ctx, &state).await?.is_empty())
    }
}

macro_rules! dispute_missing_task {
    ($(#[$doc:meta])* $task:ident, $name:expr, $missing:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $task {}

        #[async_trait]
        impl crate::executor::task::Task for $task {
            fn name(&self) -> &'static str {
                $name
            }

            async fn prepare(&mut self, _ctx: &TaskContext) -> Result<(), TaskErr> {
                Ok(())
            }

            async fn execute(&self, ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr> {
                $missing.execute(ctx).await
            }

            async fn should_execute(&self, ctx: &TaskContext) -> Result<bool, TaskErr> {
                $missing.should_execute(ctx).await
            }
        }
    };
}

dispute_missing_task!(
    /// Accuses validators that did not register.
    DisputeMissingRegistrationTask,
    names::DISPUTE_MISSING_REGISTRATION,
    Missing::Registration
);
dispute_missing_task!(
    /// Accuses validators that did not distribute shares.
    DisputeMissingShareDistributionTask,
    names::DISPUTE_MISSING_SHARE_DISTRIBUTION,
    Missing::ShareDistribution
);
dispute_missing_task!(
    /// Accuses validators that did not submit key shares.
    DisputeMissingKeySharesTask,
    names::DISPUTE_MISSING_KEY_SHARES,
    Missing::KeyShares
);
dispute_missing_task!(
    /// Accuses validators that did not submit their gpkj.
    DisputeMissingGpkjTask,
    names::DISPUTE_MISSING_GPKJ,
    Missing::Gpkj
);
