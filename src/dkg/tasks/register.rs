use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{call_opts, expect_phase, load, modify, names, send};
use crate::{
    dkg::{generate, state::Phase},
    executor::task::{Task, TaskContext, TaskErr},
    layer1::{ContractCall, Transaction},
};

/// Registers our transport public key for the current run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTask {}

#[async_trait]
impl Task for RegisterTask {
    fn name(&self) -> &'static str {
        names::REGISTER
    }

    async fn prepare(&mut self, ctx: &TaskContext) -> Result<(), TaskErr> {
        modify(ctx, |state| {
            if state.transport_private_key.is_zero() || state.transport_public_key.is_identity() {
                let (private_key, public_key) = generate::generate_keys();
                state.transport_private_key = private_key;
                state.transport_public_key = public_key;
                info!(account = %state.account, "generated transport keys");
            }
            Ok(())
        })
    }

    async fn execute(&self, ctx: &TaskContext) -> Result<Option<Transaction>, TaskErr> {
        let state = load(ctx)?;
        expect_phase(&state, &[Phase::RegistrationOpen], self.name())?;
        let tx = send(
            ctx,
            &state,
            ContractCall::Register {
                public_key: state.transport_public_key,
            },
        )
        .await?;
        Ok(Some(tx))
    }

    async fn should_execute(&self, ctx: &TaskContext) -> Result<bool, TaskErr> {
        let state = load(ctx)?;
        if state.phase != Phase::RegistrationOpen {
            return Ok(false);
        }
        let opts = call_opts(ctx, &state).await?;
        let participant = ctx.chain.participant_state(&opts, &state.account).await?;
        let registered =
            participant.nonce == state.nonce && participant.public_key == state.transport_public_key;
        if registered {
            debug!(account = %state.account, "already registered");
        }
        Ok(!registered)
    }
}
