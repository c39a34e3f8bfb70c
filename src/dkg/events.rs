//! Applies ETHDKG contract events to the persisted [`DkgState`] and keeps the
//! task schedule in step with the phase the contract is in.
//!
//! Every phase transition kills the tasks of the phase that just ended and
//! schedules the next ones, each for a window of `phase_length` blocks.
//! Nodes outside the validator set track the state but schedule nothing.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    state::DkgState,
    tasks::{
        names, CompletionTask, DisputeGpkjTask, DisputeMissingGpkjTask,
        DisputeMissingKeySharesTask, DisputeMissingRegistrationTask,
        DisputeMissingShareDistributionTask, DisputeShareDistributionTask, DkgTask,
        GpkjSubmissionTask, KeyShareSubmissionTask, MpkSubmissionTask, RegisterTask,
        ShareDistributionTask,
    },
};
use crate::{
    crypto_tools::{
        bls::{G1, G2},
        cipher::EncryptedShare,
        zkp::chaum_pedersen,
    },
    error::{DkgResult, EventError, SchedulerError},
    executor::{scheduler::TaskSchedulerHandle, task::Task},
    layer1::{Address, ChainClient, Database},
};

/// Events emitted by the ETHDKG contract, already decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EthDkgEvent {
    RegistrationOpened {
        start_block: u64,
        phase_length: u64,
        confirmation_length: u64,
        nonce: u64,
    },
    AddressRegistered {
        account: Address,
        index: usize,
        nonce: u64,
        public_key: G1,
    },
    RegistrationComplete {
        block_number: u64,
    },
    SharesDistributed {
        account: Address,
        encrypted_shares: Vec<EncryptedShare>,
        commitments: Vec<G1>,
    },
    ShareDistributionComplete {
        block_number: u64,
    },
    KeyShareSubmitted {
        account: Address,
        key_share_g1: G1,
        key_share_g1_proof: chaum_pedersen::Proof,
        key_share_g2: G2,
    },
    KeyShareSubmissionComplete {
        block_number: u64,
    },
    MPKSet {
        block_number: u64,
    },
    GPKJSubmitted {
        account: Address,
        gpkj: G2,
    },
    GPKJSubmissionComplete {
        block_number: u64,
    },
    ValidatorSetCompleted,
}

impl EthDkgEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EthDkgEvent::RegistrationOpened { .. } => "RegistrationOpened",
            EthDkgEvent::AddressRegistered { .. } => "AddressRegistered",
            EthDkgEvent::RegistrationComplete { .. } => "RegistrationComplete",
            EthDkgEvent::SharesDistributed { .. } => "SharesDistributed",
            EthDkgEvent::ShareDistributionComplete { .. } => "ShareDistributionComplete",
            EthDkgEvent::KeyShareSubmitted { .. } => "KeyShareSubmitted",
            EthDkgEvent::KeyShareSubmissionComplete { .. } => "KeyShareSubmissionComplete",
            EthDkgEvent::MPKSet { .. } => "MPKSet",
            EthDkgEvent::GPKJSubmitted { .. } => "GPKJSubmitted",
            EthDkgEvent::GPKJSubmissionComplete { .. } => "GPKJSubmissionComplete",
            EthDkgEvent::ValidatorSetCompleted => "ValidatorSetCompleted",
        }
    }
}

/// `[start, end)` of the `k`-th phase-length window after the current phase start.
fn window(state: &DkgState, k: u64) -> (u64, u64) {
    let start = state.phase_start + k * state.phase_length;
    (start, start + state.phase_length)
}

pub struct EventProcessor {
    db: Arc<dyn Database>,
    chain: Arc<dyn ChainClient>,
    scheduler: TaskSchedulerHandle<DkgTask>,
    account: Address,
}

impl EventProcessor {
    pub fn new(
        db: Arc<dyn Database>,
        chain: Arc<dyn ChainClient>,
        scheduler: TaskSchedulerHandle<DkgTask>,
        account: Address,
    ) -> Self {
        Self {
            db,
            chain,
            scheduler,
            account,
        }
    }

    pub async fn process(&self, event: EthDkgEvent) -> Result<(), EventError> {
        debug!(event = event.name(), "processing ETHDKG event");
        match event {
            EthDkgEvent::RegistrationOpened {
                start_block,
                phase_length,
                confirmation_length,
                nonce,
            } => {
                self.on_registration_opened(start_block, phase_length, confirmation_length, nonce)
                    .await
            }
            EthDkgEvent::AddressRegistered {
                account,
                index,
                nonce,
                public_key,
            } => {
                info!(account = %account, index, "address registered");
                self.update(|state| {
                    state.on_address_registered(account, index, nonce, public_key);
                    Ok(())
                })
            }
            EthDkgEvent::RegistrationComplete { block_number } => {
                let Some(state) = self.advance(|state| {
                    state.on_registration_complete(block_number);
                    Ok(())
                })?
                else {
                    return Ok(());
                };
                self.kill(&[names::REGISTER, names::DISPUTE_MISSING_REGISTRATION])
                    .await?;
                self.schedule(window(&state, 0), ShareDistributionTask::default())
                    .await?;
                self.schedule(
                    window(&state, 1),
                    DisputeMissingShareDistributionTask::default(),
                )
                .await?;
                self.schedule(window(&state, 1), DisputeShareDistributionTask::default())
                    .await
            }
            EthDkgEvent::SharesDistributed {
                account,
                encrypted_shares,
                commitments,
            } => {
                info!(account = %account, "shares distributed");
                self.update(|state| {
                    state.on_shares_distributed(&account, encrypted_shares, commitments)
                })
            }
            EthDkgEvent::ShareDistributionComplete { block_number } => {
                let Some(state) = self.advance(|state| {
                    state.on_share_distribution_complete(block_number);
                    Ok(())
                })?
                else {
                    return Ok(());
                };
                self.kill(&[
                    names::SHARE_DISTRIBUTION,
                    names::DISPUTE_MISSING_SHARE_DISTRIBUTION,
                    names::DISPUTE_SHARE_DISTRIBUTION,
                ])
                .await?;
                self.schedule(window(&state, 0), DisputeShareDistributionTask::default())
                    .await?;
                self.schedule(window(&state, 1), KeyShareSubmissionTask::default())
                    .await?;
                self.schedule(window(&state, 2), DisputeMissingKeySharesTask::default())
                    .await
            }
            EthDkgEvent::KeyShareSubmitted {
                account,
                key_share_g1,
                key_share_g1_proof,
                key_share_g2,
            } => {
                info!(account = %account, "key share submitted");
                self.update(|state| {
                    state.on_key_share_submitted(
                        &account,
                        key_share_g1,
                        key_share_g1_proof,
                        key_share_g2,
                    )
                })
            }
            EthDkgEvent::KeyShareSubmissionComplete { block_number } => {
                let Some(state) = self.advance(|state| {
                    state.on_key_share_submission_complete(block_number);
                    Ok(())
                })?
                else {
                    return Ok(());
                };
                self.kill(&[names::KEY_SHARE_SUBMISSION, names::DISPUTE_MISSING_KEY_SHARES])
                    .await?;
                self.schedule(window(&state, 0), MpkSubmissionTask::default())
                    .await
            }
            EthDkgEvent::MPKSet { block_number } => {
                let Some(state) = self.advance(|state| {
                    state.on_mpk_set(block_number);
                    Ok(())
                })?
                else {
                    return Ok(());
                };
                self.kill(&[names::MPK_SUBMISSION]).await?;
                self.schedule(window(&state, 0), GpkjSubmissionTask::default())
                    .await?;
                self.schedule(window(&state, 1), DisputeMissingGpkjTask::default())
                    .await?;
                self.schedule_gpkj_disputes(&state, window(&state, 1)).await
            }
            EthDkgEvent::GPKJSubmitted { account, gpkj } => {
                info!(account = %account, "gpkj submitted");
                self.update(|state| state.on_gpkj_submitted(&account, gpkj))
            }
            EthDkgEvent::GPKJSubmissionComplete { block_number } => {
                let Some(state) = self.advance(|state| {
                    state.on_gpkj_submission_complete(block_number);
                    Ok(())
                })?
                else {
                    return Ok(());
                };
                self.kill(&[
                    names::GPKJ_SUBMISSION,
                    names::DISPUTE_MISSING_GPKJ,
                    names::DISPUTE_GPKJ,
                ])
                .await?;
                self.schedule_gpkj_disputes(&state, window(&state, 0))
                    .await?;
                self.schedule(window(&state, 1), CompletionTask::default())
                    .await
            }
            EthDkgEvent::ValidatorSetCompleted => {
                let state = self.advance(|state| {
                    state.on_completion();
                    Ok(())
                })?;
                if state.is_none() {
                    return Ok(());
                }
                info!("ETHDKG completed");
                self.kill(&[names::COMPLETION]).await
            }
        }
    }

    async fn on_registration_opened(
        &self,
        start_block: u64,
        phase_length: u64,
        confirmation_length: u64,
        nonce: u64,
    ) -> Result<(), EventError> {
        let opts = self.chain.call_opts(&self.account).await?;
        let is_validator = self.chain.is_validator(&opts, &self.account).await?;
        let validator_addresses = self.chain.validator_addresses(&opts).await?;

        let mut state = DkgState::new(self.account);
        state.on_registration_opened(start_block, phase_length, confirmation_length, nonce);
        state.is_validator = is_validator;
        state.number_of_validators = validator_addresses.len();
        state.validator_addresses = validator_addresses;
        state.save(self.db.as_ref())?;

        info!(
            start_block,
            phase_length,
            confirmation_length,
            nonce,
            validators = state.number_of_validators,
            "ETHDKG registration opened"
        );
        if !is_validator {
            info!(account = %self.account, "not a validator, not taking part in ETHDKG");
            return Ok(());
        }

        self.schedule(window(&state, 0), RegisterTask::default())
            .await?;
        self.schedule(window(&state, 1), DisputeMissingRegistrationTask::default())
            .await
    }

    fn update(&self, f: impl FnOnce(&mut DkgState) -> DkgResult<()>) -> Result<(), EventError> {
        Ok(DkgState::modify(self.db.as_ref(), f)?)
    }

    /// Apply a phase transition; the new state if we take part in the run.
    fn advance(
        &self,
        f: impl FnOnce(&mut DkgState) -> DkgResult<()>,
    ) -> Result<Option<DkgState>, EventError> {
        let state = DkgState::modify(self.db.as_ref(), |state| {
            f(state)?;
            Ok(state.clone())
        })?;
        info!(phase = %state.phase, phase_start = state.phase_start, "ETHDKG phase changed");
        Ok(state.is_validator.then_some(state))
    }

    async fn kill(&self, names: &[&str]) -> Result<(), EventError> {
        for name in names {
            self.scheduler.kill_task_by_name(name).await?;
        }
        Ok(())
    }

    async fn schedule(
        &self,
        (start, end): (u64, u64),
        task: impl Into<DkgTask>,
    ) -> Result<(), EventError> {
        let task = task.into();
        let name = task.name();
        match self.scheduler.schedule_task(start, end, task).await {
            Ok(id) => {
                info!(task_id = %id, task = name, start, end, "scheduling task");
                Ok(())
            }
            // catching up on old events, later windows may still be open
            Err(SchedulerError::TaskExpired) => {
                warn!(task = name, start, end, "window already closed, not scheduling task");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn schedule_gpkj_disputes(
        &self,
        state: &DkgState,
        window: (u64, u64),
    ) -> Result<(), EventError> {
        for address in &state.validator_addresses {
            self.schedule(window, DisputeGpkjTask::new(*address))
                .await?;
        }
        Ok(())
    }
}
