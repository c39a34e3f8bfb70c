//! Per-validator record of an ETHDKG run and its persistence.
use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::generate;
use crate::{
    codec,
    crypto_tools::{
        bls::{self, G1, G2},
        cipher::EncryptedShare,
        hash,
        zkp::chaum_pedersen,
    },
    error::{DbError, DkgError, DkgResult},
    layer1::{Address, Database},
};

pub const PREFIX_ETHEREUM_DKG_STATE: &[u8] = b"ethdkg/state";

/// Phases of ETHDKG in the order the contract walks through them.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Phase {
    #[default]
    RegistrationOpen,
    ShareDistribution,
    DisputeShareDistribution,
    KeyShareSubmission,
    MPKSubmission,
    GPKJSubmission,
    DisputeGPKJSubmission,
    Completion,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What we know about a participant: public information only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub address: Address,
    /// 1-based, used as the evaluation point for secret sharing
    pub index: usize,
    /// transport public key
    pub public_key: G1,
    pub nonce: u64,
    pub phase: Phase,

    // share distribution
    pub commitments: Vec<G1>,
    pub encrypted_shares: Vec<EncryptedShare>,
    pub distributed_shares_hash: hash::Output,

    // key share submission
    pub key_share_g1: G1,
    pub key_share_g1_proof: chaum_pedersen::Proof,
    pub key_share_g2: G2,

    // gpkj submission
    pub gpkj: G2,
}

impl Participant {
    pub fn new(address: Address, index: usize, public_key: G1, nonce: u64) -> Self {
        Self {
            address,
            index,
            public_key,
            nonce,
            phase: Phase::RegistrationOpen,
            ..Default::default()
        }
    }

    /// Public identity only, without any submitted material.
    pub fn identity(&self) -> Self {
        Self::new(self.address, self.index, self.public_key, self.nonce)
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.index)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgState {
    pub is_validator: bool,
    pub phase: Phase,
    pub phase_length: u64,
    pub confirmation_length: u64,
    pub phase_start: u64,

    // local validator
    pub account: Address,
    /// 1-based index of the local validator, 0 until registered
    pub index: usize,
    /// validator set at the start of the run
    pub validator_addresses: Vec<Address>,
    pub number_of_validators: usize,
    pub nonce: u64,
    /// `t` such that `t + 1` shares are required to reconstruct
    pub validator_threshold: usize,
    pub transport_private_key: bls::Scalar,
    pub transport_public_key: G1,
    /// our contribution to the master secret key
    pub secret_value: bls::Scalar,
    pub private_coefficients: Vec<bls::Scalar>,
    pub master_public_key: G2,
    /// our share of the master secret key
    pub group_private_key: bls::Scalar,

    // remote validators
    pub participants: BTreeMap<Address, Participant>,

    // gpkj accusation
    pub dishonest_validators: Vec<Participant>,
    pub honest_validators: Vec<Participant>,
    pub inverse: Vec<bls::Scalar>,

    /// dealers whose share to us failed verification
    pub bad_shares: BTreeMap<Address, Participant>,
}

impl DkgState {
    pub fn new(account: Address) -> Self {
        Self {
            account,
            ..Default::default()
        }
    }

    /// Participants sorted by index.
    pub fn sorted_participants(&self) -> Vec<Participant> {
        let mut list: Vec<Participant> = self.participants.values().cloned().collect();
        list.sort_by_key(|p| p.index);
        list
    }

    pub fn participant(&self, address: &Address) -> DkgResult<&Participant> {
        self.participants
            .get(address)
            .ok_or_else(|| DkgError::UnknownParticipant(address.to_string()))
    }

    fn participant_mut(&mut self, address: &Address) -> DkgResult<&mut Participant> {
        self.participants.get_mut(address).ok_or_else(|| {
            error!("event for unknown participant {}", address);
            DkgError::UnknownParticipant(address.to_string())
        })
    }

    pub fn on_registration_opened(
        &mut self,
        start_block: u64,
        phase_length: u64,
        confirmation_length: u64,
        nonce: u64,
    ) {
        self.phase = Phase::RegistrationOpen;
        self.phase_start = start_block;
        self.phase_length = phase_length;
        self.confirmation_length = confirmation_length;
        self.nonce = nonce;
    }

    pub fn on_address_registered(
        &mut self,
        account: Address,
        index: usize,
        nonce: u64,
        public_key: G1,
    ) {
        self.participants
            .insert(account, Participant::new(account, index, public_key, nonce));

        // the event was ours
        if account == self.account {
            self.index = index;
        }
    }

    /// Registration is closed: the registered participants are the ones dealing.
    pub fn on_registration_complete(&mut self, share_distribution_start_block: u64) {
        self.number_of_validators = self.participants.len();
        self.validator_threshold = generate::threshold_for_user_count(self.number_of_validators);
        self.phase = Phase::ShareDistribution;
        self.phase_start = share_distribution_start_block + self.confirmation_length;
    }

    pub fn on_shares_distributed(
        &mut self,
        account: &Address,
        encrypted_shares: Vec<EncryptedShare>,
        commitments: Vec<G1>,
    ) -> DkgResult<()> {
        let (distributed_shares_hash, _, _) =
            generate::compute_distributed_shares_hash(&encrypted_shares, &commitments)?;

        let participant = self.participant_mut(account)?;
        participant.phase = Phase::ShareDistribution;
        participant.distributed_shares_hash = distributed_shares_hash;
        participant.commitments = commitments;
        participant.encrypted_shares = encrypted_shares;
        Ok(())
    }

    pub fn on_share_distribution_complete(&mut self, dispute_share_distribution_start_block: u64) {
        self.phase = Phase::DisputeShareDistribution;
        self.phase_start = dispute_share_distribution_start_block + self.confirmation_length;
    }

    pub fn on_key_share_submitted(
        &mut self,
        account: &Address,
        key_share_g1: G1,
        key_share_g1_proof: chaum_pedersen::Proof,
        key_share_g2: G2,
    ) -> DkgResult<()> {
        self.phase = Phase::KeyShareSubmission;

        let participant = self.participant_mut(account)?;
        participant.phase = Phase::KeyShareSubmission;
        participant.key_share_g1 = key_share_g1;
        participant.key_share_g1_proof = key_share_g1_proof;
        participant.key_share_g2 = key_share_g2;
        Ok(())
    }

    pub fn on_key_share_submission_complete(&mut self, mpk_submission_start_block: u64) {
        self.phase = Phase::MPKSubmission;
        self.phase_start = mpk_submission_start_block + self.confirmation_length;
    }

    pub fn on_mpk_set(&mut self, gpkj_submission_start_block: u64) {
        self.phase = Phase::GPKJSubmission;
        self.phase_start = gpkj_submission_start_block;
    }

    pub fn on_gpkj_submitted(&mut self, account: &Address, gpkj: G2) -> DkgResult<()> {
        let participant = self.participant_mut(account)?;
        participant.gpkj = gpkj;
        participant.phase = Phase::GPKJSubmission;
        Ok(())
    }

    pub fn on_gpkj_submission_complete(&mut self, dispute_gpkj_start_block: u64) {
        self.phase = Phase::DisputeGPKJSubmission;
        self.phase_start = dispute_gpkj_start_block + self.confirmation_length;
    }

    pub fn on_completion(&mut self) {
        self.phase = Phase::Completion;
    }

    /// Load the persisted state.
    pub fn load(db: &dyn Database) -> DkgResult<Self> {
        let mut raw = Vec::new();
        db.view(&mut |txn| {
            raw = txn.get(PREFIX_ETHEREUM_DKG_STATE)?;
            Ok(())
        })?;
        debug!("loaded dkg state ({} bytes)", raw.len());
        codec::decode(&raw)
    }

    /// Persist the state and sync the store.
    pub fn save(&self, db: &dyn Database) -> DkgResult<()> {
        let raw = codec::encode(self)?;
        db.update(&mut |txn| txn.set(PREFIX_ETHEREUM_DKG_STATE, raw.clone()))?;
        db.sync().map_err(|err| {
            error!("failed to sync dkg state: {}", err);
            DkgError::from(err)
        })
    }

    /// Read-modify-write the persisted state inside a single store transaction.
    /// Nothing is written if `f` fails.
    pub fn modify<T>(
        db: &dyn Database,
        f: impl FnOnce(&mut DkgState) -> DkgResult<T>,
    ) -> DkgResult<T> {
        let mut f = Some(f);
        let mut outcome: Option<DkgResult<T>> = None;
        let res = db.update(&mut |txn| {
            let f = f
                .take()
                .ok_or_else(|| DbError::Backend("update closure invoked twice".to_string()))?;
            let mut state: DkgState = match codec::decode(&txn.get(PREFIX_ETHEREUM_DKG_STATE)?)
            {
                Ok(state) => state,
                Err(err) => {
                    outcome = Some(Err(err));
                    return Err(DbError::Backend("dkg state decoding failed".to_string()));
                }
            };
            match f(&mut state).and_then(|value| Ok((value, codec::encode(&state)?))) {
                Ok((value, raw)) => {
                    txn.set(PREFIX_ETHEREUM_DKG_STATE, raw)?;
                    outcome = Some(Ok(value));
                    Ok(())
                }
                Err(err) => {
                    outcome = Some(Err(err));
                    Err(DbError::Backend("dkg state modification aborted".to_string()))
                }
            }
        });
        match (res, outcome) {
            (Ok(()), Some(Ok(value))) => {
                db.sync()?;
                Ok(value)
            }
            (_, Some(Err(err))) => Err(err),
            (Err(err), _) => Err(err.into()),
            (Ok(()), None) => Err(DkgError::Db(DbError::Backend(
                "update closure never ran".to_string(),
            ))),
        }
    }
}
