//! Interfaces of the collaborators the DKG orchestration runs against:
//! the chain client, the transaction watcher, the key-value store and the admin handler.
//!
//! Contract wire formats are out of scope; contract calls are modelled by [`ContractCall`].
use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    crypto_tools::{
        bls::{G1, G2},
        cipher::EncryptedShare,
        hash,
        zkp::chaum_pedersen,
    },
    dkg::state::Phase,
    error::{AdminError, ChainError, DbError, WatcherError},
};

pub mod memory;

pub const ADDRESS_BYTES: usize = 20;

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; ADDRESS_BYTES]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_BYTES] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; ADDRESS_BYTES];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOpts {
    pub from: Address,
    pub block: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOpts {
    pub from: Address,
    pub nonce: u64,
    pub gas_fee_cap: u128,
    pub gas_tip_cap: u128,
}

/// State-changing calls on the ETHDKG contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractCall {
    Register {
        public_key: G1,
    },
    DistributeShares {
        encrypted_shares: Vec<EncryptedShare>,
        commitments: Vec<G1>,
    },
    SubmitKeyShare {
        key_share_g1: G1,
        key_share_g1_proof: chaum_pedersen::Proof,
        key_share_g2: G2,
    },
    SubmitMasterPublicKey {
        master_public_key: G2,
    },
    SubmitGpkj {
        gpkj: G2,
    },
    Complete,
    AccuseParticipantNotRegistered {
        accused: Vec<Address>,
    },
    AccuseParticipantDidNotDistributeShares {
        accused: Vec<Address>,
    },
    AccuseParticipantDidNotSubmitKeyShares {
        accused: Vec<Address>,
    },
    AccuseParticipantDidNotSubmitGpkj {
        accused: Vec<Address>,
    },
    AccuseParticipantDistributedBadShares {
        dishonest: Address,
        encrypted_shares: Vec<EncryptedShare>,
        commitments: Vec<G1>,
        shared_key: G1,
        shared_key_proof: chaum_pedersen::Proof,
    },
    AccuseParticipantSubmittedBadGpkj {
        validators: Vec<Address>,
        encrypted_shares_hashes: Vec<hash::Output>,
        commitments: Vec<Vec<G1>>,
        dishonest: Address,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: hash::Output,
    pub from: Address,
    pub nonce: u64,
    pub call: ContractCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: hash::Output,
    pub block_number: u64,
    pub status: ReceiptStatus,
}

/// A participant as recorded by the contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantState {
    pub public_key: G1,
    pub nonce: u64,
    pub index: usize,
    pub phase: Phase,
    pub distributed_shares_hash: hash::Output,
    pub commitments_first_coefficient: G1,
    pub key_share: G1,
    pub gpkj: G2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    /// let the watcher bump fees and resend on its own
    pub enable_auto_retry: bool,
    /// blocks without inclusion before the transaction is declared stale
    pub max_stale_blocks: u64,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            enable_auto_retry: true,
            max_stale_blocks: 10,
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn current_height(&self) -> Result<u64, ChainError>;
    async fn block_hash(&self, height: u64) -> Result<hash::Output, ChainError>;
    async fn call_opts(&self, account: &Address) -> Result<CallOpts, ChainError>;
    async fn transaction_opts(&self, account: &Address) -> Result<TxOpts, ChainError>;

    async fn validator_addresses(&self, opts: &CallOpts) -> Result<Vec<Address>, ChainError>;
    async fn is_validator(&self, opts: &CallOpts, address: &Address) -> Result<bool, ChainError>;
    async fn nonce(&self, opts: &CallOpts) -> Result<u64, ChainError>;
    async fn phase(&self, opts: &CallOpts) -> Result<Phase, ChainError>;
    async fn participant_state(
        &self,
        opts: &CallOpts,
        address: &Address,
    ) -> Result<ParticipantState, ChainError>;
    async fn master_public_key_hash(&self, opts: &CallOpts) -> Result<hash::Output, ChainError>;
    async fn bad_participants(&self, opts: &CallOpts) -> Result<u64, ChainError>;

    async fn send(&self, opts: &TxOpts, call: ContractCall) -> Result<Transaction, ChainError>;
}

/// Resolves once the watcher has a final answer for a subscribed transaction.
#[derive(Debug)]
pub struct ReceiptHandle(oneshot::Receiver<Result<Receipt, WatcherError>>);

impl ReceiptHandle {
    pub fn new(receiver: oneshot::Receiver<Result<Receipt, WatcherError>>) -> Self {
        Self(receiver)
    }

    pub async fn wait(self, cancel: &CancellationToken) -> Result<Receipt, WatcherError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(WatcherError::Cancelled),
            res = self.0 => res.map_err(|_| WatcherError::Failure("watcher dropped subscription".to_string()))?,
        }
    }
}

#[async_trait]
pub trait TransactionWatcher: Send + Sync {
    async fn subscribe(
        &self,
        tx: &Transaction,
        options: SubscribeOptions,
    ) -> Result<ReceiptHandle, WatcherError>;

    async fn subscribe_and_wait(
        &self,
        tx: &Transaction,
        options: SubscribeOptions,
        cancel: &CancellationToken,
    ) -> Result<Receipt, WatcherError> {
        self.subscribe(tx, options).await?.wait(cancel).await
    }
}

pub trait Txn {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, DbError>;
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), DbError>;
}

/// A key-value store with atomic read and read-write views.
/// An `update` whose closure fails leaves the store untouched.
pub trait Database: Send + Sync {
    fn view(&self, f: &mut dyn FnMut(&dyn Txn) -> Result<(), DbError>) -> Result<(), DbError>;
    fn update(&self, f: &mut dyn FnMut(&mut dyn Txn) -> Result<(), DbError>)
        -> Result<(), DbError>;
    fn sync(&self) -> Result<(), DbError>;
}

pub fn get_value(db: &dyn Database, key: &[u8]) -> Result<Vec<u8>, DbError> {
    let mut value = Vec::new();
    db.view(&mut |txn| {
        value = txn.get(key)?;
        Ok(())
    })?;
    Ok(value)
}

pub fn set_value(db: &dyn Database, key: &[u8], value: Vec<u8>) -> Result<(), DbError> {
    db.update(&mut |txn| txn.set(key, value.clone()))?;
    db.sync()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveSpec {
    Bls12381,
}

/// Hands threshold key material to the consensus layer.
pub trait AdminHandler: Send + Sync {
    fn add_private_key(&self, private_key: &[u8], curve: CurveSpec) -> Result<(), AdminError>;
}
