//! In-memory collaborators: a key-value store, a simulated ETHDKG contract,
//! a transaction watcher and an admin handler.
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use super::{
    Address, AdminHandler, CallOpts, ChainClient, ContractCall, CurveSpec, Database,
    ParticipantState, Receipt, ReceiptHandle, ReceiptStatus, SubscribeOptions, Transaction,
    TransactionWatcher, TxOpts, Txn,
};
use crate::{
    crypto_tools::hash,
    dkg::{generate, state::Phase},
    error::{AdminError, ChainError, DbError, WatcherError},
};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, String> {
    mutex.lock().map_err(|_| "poisoned lock".to_string())
}

#[derive(Debug, Default)]
pub struct MemoryDb {
    map: Mutex<Map>,
    syncs: AtomicUsize,
}

struct ReadTxn<'a>(&'a Map);

struct WriteTxn<'a>(&'a mut Map);

impl Txn for ReadTxn<'_> {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, DbError> {
        self.0.get(key).cloned().ok_or(DbError::KeyNotFound)
    }

    fn set(&mut self, _key: &[u8], _value: Vec<u8>) -> Result<(), DbError> {
        Err(DbError::Backend("read-only transaction".to_string()))
    }
}

impl Txn for WriteTxn<'_> {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, DbError> {
        self.0.get(key).cloned().ok_or(DbError::KeyNotFound)
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), DbError> {
        self.0.insert(key.to_vec(), value);
        Ok(())
    }
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `sync` calls so far.
    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }
}

impl Database for MemoryDb {
    fn view(&self, f: &mut dyn FnMut(&dyn Txn) -> Result<(), DbError>) -> Result<(), DbError> {
        let map = lock(&self.map).map_err(DbError::Backend)?;
        f(&ReadTxn(&map))
    }

    // work on a copy so a failing closure leaves nothing behind
    fn update(
        &self,
        f: &mut dyn FnMut(&mut dyn Txn) -> Result<(), DbError>,
    ) -> Result<(), DbError> {
        let mut map = lock(&self.map).map_err(DbError::Backend)?;
        let mut scratch = map.clone();
        f(&mut WriteTxn(&mut scratch))?;
        *map = scratch;
        Ok(())
    }

    fn sync(&self) -> Result<(), DbError> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ContractState {
    height: u64,
    block_hashes: BTreeMap<u64, hash::Output>,
    validators: Vec<Address>,
    nonce: u64,
    phase: Phase,
    participants: BTreeMap<Address, ParticipantState>,
    master_public_key_hash: hash::Output,
    bad_participants: u64,
    sent: Vec<Transaction>,
    failures: usize,
}

impl ContractState {
    fn remove_validators(&mut self, accused: &[Address]) {
        self.validators.retain(|v| !accused.contains(v));
        self.bad_participants += accused.len() as u64;
    }

    fn participant(&mut self, from: &Address) -> &mut ParticipantState {
        self.participants.entry(*from).or_default()
    }

    fn apply(&mut self, from: &Address, call: &ContractCall) -> Result<(), ChainError> {
        let nonce = self.nonce;
        match call {
            ContractCall::Register { public_key } => {
                let index = self.participants.len() + 1;
                let participant = self.participant(from);
                if participant.index == 0 {
                    participant.index = index;
                }
                participant.public_key = *public_key;
                participant.nonce = nonce;
                participant.phase = Phase::RegistrationOpen;
            }
            ContractCall::DistributeShares {
                encrypted_shares,
                commitments,
            } => {
                let (distributed_shares_hash, _, _) =
                    generate::compute_distributed_shares_hash(encrypted_shares, commitments)
                        .map_err(|err| ChainError::Rejected(err.to_string()))?;
                let participant = self.participant(from);
                participant.distributed_shares_hash = distributed_shares_hash;
                participant.commitments_first_coefficient = commitments[0];
                participant.phase = Phase::ShareDistribution;
            }
            ContractCall::SubmitKeyShare { key_share_g1, .. } => {
                let participant = self.participant(from);
                participant.key_share = *key_share_g1;
                participant.phase = Phase::KeyShareSubmission;
            }
            ContractCall::SubmitMasterPublicKey { master_public_key } => {
                self.master_public_key_hash = hash::master_public_key_hash(master_public_key);
                self.phase = Phase::GPKJSubmission;
            }
            ContractCall::SubmitGpkj { gpkj } => {
                let participant = self.participant(from);
                participant.gpkj = *gpkj;
                participant.phase = Phase::GPKJSubmission;
            }
            ContractCall::Complete => self.phase = Phase::Completion,
            ContractCall::AccuseParticipantNotRegistered { accused }
            | ContractCall::AccuseParticipantDidNotDistributeShares { accused }
            | ContractCall::AccuseParticipantDidNotSubmitKeyShares { accused }
            | ContractCall::AccuseParticipantDidNotSubmitGpkj { accused } => {
                self.remove_validators(accused)
            }
            ContractCall::AccuseParticipantDistributedBadShares { dishonest, .. }
            | ContractCall::AccuseParticipantSubmittedBadGpkj { dishonest, .. } => {
                self.remove_validators(&[*dishonest])
            }
        }
        Ok(())
    }
}

/// A simulated ETHDKG contract. Calls take effect as soon as they are sent.
#[derive(Debug, Default)]
pub struct MemoryChain {
    state: Mutex<ContractState>,
}

impl MemoryChain {
    pub fn new(validators: Vec<Address>) -> Self {
        Self {
            state: Mutex::new(ContractState {
                validators,
                ..Default::default()
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut ContractState) -> T) -> Result<T, ChainError> {
        let mut state = lock(&self.state).map_err(ChainError::Rpc)?;
        Ok(f(&mut state))
    }

    // test setup only; a poisoned lock means the test already failed
    fn set(&self, f: impl FnOnce(&mut ContractState)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state)
        }
    }

    fn get<T: Default>(&self, f: impl FnOnce(&ContractState) -> T) -> T {
        self.state.lock().map(|state| f(&state)).unwrap_or_default()
    }

    pub fn set_height(&self, height: u64) {
        self.set(|state| state.height = height)
    }

    pub fn advance(&self, blocks: u64) {
        self.set(|state| state.height += blocks)
    }

    pub fn height(&self) -> u64 {
        self.get(|state| state.height)
    }

    pub fn set_block_hash(&self, height: u64, block_hash: hash::Output) {
        self.set(|state| {
            state.block_hashes.insert(height, block_hash);
        })
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.set(|state| state.nonce = nonce)
    }

    pub fn set_phase(&self, phase: Phase) {
        self.set(|state| state.phase = phase)
    }

    pub fn set_validators(&self, validators: Vec<Address>) {
        self.set(|state| state.validators = validators)
    }

    pub fn set_participant(&self, address: Address, participant: ParticipantState) {
        self.set(|state| {
            state.participants.insert(address, participant);
        })
    }

    pub fn participant(&self, address: &Address) -> Option<ParticipantState> {
        self.get(|state| state.participants.get(address).cloned())
    }

    pub fn validators(&self) -> Vec<Address> {
        self.get(|state| state.validators.clone())
    }

    pub fn current_phase(&self) -> Phase {
        self.get(|state| state.phase)
    }

    /// Every transaction accepted so far, in order.
    pub fn sent(&self) -> Vec<Transaction> {
        self.get(|state| state.sent.clone())
    }

    /// Make the next `n` rpc calls fail.
    pub fn fail_next(&self, n: usize) {
        self.set(|state| state.failures = n)
    }

    fn rpc<T>(&self, f: impl FnOnce(&mut ContractState) -> Result<T, ChainError>) -> Result<T, ChainError> {
        self.with(|state| {
            if state.failures > 0 {
                state.failures -= 1;
                return Err(ChainError::Rpc("injected failure".to_string()));
            }
            f(state)
        })?
    }
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn current_height(&self) -> Result<u64, ChainError> {
        self.rpc(|state| Ok(state.height))
    }

    async fn block_hash(&self, height: u64) -> Result<hash::Output, ChainError> {
        self.rpc(|state| {
            Ok(state
                .block_hashes
                .get(&height)
                .copied()
                .unwrap_or_else(|| hash::hash_with_tag(0xff, height.to_be_bytes())))
        })
    }

    async fn call_opts(&self, account: &Address) -> Result<CallOpts, ChainError> {
        self.rpc(|state| {
            Ok(CallOpts {
                from: *account,
                block: state.height,
            })
        })
    }

    async fn transaction_opts(&self, account: &Address) -> Result<TxOpts, ChainError> {
        self.rpc(|state| {
            Ok(TxOpts {
                from: *account,
                nonce: state.sent.iter().filter(|tx| tx.from == *account).count() as u64,
                gas_fee_cap: 0,
                gas_tip_cap: 0,
            })
        })
    }

    async fn validator_addresses(&self, _opts: &CallOpts) -> Result<Vec<Address>, ChainError> {
        self.rpc(|state| Ok(state.validators.clone()))
    }

    async fn is_validator(&self, _opts: &CallOpts, address: &Address) -> Result<bool, ChainError> {
        self.rpc(|state| Ok(state.validators.contains(address)))
    }

    async fn nonce(&self, _opts: &CallOpts) -> Result<u64, ChainError> {
        self.rpc(|state| Ok(state.nonce))
    }

    async fn phase(&self, _opts: &CallOpts) -> Result<Phase, ChainError> {
        self.rpc(|state| Ok(state.phase))
    }

    async fn participant_state(
        &self,
        _opts: &CallOpts,
        address: &Address,
    ) -> Result<ParticipantState, ChainError> {
        self.rpc(|state| Ok(state.participants.get(address).cloned().unwrap_or_default()))
    }

    async fn master_public_key_hash(&self, _opts: &CallOpts) -> Result<hash::Output, ChainError> {
        self.rpc(|state| Ok(state.master_public_key_hash))
    }

    async fn bad_participants(&self, _opts: &CallOpts) -> Result<u64, ChainError> {
        self.rpc(|state| Ok(state.bad_participants))
    }

    async fn send(&self, opts: &TxOpts, call: ContractCall) -> Result<Transaction, ChainError> {
        self.rpc(|state| {
            state.apply(&opts.from, &call)?;
            let tx = Transaction {
                hash: hash::hash_with_tag(0xfe, (state.sent.len() as u64).to_be_bytes()),
                from: opts.from,
                nonce: opts.nonce,
                call,
            };
            debug!(tx = %tx.hash, from = %tx.from, "transaction accepted");
            state.sent.push(tx.clone());
            Ok(tx)
        })
    }
}

/// Answers every subscription immediately, with injectable reverts and stale transactions.
#[derive(Debug, Default)]
pub struct MemoryWatcher {
    subscriptions: AtomicUsize,
    reverts: AtomicUsize,
    stale: AtomicUsize,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryWatcher {
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn revert_next(&self, n: usize) {
        self.reverts.store(n, Ordering::SeqCst)
    }

    pub fn stale_next(&self, n: usize) {
        self.stale.store(n, Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionWatcher for MemoryWatcher {
    async fn subscribe(
        &self,
        tx: &Transaction,
        _options: SubscribeOptions,
    ) -> Result<ReceiptHandle, WatcherError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot::channel();
        let outcome = if take_one(&self.stale) {
            Err(WatcherError::Stale(tx.hash.to_string()))
        } else {
            let status = if take_one(&self.reverts) {
                ReceiptStatus::Reverted
            } else {
                ReceiptStatus::Success
            };
            Ok(Receipt {
                tx_hash: tx.hash,
                block_number: 0,
                status,
            })
        };
        // the receiver is still alive: it is returned below
        let _ = sender.send(outcome);
        Ok(ReceiptHandle::new(receiver))
    }
}

/// Remembers every key it was handed.
#[derive(Debug, Default)]
pub struct RecordingAdmin {
    keys: Mutex<Vec<(Vec<u8>, CurveSpec)>>,
}

impl RecordingAdmin {
    pub fn keys(&self) -> Vec<(Vec<u8>, CurveSpec)> {
        self.keys.lock().map(|keys| keys.clone()).unwrap_or_default()
    }
}

impl AdminHandler for RecordingAdmin {
    fn add_private_key(&self, private_key: &[u8], curve: CurveSpec) -> Result<(), AdminError> {
        lock(&self.keys)
            .map_err(AdminError)?
            .push((private_key.to_vec(), curve));
        Ok(())
    }
}
