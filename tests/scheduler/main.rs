//! Validators running the scheduler and the event processor against a
//! simulated ETHDKG contract, from registration to completion.
use std::{sync::Arc, time::Duration};

use ethdkg::{
    config::Config,
    dkg::{
        events::{EthDkgEvent, EventProcessor},
        state::{DkgState, Phase},
        tasks::DkgTask,
    },
    executor::scheduler::{TaskScheduler, TaskSchedulerHandle},
    layer1::{
        memory::{MemoryChain, MemoryDb, MemoryWatcher, RecordingAdmin},
        Address, ContractCall, Transaction,
    },
};
use tokio::{task::JoinHandle, time};
use tracing::info;
use tracing_test::traced_test;

const PHASE_LENGTH: u64 = 20;

fn address(i: usize) -> Address {
    Address::new([i as u8 + 1; 20])
}

struct Validator {
    db: Arc<MemoryDb>,
    admin: Arc<RecordingAdmin>,
    handle: TaskSchedulerHandle<DkgTask>,
    join: JoinHandle<()>,
    processor: EventProcessor,
}

impl Validator {
    fn start(account: Address, chain: Arc<MemoryChain>, watcher: Arc<MemoryWatcher>) -> Self {
        let db = Arc::new(MemoryDb::new());
        let admin = Arc::new(RecordingAdmin::default());
        let (scheduler, handle) = TaskScheduler::new(
            db.clone(),
            chain.clone(),
            admin.clone(),
            watcher,
            Config::default(),
        );
        let join = scheduler.start().unwrap();
        let processor = EventProcessor::new(db.clone(), chain, handle.clone(), account);
        Self {
            db,
            admin,
            handle,
            join,
            processor,
        }
    }

    fn state(&self) -> DkgState {
        DkgState::load(self.db.as_ref()).unwrap()
    }
}

struct Network {
    chain: Arc<MemoryChain>,
    validators: Vec<Validator>,
}

impl Network {
    /// `pool` validators on chain, of which the first `running` run a node.
    fn new(pool: usize, running: usize) -> Self {
        let chain = Arc::new(MemoryChain::new((0..pool).map(address).collect()));
        chain.set_nonce(1);
        let watcher = Arc::new(MemoryWatcher::default());
        let validators = (0..running)
            .map(|i| Validator::start(address(i), chain.clone(), watcher.clone()))
            .collect();
        Self { chain, validators }
    }

    async fn emit(&self, event: EthDkgEvent) {
        for validator in &self.validators {
            validator.processor.process(event.clone()).await.unwrap();
        }
    }

    /// Wait for at least `count` transactions matching `f`, letting the schedulers tick.
    async fn wait_for(
        &self,
        what: &str,
        count: usize,
        f: impl Fn(&ContractCall) -> bool,
    ) -> Vec<Transaction> {
        for _ in 0..300 {
            let sent: Vec<Transaction> = self
                .chain
                .sent()
                .into_iter()
                .filter(|tx| f(&tx.call))
                .collect();
            if sent.len() >= count {
                info!(what, count = sent.len(), "transactions seen");
                return sent;
            }
            time::sleep(Duration::from_secs(1)).await;
        }
        panic!("timed out waiting for {} {}", count, what);
    }

    /// Let every task still running notice there is nothing left to do.
    async fn settle(&self) {
        time::sleep(Duration::from_secs(60)).await;
    }

    async fn register(&self, start_block: u64) {
        self.emit(EthDkgEvent::RegistrationOpened {
            start_block,
            phase_length: PHASE_LENGTH,
            confirmation_length: 0,
            nonce: 1,
        })
        .await;
        self.chain.set_height(start_block);
        let registrations = self
            .wait_for("registrations", self.validators.len(), |call| {
                matches!(call, ContractCall::Register { .. })
            })
            .await;

        for tx in registrations {
            let registered = self.chain.participant(&tx.from).unwrap();
            self.emit(EthDkgEvent::AddressRegistered {
                account: tx.from,
                index: registered.index,
                nonce: registered.nonce,
                public_key: registered.public_key,
            })
            .await;
        }
    }

    async fn close(self) {
        for validator in self.validators {
            validator.handle.close();
            validator.join.await.unwrap();
        }
    }
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn full_ceremony() {
    let n = 4;
    let network = Network::new(n, n);
    network.register(10).await;

    // share distribution
    network
        .emit(EthDkgEvent::RegistrationComplete { block_number: 30 })
        .await;
    network.chain.set_height(30);
    let dealings = network
        .wait_for("dealings", n, |call| {
            matches!(call, ContractCall::DistributeShares { .. })
        })
        .await;
    for tx in dealings {
        let ContractCall::DistributeShares {
            encrypted_shares,
            commitments,
        } = tx.call
        else {
            unreachable!()
        };
        network
            .emit(EthDkgEvent::SharesDistributed {
                account: tx.from,
                encrypted_shares,
                commitments,
            })
            .await;
    }

    // share dispute finds nothing, then key shares
    network
        .emit(EthDkgEvent::ShareDistributionComplete { block_number: 50 })
        .await;
    network.chain.set_height(50);
    network.settle().await;
    for validator in &network.validators {
        assert!(validator.state().bad_shares.is_empty());
    }
    network.chain.set_height(70);
    let key_shares = network
        .wait_for("key shares", n, |call| {
            matches!(call, ContractCall::SubmitKeyShare { .. })
        })
        .await;
    for tx in key_shares {
        let ContractCall::SubmitKeyShare {
            key_share_g1,
            key_share_g1_proof,
            key_share_g2,
        } = tx.call
        else {
            unreachable!()
        };
        network
            .emit(EthDkgEvent::KeyShareSubmitted {
                account: tx.from,
                key_share_g1,
                key_share_g1_proof,
                key_share_g2,
            })
            .await;
    }

    // a single leader submits the master public key
    network
        .emit(EthDkgEvent::KeyShareSubmissionComplete { block_number: 90 })
        .await;
    network.chain.set_height(90);
    network
        .wait_for("master public key", 1, |call| {
            matches!(call, ContractCall::SubmitMasterPublicKey { .. })
        })
        .await;
    network.settle().await;
    let mpk = network.validators[0].state().master_public_key;
    for validator in &network.validators {
        assert_eq!(validator.state().master_public_key, mpk);
    }

    // group keys
    network.emit(EthDkgEvent::MPKSet { block_number: 110 }).await;
    network.chain.set_height(110);
    let gpkjs = network
        .wait_for("gpkjs", n, |call| matches!(call, ContractCall::SubmitGpkj { .. }))
        .await;
    for tx in gpkjs {
        let ContractCall::SubmitGpkj { gpkj } = tx.call else {
            unreachable!()
        };
        network
            .emit(EthDkgEvent::GPKJSubmitted {
                account: tx.from,
                gpkj,
            })
            .await;
    }
    for validator in &network.validators {
        let keys = validator.admin.keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(
            keys[0].0,
            validator.state().group_private_key.to_bytes().to_vec()
        );
    }

    // gpkj disputes find nothing, then completion
    network
        .emit(EthDkgEvent::GPKJSubmissionComplete { block_number: 150 })
        .await;
    network.chain.set_height(150);
    network.settle().await;
    for validator in &network.validators {
        assert_eq!(validator.state().honest_validators.len(), n);
        assert!(validator.state().dishonest_validators.is_empty());
    }
    network.chain.set_height(170);
    network
        .wait_for("completion", 1, |call| matches!(call, ContractCall::Complete))
        .await;
    network.settle().await;
    network.emit(EthDkgEvent::ValidatorSetCompleted).await;

    assert_eq!(network.chain.current_phase(), Phase::Completion);
    let sent = network.chain.sent();
    let count = |f: fn(&ContractCall) -> bool| sent.iter().filter(|tx| f(&tx.call)).count();
    assert_eq!(count(|c| matches!(c, ContractCall::SubmitMasterPublicKey { .. })), 1);
    assert_eq!(count(|c| matches!(c, ContractCall::Complete)), 1);
    assert_eq!(sent.len(), 4 * n + 2);
    for validator in &network.validators {
        assert_eq!(validator.state().phase, Phase::Completion);
    }
    network.close().await;
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn missing_registration_is_accused() {
    // five validators in the pool, one of them is offline
    let network = Network::new(5, 4);
    network.register(10).await;

    network.chain.set_height(30);
    let accusations = network
        .wait_for("accusations", 1, |call| {
            matches!(call, ContractCall::AccuseParticipantNotRegistered { .. })
        })
        .await;
    network.settle().await;

    assert_eq!(
        accusations[0].call,
        ContractCall::AccuseParticipantNotRegistered {
            accused: vec![address(4)]
        }
    );
    assert_eq!(network.chain.validators(), (0..4).map(address).collect::<Vec<_>>());
    let accusations = network
        .chain
        .sent()
        .into_iter()
        .filter(|tx| matches!(tx.call, ContractCall::AccuseParticipantNotRegistered { .. }))
        .count();
    assert_eq!(accusations, 1);
    network.close().await;
}
