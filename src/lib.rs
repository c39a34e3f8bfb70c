//! Validator-side orchestration of ETHDKG, a threshold distributed key
//! generation run through a smart contract.
//!
//! [`dkg`] holds the protocol: its cryptography, the per-validator state and
//! one task per on-chain action. [`executor`] runs tasks of any kind: a
//! persistent scheduler starts each one inside its block window and a manager
//! retries it until its transaction is mined. [`layer1`] defines the chain,
//! watcher, store and admin collaborators both run against.
pub mod codec;
pub mod config;
pub mod crypto_tools;
pub mod dkg;
pub mod error;
pub mod executor;
pub mod layer1;
pub mod logging;
