//! Discrete log equality in G1, in the compact (challenge, response) form the
//! contract checks key share proofs in.
use blstrs::{G1Projective, Scalar};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::crypto_tools::{
    bls::{self, G1},
    constants,
};

/// `target1 == x * base1` and `target2 == x * base2` for the same secret `x`.
#[derive(Clone, Debug)]
pub struct Statement<'a> {
    pub base1: &'a G1Projective,
    pub base2: &'a G1Projective,
    pub target1: &'a G1Projective,
    pub target2: &'a G1Projective,
}

#[derive(Clone, Debug)]
pub struct Witness<'a> {
    pub scalar: &'a Scalar,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    challenge: bls::Scalar,
    response: bls::Scalar,
}

impl Proof {
    /// No proof has a zero challenge; the default marks "not yet submitted".
    pub fn is_empty(&self) -> bool {
        self.challenge.is_zero() && self.response.is_zero()
    }
}

fn challenge(stmt: &Statement, commit1: &G1Projective, commit2: &G1Projective) -> Scalar {
    let points = [
        stmt.base1,
        stmt.base2,
        stmt.target1,
        stmt.target2,
        commit1,
        commit2,
    ];
    let digest: [u8; 32] = points
        .iter()
        .fold(
            Sha256::new().chain_update(constants::CHAUM_PEDERSEN_PROOF_TAG.to_be_bytes()),
            |hasher, point| hasher.chain_update(G1::from(**point).to_bytes()),
        )
        .finalize()
        .into();
    bls::scalar_from_digest(&digest)
}

pub fn prove(stmt: &Statement, wit: &Witness) -> Proof {
    let nonce = bls::Scalar::random();
    let commit1 = stmt.base1 * nonce.as_ref();
    let commit2 = stmt.base2 * nonce.as_ref();

    let challenge = challenge(stmt, &commit1, &commit2);
    let response = *nonce.as_ref() - challenge * wit.scalar;

    Proof {
        challenge: challenge.into(),
        response: response.into(),
    }
}

/// Rebuild both commitments from the response and check they hash back to the challenge.
pub fn verify(stmt: &Statement, proof: &Proof) -> bool {
    let (c, r) = (proof.challenge.as_ref(), proof.response.as_ref());
    let commit1 = stmt.base1 * r + stmt.target1 * c;
    let commit2 = stmt.base2 * r + stmt.target2 * c;

    if challenge(stmt, &commit1, &commit2) != *c {
        warn!("chaum pedersen proof: challenge mismatch");
        return false;
    }
    true
}
