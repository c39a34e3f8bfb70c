//! One-time-pad encryption of secret shares under a Diffie-Hellman transport key
//!
//! The pad is `H(tag || dh_point || recipient_index)` where `dh_point = pk * sk`
//! is the shared point between dealer and recipient. Encryption and decryption
//! are the same xor.
use blstrs::G1Projective;
use group::Group;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{
    bls::{self, G1},
    constants,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedShare([u8; bls::SCALAR_BYTES]);

impl EncryptedShare {
    pub fn as_bytes(&self) -> &[u8; bls::SCALAR_BYTES] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; bls::SCALAR_BYTES]
    }
}

impl From<[u8; bls::SCALAR_BYTES]> for EncryptedShare {
    fn from(bytes: [u8; bls::SCALAR_BYTES]) -> Self {
        Self(bytes)
    }
}

pub fn shared_key(private_key: &bls::Scalar, public_key: &G1) -> G1 {
    (public_key.as_ref() * private_key.as_ref()).into()
}

fn pad(shared_key: &G1, recipient_index: usize) -> [u8; bls::SCALAR_BYTES] {
    Sha256::new()
        .chain_update(constants::SHARE_ENCRYPTION_TAG.to_be_bytes())
        .chain_update(shared_key.to_bytes())
        .chain_update((recipient_index as u64).to_be_bytes())
        .finalize()
        .into()
}

fn xor(lhs: &[u8; bls::SCALAR_BYTES], rhs: &[u8; bls::SCALAR_BYTES]) -> [u8; bls::SCALAR_BYTES] {
    let mut out = [0; bls::SCALAR_BYTES];
    for (o, (l, r)) in out.iter_mut().zip(lhs.iter().zip(rhs.iter())) {
        *o = l ^ r;
    }
    out
}

pub fn encrypt(
    secret: &blstrs::Scalar,
    private_key: &bls::Scalar,
    public_key: &G1,
    recipient_index: usize,
) -> EncryptedShare {
    let key = shared_key(private_key, public_key);
    EncryptedShare(xor(&secret.to_bytes_be(), &pad(&key, recipient_index)))
}

/// Returns `None` if the plaintext is not a canonical scalar,
/// which can only happen if the dealer misbehaved.
pub fn decrypt(
    encrypted: &EncryptedShare,
    private_key: &bls::Scalar,
    public_key: &G1,
    recipient_index: usize,
) -> Option<blstrs::Scalar> {
    let key = shared_key(private_key, public_key);
    let plaintext = xor(&encrypted.0, &pad(&key, recipient_index));
    Option::from(blstrs::Scalar::from_bytes_be(&plaintext))
}

pub fn public_key(private_key: &bls::Scalar) -> G1 {
    (G1Projective::generator() * private_key.as_ref()).into()
}
