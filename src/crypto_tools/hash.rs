use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{
    bls::{G1, G2},
    constants,
};

// can't derive Serialize, Deserialize for sha2::digest::Output<Sha256>
// so use [u8; 32] instead
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Output([u8; 32]);

impl Output {
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Output {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

pub fn hash_with_tag(tag: u8, msg: impl AsRef<[u8]>) -> Output {
    Output(
        Sha256::new()
            .chain_update(tag.to_be_bytes())
            .chain_update(msg)
            .finalize()
            .into(),
    )
}

pub fn hash_g1s(tag: u8, points: &[G1]) -> Output {
    let mut hasher = Sha256::new().chain_update(tag.to_be_bytes());
    for point in points {
        hasher.update(point.to_bytes());
    }
    Output(hasher.finalize().into())
}

pub fn master_public_key_hash(mpk: &G2) -> Output {
    hash_with_tag(constants::MASTER_PUBLIC_KEY_HASH_TAG, mpk.to_bytes())
}
