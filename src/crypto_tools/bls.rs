//! BLS12-381 helpers and serde support for blstrs types
//!
//! Points are (de)serialized in compressed form, scalars as 32 big-endian bytes.
//! The identity point and the zero scalar stand for "not yet submitted".
//!
//! ## References
//!
//! [Implementing Serialize · Serde](https://serde.rs/impl-serialize.html)
//! [Implementing Deserialize · Serde](https://serde.rs/impl-deserialize.html)

use std::sync::atomic::{compiler_fence, Ordering};

use blstrs::{G1Affine, G1Projective, G2Affine, G2Projective};
use ff::Field;
use group::{Curve, Group};
use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

use super::constants;

pub const SCALAR_BYTES: usize = 32;
pub const G1_BYTES: usize = 48;
pub const G2_BYTES: usize = 96;

/// The base point used by key shares and the master public key pairing checks.
pub fn h1_base() -> G1Projective {
    G1Projective::hash_to_curve(constants::H1_BASE_MSG, constants::H1_BASE_DST, &[])
}

/// `e(a1, a2) == e(b1, b2)`
pub fn pairing_check(a1: &G1Projective, a2: &G2Projective, b1: &G1Projective, b2: &G2Projective) -> bool {
    blstrs::pairing(&a1.to_affine(), &a2.to_affine())
        == blstrs::pairing(&b1.to_affine(), &b2.to_affine())
}

/// Reduce a byte string into a scalar by Horner evaluation in base 256.
pub fn scalar_from_digest(bytes: &[u8]) -> blstrs::Scalar {
    let base = blstrs::Scalar::from(256u64);
    bytes.iter().fold(blstrs::Scalar::ZERO, |acc, b| {
        acc * base + blstrs::Scalar::from(u64::from(*b))
    })
}

pub fn random_scalar() -> blstrs::Scalar {
    blstrs::Scalar::random(rand::thread_rng())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scalar(blstrs::Scalar);

impl Scalar {
    pub fn zero() -> Self {
        Self(blstrs::Scalar::ZERO)
    }

    pub fn random() -> Self {
        Self(random_scalar())
    }

    pub fn is_zero(&self) -> bool {
        bool::from(self.0.is_zero())
    }

    pub fn to_bytes(&self) -> [u8; SCALAR_BYTES] {
        self.0.to_bytes_be()
    }

    pub fn from_bytes(bytes: &[u8; SCALAR_BYTES]) -> Option<Self> {
        Option::from(blstrs::Scalar::from_bytes_be(bytes)).map(Self)
    }
}

impl Default for Scalar {
    fn default() -> Self {
        Self::zero()
    }
}

impl AsRef<blstrs::Scalar> for Scalar {
    fn as_ref(&self) -> &blstrs::Scalar {
        &self.0
    }
}

impl From<blstrs::Scalar> for Scalar {
    fn from(s: blstrs::Scalar) -> Self {
        Scalar(s)
    }
}

impl Zeroize for Scalar {
    fn zeroize(&mut self) {
        self.0 = blstrs::Scalar::ZERO;
        compiler_fence(Ordering::SeqCst);
    }
}

impl Serialize for Scalar {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: [u8; SCALAR_BYTES] = Deserialize::deserialize(deserializer)?;

        // ensure bytes encodes an integer less than the BLS12-381 group order
        Scalar::from_bytes(&bytes).ok_or_else(|| D::Error::custom("integer exceeds group order"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct G1(G1Projective);

impl G1 {
    pub fn identity() -> Self {
        Self(G1Projective::identity())
    }

    pub fn is_identity(&self) -> bool {
        bool::from(self.0.is_identity())
    }

    pub fn to_bytes(&self) -> [u8; G1_BYTES] {
        self.0.to_affine().to_compressed()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; G1_BYTES] = bytes.try_into().ok()?;
        Option::<G1Affine>::from(G1Affine::from_compressed(&raw)).map(|p| Self(p.into()))
    }
}

impl Default for G1 {
    fn default() -> Self {
        Self::identity()
    }
}

impl AsRef<G1Projective> for G1 {
    fn as_ref(&self) -> &G1Projective {
        &self.0
    }
}

impl From<G1Projective> for G1 {
    fn from(p: G1Projective) -> Self {
        G1(p)
    }
}

impl Serialize for G1 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_bytes().as_slice().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for G1 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        G1::from_bytes(&bytes).ok_or_else(|| D::Error::custom("invalid G1 point encoding"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct G2(G2Projective);

impl G2 {
    pub fn identity() -> Self {
        Self(G2Projective::identity())
    }

    pub fn is_identity(&self) -> bool {
        bool::from(self.0.is_identity())
    }

    pub fn to_bytes(&self) -> [u8; G2_BYTES] {
        self.0.to_affine().to_compressed()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; G2_BYTES] = bytes.try_into().ok()?;
        Option::<G2Affine>::from(G2Affine::from_compressed(&raw)).map(|p| Self(p.into()))
    }
}

impl Default for G2 {
    fn default() -> Self {
        Self::identity()
    }
}

impl AsRef<G2Projective> for G2 {
    fn as_ref(&self) -> &G2Projective {
        &self.0
    }
}

impl From<G2Projective> for G2 {
    fn from(p: G2Projective) -> Self {
        G2(p)
    }
}

impl Serialize for G2 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_bytes().as_slice().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for G2 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        G2::from_bytes(&bytes).ok_or_else(|| D::Error::custom("invalid G2 point encoding"))
    }
}
