//! Feldman verifiable secret sharing over BLS12-381.
use blstrs::{G1Projective, Scalar};
use ff::Field;
use group::Group;
use tracing::error;
use zeroize::Zeroize;

use super::bls;
use crate::error::{DkgError, DkgResult};

/// Secret polynomial `f(x) = a_0 + a_1 x + ... + a_t x^t` with `a_0` the secret value.
#[derive(Debug, Clone, Zeroize)]
#[zeroize(drop)]
pub struct Vss {
    coefficients: Vec<bls::Scalar>,
}

impl Vss {
    /// A random polynomial of degree `threshold`.
    pub fn new(threshold: usize) -> Self {
        Self::from_coeffs((0..=threshold).map(|_| bls::Scalar::random()).collect())
    }

    pub fn from_coeffs(coefficients: Vec<bls::Scalar>) -> Self {
        Self { coefficients }
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    pub fn secret(&self) -> &bls::Scalar {
        &self.coefficients[0]
    }

    pub fn coeffs(&self) -> &[bls::Scalar] {
        &self.coefficients
    }

    pub fn commit(&self) -> Vec<bls::G1> {
        self.coefficients
            .iter()
            .map(|coeff| (G1Projective::generator() * coeff.as_ref()).into())
            .collect()
    }

    /// evaluate the polynomial at `index` using Horner's method
    /// indices start at 1: `f(0)` is the secret
    pub fn share(&self, index: usize) -> Scalar {
        let index_scalar = Scalar::from(index as u64);
        self.coefficients
            .iter()
            .rev()
            .fold(Scalar::ZERO, |acc, coeff| acc * index_scalar + coeff.as_ref())
    }
}

/// `sum_k commits[k] * index^k`, the public image of `f(index)`
pub fn share_commit(commits: &[bls::G1], index: usize) -> G1Projective {
    let index_scalar = Scalar::from(index as u64);
    commits
        .iter()
        .rev()
        .fold(G1Projective::identity(), |acc, p| {
            acc * index_scalar + p.as_ref()
        })
}

pub fn validate_share(commits: &[bls::G1], share: &Scalar, index: usize) -> bool {
    share_commit(commits, index) == G1Projective::generator() * share
}

/// Lagrange coefficient at zero for `indices[i]` over all `indices` (1-based)
pub fn lagrange_coefficient(i: usize, indices: &[usize]) -> DkgResult<Scalar> {
    let scalars: Vec<Scalar> = indices
        .iter()
        .map(|&index| Scalar::from(index as u64))
        .collect();

    let (numerator, denominator) = scalars.iter().enumerate().fold(
        (Scalar::ONE, Scalar::ONE),
        |(num, den), (j, scalar_j)| {
            if j == i {
                (num, den)
            } else {
                (num * scalar_j, den * (*scalar_j - scalars[i]))
            }
        },
    );

    Option::<Scalar>::from(denominator.invert()).map(|den_inv| numerator * den_inv).ok_or_else(|| {
        error!(?indices, "lagrange denominator is zero");
        DkgError::InvalidArgument("duplicate share indices".to_string())
    })
}

/// Interpolate `f(0)` from `(index, f(index))` pairs
pub fn recover_secret(shares: &[(usize, Scalar)]) -> DkgResult<Scalar> {
    let indices: Vec<usize> = shares.iter().map(|(index, _)| *index).collect();
    shares
        .iter()
        .enumerate()
        .try_fold(Scalar::ZERO, |sum, (i, (_, share))| {
            Ok(sum + share * lagrange_coefficient(i, &indices)?)
        })
}
