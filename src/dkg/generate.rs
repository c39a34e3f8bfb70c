//! Cryptographic building blocks of ETHDKG.
//!
//! Each participant `j` deals a random polynomial `f_j` of degree `t`,
//! publishes Feldman commitments `g1 * a_jk` and sends `f_j(i)` to every other
//! participant `i`, encrypted under the pairwise transport key.
//! The master secret is `sum_j f_j(0)`, participant `i` ends with the
//! group private key `sum_j f_j(i)`.
use blstrs::{G1Projective, G2Projective, Scalar};
use ff::Field;
use group::Group;
use tracing::{error, warn};

use super::state::{DkgState, Participant};
use crate::{
    crypto_tools::{
        bls::{self, G1, G2},
        cipher::{self, EncryptedShare},
        constants,
        hash::{self, Output},
        vss::{self, Vss},
        zkp::chaum_pedersen,
    },
    error::{DkgError, DkgResult},
};

/// Fewest validators for which ETHDKG can run.
pub const MIN_VALIDATORS: usize = 4;

/// `t` such that `t + 1 > 2n / 3`
pub fn threshold_for_user_count(n: usize) -> usize {
    let k = n / 3;
    let mut threshold = 2 * k;
    if n - 3 * k == 2 {
        threshold += 1;
    }
    threshold
}

/// Multiplicative inverses of `1..n`, consumed by the contract's gpkj accusation.
pub fn inverse_array_for_user_count(n: usize) -> DkgResult<Vec<bls::Scalar>> {
    if n < MIN_VALIDATORS {
        error!("invalid user count {}", n);
        return Err(DkgError::InvalidArgument(format!("invalid user count {}", n)));
    }

    (1..n)
        .map(|m| {
            let m = Scalar::from(m as u64);
            let inv: Option<Scalar> = m.invert().into();
            match inv {
                Some(inv) if inv * m == Scalar::ONE => Ok(inv.into()),
                _ => {
                    error!("error when computing inverse array");
                    Err(DkgError::InvalidArgument(
                        "error when computing inverse array".to_string(),
                    ))
                }
            }
        })
        .collect()
}

/// A fresh transport key pair.
pub fn generate_keys() -> (bls::Scalar, G1) {
    let private_key = bls::Scalar::random();
    let public_key = cipher::public_key(&private_key);
    (private_key, public_key)
}

/// Output of [`generate_shares`]
#[derive(Debug, Clone)]
pub struct DealtShares {
    /// one per other participant, in index order
    pub encrypted_shares: Vec<EncryptedShare>,
    /// `t + 1` coefficients, the first one is the secret value
    pub private_coefficients: Vec<bls::Scalar>,
    /// `t + 1` Feldman commitments
    pub commitments: Vec<G1>,
}

fn check_participants(participants: &[Participant]) -> DkgResult<Vec<Participant>> {
    let n = participants.len();
    if n < MIN_VALIDATORS {
        error!("not enough participants: {}", n);
        return Err(DkgError::InvalidArgument(format!(
            "not enough participants: {}",
            n
        )));
    }
    let mut sorted = participants.to_vec();
    sorted.sort_by_key(|p| p.index);
    for (position, participant) in sorted.iter().enumerate() {
        if participant.index != position + 1 {
            error!(
                "participant {} has index {}, expected {}",
                participant.address,
                participant.index,
                position + 1
            );
            return Err(DkgError::InvalidArgument(format!(
                "participant indices are not 1..={}",
                n
            )));
        }
    }
    Ok(sorted)
}

/// Deal a fresh polynomial to `participants`, which must include ourselves.
pub fn generate_shares(
    transport_private_key: &bls::Scalar,
    participants: &[Participant],
) -> DkgResult<DealtShares> {
    if transport_private_key.is_zero() {
        error!("invalid transport private key");
        return Err(DkgError::Missing("transport private key"));
    }

    let participants = check_participants(participants)?;
    let n = participants.len();
    let threshold = threshold_for_user_count(n);

    let present = participants
        .iter()
        .filter(|p| !p.public_key.is_identity())
        .count();
    if present != n {
        error!("only have {} of {} public keys", present, n);
        return Err(DkgError::LengthMismatch {
            what: "public keys",
            expected: n,
            actual: present,
        });
    }

    let transport_public_key = cipher::public_key(transport_private_key);
    if !participants
        .iter()
        .any(|p| p.public_key == transport_public_key)
    {
        error!("our transport public key is not among the participants");
        return Err(DkgError::UnknownParticipant(
            "transport public key".to_string(),
        ));
    }

    let vss = Vss::new(threshold);
    let encrypted_shares = participants
        .iter()
        .filter(|p| p.public_key != transport_public_key)
        .map(|p| {
            cipher::encrypt(
                &vss.share(p.index),
                transport_private_key,
                &p.public_key,
                p.index,
            )
        })
        .collect();

    Ok(DealtShares {
        encrypted_shares,
        private_coefficients: vss.coeffs().to_vec(),
        commitments: vss.commit(),
    })
}

/// Output of [`generate_key_share`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyShare {
    pub g1: G1,
    pub g1_proof: chaum_pedersen::Proof,
    pub g2: G2,
}

/// `(h1 * s, proof, g2 * s)` where the proof shows `h1 * s` and `g1 * s` share the exponent.
pub fn generate_key_share(secret_value: &bls::Scalar) -> DkgResult<KeyShare> {
    if secret_value.is_zero() {
        error!("missing secret value");
        return Err(DkgError::Missing("secret value"));
    }

    let h1_base = bls::h1_base();
    let secret = secret_value.as_ref();
    let key_share_g1 = h1_base * secret;
    let key_share_g2 = G2Projective::generator() * secret;

    if !bls::pairing_check(&key_share_g1, &G2Projective::generator(), &h1_base, &key_share_g2) {
        error!("key share pairing check failed");
        return Err(DkgError::PairingCheck("key share"));
    }

    let g1 = G1Projective::generator();
    let g1_value = g1 * secret;
    let stmt = key_share_statement(&h1_base, &g1, &key_share_g1, &g1_value);
    let proof = chaum_pedersen::prove(&stmt, &chaum_pedersen::Witness { scalar: secret });
    if !chaum_pedersen::verify(&stmt, &proof) {
        error!("key share proof failed to verify");
        return Err(DkgError::InvalidProof("key share"));
    }

    Ok(KeyShare {
        g1: key_share_g1.into(),
        g1_proof: proof,
        g2: key_share_g2.into(),
    })
}

fn key_share_statement<'a>(
    h1_base: &'a G1Projective,
    g1: &'a G1Projective,
    key_share_g1: &'a G1Projective,
    g1_value: &'a G1Projective,
) -> chaum_pedersen::Statement<'a> {
    chaum_pedersen::Statement {
        base1: h1_base,
        base2: g1,
        target1: key_share_g1,
        target2: g1_value,
    }
}

/// Check a published key share against the first commitment of its dealer.
pub fn verify_key_share(key_share: &KeyShare, commitment_first_coefficient: &G1) -> bool {
    let h1_base = bls::h1_base();
    let g1 = G1Projective::generator();
    let stmt = key_share_statement(
        &h1_base,
        &g1,
        key_share.g1.as_ref(),
        commitment_first_coefficient.as_ref(),
    );
    chaum_pedersen::verify(&stmt, &key_share.g1_proof)
        && bls::pairing_check(
            key_share.g1.as_ref(),
            &G2Projective::generator(),
            &h1_base,
            key_share.g2.as_ref(),
        )
}

/// Sum of all G2 key shares, checked against the sum of the G1 key shares.
pub fn generate_master_public_key(key_share_g1s: &[G1], key_share_g2s: &[G2]) -> DkgResult<G2> {
    if key_share_g1s.is_empty() {
        error!("no key shares");
        return Err(DkgError::Missing("key shares"));
    }
    if key_share_g1s.len() != key_share_g2s.len() {
        error!(
            "mismatched key shares: {} in G1, {} in G2",
            key_share_g1s.len(),
            key_share_g2s.len()
        );
        return Err(DkgError::LengthMismatch {
            what: "key share G2s",
            expected: key_share_g1s.len(),
            actual: key_share_g2s.len(),
        });
    }

    let msk_g1: G1Projective = key_share_g1s.iter().map(|p| p.as_ref()).sum();
    let mpk: G2Projective = key_share_g2s.iter().map(|p| p.as_ref()).sum();

    if !bls::pairing_check(&msk_g1, &G2Projective::generator(), &bls::h1_base(), &mpk) {
        error!("master public key pairing check failed");
        return Err(DkgError::PairingCheck("master public key"));
    }

    Ok(mpk.into())
}

/// Our group private key `gskj` and group public key `gpkj = g2 * gskj`.
///
/// `encrypted_shares` holds, for every participant in index order,
/// the shares that participant dealt.
pub fn generate_group_keys(
    transport_private_key: &bls::Scalar,
    private_coefficients: &[bls::Scalar],
    encrypted_shares: &[Vec<EncryptedShare>],
    index: usize,
    participants: &[Participant],
) -> DkgResult<(bls::Scalar, G2)> {
    if transport_private_key.is_zero() {
        error!("invalid transport private key");
        return Err(DkgError::Missing("transport private key"));
    }
    if index == 0 {
        error!("invalid index");
        return Err(DkgError::InvalidArgument("index must be 1-based".to_string()));
    }

    let participants = check_participants(participants)?;
    let n = participants.len();
    let threshold = threshold_for_user_count(n);

    if private_coefficients.len() != threshold + 1 {
        error!(
            "invalid private coefficients: required {}, actual {}",
            threshold + 1,
            private_coefficients.len()
        );
        return Err(DkgError::LengthMismatch {
            what: "private coefficients",
            expected: threshold + 1,
            actual: private_coefficients.len(),
        });
    }
    if encrypted_shares.len() != n {
        error!(
            "invalid encrypted shares: required {}, actual {}",
            n,
            encrypted_shares.len()
        );
        return Err(DkgError::LengthMismatch {
            what: "encrypted shares",
            expected: n,
            actual: encrypted_shares.len(),
        });
    }
    if index > n {
        error!("index {} out of range for {} participants", index, n);
        return Err(DkgError::InvalidArgument(format!(
            "index {} out of range",
            index
        )));
    }

    let own_share = Vss::from_coeffs(private_coefficients.to_vec()).share(index);

    let group_private_key = participants.iter().zip(encrypted_shares).try_fold(
        own_share,
        |sum, (participant, shares)| {
            if participant.index == index {
                return Ok(sum);
            }
            if shares.len() != n - 1 {
                error!(
                    "participant {} dealt {} shares, expected {}",
                    participant,
                    shares.len(),
                    n - 1
                );
                return Err(DkgError::LengthMismatch {
                    what: "encrypted shares",
                    expected: n - 1,
                    actual: shares.len(),
                });
            }
            let secret = decrypt_share_for(
                shares,
                participant,
                transport_private_key,
                index,
            )
            .ok_or_else(|| {
                error!("cannot decrypt share from {}", participant);
                DkgError::InvalidArgument(format!("undecryptable share from {}", participant))
            })?;
            Ok(sum + secret)
        },
    )?;

    let group_public_key = G2Projective::generator() * group_private_key;
    Ok((group_private_key.into(), group_public_key.into()))
}

/// Position of the share for `recipient_index` in the list dealt by `dealer_index`:
/// the dealer skips itself.
pub fn encrypted_share_position(dealer_index: usize, recipient_index: usize) -> usize {
    if dealer_index < recipient_index {
        recipient_index - 2
    } else {
        recipient_index - 1
    }
}

fn decrypt_share_for(
    shares: &[EncryptedShare],
    dealer: &Participant,
    transport_private_key: &bls::Scalar,
    recipient_index: usize,
) -> Option<Scalar> {
    let share = shares.get(encrypted_share_position(dealer.index, recipient_index))?;
    cipher::decrypt(share, transport_private_key, &dealer.public_key, recipient_index)
}

/// `(H(H(encrypted_shares) || H(commitments)), H(encrypted_shares), H(commitments))`
pub fn compute_distributed_shares_hash(
    encrypted_shares: &[EncryptedShare],
    commitments: &[G1],
) -> DkgResult<(Output, Output, Output)> {
    if commitments.is_empty() {
        error!("no commitments to hash");
        return Err(DkgError::Missing("commitments"));
    }

    let encrypted_shares_bytes: Vec<u8> = encrypted_shares
        .iter()
        .flat_map(|share| share.as_bytes().iter().copied())
        .collect();
    let encrypted_shares_hash =
        hash::hash_with_tag(constants::ENCRYPTED_SHARES_HASH_TAG, encrypted_shares_bytes);
    let commitments_hash = hash::hash_g1s(constants::COMMITMENTS_HASH_TAG, commitments);

    let mut both = encrypted_shares_hash.as_bytes().to_vec();
    both.extend_from_slice(commitments_hash.as_bytes());
    let distributed_shares_hash = hash::hash_with_tag(constants::DISTRIBUTED_SHARES_HASH_TAG, both);

    Ok((distributed_shares_hash, encrypted_shares_hash, commitments_hash))
}

/// Classification of gpkj submissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSigners {
    pub honest: Vec<Participant>,
    pub dishonest: Vec<Participant>,
    pub missing: Vec<Participant>,
}

/// Classify every participant's published gpkj against the commitments of all dealers.
///
/// `gpkj*` is rebuilt as `sum_k (sum_p C_pk) * j^k`, which equals `g1 * gskj`
/// for an honest participant `j`; the pairing `e(gpkj*, g2) == e(g1, gpkj)` decides.
/// Inputs are in index order.
pub fn categorize_group_signers(
    published_public_keys: &[G2],
    participants: &[Participant],
    commitments: &[Vec<G1>],
) -> DkgResult<GroupSigners> {
    let n = participants.len();
    let threshold = threshold_for_user_count(n);

    if n != published_public_keys.len() || n != commitments.len() {
        error!(
            "mismatched public keys ({}), participants ({}), commitments ({})",
            published_public_keys.len(),
            n,
            commitments.len()
        );
        return Err(DkgError::LengthMismatch {
            what: "public keys and commitments",
            expected: n,
            actual: published_public_keys.len().min(commitments.len()),
        });
    }

    if let Some(bad) = commitments.iter().find(|c| c.len() != threshold + 1) {
        error!(
            "invalid commitments: required {}, actual {}",
            threshold + 1,
            bad.len()
        );
        return Err(DkgError::LengthMismatch {
            what: "commitments",
            expected: threshold + 1,
            actual: bad.len(),
        });
    }

    // sum of the k-th commitment over all dealers
    let summed: Vec<G1> = (0..=threshold)
        .map(|k| {
            commitments
                .iter()
                .map(|c| c[k].as_ref())
                .sum::<G1Projective>()
                .into()
        })
        .collect();

    let mut signers = GroupSigners::default();
    for (participant, gpkj) in participants.iter().zip(published_public_keys) {
        if gpkj.is_identity() {
            signers.missing.push(participant.identity());
            continue;
        }

        let gpkj_star = vss::share_commit(&summed, participant.index);
        if bls::pairing_check(
            &gpkj_star,
            &G2Projective::generator(),
            &G1Projective::generator(),
            gpkj.as_ref(),
        ) {
            signers.honest.push(participant.identity());
        } else {
            signers.dishonest.push(participant.identity());
        }
    }

    Ok(signers)
}

/// Whether the share `participant` dealt to us matches its commitments.
/// Our own share is always considered valid.
pub fn verify_distributed_shares(state: &DkgState, participant: &Participant) -> DkgResult<bool> {
    if state.transport_private_key.is_zero() {
        error!("transport private key not set");
        return Err(DkgError::Missing("transport private key"));
    }

    if state.index == participant.index {
        return Ok(true);
    }

    let n = state.number_of_validators;
    if n < MIN_VALIDATORS {
        error!("invalid participants; not enough validators");
        return Err(DkgError::InvalidArgument(
            "not enough validators".to_string(),
        ));
    }
    let threshold = threshold_for_user_count(n);

    let dealer = state.participant(&participant.address)?;
    if dealer.commitments.len() != threshold + 1 {
        error!("invalid commitments from {}: incorrect length", dealer);
        return Err(DkgError::LengthMismatch {
            what: "commitments",
            expected: threshold + 1,
            actual: dealer.commitments.len(),
        });
    }
    if dealer.encrypted_shares.len() != n - 1 {
        error!("invalid encrypted shares from {}: incorrect length", dealer);
        return Err(DkgError::LengthMismatch {
            what: "encrypted shares",
            expected: n - 1,
            actual: dealer.encrypted_shares.len(),
        });
    }

    let secret = match decrypt_share_for(
        &dealer.encrypted_shares,
        dealer,
        &state.transport_private_key,
        state.index,
    ) {
        Some(secret) => secret,
        None => {
            warn!("share from {} does not decrypt to a scalar", dealer);
            return Ok(false);
        }
    };

    Ok(vss::validate_share(&dealer.commitments, &secret, state.index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer1::Address;
    use tracing_test::traced_test;

    fn setup(n: usize) -> (Vec<bls::Scalar>, Vec<Participant>) {
        let keys: Vec<(bls::Scalar, G1)> = (0..n).map(|_| generate_keys()).collect();
        let participants = keys
            .iter()
            .enumerate()
            .map(|(i, (_, pk))| Participant::new(Address::new([i as u8 + 1; 20]), i + 1, *pk, 1))
            .collect();
        (keys.into_iter().map(|(sk, _)| sk).collect(), participants)
    }

    #[test]
    fn threshold() {
        let expected = [(4, 2), (5, 3), (6, 4), (7, 4), (8, 5), (9, 6), (10, 6), (100, 66)];
        for (n, t) in expected {
            assert_eq!(threshold_for_user_count(n), t, "n = {}", n);
            assert!(t + 1 <= n);
            assert!(3 * (t + 1) > 2 * n);
        }
    }

    #[test]
    #[traced_test]
    fn inverse_array() {
        for n in 0..MIN_VALIDATORS {
            assert!(inverse_array_for_user_count(n).is_err());
        }
        let inverses = inverse_array_for_user_count(10).unwrap();
        assert_eq!(inverses.len(), 9);
        for (i, inv) in inverses.iter().enumerate() {
            assert_eq!(*inv.as_ref() * Scalar::from(i as u64 + 1), Scalar::ONE);
        }
    }

    #[test]
    #[traced_test]
    fn shares_reconstruct_secret() {
        let n = 6;
        let (sks, participants) = setup(n);
        let threshold = threshold_for_user_count(n);
        let dealer = &participants[2];
        let dealt = generate_shares(&sks[2], &participants).unwrap();
        assert_eq!(dealt.encrypted_shares.len(), n - 1);
        assert_eq!(dealt.private_coefficients.len(), threshold + 1);
        assert_eq!(dealt.commitments.len(), threshold + 1);

        // every recipient decrypts a share consistent with the commitments
        let shares: Vec<(usize, Scalar)> = participants
            .iter()
            .filter(|p| p.index != dealer.index)
            .map(|p| {
                let share = decrypt_share_for(
                    &dealt.encrypted_shares,
                    dealer,
                    &sks[p.index - 1],
                    p.index,
                )
                .unwrap();
                assert!(vss::validate_share(&dealt.commitments, &share, p.index));
                (p.index, share)
            })
            .collect();

        let recovered = vss::recover_secret(&shares[..threshold + 1]).unwrap();
        assert_eq!(recovered, *dealt.private_coefficients[0].as_ref());
    }

    #[test]
    #[traced_test]
    fn generate_shares_bad_input() {
        let (sks, mut participants) = setup(4);
        assert!(generate_shares(&bls::Scalar::zero(), &participants).is_err());
        assert!(generate_shares(&sks[0], &participants[..3]).is_err());
        assert!(generate_shares(&bls::Scalar::random(), &participants).is_err());

        participants[1].public_key = G1::identity();
        assert_eq!(
            generate_shares(&sks[0], &participants).unwrap_err(),
            DkgError::LengthMismatch {
                what: "public keys",
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    #[traced_test]
    fn key_share() {
        assert_eq!(
            generate_key_share(&bls::Scalar::zero()),
            Err(DkgError::Missing("secret value"))
        );

        let secret = bls::Scalar::random();
        let key_share = generate_key_share(&secret).unwrap();
        let commitment = G1::from(G1Projective::generator() * secret.as_ref());
        assert!(verify_key_share(&key_share, &commitment));
        assert!(!verify_key_share(&key_share, &G1::from(G1Projective::generator())));
    }

    #[test]
    #[traced_test]
    fn master_public_key() {
        assert!(generate_master_public_key(&[], &[]).is_err());

        let secrets: Vec<bls::Scalar> = (0..4).map(|_| bls::Scalar::random()).collect();
        let key_shares: Vec<KeyShare> = secrets
            .iter()
            .map(|s| generate_key_share(s).unwrap())
            .collect();
        let g1s: Vec<G1> = key_shares.iter().map(|k| k.g1).collect();
        let g2s: Vec<G2> = key_shares.iter().map(|k| k.g2).collect();

        assert!(matches!(
            generate_master_public_key(&g1s, &g2s[..3]),
            Err(DkgError::LengthMismatch { .. })
        ));

        let mpk = generate_master_public_key(&g1s, &g2s).unwrap();
        let msk: Scalar = secrets.iter().map(|s| *s.as_ref()).sum();
        assert_eq!(mpk, G2::from(G2Projective::generator() * msk));

        // a G2 share that does not match its G1 share breaks the aggregate
        let mut bad_g2s = g2s.clone();
        bad_g2s[0] = G2::from(G2Projective::generator());
        assert_eq!(
            generate_master_public_key(&g1s, &bad_g2s),
            Err(DkgError::PairingCheck("master public key"))
        );
    }

    #[test]
    #[traced_test]
    fn group_keys_bad_input() {
        let (sks, participants) = setup(4);
        let t = threshold_for_user_count(4);
        let coefs = vec![bls::Scalar::random(); t + 1];
        let shares = vec![vec![EncryptedShare::default(); 3]; 4];

        assert!(generate_group_keys(&bls::Scalar::zero(), &coefs, &shares, 1, &participants).is_err());
        assert!(generate_group_keys(&sks[0], &coefs, &shares, 0, &participants).is_err());
        assert!(matches!(
            generate_group_keys(&sks[0], &coefs[..t], &shares, 1, &participants),
            Err(DkgError::LengthMismatch {
                what: "private coefficients",
                ..
            })
        ));
        assert!(matches!(
            generate_group_keys(&sks[0], &coefs, &shares[..3], 1, &participants),
            Err(DkgError::LengthMismatch {
                what: "encrypted shares",
                ..
            })
        ));
    }

    #[test]
    fn share_positions() {
        // dealer 2 deals to 1, 3, 4
        assert_eq!(encrypted_share_position(2, 1), 0);
        assert_eq!(encrypted_share_position(2, 3), 1);
        assert_eq!(encrypted_share_position(2, 4), 2);
        // dealer 4 deals to 1, 2, 3
        assert_eq!(encrypted_share_position(4, 3), 2);
    }

    #[test]
    fn distributed_shares_hash() {
        let commitments = vec![G1::from(G1Projective::generator())];
        let shares = vec![EncryptedShare::from([7; 32])];
        let (h, h_enc, h_comm) = compute_distributed_shares_hash(&shares, &commitments).unwrap();
        assert_ne!(h, h_enc);
        assert_ne!(h, h_comm);

        let other = vec![EncryptedShare::from([8; 32])];
        let (h_other, _, h_comm_other) =
            compute_distributed_shares_hash(&other, &commitments).unwrap();
        assert_ne!(h, h_other);
        assert_eq!(h_comm, h_comm_other);

        assert!(compute_distributed_shares_hash(&shares, &[]).is_err());
    }

    #[test]
    #[traced_test]
    fn categorize_length_checks() {
        let (_, participants) = setup(4);
        let t = threshold_for_user_count(4);
        let commitments = vec![vec![G1::identity(); t + 1]; 4];
        let gpks = vec![G2::identity(); 4];

        assert!(categorize_group_signers(&gpks[..3], &participants, &commitments).is_err());
        assert!(categorize_group_signers(&gpks, &participants, &commitments[..3]).is_err());

        let mut short = commitments.clone();
        short[2].pop();
        assert!(categorize_group_signers(&gpks, &participants, &short).is_err());

        // nobody submitted
        let signers = categorize_group_signers(&gpks, &participants, &commitments).unwrap();
        assert_eq!(signers.missing.len(), 4);
    }
}
