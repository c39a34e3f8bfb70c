//! Full ETHDKG ceremonies run directly against the protocol primitives.
use std::collections::BTreeMap;

use blstrs::{G2Projective, Scalar};
use ethdkg::{
    crypto_tools::{
        bls::{self, G1, G2},
        cipher::{self, EncryptedShare},
        vss::{self, Vss},
    },
    dkg::{
        generate::{self, DealtShares},
        state::{DkgState, Participant},
    },
    layer1::Address,
};
use ff::Field;
use group::Group;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::debug;
use tracing_test::traced_test;

struct Node {
    state: DkgState,
    dealt: DealtShares,
}

/// Registers `n` validators and has each of them deal. Dealings are not yet public.
fn deal(n: usize) -> Vec<Node> {
    let keys: Vec<(bls::Scalar, G1)> = (0..n).map(|_| generate::generate_keys()).collect();
    let participants: Vec<Participant> = keys
        .iter()
        .enumerate()
        .map(|(i, (_, pk))| Participant::new(Address::new([i as u8 + 1; 20]), i + 1, *pk, 1))
        .collect();

    participants
        .iter()
        .zip(&keys)
        .map(|(me, (sk, pk))| {
            let mut state = DkgState::new(me.address);
            state.is_validator = true;
            state.index = me.index;
            state.number_of_validators = n;
            state.validator_threshold = generate::threshold_for_user_count(n);
            state.transport_private_key = *sk;
            state.transport_public_key = *pk;
            state.participants = participants
                .iter()
                .map(|p| (p.address, p.clone()))
                .collect::<BTreeMap<_, _>>();

            let dealt = generate::generate_shares(sk, &participants).unwrap();
            state.secret_value = dealt.private_coefficients[0];
            state.private_coefficients = dealt.private_coefficients.clone();
            Node { state, dealt }
        })
        .collect()
}

/// Everybody sees everybody's dealing, as the share distribution events deliver them.
fn publish(nodes: &mut [Node]) {
    let dealings: Vec<(Address, Vec<EncryptedShare>, Vec<G1>)> = nodes
        .iter()
        .map(|node| {
            (
                node.state.account,
                node.dealt.encrypted_shares.clone(),
                node.dealt.commitments.clone(),
            )
        })
        .collect();
    for node in nodes.iter_mut() {
        for (dealer, shares, commitments) in &dealings {
            node.state
                .on_shares_distributed(dealer, shares.clone(), commitments.clone())
                .unwrap();
        }
    }
}

fn bad_dealers(node: &Node) -> Vec<usize> {
    node.state
        .sorted_participants()
        .iter()
        .filter(|dealer| !generate::verify_distributed_shares(&node.state, dealer).unwrap())
        .map(|dealer| dealer.index)
        .collect()
}

fn group_keys(node: &Node) -> (bls::Scalar, G2) {
    let participants = node.state.sorted_participants();
    let encrypted_shares: Vec<Vec<EncryptedShare>> = participants
        .iter()
        .map(|p| p.encrypted_shares.clone())
        .collect();
    generate::generate_group_keys(
        &node.state.transport_private_key,
        &node.state.private_coefficients,
        &encrypted_shares,
        node.state.index,
        &participants,
    )
    .unwrap()
}

#[test]
#[traced_test]
fn honest_ceremony() {
    for n in [4, 7, 10] {
        let t = generate::threshold_for_user_count(n);
        debug!("ceremony with n {}, t {}", n, t);
        let mut nodes = deal(n);
        publish(&mut nodes);

        // every share checks out against its dealer's commitments
        for node in &nodes {
            assert!(bad_dealers(node).is_empty());
        }

        // key shares are proven against the first commitment
        let key_shares: Vec<generate::KeyShare> = nodes
            .iter()
            .map(|node| generate::generate_key_share(&node.state.secret_value).unwrap())
            .collect();
        for (key_share, node) in key_shares.iter().zip(&nodes) {
            assert!(generate::verify_key_share(key_share, &node.dealt.commitments[0]));
        }
        assert!(!generate::verify_key_share(
            &key_shares[0],
            &nodes[1].dealt.commitments[0]
        ));

        let g1s: Vec<G1> = key_shares.iter().map(|ks| ks.g1).collect();
        let g2s: Vec<G2> = key_shares.iter().map(|ks| ks.g2).collect();
        let mpk = generate::generate_master_public_key(&g1s, &g2s).unwrap();

        let master_secret: Scalar = nodes
            .iter()
            .map(|node| *node.state.secret_value.as_ref())
            .sum();
        assert_eq!(*mpk.as_ref(), G2Projective::generator() * master_secret);

        // group keys are shares of the master secret
        let keys: Vec<(bls::Scalar, G2)> = nodes.iter().map(group_keys).collect();
        let signers: Vec<(usize, Scalar)> = keys
            .iter()
            .enumerate()
            .map(|(i, (gsk, _))| (i + 1, *gsk.as_ref()))
            .collect();
        assert_eq!(vss::recover_secret(&signers[..=t]).unwrap(), master_secret);
        assert_eq!(vss::recover_secret(&signers[n - t - 1..]).unwrap(), master_secret);
        assert_ne!(vss::recover_secret(&signers[..t]).unwrap(), master_secret);

        let gpkjs: Vec<G2> = keys.iter().map(|(_, gpkj)| *gpkj).collect();
        let participants = nodes[0].state.sorted_participants();
        let commitments: Vec<Vec<G1>> = participants.iter().map(|p| p.commitments.clone()).collect();
        let categorized =
            generate::categorize_group_signers(&gpkjs, &participants, &commitments).unwrap();
        assert_eq!(categorized.honest.len(), n);
        assert!(categorized.dishonest.is_empty());
        assert!(categorized.missing.is_empty());
    }
}

#[test]
#[traced_test]
fn dishonest_dealer() {
    let n = 5;
    let cheater = 2;
    let victim = 4;
    let mut nodes = deal(n);

    // the cheater hands the victim a share off its own polynomial
    let polynomial = Vss::from_coeffs(nodes[cheater].dealt.private_coefficients.clone());
    let wrong = polynomial.share(victim + 1) + Scalar::ONE;
    let position = generate::encrypted_share_position(cheater + 1, victim + 1);
    nodes[cheater].dealt.encrypted_shares[position] = cipher::encrypt(
        &wrong,
        &nodes[cheater].state.transport_private_key,
        &nodes[victim].state.transport_public_key,
        victim + 1,
    );
    publish(&mut nodes);

    for (i, node) in nodes.iter().enumerate() {
        let expected = if i == victim { vec![cheater + 1] } else { vec![] };
        assert_eq!(bad_dealers(node), expected, "node {}", i);
    }

    // the victim's group key no longer matches the commitments
    let mut gpkjs: Vec<G2> = nodes.iter().map(|node| group_keys(node).1).collect();
    gpkjs[1] = G2::identity();
    let participants = nodes[0].state.sorted_participants();
    let commitments: Vec<Vec<G1>> = participants.iter().map(|p| p.commitments.clone()).collect();
    let categorized =
        generate::categorize_group_signers(&gpkjs, &participants, &commitments).unwrap();

    let indices = |signers: &[Participant]| signers.iter().map(|p| p.index).collect::<Vec<_>>();
    assert_eq!(indices(&categorized.dishonest), vec![victim + 1]);
    assert_eq!(indices(&categorized.missing), vec![2]);
    assert_eq!(indices(&categorized.honest), vec![1, 3, 4]);
}

#[test]
fn deterministic_polynomial() {
    let mut rng = ChaCha20Rng::seed_from_u64(7);
    let coeffs: Vec<bls::Scalar> = (0..4).map(|_| Scalar::random(&mut rng).into()).collect();
    let vss = Vss::from_coeffs(coeffs.clone());
    let commits = vss.commit();

    let shares: Vec<(usize, Scalar)> = (1..=6).map(|i| (i, vss.share(i))).collect();
    for (i, share) in &shares {
        assert!(vss::validate_share(&commits, share, *i));
    }
    assert_eq!(vss::recover_secret(&shares[2..]).unwrap(), *coeffs[0].as_ref());

    // same seed, same polynomial
    let mut rng = ChaCha20Rng::seed_from_u64(7);
    let again: Vec<bls::Scalar> = (0..4).map(|_| Scalar::random(&mut rng).into()).collect();
    assert_eq!(again, coeffs);
}
