use ibft::logging::init_logging;
use ibft_consensus::Phase;
use ibft_types::{Message, RoundIdentifier};

use crate::tests::consensus::helpers::fake_network::FakeNetwork;
use crate::tests::consensus::helpers::interceptor::Interceptor;
use crate::tests::consensus::helpers::test_helpers::HEAD;

const R0: RoundIdentifier = RoundIdentifier::new(HEAD + 1, 0);
const R1: RoundIdentifier = RoundIdentifier::new(HEAD + 1, 1);

#[test]
fn finalize_in_first_round() {
    init_logging();

    let mut net = FakeNetwork::new(4, Interceptor::default());
    net.start();
    net.process();

    let proposer = net.proposer(R0);
    let validators = net.consensus(0).validators().clone();
    let expected = net.delivered(proposer)[0].block.hash();

    for i in net.running() {
        let d = net.delivered(i);
        assert_eq!(d.len(), 1, "node {i}");
        let b = &d[0];
        assert_eq!(b.round, 0);
        assert_eq!(b.block.number(), HEAD + 1);
        assert_eq!(b.block.hash(), expected);
        assert_eq!(b.block.header.beneficiary, net.key(proposer).address());
        assert_eq!(b.block.header.extra.round, 0);
        assert_eq!(b.seals.len(), validators.quorum_size());
        assert_eq!(b.block.header.extra.seals, b.seals);
        assert_eq!(b.block.header.extra.validators, validators.as_slice());
        for s in &b.seals {
            assert!(validators.contains(&s.recover(&expected).unwrap()))
        }
        assert_eq!(net.consensus(i).phase(), Phase::Committed);
    }
}

#[test]
fn single_validator_finalizes_alone() {
    init_logging();

    let mut net = FakeNetwork::new(1, Interceptor::default());
    net.start();
    net.process();

    let d = net.delivered(0);
    assert_eq!(d.len(), 1);
    assert_eq!(d[0].seals.len(), 1);
}

#[test]
fn round_change_after_crashed_proposer() {
    init_logging();

    let mut net = FakeNetwork::new(4, Interceptor::default());
    let crashed = net.proposer(R0);
    net.crash(crashed);
    net.start();
    net.process();

    for i in net.running() {
        assert!(net.delivered(i).is_empty());
        assert_eq!(net.consensus(i).round(), R0);
    }

    net.timeout();
    net.process();

    let proposer = net.proposer(R1);
    assert_ne!(proposer, crashed);

    for i in net.running() {
        let d = net.delivered(i);
        assert_eq!(d.len(), 1, "node {i}");
        assert_eq!(d[0].round, 1);
        assert_eq!(d[0].block.header.extra.round, 1);
        assert_eq!(d[0].block.header.beneficiary, net.key(proposer).address());
        assert_eq!(net.consensus(i).round(), R1);
    }
}

#[test]
fn prepared_block_is_proposed_again() {
    init_logging();

    // Nobody sees the commits of round 0, so the round prepares but never
    // commits.
    let mut net = FakeNetwork::new(
        4,
        Interceptor::new(|_, m| !(matches!(m, Message::Commit(_)) && m.round() == R0)),
    );
    net.start();
    net.process();

    let prepared = net.consensus(0).round_state().block().unwrap().hash();
    for i in net.running() {
        assert!(net.delivered(i).is_empty());
        assert_eq!(net.consensus(i).phase(), Phase::Prepared);
        let pc = net.consensus(i).latest_prepared().unwrap();
        assert_eq!(pc.round(), R0);
        assert_eq!(pc.block().hash(), prepared);
    }

    net.timeout();
    net.process();

    for i in net.running() {
        let d = net.delivered(i);
        assert_eq!(d.len(), 1, "node {i}");
        assert_eq!(d[0].round, 1);
        assert_eq!(d[0].block.hash(), prepared);
        // The header was built in round 0, only the sealed copy says 1.
        assert_eq!(d[0].block.header.extra.round, 1);
    }
}

#[test]
fn prepared_block_survives_crashed_proposer() {
    init_logging();

    // Nobody sees any commit until the round is prepared everywhere.
    let mut net = FakeNetwork::new(
        4,
        Interceptor::new(|_, m| !matches!(m, Message::Commit(_))),
    );
    net.start();
    net.process();

    let prepared = net.consensus(0).round_state().block().unwrap().hash();

    // Once prepared, commits may flow again.
    net.set_interceptor(Interceptor::default());
    let crashed = net.proposer(R1);
    net.crash(crashed);

    net.timeout();
    net.process();
    for i in net.running() {
        assert!(net.delivered(i).is_empty());
        assert_eq!(net.consensus(i).round(), R1);
    }

    net.timeout();
    net.process();

    let r2 = R1.next_round();
    for i in net.running() {
        let d = net.delivered(i);
        assert_eq!(d.len(), 1, "node {i}");
        assert_eq!(d[0].round, r2.round());
        assert_eq!(d[0].block.hash(), prepared);
    }
}

#[test]
fn progress_over_several_heights() {
    init_logging();

    let target = HEAD + 4;

    let mut net = FakeNetwork::new(4, Interceptor::default());
    net.follow_chain_until(target);
    net.start();
    net.process();

    let reference = net.delivered(0).to_vec();
    assert_eq!(reference.len(), 4);

    let numbers: Vec<u64> = reference.iter().map(|b| b.block.number()).collect();
    assert_eq!(numbers, (HEAD + 1..=target).collect::<Vec<_>>());

    for w in reference.windows(2) {
        assert_eq!(w[1].block.header.parent_hash, w[0].block.hash());
    }

    // Every height has a different proposer.
    let mut beneficiaries: Vec<_> = reference.iter().map(|b| b.block.header.beneficiary).collect();
    beneficiaries.sort();
    beneficiaries.dedup();
    assert_eq!(beneficiaries.len(), 4);

    for i in net.running() {
        let hashes: Vec<_> = net.delivered(i).iter().map(|b| b.block.hash()).collect();
        let expected: Vec<_> = reference.iter().map(|b| b.block.hash()).collect();
        assert_eq!(hashes, expected, "node {i}");
        assert_eq!(net.consensus(i).parent().number, target - 1);
    }
}

#[test]
fn lagging_node_catches_up_through_buffered_messages() {
    init_logging();

    let target = HEAD + 3;

    // Node 0 misses the commits of the first height and stays behind
    // while the others finalize the next one.
    let mut net = FakeNetwork::new(
        4,
        Interceptor::new(|to, m| !(to == 0 && matches!(m, Message::Commit(_)) && m.round() == R0)),
    );
    net.follow_chain_until(target);
    net.start();
    net.process();

    assert!(net.delivered(0).is_empty());
    for i in 1..4 {
        assert_eq!(net.delivered(i).len(), 2, "node {i}");
    }

    // The third height is proposed by node 0, so the others wait.
    let stalled = RoundIdentifier::new(HEAD + 3, 0);
    assert_eq!(net.proposer(stalled), 0);
    assert_eq!(net.consensus(1).round(), stalled);

    // Node 0 learns of the first block by other means and replays what it
    // has buffered for the second.
    let first = net.delivered(1)[0].clone();
    net.new_chain_head(0, &first);
    net.process();

    let expected: Vec<_> = net.delivered(1).iter().map(|b| b.block.hash()).collect();
    assert_eq!(expected.len(), 3);

    let caught_up: Vec<_> = net.delivered(0).iter().map(|b| b.block.hash()).collect();
    assert_eq!(caught_up, expected[1..]);

    for i in 2..4 {
        let hashes: Vec<_> = net.delivered(i).iter().map(|b| b.block.hash()).collect();
        assert_eq!(hashes, expected, "node {i}");
    }
}
