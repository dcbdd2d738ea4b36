use ibft::logging::init_logging;
use ibft_consensus::{ConsensusConfig, ConsensusError, InvalidProposal, MessageFactory, Phase};
use ibft_types::{Action, Block, Commit, Message, PreparedCertificate, RoundChangeCertificate};
use ibft_types::RoundIdentifier;
use quorum::{Certificate, Envelope, Keypair, Unchecked};

use crate::tests::consensus::helpers::test_helpers::{
    HEAD, make_block, make_consensus_nodes, make_consensus_nodes_with, make_head, make_keys,
    make_round_change_cert, make_validators, over_the_wire,
};

const R0: RoundIdentifier = RoundIdentifier::new(HEAD + 1, 0);
const R1: RoundIdentifier = RoundIdentifier::new(HEAD + 1, 1);

fn proposal(
    key: &Keypair,
    round: RoundIdentifier,
    block: Block,
    justification: Option<RoundChangeCertificate>,
) -> Message<Unchecked> {
    over_the_wire(&Message::Proposal {
        proposal: MessageFactory::new(key.clone()).proposal(round, block),
        justification,
    })
}

fn prepare(key: &Keypair, round: RoundIdentifier, block: &Block) -> Message<Unchecked> {
    over_the_wire(&Message::Prepare(
        MessageFactory::new(key.clone()).prepare(round, block.hash()),
    ))
}

/// Setup where node 0 is not the proposer of the first two rounds.
struct Setup {
    keys: Vec<Keypair>,
    block: Block,
}

impl Setup {
    fn new() -> Self {
        let keys = make_keys(4);
        let validators = make_validators(&keys);
        let head = make_head(&validators);
        assert_eq!(R0.proposer(&validators), Some(keys[2].address()));
        assert_eq!(R1.proposer(&validators), Some(keys[3].address()));
        let block = make_block(&keys[2], &head, &validators, R0);
        Self { keys, block }
    }

    fn block_of(&self, i: usize, round: RoundIdentifier) -> Block {
        let validators = make_validators(&self.keys);
        make_block(&self.keys[i], &make_head(&validators), &validators, round)
    }
}

#[test]
fn accept_proposal_and_prepare() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(0);
    assert_eq!(node.go(), vec![Action::ResetTimer(R0)]);

    let actions = node
        .try_handle_message(proposal(&s.keys[2], R0, s.block.clone(), None))
        .unwrap();

    let [Action::SendPrepare(p)] = actions.as_slice() else {
        panic!("unexpected actions: {actions:?}")
    };
    assert_eq!(p.data().round(), R0);
    assert_eq!(p.data().digest(), s.block.hash());
    assert_eq!(p.signer(), node.address());
    assert_eq!(node.phase(), Phase::NewRound);

    // A second proposal of the same proposer changes nothing.
    let mut other = s.block.clone();
    other.header.timestamp += 1;
    let actions = node
        .try_handle_message(proposal(&s.keys[2], R0, other, None))
        .unwrap();
    assert!(actions.is_empty());
    assert_eq!(node.round_state().digest(), Some(s.block.hash()));
}

#[test]
fn prepare_quorum_leads_to_commit() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(0);
    node.go();

    // Prepares may arrive before the proposal.
    assert!(node.try_handle_message(prepare(&s.keys[1], R0, &s.block)).unwrap().is_empty());

    let actions = node
        .try_handle_message(proposal(&s.keys[2], R0, s.block.clone(), None))
        .unwrap();
    assert_eq!(actions.len(), 2);
    let Action::SendCommit(c) = &actions[1] else {
        panic!("unexpected actions: {actions:?}")
    };
    assert_eq!(c.data().digest(), s.block.hash());
    assert_eq!(c.data().seal().recover(&s.block.hash()).unwrap(), node.address());
    assert_eq!(node.phase(), Phase::Prepared);
    assert_eq!(node.latest_prepared().map(PreparedCertificate::round), Some(R0));
}

#[test]
fn reject_proposal_of_wrong_proposer() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(0);
    node.go();

    let block = s.block_of(1, R0);
    let err = node
        .try_handle_message(proposal(&s.keys[1], R0, block, None))
        .unwrap_err();
    assert!(matches!(
        err,
        ConsensusError::UnexpectedProposer { signer, expected }
            if signer == s.keys[1].address() && expected == Some(s.keys[2].address())
    ));
    assert!(node.round_state().proposal().is_none());
}

#[test]
fn reject_invalid_blocks() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(0);
    node.go();

    let mut block = s.block.clone();
    block.header.number += 1;
    let err = node
        .try_handle_message(proposal(&s.keys[2], R0, block, None))
        .unwrap_err();
    assert!(matches!(
        err,
        ConsensusError::InvalidProposal(InvalidProposal::Number { got, expected })
            if got == HEAD + 2 && expected == HEAD + 1
    ));

    let mut block = s.block.clone();
    block.header.parent_hash = Default::default();
    let err = node
        .try_handle_message(proposal(&s.keys[2], R0, block, None))
        .unwrap_err();
    assert!(matches!(err, ConsensusError::InvalidProposal(InvalidProposal::Parent)));

    let mut block = s.block.clone();
    block.header.beneficiary = Keypair::from_bytes(&[42; 32]).unwrap().address();
    let err = node
        .try_handle_message(proposal(&s.keys[2], R0, block, None))
        .unwrap_err();
    assert!(matches!(err, ConsensusError::InvalidProposal(InvalidProposal::Beneficiary(_))));

    let cert = make_round_change_cert(&s.keys[..3], R0);
    let err = node
        .try_handle_message(proposal(&s.keys[2], R0, s.block.clone(), Some(cert)))
        .unwrap_err();
    assert!(matches!(
        err,
        ConsensusError::InvalidProposal(InvalidProposal::UnexpectedJustification)
    ));

    assert!(node.round_state().proposal().is_none());
}

#[test]
fn reject_non_validators() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(0);
    node.go();

    let stranger = Keypair::from_bytes(&[42; 32]).unwrap();
    let err = node
        .try_handle_message(prepare(&stranger, R0, &s.block))
        .unwrap_err();
    assert!(matches!(err, ConsensusError::Authentication(_)));
}

#[test]
fn reject_forged_commit_seal() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(0);
    node.go();

    let digest = s.block.hash();
    let seal = s.keys[3].sign(&digest);
    let commit = Envelope::signed(Commit::new(R0, digest, seal), &s.keys[1]);
    let err = node
        .try_handle_message(over_the_wire(&Message::Commit(commit)))
        .unwrap_err();
    assert!(matches!(err, ConsensusError::InvalidSeal(a) if a == s.keys[1].address()));
}

#[test]
fn message_windows() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(0);
    node.go();

    let limit = ConsensusConfig::default().future_round_limit;

    let stale = RoundIdentifier::new(HEAD, 0);
    let err = node
        .try_handle_message(prepare(&s.keys[1], stale, &s.block))
        .unwrap_err();
    assert!(matches!(err, ConsensusError::StaleRound(r) if r == stale));

    let too_far = R0.with_round(limit + 1);
    let err = node
        .try_handle_message(prepare(&s.keys[1], too_far, &s.block))
        .unwrap_err();
    assert!(matches!(err, ConsensusError::FutureRound(r) if r == too_far));

    // Within the window or for the next sequence messages are kept for later.
    let actions = node
        .try_handle_message(prepare(&s.keys[1], R0.with_round(limit), &s.block))
        .unwrap();
    assert!(actions.is_empty());
    let actions = node
        .try_handle_message(prepare(&s.keys[1], R0.next_sequence(), &s.block))
        .unwrap();
    assert!(actions.is_empty());
    assert_eq!(node.round(), R0);
}

#[test]
fn buffer_is_bounded() {
    init_logging();

    let s = Setup::new();
    let config = ConsensusConfig::builder()
        .future_message_limit(2)
        .future_sequence_limit(1)
        .build();
    let mut node = make_consensus_nodes_with(4, config).remove(0);
    node.go();

    let r = R0.with_round(2);
    assert!(node.try_handle_message(prepare(&s.keys[1], r, &s.block)).is_ok());
    assert!(node.try_handle_message(prepare(&s.keys[2], r, &s.block)).is_ok());
    let err = node
        .try_handle_message(prepare(&s.keys[3], r, &s.block))
        .unwrap_err();
    assert!(matches!(err, ConsensusError::FutureRound(_)));

    // The next sequence has a buffer of its own.
    let next = R0.next_sequence();
    assert!(node.try_handle_message(prepare(&s.keys[3], next, &s.block)).is_ok());
    let err = node
        .try_handle_message(prepare(&s.keys[1], next, &s.block))
        .unwrap_err();
    assert!(matches!(err, ConsensusError::FutureRound(r) if r == next));
}

#[test]
fn far_future_sequences_do_not_starve_future_rounds() {
    init_logging();

    let s = Setup::new();
    let validators = make_validators(&s.keys);
    let config = ConsensusConfig::builder()
        .future_message_limit(4)
        .future_sequence_limit(4)
        .build();
    let mut node = make_consensus_nodes_with(4, config).remove(0);
    node.go();

    // Anyone can send messages for arbitrary sequences. Only the next one
    // is buffered.
    let outsider = Keypair::from_bytes(&[0xee; 32]).unwrap();
    for seq in [HEAD + 3, HEAD + 100, u64::MAX] {
        let r = RoundIdentifier::new(seq, 0);
        let err = node
            .try_handle_message(prepare(&outsider, r, &s.block))
            .unwrap_err();
        assert!(matches!(err, ConsensusError::FutureRound(x) if x == r));
    }

    let next = R0.next_sequence();
    for _ in 0..4 {
        assert!(node.try_handle_message(prepare(&outsider, next, &s.block)).is_ok());
    }
    let err = node
        .try_handle_message(prepare(&outsider, next, &s.block))
        .unwrap_err();
    assert!(matches!(err, ConsensusError::FutureRound(_)));

    // A full next sequence buffer leaves later rounds untouched.
    let later = R0.with_round(1);
    assert!(node.try_handle_message(prepare(&s.keys[1], later, &s.block)).is_ok());

    // Buffered messages of the outsider are dropped after authentication.
    node.new_chain_head(s.block.header.clone(), validators);
    assert_eq!(node.round(), next);
    let later = next.with_round(1);
    assert!(node.try_handle_message(prepare(&s.keys[1], later, &s.block)).is_ok());
}

#[test]
fn ignore_stale_timeouts_and_blocks() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(0);
    node.go();

    assert!(node.timeout(R1).is_empty());
    assert!(node.handle_block(R0, s.block.clone()).is_empty());
    assert_eq!(node.round(), R0);
}

#[test]
fn timeout_sends_round_change() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(0);
    node.go();

    let actions = node.timeout(R0);
    let [Action::SendRoundChange(rc), Action::ResetTimer(r)] = actions.as_slice() else {
        panic!("unexpected actions: {actions:?}")
    };
    assert_eq!(rc.data().round(), R1);
    assert!(rc.data().prepared().is_none());
    assert_eq!(*r, R1);
    assert_eq!(node.round(), R1);

    // Rounds above 0 need a justification.
    let block = s.block_of(3, R1);
    let err = node
        .try_handle_message(proposal(&s.keys[3], R1, block.clone(), None))
        .unwrap_err();
    assert!(matches!(
        err,
        ConsensusError::InvalidProposal(InvalidProposal::MissingJustification)
    ));

    // Round changes of the justification must target the proposal's round.
    let cert = make_round_change_cert(&s.keys[..3], R1.next_round());
    let err = node
        .try_handle_message(proposal(&s.keys[3], R1, block.clone(), Some(cert)))
        .unwrap_err();
    assert!(matches!(
        err,
        ConsensusError::InvalidProposal(InvalidProposal::JustificationRound(_))
    ));

    // Less than a quorum does not justify anything.
    let cert = make_round_change_cert(&s.keys[..2], R1);
    let err = node
        .try_handle_message(proposal(&s.keys[3], R1, block.clone(), Some(cert)))
        .unwrap_err();
    assert!(matches!(err, ConsensusError::Quorum(_)));

    let cert = make_round_change_cert(&s.keys[..3], R1);
    let actions = node
        .try_handle_message(proposal(&s.keys[3], R1, block, Some(cert)))
        .unwrap();
    assert!(matches!(actions.as_slice(), [Action::SendPrepare(_)]));
}

#[test]
fn round_change_quorum_lets_proposer_build() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(3);
    node.go();
    node.timeout(R0);
    assert_eq!(node.round(), R1);

    let rc = |k: &Keypair| {
        over_the_wire(&Message::RoundChange(
            MessageFactory::new(k.clone()).round_change(R1, None),
        ))
    };

    assert!(node.try_handle_message(rc(&s.keys[0])).unwrap().is_empty());
    let actions = node.try_handle_message(rc(&s.keys[1])).unwrap();
    let [Action::BuildBlock { round, extra, .. }] = actions.as_slice() else {
        panic!("unexpected actions: {actions:?}")
    };
    assert_eq!(*round, R1);
    assert_eq!(extra.round, 1);
    assert!(extra.seals.is_empty());

    // A late round change does not request another block.
    assert!(node.try_handle_message(rc(&s.keys[2])).unwrap().is_empty());

    let block = s.block_of(3, R1);
    let actions = node.handle_block(R1, block.clone());
    let [Action::SendProposal(p, Some(cert))] = actions.as_slice() else {
        panic!("unexpected actions: {actions:?}")
    };
    assert_eq!(p.data().block(), &block);
    assert!(cert.len() >= 3);
    assert!(cert.votes().iter().all(|e| e.data().round() == R1));
}

#[test]
fn justification_must_carry_highest_prepared_block() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(0);
    node.go();
    node.timeout(R0);

    // Block `s.block` prepared in round 0 by validators 0 and 1.
    let prepared = PreparedCertificate::new(
        MessageFactory::new(s.keys[2].clone())
            .proposal(R0, s.block.clone())
            .into_unchecked(),
        Certificate::from_validated(
            s.keys[..2]
                .iter()
                .map(|k| MessageFactory::new(k.clone()).prepare(R0, s.block.hash())),
        ),
    );
    let cert = Certificate::from_validated([
        MessageFactory::new(s.keys[0].clone()).round_change(R1, Some(prepared)),
        MessageFactory::new(s.keys[1].clone()).round_change(R1, None),
        MessageFactory::new(s.keys[3].clone()).round_change(R1, None),
    ]);

    let err = node
        .try_handle_message(proposal(&s.keys[3], R1, s.block_of(3, R1), Some(cert.clone())))
        .unwrap_err();
    assert!(matches!(
        err,
        ConsensusError::InvalidProposal(InvalidProposal::NotHighestPrepared)
    ));

    let actions = node
        .try_handle_message(proposal(&s.keys[3], R1, s.block.clone(), Some(cert)))
        .unwrap();
    let [Action::SendPrepare(p)] = actions.as_slice() else {
        panic!("unexpected actions: {actions:?}")
    };
    assert_eq!(p.data().digest(), s.block.hash());
}

#[test]
fn reject_forged_prepared_certificate() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(0);
    node.go();
    node.timeout(R0);

    // The prepares include the proposer of round 0.
    let prepared = PreparedCertificate::new(
        MessageFactory::new(s.keys[2].clone())
            .proposal(R0, s.block.clone())
            .into_unchecked(),
        Certificate::from_validated(
            s.keys[1..3]
                .iter()
                .map(|k| MessageFactory::new(k.clone()).prepare(R0, s.block.hash())),
        ),
    );
    let cert = Certificate::from_validated([
        MessageFactory::new(s.keys[0].clone()).round_change(R1, Some(prepared)),
        MessageFactory::new(s.keys[1].clone()).round_change(R1, None),
        MessageFactory::new(s.keys[3].clone()).round_change(R1, None),
    ]);

    let err = node
        .try_handle_message(proposal(&s.keys[3], R1, s.block.clone(), Some(cert)))
        .unwrap_err();
    assert!(matches!(err, ConsensusError::InvalidPrepared(_)));
}

#[test]
fn justified_future_proposal_moves_round() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(0);
    node.go();

    let cert = make_round_change_cert(&s.keys[1..], R1);
    let actions = node
        .try_handle_message(proposal(&s.keys[3], R1, s.block_of(3, R1), Some(cert)))
        .unwrap();

    assert_eq!(node.round(), R1);
    assert!(actions.contains(&Action::ResetTimer(R1)));
    assert!(
        actions
            .iter()
            .any(|a| matches!(a, Action::SendPrepare(p) if p.data().round() == R1))
    );
}

#[test]
fn buffered_messages_count_after_round_jump() {
    init_logging();

    let s = Setup::new();
    let mut node = make_consensus_nodes(4).remove(0);
    node.go();

    let block = s.block_of(3, R1);
    let cert = make_round_change_cert(&s.keys[..3], R1);
    let msg = Message::Proposal {
        proposal: MessageFactory::new(s.keys[3].clone()).proposal(R1, block.clone()),
        justification: Some(cert),
    };

    // Prepares of a later round are buffered and handled once we get there.
    assert!(node.try_handle_message(prepare(&s.keys[1], R1, &block)).unwrap().is_empty());
    assert_eq!(node.round(), R0);

    let actions = node.try_handle_message(over_the_wire(&msg)).unwrap();
    assert_eq!(node.round(), R1);
    assert!(
        actions
            .iter()
            .any(|a| matches!(a, Action::SendCommit(c) if c.data().round() == R1))
    );
    assert_eq!(node.phase(), Phase::Prepared);
}

#[test]
fn future_sequence_is_replayed_on_new_chain_head() {
    init_logging();

    let s = Setup::new();
    let validators = make_validators(&s.keys);
    let mut node = make_consensus_nodes(4).remove(0);
    node.go();

    let head = s.block.header.clone();
    let next = RoundIdentifier::new(HEAD + 2, 0);
    assert_eq!(next.proposer(&validators), Some(s.keys[3].address()));
    let block = make_block(&s.keys[3], &head, &validators, next);

    let actions = node
        .try_handle_message(proposal(&s.keys[3], next, block.clone(), None))
        .unwrap();
    assert!(actions.is_empty());

    // Heads at or below the current parent are ignored.
    assert!(node.new_chain_head(make_head(&validators), validators.clone()).is_empty());

    let actions = node.new_chain_head(head.clone(), validators);
    assert_eq!(node.round(), next);
    assert_eq!(node.parent(), &head);
    assert!(actions.contains(&Action::ResetTimer(next)));
    assert!(
        actions
            .iter()
            .any(|a| matches!(a, Action::SendPrepare(p) if p.data().digest() == block.hash()))
    );
}
