use alloy_primitives::{Bytes, keccak256};
use ibft_consensus::{Consensus, ConsensusConfig, MessageFactory};
use ibft_types::{Block, ExtraData, Header, Message, RoundChangeCertificate, RoundIdentifier};
use quorum::{Certificate, Keypair, Unchecked, ValidatorSet};

/// Number of the chain head all tests start from.
pub const HEAD: u64 = 9;

/// Validator keys ordered by address, i.e. key `i` is validator `i` of the
/// resulting validator set.
pub fn make_keys(n: u8) -> Vec<Keypair> {
    let mut keys: Vec<Keypair> = (1..=n)
        .map(|i| Keypair::from_bytes(&[i; 32]).unwrap())
        .collect();
    keys.sort_by_key(Keypair::address);
    keys
}

pub fn make_validators(keys: &[Keypair]) -> ValidatorSet {
    keys.iter().map(Keypair::address).collect()
}

pub fn make_head(validators: &ValidatorSet) -> Header {
    let mut h = Header::genesis(validators.as_slice().to_vec(), 0);
    h.number = HEAD;
    h.timestamp = HEAD;
    h
}

pub fn make_consensus_nodes(n: u8) -> Vec<Consensus> {
    make_consensus_nodes_with(n, ConsensusConfig::default())
}

pub fn make_consensus_nodes_with(n: u8, config: ConsensusConfig) -> Vec<Consensus> {
    let keys = make_keys(n);
    let validators = make_validators(&keys);
    let head = make_head(&validators);
    keys.into_iter()
        .map(|k| Consensus::new(k, head.clone(), validators.clone(), config))
        .collect()
}

/// Build a block the way a proposer's block builder would.
pub fn build_block(beneficiary: &Keypair, parent: &Header, extra: ExtraData) -> Block {
    let body = format!("block {} by {}", parent.number + 1, beneficiary.address());
    let body = Bytes::from(body.into_bytes());
    let header = Header {
        parent_hash: parent.hash(),
        number: parent.number + 1,
        timestamp: parent.timestamp + 1,
        beneficiary: beneficiary.address(),
        payload_root: keccak256(&body),
        extra,
    };
    Block { header, body }
}

/// A block for `round` built on `parent` with the extra data template of
/// the given validators.
pub fn make_block(
    beneficiary: &Keypair,
    parent: &Header,
    validators: &ValidatorSet,
    round: RoundIdentifier,
) -> Block {
    let mut extra = ExtraData::new(validators.as_slice().to_vec());
    extra.round = round.round();
    build_block(beneficiary, parent, extra)
}

/// Round changes to `target` from all given keys, without prepared blocks.
pub fn make_round_change_cert(keys: &[Keypair], target: RoundIdentifier) -> RoundChangeCertificate {
    Certificate::from_validated(
        keys.iter()
            .map(|k| MessageFactory::new(k.clone()).round_change(target, None)),
    )
}

/// A message as it arrives from the network.
pub fn over_the_wire<S>(m: &Message<S>) -> Message<Unchecked> {
    Message::decode(&m.encode()).unwrap()
}
