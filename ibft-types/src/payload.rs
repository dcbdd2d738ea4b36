use alloy_primitives::B256;
use alloy_rlp::{BufMut, Decodable, Encodable, Header, RlpDecodable, RlpEncodable};
use quorum::{Certificate, Envelope, Signable, Signature, Unchecked, Vote};

use crate::{Block, RoundIdentifier};

/// A round-change quorum justifying a proposal in a round above 0.
pub type RoundChangeCertificate = Certificate<RoundChange>;

/// A block proposed by the proposer of a round.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Proposal {
    round: RoundIdentifier,
    block: Block,
}

/// Agreement with the proposal of a round.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Prepare {
    round: RoundIdentifier,
    digest: B256,
}

/// Commitment to a prepared block, carrying the committed seal.
///
/// The seal is a signature over the block digest alone, which is what ends
/// up in the finalized header. The envelope signature covers the whole
/// payload.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Commit {
    round: RoundIdentifier,
    digest: B256,
    seal: Signature,
}

/// Request to move to `round` (the target round).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundChange {
    round: RoundIdentifier,
    prepared: Option<PreparedCertificate>,
}

/// Evidence that a block was prepared by a quorum in some round.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct PreparedCertificate {
    proposal: Envelope<Proposal, Unchecked>,
    prepares: Certificate<Prepare>,
}

impl Proposal {
    pub fn new(round: RoundIdentifier, block: Block) -> Self {
        Self { round, block }
    }

    pub fn round(&self) -> RoundIdentifier {
        self.round
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn digest(&self) -> B256 {
        self.block.hash()
    }
}

impl Prepare {
    pub fn new(round: RoundIdentifier, digest: B256) -> Self {
        Self { round, digest }
    }

    pub fn round(&self) -> RoundIdentifier {
        self.round
    }

    pub fn digest(&self) -> B256 {
        self.digest
    }
}

impl Commit {
    pub fn new(round: RoundIdentifier, digest: B256, seal: Signature) -> Self {
        Self {
            round,
            digest,
            seal,
        }
    }

    pub fn round(&self) -> RoundIdentifier {
        self.round
    }

    pub fn digest(&self) -> B256 {
        self.digest
    }

    pub fn seal(&self) -> &Signature {
        &self.seal
    }
}

impl RoundChange {
    pub fn new(round: RoundIdentifier, prepared: Option<PreparedCertificate>) -> Self {
        Self { round, prepared }
    }

    /// The target round.
    pub fn round(&self) -> RoundIdentifier {
        self.round
    }

    pub fn prepared(&self) -> Option<&PreparedCertificate> {
        self.prepared.as_ref()
    }
}

impl PreparedCertificate {
    pub fn new(proposal: Envelope<Proposal, Unchecked>, prepares: Certificate<Prepare>) -> Self {
        Self { proposal, prepares }
    }

    pub fn proposal(&self) -> &Envelope<Proposal, Unchecked> {
        &self.proposal
    }

    /// Prepares of the validators other than the proposer.
    pub fn prepares(&self) -> &Certificate<Prepare> {
        &self.prepares
    }

    /// The round in which the block was prepared.
    pub fn round(&self) -> RoundIdentifier {
        self.proposal.data().round()
    }

    pub fn block(&self) -> &Block {
        self.proposal.data().block()
    }
}

impl Signable for Proposal {
    const TAG: u8 = crate::message::PROPOSAL;
}

impl Signable for Prepare {
    const TAG: u8 = crate::message::PREPARE;
}

impl Signable for Commit {
    const TAG: u8 = crate::message::COMMIT;
}

impl Signable for RoundChange {
    const TAG: u8 = crate::message::ROUND_CHANGE;
}

impl Vote for Prepare {
    type Key = (RoundIdentifier, B256);

    fn key(&self) -> Self::Key {
        (self.round, self.digest)
    }
}

impl Vote for Commit {
    type Key = (RoundIdentifier, B256);

    fn key(&self) -> Self::Key {
        (self.round, self.digest)
    }
}

impl Vote for RoundChange {
    type Key = RoundIdentifier;

    fn key(&self) -> Self::Key {
        self.round
    }
}

impl RoundChange {
    fn payload_length(&self) -> usize {
        self.round.length() + option_length(self.prepared.as_ref())
    }
}

impl Encodable for RoundChange {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.round.encode(out);
        encode_option(self.prepared.as_ref(), out);
    }

    fn length(&self) -> usize {
        let n = self.payload_length();
        n + alloy_rlp::length_of_length(n)
    }
}

impl Decodable for RoundChange {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let mut payload = Header::decode_bytes(buf, true)?;
        let round = RoundIdentifier::decode(&mut payload)?;
        let prepared = decode_option(&mut payload)?;
        if !payload.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }
        Ok(Self { round, prepared })
    }
}

/// Optional values are encoded as lists of zero or one item.
pub(crate) fn encode_option<T: Encodable>(v: Option<&T>, out: &mut dyn BufMut) {
    let n = v.map(Encodable::length).unwrap_or(0);
    Header {
        list: true,
        payload_length: n,
    }
    .encode(out);
    if let Some(v) = v {
        v.encode(out)
    }
}

pub(crate) fn option_length<T: Encodable>(v: Option<&T>) -> usize {
    let n = v.map(Encodable::length).unwrap_or(0);
    n + alloy_rlp::length_of_length(n)
}

pub(crate) fn decode_option<T: Decodable>(buf: &mut &[u8]) -> alloy_rlp::Result<Option<T>> {
    let mut payload = Header::decode_bytes(buf, true)?;
    if payload.is_empty() {
        return Ok(None);
    }
    let v = T::decode(&mut payload)?;
    if !payload.is_empty() {
        return Err(alloy_rlp::Error::UnexpectedLength);
    }
    Ok(Some(v))
}
