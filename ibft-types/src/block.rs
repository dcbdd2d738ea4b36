use alloy_primitives::{B256, Bytes, keccak256};
use alloy_rlp::{BufMut, Decodable, Encodable, Header as RlpHeader, RlpDecodable, RlpEncodable};
use quorum::{Address, Signature};

use crate::ExtraData;

/// The consensus-relevant part of a block header.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Header {
    pub parent_hash: B256,
    pub number: u64,
    pub timestamp: u64,
    /// The validator that built the block. It is the voter of `extra.vote`.
    pub beneficiary: Address,
    /// Commitment to the (opaque) block body.
    pub payload_root: B256,
    pub extra: ExtraData,
}

/// A block with an opaque body.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Block {
    pub header: Header,
    pub body: Bytes,
}

impl Header {
    pub fn genesis(validators: Vec<Address>, timestamp: u64) -> Self {
        Self {
            parent_hash: B256::ZERO,
            number: 0,
            timestamp,
            beneficiary: Address::ZERO,
            payload_root: keccak256(b""),
            extra: ExtraData::new(validators),
        }
    }

    /// The block hash.
    ///
    /// Computed over the header with round and committed seals removed from
    /// the extra data. This is also the digest validators prepare, commit
    /// and seal.
    pub fn hash(&self) -> B256 {
        let extra = self.extra.encode_for_hash();
        let mut out = Vec::with_capacity(self.rlp_payload_length(&extra) + 9);
        self.encode_with(&extra, &mut out);
        keccak256(&out)
    }

    /// A copy of this header with round and seals set.
    pub fn sealed(&self, round: u32, seals: Vec<Signature>) -> Self {
        let mut h = self.clone();
        h.extra.round = round;
        h.extra.seals = seals;
        h
    }

    fn rlp_payload_length(&self, extra: &[u8]) -> usize {
        self.parent_hash.length()
            + self.number.length()
            + self.timestamp.length()
            + self.beneficiary.length()
            + self.payload_root.length()
            + extra.length()
    }

    fn encode_with(&self, extra: &[u8], out: &mut dyn BufMut) {
        RlpHeader {
            list: true,
            payload_length: self.rlp_payload_length(extra),
        }
        .encode(out);
        self.parent_hash.encode(out);
        self.number.encode(out);
        self.timestamp.encode(out);
        self.beneficiary.encode(out);
        self.payload_root.encode(out);
        extra.encode(out);
    }
}

impl Block {
    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }
}

impl Encodable for Header {
    fn encode(&self, out: &mut dyn BufMut) {
        self.encode_with(&self.extra.encode(), out)
    }

    fn length(&self) -> usize {
        let n = self.rlp_payload_length(&self.extra.encode());
        n + alloy_rlp::length_of_length(n)
    }
}

impl Decodable for Header {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let mut payload = RlpHeader::decode_bytes(buf, true)?;
        let parent_hash = B256::decode(&mut payload)?;
        let number = u64::decode(&mut payload)?;
        let timestamp = u64::decode(&mut payload)?;
        let beneficiary = Address::decode(&mut payload)?;
        let payload_root = B256::decode(&mut payload)?;
        let extra = RlpHeader::decode_bytes(&mut payload, false)?;
        let extra =
            ExtraData::decode(extra).map_err(|_| alloy_rlp::Error::Custom("invalid extra data"))?;
        if !payload.is_empty() {
            return Err(alloy_rlp::Error::UnexpectedLength);
        }
        Ok(Self {
            parent_hash,
            number,
            timestamp,
            beneficiary,
            payload_root,
            extra,
        })
    }
}
