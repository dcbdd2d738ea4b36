use alloy_rlp::{BufMut, Decodable, Encodable, Header};
use quorum::{Address, Signature};

use crate::DecodeError;

/// Length of the vanity prefix of the extra data.
pub const VANITY_LEN: usize = 32;

const VOTE_ADD: u8 = 0xff;
const VOTE_DROP: u8 = 0x00;

/// Consensus data embedded in a block header.
///
/// RLP list `[vanity, validators, vote, round, seals]` where `vote` is an
/// empty list or `[recipient, flag]` and `round` is a 4-byte big-endian
/// string. Committed seals are only present in finalized headers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExtraData {
    pub vanity: [u8; VANITY_LEN],
    pub validators: Vec<Address>,
    pub vote: Option<ValidatorVote>,
    pub round: u32,
    pub seals: Vec<Signature>,
}

/// A proposed change to the validator set, cast by a block's beneficiary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValidatorVote {
    pub recipient: Address,
    pub kind: VoteKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VoteKind {
    Add,
    Drop,
}

impl VoteKind {
    pub fn opposite(self) -> Self {
        match self {
            Self::Add => Self::Drop,
            Self::Drop => Self::Add,
        }
    }

    fn flag(self) -> u8 {
        match self {
            Self::Add => VOTE_ADD,
            Self::Drop => VOTE_DROP,
        }
    }
}

impl TryFrom<u8> for VoteKind {
    type Error = DecodeError;

    fn try_from(flag: u8) -> Result<Self, Self::Error> {
        match flag {
            VOTE_ADD => Ok(Self::Add),
            VOTE_DROP => Ok(Self::Drop),
            other => Err(DecodeError::InvalidVoteFlag(other)),
        }
    }
}

impl ValidatorVote {
    pub fn add(recipient: Address) -> Self {
        Self {
            recipient,
            kind: VoteKind::Add,
        }
    }

    pub fn drop(recipient: Address) -> Self {
        Self {
            recipient,
            kind: VoteKind::Drop,
        }
    }
}

impl Encodable for ValidatorVote {
    fn encode(&self, out: &mut dyn BufMut) {
        let flag = [self.kind.flag()];
        Header {
            list: true,
            payload_length: self.recipient.length() + flag.length(),
        }
        .encode(out);
        self.recipient.encode(out);
        flag.encode(out);
    }
}

impl ExtraData {
    pub fn new(validators: Vec<Address>) -> Self {
        Self {
            validators,
            ..Default::default()
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.encode_with(self.round, &self.seals)
    }

    /// The encoding used for block hashing.
    ///
    /// Round and committed seals are excluded, so a block keeps its hash
    /// when re-proposed in a later round and when it gets sealed.
    pub fn encode_for_hash(&self) -> Vec<u8> {
        self.encode_with(0, &[])
    }

    fn encode_with(&self, round: u32, seals: &[Signature]) -> Vec<u8> {
        let mut payload = Vec::new();
        self.vanity.encode(&mut payload);
        self.validators.encode(&mut payload);
        match &self.vote {
            Some(v) => v.encode(&mut payload),
            None => Header {
                list: true,
                payload_length: 0,
            }
            .encode(&mut payload),
        }
        round.to_be_bytes().encode(&mut payload);
        alloy_rlp::encode_list::<_, Signature>(seals, &mut payload);

        let mut out = Vec::with_capacity(payload.len() + 9);
        Header {
            list: true,
            payload_length: payload.len(),
        }
        .encode(&mut out);
        out.extend_from_slice(&payload);
        out
    }

    /// Decode extra data, rejecting anything but the canonical encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = bytes;
        let mut payload = Header::decode_bytes(&mut buf, true)?;
        if !buf.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }

        let vanity = <[u8; VANITY_LEN]>::decode(&mut payload)?;
        let validators = Vec::<Address>::decode(&mut payload)?;

        let mut v = Header::decode_bytes(&mut payload, true)?;
        let vote = if v.is_empty() {
            None
        } else {
            let recipient = Address::decode(&mut v)?;
            let [flag] = <[u8; 1]>::decode(&mut v)?;
            if !v.is_empty() {
                return Err(DecodeError::TrailingBytes);
            }
            Some(ValidatorVote {
                recipient,
                kind: VoteKind::try_from(flag)?,
            })
        };

        let round = u32::from_be_bytes(<[u8; 4]>::decode(&mut payload)?);
        let seals = Vec::<Signature>::decode(&mut payload)?;

        if !payload.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }

        Ok(Self {
            vanity,
            validators,
            vote,
            round,
            seals,
        })
    }
}
