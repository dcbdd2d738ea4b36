mod block;
mod comm;
mod extra;
mod message;
mod payload;
mod round;

pub use block::{Block, Header};
pub use comm::{BlockBuilder, Comm, CommError, HeaderStore};
pub use extra::{ExtraData, VANITY_LEN, ValidatorVote, VoteKind};
pub use message::{Action, FinalizedBlock, Message, decode_message};
pub use message::{COMMIT, PREPARE, PROPOSAL, ROUND_CHANGE};
pub use payload::{Commit, Prepare, PreparedCertificate, Proposal, RoundChange};
pub use payload::RoundChangeCertificate;
pub use round::RoundIdentifier;

/// Malformed consensus data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("rlp error: {0}")]
    Rlp(#[from] alloy_rlp::Error),

    #[error("trailing bytes")]
    TrailingBytes,

    #[error("invalid vote flag {0:#04x}")]
    InvalidVoteFlag(u8),

    #[error("unknown message code {0}")]
    UnknownMessageCode(u8),

    #[error("empty message")]
    Empty,
}
