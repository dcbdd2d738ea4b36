use core::fmt;

use alloy_rlp::{Decodable, Encodable, Header as RlpHeader};
use quorum::{Address, AuthenticationError, Envelope, Signature};
use quorum::{Unchecked, Validated, ValidatorSet};
use tracing::warn;

use crate::payload::{decode_option, encode_option, option_length};
use crate::{Block, DecodeError, Header, RoundChangeCertificate, RoundIdentifier};
use crate::{Commit, ExtraData, Prepare, Proposal, RoundChange};

pub const PROPOSAL: u8 = 0;
pub const PREPARE: u8 = 1;
pub const COMMIT: u8 = 2;
pub const ROUND_CHANGE: u8 = 3;

/// A consensus message as sent between validators.
///
/// Wire format: one message code byte followed by the RLP envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<S = Validated> {
    /// A block proposal, justified by a round-change quorum in rounds > 0.
    Proposal {
        proposal: Envelope<Proposal, S>,
        justification: Option<RoundChangeCertificate>,
    },

    /// Agreement with a proposal.
    Prepare(Envelope<Prepare, S>),

    /// Commitment to a prepared block.
    Commit(Envelope<Commit, S>),

    /// Request to change to a higher round.
    RoundChange(Envelope<RoundChange, S>),
}

impl<S> Message<S> {
    pub fn code(&self) -> u8 {
        match self {
            Self::Proposal { .. } => PROPOSAL,
            Self::Prepare(_) => PREPARE,
            Self::Commit(_) => COMMIT,
            Self::RoundChange(_) => ROUND_CHANGE,
        }
    }

    /// The round this message belongs to (the target round of a round change).
    pub fn round(&self) -> RoundIdentifier {
        match self {
            Self::Proposal { proposal, .. } => proposal.data().round(),
            Self::Prepare(e) => e.data().round(),
            Self::Commit(e) => e.data().round(),
            Self::RoundChange(e) => e.data().round(),
        }
    }

    pub fn is_round_change(&self) -> bool {
        matches!(self, Self::RoundChange(_))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.code()];
        match self {
            Self::Proposal {
                proposal,
                justification,
            } => {
                // An empty justification list means "none".
                let n = proposal.length() + option_length(justification.as_ref());
                RlpHeader {
                    list: true,
                    payload_length: n,
                }
                .encode(&mut out);
                proposal.encode(&mut out);
                encode_option(justification.as_ref(), &mut out);
            }
            Self::Prepare(e) => e.encode(&mut out),
            Self::Commit(e) => e.encode(&mut out),
            Self::RoundChange(e) => e.encode(&mut out),
        }
        out
    }
}

impl Message<Unchecked> {
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let Some((code, mut buf)) = bytes.split_first() else {
            return Err(DecodeError::Empty);
        };
        let msg = match *code {
            PROPOSAL => {
                let mut payload = RlpHeader::decode_bytes(&mut buf, true)?;
                let proposal = Envelope::decode(&mut payload)?;
                let justification = decode_option(&mut payload)?;
                if !payload.is_empty() {
                    return Err(DecodeError::TrailingBytes);
                }
                Self::Proposal {
                    proposal,
                    justification,
                }
            }
            PREPARE => Self::Prepare(Envelope::decode(&mut buf)?),
            COMMIT => Self::Commit(Envelope::decode(&mut buf)?),
            ROUND_CHANGE => Self::RoundChange(Envelope::decode(&mut buf)?),
            other => return Err(DecodeError::UnknownMessageCode(other)),
        };
        if !buf.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(msg)
    }

    /// Recover the signer and check that it is a validator.
    ///
    /// Nested certificates (justifications and prepared certificates) are
    /// left for the consensus logic to check against the round in question.
    pub fn validated(
        self,
        validators: &ValidatorSet,
    ) -> Result<Message<Validated>, AuthenticationError> {
        let msg = match self {
            Self::Proposal {
                proposal,
                justification,
            } => Message::Proposal {
                proposal: proposal.validated(validators)?,
                justification,
            },
            Self::Prepare(e) => Message::Prepare(e.validated(validators)?),
            Self::Commit(e) => Message::Commit(e.validated(validators)?),
            Self::RoundChange(e) => Message::RoundChange(e.validated(validators)?),
        };
        Ok(msg)
    }
}

impl Message<Validated> {
    pub fn signer(&self) -> Address {
        match self {
            Self::Proposal { proposal, .. } => proposal.signer(),
            Self::Prepare(e) => e.signer(),
            Self::Commit(e) => e.signer(),
            Self::RoundChange(e) => e.signer(),
        }
    }

    pub fn into_unchecked(self) -> Message<Unchecked> {
        match self {
            Self::Proposal {
                proposal,
                justification,
            } => Message::Proposal {
                proposal: proposal.into_unchecked(),
                justification,
            },
            Self::Prepare(e) => Message::Prepare(e.into_unchecked()),
            Self::Commit(e) => Message::Commit(e.into_unchecked()),
            Self::RoundChange(e) => Message::RoundChange(e.into_unchecked()),
        }
    }
}

impl<S> fmt::Display for Message<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proposal { proposal, .. } => write!(
                f,
                "Proposal({}, {})",
                proposal.data().round(),
                proposal.data().digest()
            ),
            Self::Prepare(e) => write!(f, "Prepare({}, {})", e.data().round(), e.data().digest()),
            Self::Commit(e) => write!(f, "Commit({}, {})", e.data().round(), e.data().digest()),
            Self::RoundChange(e) => write!(
                f,
                "RoundChange({}, prepared = {:?})",
                e.data().round(),
                e.data().prepared().map(|p| p.round())
            ),
        }
    }
}

/// A block finalized by a commit quorum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedBlock {
    /// The block with round and committed seals in its extra data.
    pub block: Block,
    pub round: u32,
    pub seals: Vec<Signature>,
}

/// Instructions produced by consensus for its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// (Re-)start the timer of the given round.
    ResetTimer(RoundIdentifier),

    /// Build a block on top of `parent`, embedding `extra` verbatim.
    BuildBlock {
        round: RoundIdentifier,
        parent: Header,
        extra: ExtraData,
    },

    /// Broadcast a proposal.
    SendProposal(Envelope<Proposal, Validated>, Option<RoundChangeCertificate>),

    /// Broadcast a prepare message.
    SendPrepare(Envelope<Prepare, Validated>),

    /// Broadcast a commit message.
    SendCommit(Envelope<Commit, Validated>),

    /// Broadcast a round change message.
    SendRoundChange(Envelope<RoundChange, Validated>),

    /// Hand a finalized block to the application.
    Deliver(FinalizedBlock),
}

impl Action {
    /// The message to broadcast, if this is a send action.
    pub fn into_message(self) -> Option<Message<Validated>> {
        match self {
            Self::SendProposal(proposal, justification) => Some(Message::Proposal {
                proposal,
                justification,
            }),
            Self::SendPrepare(e) => Some(Message::Prepare(e)),
            Self::SendCommit(e) => Some(Message::Commit(e)),
            Self::SendRoundChange(e) => Some(Message::RoundChange(e)),
            Self::ResetTimer(_) | Self::BuildBlock { .. } | Self::Deliver(_) => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResetTimer(r) => write!(f, "ResetTimer({r})"),
            Self::BuildBlock { round, .. } => write!(f, "BuildBlock({round})"),
            Self::SendProposal(e, _) => write!(f, "SendProposal({})", e.data().round()),
            Self::SendPrepare(e) => write!(f, "SendPrepare({})", e.data().round()),
            Self::SendCommit(e) => write!(f, "SendCommit({})", e.data().round()),
            Self::SendRoundChange(e) => write!(f, "SendRoundChange({})", e.data().round()),
            Self::Deliver(b) => write!(f, "Deliver({}, {})", b.block.number(), b.round),
        }
    }
}

/// Decode a message, logging and discarding malformed input.
pub fn decode_message(bytes: &[u8]) -> Option<Message<Unchecked>> {
    match Message::decode(bytes) {
        Ok(m) => Some(m),
        Err(err) => {
            warn!(%err, len = bytes.len(), "malformed consensus message");
            None
        }
    }
}
