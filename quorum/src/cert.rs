use std::collections::HashSet;

use alloy_primitives::Address;
use alloy_rlp::{BufMut, Decodable, Encodable};
use rayon::prelude::*;

use crate::{Envelope, Signable, Unchecked, Validated, ValidatorSet, Vote};

/// A set of signed votes of the same kind and key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate<D> {
    votes: Vec<Envelope<D, Unchecked>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum QuorumViolation {
    #[error("empty certificate")]
    Empty,

    #[error("certificate votes for different keys")]
    KeyMismatch,

    #[error("duplicate signer {0}")]
    DuplicateSigner(Address),

    #[error("signer {0} is not a validator")]
    UnknownSigner(Address),

    #[error("invalid signature in certificate")]
    InvalidSignature,

    #[error("not enough signers: {got} < {need}")]
    InsufficientSigners { got: usize, need: usize },
}

impl<D> Certificate<D> {
    pub fn new(votes: Vec<Envelope<D, Unchecked>>) -> Self {
        Self { votes }
    }

    pub fn from_validated<I>(it: I) -> Self
    where
        I: IntoIterator<Item = Envelope<D, Validated>>,
    {
        Self {
            votes: it.into_iter().map(Envelope::into_unchecked).collect(),
        }
    }

    pub fn votes(&self) -> &[Envelope<D, Unchecked>] {
        &self.votes
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

impl<D: Signable + Vote + Sync> Certificate<D> {
    /// Check that this certificate is a quorum of `threshold` validators.
    ///
    /// All votes must share a key, come from distinct validators and carry
    /// valid signatures. Returns the recovered signers in vote order.
    pub fn validate(
        &self,
        validators: &ValidatorSet,
        threshold: usize,
    ) -> Result<Vec<Address>, QuorumViolation> {
        let Some(first) = self.votes.first() else {
            return Err(QuorumViolation::Empty);
        };

        let key = first.data().key();
        if self.votes.iter().any(|e| e.data().key() != key) {
            return Err(QuorumViolation::KeyMismatch);
        }

        let signers = self
            .votes
            .par_iter()
            .map(|e| e.recover_signer())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| QuorumViolation::InvalidSignature)?;

        let mut seen = HashSet::new();
        for s in &signers {
            if !validators.contains(s) {
                return Err(QuorumViolation::UnknownSigner(*s));
            }
            if !seen.insert(*s) {
                return Err(QuorumViolation::DuplicateSigner(*s));
            }
        }

        if signers.len() < threshold {
            return Err(QuorumViolation::InsufficientSigners {
                got: signers.len(),
                need: threshold,
            });
        }

        Ok(signers)
    }
}

impl<D: Encodable> Encodable for Certificate<D> {
    fn encode(&self, out: &mut dyn BufMut) {
        self.votes.encode(out)
    }

    fn length(&self) -> usize {
        self.votes.length()
    }
}

impl<D: Decodable> Decodable for Certificate<D> {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        Ok(Self {
            votes: Vec::decode(buf)?,
        })
    }
}
