use std::collections::{BTreeMap, HashMap};

use alloy_primitives::Address;

use crate::{Certificate, Envelope, Validated, ValidatorSet, Vote};

/// Collects validated votes, at most one per signer.
///
/// The first vote of a signer wins. Later votes of the same signer are
/// ignored, whether or not they agree with the first.
#[derive(Debug, Clone)]
pub struct VoteAccumulator<D: Vote> {
    validators: ValidatorSet,
    threshold: usize,
    signers: HashMap<Address, D::Key>,
    votes: HashMap<D::Key, BTreeMap<Address, Envelope<D, Validated>>>,
}

impl<D: Vote> VoteAccumulator<D> {
    pub fn new(validators: ValidatorSet) -> Self {
        Self {
            threshold: validators.quorum_size(),
            validators,
            signers: HashMap::new(),
            votes: HashMap::new(),
        }
    }

    /// Set an arbitrary certificate threshold.
    ///
    /// By default this is the quorum size of the validator set.
    pub fn with_threshold(mut self, t: usize) -> Self {
        debug_assert!(t <= self.validators.len());
        self.threshold = t;
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    /// Add a vote.
    ///
    /// Returns `true` if the vote was counted and `false` if its signer
    /// has already voted.
    pub fn add(&mut self, e: Envelope<D, Validated>) -> Result<bool, AccumulatorError> {
        let signer = e.signer();
        if !self.validators.contains(&signer) {
            return Err(AccumulatorError::UnknownSigner(signer));
        }
        if self.signers.contains_key(&signer) {
            return Ok(false);
        }
        let key = e.data().key();
        self.signers.insert(signer, key.clone());
        self.votes.entry(key).or_default().insert(signer, e);
        Ok(true)
    }

    /// Number of votes for the given key.
    pub fn count(&self, key: &D::Key) -> usize {
        self.votes.get(key).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn has_quorum(&self, key: &D::Key) -> bool {
        self.count(key) >= self.threshold
    }

    /// Signers that voted for the given key, in address order.
    pub fn voters(&self, key: &D::Key) -> impl Iterator<Item = &Address> {
        self.votes.get(key).into_iter().flat_map(BTreeMap::keys)
    }

    /// Votes for the given key, ordered by signer address.
    pub fn votes(&self, key: &D::Key) -> impl Iterator<Item = &Envelope<D, Validated>> {
        self.votes.get(key).into_iter().flat_map(BTreeMap::values)
    }

    pub fn clear(&mut self) {
        self.signers.clear();
        self.votes.clear()
    }
}

impl<D: Vote + Clone> VoteAccumulator<D> {
    /// The votes for `key` as a certificate, if the threshold is reached.
    pub fn certificate(&self, key: &D::Key) -> Option<Certificate<D>> {
        if !self.has_quorum(key) {
            return None;
        }
        Some(Certificate::from_validated(self.votes(key).cloned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AccumulatorError {
    #[error("signer {0} is not a validator")]
    UnknownSigner(Address),
}
