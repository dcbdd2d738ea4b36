use std::collections::{BTreeMap, BTreeSet};

use ibft_types::{Header, ValidatorVote, VoteKind};
use quorum::{Address, ValidatorSet, quorum_size};

/// The validator set and the votes pending to change it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTally {
    validators: BTreeSet<Address>,
    /// Voters per subject and direction.
    votes: BTreeMap<(Address, VoteKind), BTreeSet<Address>>,
}

/// A header lists other validators than the tally has in force.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("validators of block {number} diverge from tally: {header:?} != {tally:?}")]
pub struct ValidatorSetDivergence {
    pub number: u64,
    pub header: Vec<Address>,
    pub tally: Vec<Address>,
}

impl VoteTally {
    pub fn new<I>(validators: I) -> Self
    where
        I: IntoIterator<Item = Address>,
    {
        Self {
            validators: validators.into_iter().collect(),
            votes: BTreeMap::new(),
        }
    }

    pub fn validators(&self) -> ValidatorSet {
        self.validators.iter().copied().collect()
    }

    pub fn contains(&self, a: &Address) -> bool {
        self.validators.contains(a)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Is the vote moot given the current validators?
    pub fn is_moot(&self, vote: &ValidatorVote) -> bool {
        match vote.kind {
            VoteKind::Add => self.validators.contains(&vote.recipient),
            VoteKind::Drop => !self.validators.contains(&vote.recipient),
        }
    }

    pub fn has_vote(&self, voter: &Address, vote: &ValidatorVote) -> bool {
        self.votes
            .get(&(vote.recipient, vote.kind))
            .is_some_and(|v| v.contains(voter))
    }

    /// Number of voters for a vote.
    pub fn count(&self, vote: &ValidatorVote) -> usize {
        self.votes
            .get(&(vote.recipient, vote.kind))
            .map(BTreeSet::len)
            .unwrap_or(0)
    }

    pub fn has_pending_votes(&self) -> bool {
        !self.votes.is_empty()
    }

    /// Record a vote.
    ///
    /// Votes of non-validators and moot votes are ignored. A vote replaces
    /// the voter's opposite vote on the same subject. Returns `true` if the
    /// vote reached a quorum and changed the validator set, in which case
    /// all pending votes are discarded.
    pub fn add_vote(&mut self, voter: Address, vote: ValidatorVote) -> bool {
        if !self.validators.contains(&voter) || self.is_moot(&vote) {
            return false;
        }

        let opposite = (vote.recipient, vote.kind.opposite());
        if let Some(v) = self.votes.get_mut(&opposite) {
            v.remove(&voter);
            if v.is_empty() {
                self.votes.remove(&opposite);
            }
        }

        let voters = self.votes.entry((vote.recipient, vote.kind)).or_default();
        voters.insert(voter);

        if voters.len() < quorum_size(self.validators.len()) {
            return false;
        }

        match vote.kind {
            VoteKind::Add => self.validators.insert(vote.recipient),
            VoteKind::Drop => self.validators.remove(&vote.recipient),
        };
        self.votes.clear();
        true
    }

    /// Apply the vote of a non-epoch header.
    ///
    /// The validators listed in the header must be the ones in force before
    /// its vote. A mismatch is reported, but the vote is applied regardless.
    pub fn apply_header(&mut self, header: &Header) -> Result<(), ValidatorSetDivergence> {
        let listed: BTreeSet<Address> = header.extra.validators.iter().copied().collect();
        let result = if listed == self.validators {
            Ok(())
        } else {
            Err(ValidatorSetDivergence {
                number: header.number,
                header: listed.into_iter().collect(),
                tally: self.validators.iter().copied().collect(),
            })
        };
        if let Some(vote) = header.extra.vote {
            self.add_vote(header.beneficiary, vote);
        }
        result
    }
}
