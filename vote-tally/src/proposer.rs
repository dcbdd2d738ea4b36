use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use ibft_types::{ValidatorVote, VoteKind};
use parking_lot::Mutex;
use quorum::Address;

use crate::VoteTally;

/// Votes the local validator wants to cast in the blocks it proposes.
///
/// Pending votes are offered round-robin. Votes that are moot given the
/// current tally, or that the local validator has already cast, are
/// skipped but stay queued until discarded.
#[derive(Debug, Default)]
pub struct VoteProposer {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    votes: BTreeMap<Address, VoteKind>,
    /// Recipient of the last vote handed out.
    cursor: Option<Address>,
}

impl VoteProposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a vote to add `a` to the validators.
    pub fn auth(&self, a: Address) {
        self.inner.lock().votes.insert(a, VoteKind::Add);
    }

    /// Queue a vote to remove `a` from the validators.
    pub fn deauth(&self, a: Address) {
        self.inner.lock().votes.insert(a, VoteKind::Drop);
    }

    /// Forget the queued vote for `a`.
    pub fn discard(&self, a: &Address) {
        self.inner.lock().votes.remove(a);
    }

    pub fn votes(&self) -> Vec<ValidatorVote> {
        self.inner
            .lock()
            .votes
            .iter()
            .map(|(a, k)| ValidatorVote {
                recipient: *a,
                kind: *k,
            })
            .collect()
    }

    /// The next vote for a block proposed by `local`.
    pub fn next_vote(&self, local: &Address, tally: &VoteTally) -> Option<ValidatorVote> {
        let mut inner = self.inner.lock();

        let ordered: Vec<ValidatorVote> = match inner.cursor {
            Some(c) => inner
                .votes
                .range((Excluded(c), Unbounded))
                .chain(inner.votes.range(..=c))
                .map(|(a, k)| ValidatorVote {
                    recipient: *a,
                    kind: *k,
                })
                .collect(),
            None => inner
                .votes
                .iter()
                .map(|(a, k)| ValidatorVote {
                    recipient: *a,
                    kind: *k,
                })
                .collect(),
        };

        let vote = ordered
            .into_iter()
            .find(|v| !tally.is_moot(v) && !tally.has_vote(local, v))?;
        inner.cursor = Some(vote.recipient);
        Some(vote)
    }
}
