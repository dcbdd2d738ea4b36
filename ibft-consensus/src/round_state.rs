use alloy_primitives::B256;
use ibft_types::{Block, Commit, FinalizedBlock, Prepare, PreparedCertificate, Proposal};
use ibft_types::RoundIdentifier;
use quorum::{Address, Certificate, Envelope, Signature};
use quorum::{Validated, ValidatorSet, VoteAccumulator};

use crate::ConsensusError;

/// Progress of a single round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Waiting for a proposal and enough prepares.
    NewRound,
    /// The proposal and a quorum of prepares have been seen.
    Prepared,
    /// A quorum of commits has been seen.
    Committed,
}

/// A phase change reported by [`RoundState::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Prepared,
    Committed,
}

/// Messages received for one round and the phase they amount to.
///
/// The proposal of a round counts as the prepare of its proposer, hence
/// prepares signed by the proposer are ignored and `quorum - 1` prepares
/// suffice to reach the prepared phase.
#[derive(Debug)]
pub struct RoundState {
    round: RoundIdentifier,
    proposer: Option<Address>,
    quorum: usize,
    phase: Phase,
    proposal: Option<(Envelope<Proposal, Validated>, B256)>,
    prepares: VoteAccumulator<Prepare>,
    commits: VoteAccumulator<Commit>,
}

impl RoundState {
    pub fn new(round: RoundIdentifier, validators: &ValidatorSet) -> Self {
        let quorum = validators.quorum_size();
        Self {
            round,
            proposer: round.proposer(validators),
            quorum,
            phase: Phase::NewRound,
            proposal: None,
            prepares: VoteAccumulator::new(validators.clone())
                .with_threshold(quorum.saturating_sub(1).min(validators.len())),
            commits: VoteAccumulator::new(validators.clone()),
        }
    }

    pub fn round(&self) -> RoundIdentifier {
        self.round
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn proposer(&self) -> Option<Address> {
        self.proposer
    }

    pub fn proposal(&self) -> Option<&Envelope<Proposal, Validated>> {
        self.proposal.as_ref().map(|(p, _)| p)
    }

    /// Digest of the accepted proposal.
    pub fn digest(&self) -> Option<B256> {
        self.proposal.as_ref().map(|(_, d)| *d)
    }

    pub fn block(&self) -> Option<&Block> {
        self.proposal().map(|p| p.data().block())
    }

    pub fn is_committed(&self) -> bool {
        self.phase == Phase::Committed
    }

    /// Accept the proposal of this round.
    ///
    /// Only the first proposal is kept, later ones return `false`.
    pub fn set_proposal(&mut self, p: Envelope<Proposal, Validated>) -> bool {
        debug_assert_eq!(p.data().round(), self.round);
        if self.proposal.is_some() {
            return false;
        }
        let digest = p.data().digest();
        self.proposal = Some((p, digest));
        true
    }

    /// Add a prepare, returning `true` if it was counted.
    pub fn add_prepare(&mut self, e: Envelope<Prepare, Validated>) -> Result<bool, ConsensusError> {
        if e.data().round() != self.round {
            return Err(ConsensusError::WrongRound(e.data().round()));
        }
        if Some(e.signer()) == self.proposer {
            return Ok(false);
        }
        Ok(self.prepares.add(e)?)
    }

    /// Add a commit, returning `true` if it was counted.
    ///
    /// The committed seal must be a signature of the commit's signer over
    /// the committed digest.
    pub fn add_commit(&mut self, e: Envelope<Commit, Validated>) -> Result<bool, ConsensusError> {
        if e.data().round() != self.round {
            return Err(ConsensusError::WrongRound(e.data().round()));
        }
        match e.data().seal().recover(&e.data().digest()) {
            Ok(a) if a == e.signer() => {}
            _ => return Err(ConsensusError::InvalidSeal(e.signer())),
        }
        Ok(self.commits.add(e)?)
    }

    /// Move to the next phase if its quorum has been reached.
    ///
    /// Each transition is reported exactly once. Callers loop until `None`,
    /// since prepares and commits may arrive before the proposal.
    pub fn update(&mut self) -> Option<Transition> {
        let key = (self.round, self.digest()?);
        match self.phase {
            Phase::NewRound if self.prepares.has_quorum(&key) => {
                self.phase = Phase::Prepared;
                Some(Transition::Prepared)
            }
            Phase::Prepared if self.commits.count(&key) >= self.quorum => {
                self.phase = Phase::Committed;
                Some(Transition::Committed)
            }
            _ => None,
        }
    }

    /// Proposal and matching prepares, once prepared.
    pub fn prepared_certificate(&self) -> Option<PreparedCertificate> {
        if self.phase == Phase::NewRound {
            return None;
        }
        let (p, digest) = self.proposal.as_ref()?;
        let prepares = Certificate::from_validated(self.prepares.votes(&(self.round, *digest)).cloned());
        Some(PreparedCertificate::new(p.to_unchecked(), prepares))
    }

    /// The proposed block sealed with a quorum of committed seals.
    ///
    /// Seals are ordered by signer address.
    pub fn finalized_block(&self) -> Option<FinalizedBlock> {
        if self.phase != Phase::Committed {
            return None;
        }
        let (p, digest) = self.proposal.as_ref()?;
        let seals: Vec<Signature> = self
            .commits
            .votes(&(self.round, *digest))
            .take(self.quorum)
            .map(|e| *e.data().seal())
            .collect();
        let block = p.data().block();
        let block = Block {
            header: block.header.sealed(self.round.round(), seals.clone()),
            body: block.body.clone(),
        };
        Some(FinalizedBlock {
            block,
            round: self.round.round(),
            seals,
        })
    }
}
