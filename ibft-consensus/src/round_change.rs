use std::collections::BTreeMap;

use ibft_types::{RoundChange, RoundChangeCertificate, RoundIdentifier};
use quorum::{Envelope, Validated, ValidatorSet, VoteAccumulator};

use crate::ConsensusError;
use crate::validation::validate_prepared;

/// Round changes of one sequence, per target round.
#[derive(Debug)]
pub struct RoundChangeManager {
    validators: ValidatorSet,
    sequence: u64,
    rounds: BTreeMap<u32, VoteAccumulator<RoundChange>>,
}

impl RoundChangeManager {
    pub fn new(sequence: u64, validators: ValidatorSet) -> Self {
        Self {
            validators,
            sequence,
            rounds: BTreeMap::new(),
        }
    }

    /// Add a round change.
    ///
    /// A prepared certificate carried by the message must be valid. Returns
    /// `true` if the target round has a quorum of round changes.
    pub fn add(&mut self, e: Envelope<RoundChange, Validated>) -> Result<bool, ConsensusError> {
        let target = e.data().round();
        if target.sequence() != self.sequence {
            return Err(ConsensusError::WrongRound(target));
        }
        if let Some(pc) = e.data().prepared() {
            validate_prepared(pc, target, &self.validators)?
        }
        let accum = self
            .rounds
            .entry(target.round())
            .or_insert_with(|| VoteAccumulator::new(self.validators.clone()));
        accum.add(e)?;
        Ok(accum.has_quorum(&target))
    }

    /// Number of round changes received for the target round.
    pub fn count(&self, round: u32) -> usize {
        let key = RoundIdentifier::new(self.sequence, round);
        self.rounds.get(&round).map(|a| a.count(&key)).unwrap_or(0)
    }

    /// The round-change quorum for the target round, if any.
    pub fn certificate(&self, round: u32) -> Option<RoundChangeCertificate> {
        let key = RoundIdentifier::new(self.sequence, round);
        self.rounds.get(&round)?.certificate(&key)
    }

    /// Forget round changes targeting rounds below `round`.
    pub fn discard_below(&mut self, round: u32) {
        self.rounds = self.rounds.split_off(&round)
    }
}
