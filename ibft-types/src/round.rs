use std::fmt;

use alloy_rlp::{RlpDecodable, RlpEncodable};
use quorum::{Address, ValidatorSet};
use serde::{Deserialize, Serialize};

/// Identifies one attempt to finalize one block height.
///
/// Ordered by sequence (the block number) first, then by round.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    RlpEncodable,
    RlpDecodable,
)]
pub struct RoundIdentifier {
    sequence: u64,
    round: u32,
}

impl RoundIdentifier {
    pub const fn new(sequence: u64, round: u32) -> Self {
        Self { sequence, round }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    /// The next round of the same sequence (saturating at `u32::MAX`).
    pub fn next_round(self) -> Self {
        Self::new(self.sequence, self.round.saturating_add(1))
    }

    /// Round 0 of the next sequence.
    pub fn next_sequence(self) -> Self {
        Self::new(self.sequence + 1, 0)
    }

    /// The same sequence at the given round.
    pub fn with_round(self, round: u32) -> Self {
        Self::new(self.sequence, round)
    }

    /// The validator expected to propose in this round.
    pub fn proposer(&self, validators: &ValidatorSet) -> Option<Address> {
        validators.proposer(self.sequence, self.round)
    }
}

impl fmt::Display for RoundIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.sequence, self.round)
    }
}
