//! The validator set of a chain, derived from its headers.
//!
//! Every non-epoch header may carry a vote of its beneficiary to add or
//! drop a validator. Votes are tallied along the chain and a change takes
//! effect once a quorum of the current validators agrees on it. Epoch
//! blocks reset the set to the validators listed in their header and
//! discard all pending votes.

mod cache;
mod epoch;
mod proposer;
mod tally;

pub use cache::{TallyError, VoteTallyCache};
pub use epoch::EpochManager;
pub use proposer::VoteProposer;
pub use tally::{ValidatorSetDivergence, VoteTally};
