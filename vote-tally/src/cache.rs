use alloy_primitives::B256;
use ibft_types::{Header, HeaderStore};
use quick_cache::sync::Cache;
use quorum::ValidatorSet;
use tracing::{debug, warn};

use crate::{EpochManager, VoteTally};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TallyError {
    #[error("unknown block {0}")]
    UnknownBlock(B256),

    #[error("no block with number {0}")]
    UnknownNumber(u64),

    #[error("parent {parent} of block {number} is unknown")]
    MissingAncestor { number: u64, parent: B256 },
}

/// Vote tallies after each block, computed on demand and cached by block
/// hash.
///
/// A tally is computed from the nearest ancestor whose tally is cached, or
/// else from the last epoch block, by replaying the votes of the headers in
/// between. Each intermediate tally is cached as well.
pub struct VoteTallyCache<H> {
    store: H,
    epochs: EpochManager,
    cache: Cache<B256, VoteTally>,
}

impl<H: HeaderStore> VoteTallyCache<H> {
    pub fn new(store: H, epochs: EpochManager, capacity: usize) -> Self {
        Self {
            store,
            epochs,
            cache: Cache::new(capacity.max(1)),
        }
    }

    pub fn epochs(&self) -> &EpochManager {
        &self.epochs
    }

    /// The tally in force after the given block.
    pub fn tally_after(&self, header: &Header) -> Result<VoteTally, TallyError> {
        let hash = header.hash();
        if let Some(t) = self.cache.get(&hash) {
            return Ok(t);
        }

        let mut pending = Vec::new();
        let mut current = header.clone();

        let mut tally = loop {
            if self.epochs.is_epoch_block(current.number) {
                let t = VoteTally::new(current.extra.validators.iter().copied());
                self.cache.insert(current.hash(), t.clone());
                break t;
            }
            if let Some(t) = self.cache.get(&current.parent_hash) {
                pending.push(current);
                break t;
            }
            let Some(parent) = self.store.header_by_hash(&current.parent_hash) else {
                return Err(TallyError::MissingAncestor {
                    number: current.number,
                    parent: current.parent_hash,
                });
            };
            pending.push(std::mem::replace(&mut current, parent));
        };

        debug!(block = %header.number, replay = %pending.len(), "computing vote tally");

        for h in pending.iter().rev() {
            if let Err(err) = tally.apply_header(h) {
                warn!(%err, "validator set divergence");
            }
            self.cache.insert(h.hash(), tally.clone());
        }

        Ok(tally)
    }

    /// The validators of the block following the given one.
    pub fn validators_after_block(&self, header: &Header) -> Result<ValidatorSet, TallyError> {
        self.tally_after(header).map(|t| t.validators())
    }

    /// The validators after the block with the given hash.
    pub fn signers_at_hash(&self, hash: &B256) -> Result<ValidatorSet, TallyError> {
        let header = self
            .store
            .header_by_hash(hash)
            .ok_or(TallyError::UnknownBlock(*hash))?;
        self.validators_after_block(&header)
    }

    /// The validators after the block with the given number.
    pub fn validators_at(&self, number: u64) -> Result<ValidatorSet, TallyError> {
        let header = self
            .store
            .header_by_number(number)
            .ok_or(TallyError::UnknownNumber(number))?;
        self.validators_after_block(&header)
    }
}
