/// Determines which blocks start an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochManager {
    epoch_length: u64,
}

impl EpochManager {
    /// An epoch length of 0 is treated as 1, i.e. every block is an
    /// epoch block.
    pub fn new(epoch_length: u64) -> Self {
        Self {
            epoch_length: epoch_length.max(1),
        }
    }

    pub fn epoch_length(&self) -> u64 {
        self.epoch_length
    }

    pub fn is_epoch_block(&self, number: u64) -> bool {
        number % self.epoch_length == 0
    }

    /// The most recent epoch block at or below `number`.
    pub fn last_epoch_block(&self, number: u64) -> u64 {
        number - number % self.epoch_length
    }
}

impl Default for EpochManager {
    fn default() -> Self {
        Self::new(30_000)
    }
}
