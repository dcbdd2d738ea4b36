use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use bon::Builder;
use ibft_consensus::ConsensusConfig;
use ibft_types::Header;
use quorum::{Address, ValidatorSet};
use serde::{Deserialize, Serialize};
use vote_tally::EpochManager;

#[derive(Debug, thiserror::Error)]
#[error("config error {0}: {1}")]
pub struct ConfigError(PathBuf, #[source] Box<dyn std::error::Error + Send + Sync>);

/// Configuration of a node.
///
/// ```toml
/// [consensus]
/// future-round-limit = 10
/// future-message-limit = 1000
/// future-sequence-limit = 1000
///
/// [timer]
/// round-timeout-ms = 2000
/// max-round-timeout-ms = 60000
///
/// [tally]
/// epoch-length = 30000
/// cache-size = 1024
///
/// [genesis]
/// validators = ["0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "kebab-case")]
pub struct NodeConfig {
    #[serde(default)]
    #[builder(default)]
    pub consensus: ConsensusConfig,

    #[serde(default)]
    #[builder(default)]
    pub timer: TimerConfig,

    #[serde(default)]
    #[builder(default)]
    pub tally: TallyConfig,

    pub genesis: GenesisConfig,
}

/// Round timer with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(default, rename_all = "kebab-case")]
pub struct TimerConfig {
    /// Timeout of round 0.
    #[builder(default = 2_000)]
    pub round_timeout_ms: u64,

    /// Upper bound of any round timeout.
    #[builder(default = 60_000)]
    pub max_round_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(default, rename_all = "kebab-case")]
pub struct TallyConfig {
    /// Blocks per epoch. Epoch blocks reset pending votes.
    #[builder(default = 30_000)]
    pub epoch_length: u64,

    /// Number of vote tallies kept in memory.
    #[builder(default = 1024)]
    pub cache_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "kebab-case")]
pub struct GenesisConfig {
    pub validators: Vec<Address>,

    #[serde(default)]
    #[builder(default)]
    pub timestamp: u64,
}

impl NodeConfig {
    pub async fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError(path.into(), Box::new(e)))?;
        s.parse().map_err(|e| ConfigError(path.into(), Box::new(e)))
    }

    pub async fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let s = toml::to_string_pretty(self).map_err(|e| ConfigError(path.into(), Box::new(e)))?;
        tokio::fs::write(path, s)
            .await
            .map_err(|e| ConfigError(path.into(), Box::new(e)))
    }
}

impl TimerConfig {
    /// The timeout of a round: the base timeout doubled per round, capped
    /// at the maximum.
    pub fn round_timeout(&self, round: u32) -> Duration {
        let factor = 1u64.checked_shl(round).unwrap_or(u64::MAX);
        let ms = self
            .round_timeout_ms
            .saturating_mul(factor)
            .min(self.max_round_timeout_ms.max(self.round_timeout_ms));
        Duration::from_millis(ms)
    }
}

impl TallyConfig {
    pub fn epochs(&self) -> EpochManager {
        EpochManager::new(self.epoch_length)
    }
}

impl GenesisConfig {
    pub fn header(&self) -> Header {
        Header::genesis(self.validator_set().as_slice().to_vec(), self.timestamp)
    }

    pub fn validator_set(&self) -> ValidatorSet {
        self.validators.iter().copied().collect()
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FromStr for NodeConfig {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

impl fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = toml::to_string_pretty(self).map_err(|_| fmt::Error)?;
        f.write_str(&s)
    }
}
