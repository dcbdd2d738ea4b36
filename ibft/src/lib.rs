pub mod chain;
pub mod config;
pub mod coordinator;
pub mod logging;
pub mod net;
pub mod prometheus;

pub use chain::{InMemoryChain, LocalBuilder};
pub use config::{ConfigError, GenesisConfig, NodeConfig, TallyConfig, TimerConfig};
pub use coordinator::Coordinator;
pub use net::{LocalComm, LocalNet};
