use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use ibft::logging::init_logging;
use ibft::prometheus::PrometheusMetrics;
use ibft::{Coordinator, GenesisConfig, InMemoryChain, LocalBuilder, LocalNet, NodeConfig};
use ibft_consensus::{Consensus, ConsensusMetrics};
use quorum::{Address, Keypair};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::info;
use vote_tally::{VoteProposer, VoteTallyCache};

/// Run a network of IBFT 2.0 validators in a single process.
#[derive(Parser, Debug)]
struct Cli {
    /// Number of validators.
    #[clap(long, default_value_t = 4)]
    nodes: u8,

    /// Number of validators that never start.
    #[clap(long, default_value_t = 0)]
    crashed: u8,

    /// Number of blocks to finalize before exiting.
    #[clap(long, default_value_t = 5)]
    blocks: u64,

    /// Node configuration. The genesis validators are replaced by the
    /// generated ones.
    #[clap(long, env = "IBFT_CONFIG")]
    config: Option<PathBuf>,

    /// Let all validators vote to add this address.
    #[clap(long)]
    propose_validator: Option<Address>,

    /// Give up after this many seconds.
    #[clap(long, default_value_t = 60)]
    deadline: u64,

    /// Print the metrics of the first running validator at the end.
    #[clap(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    ensure!(cli.nodes > 0, "at least one validator is required");
    ensure!(cli.crashed < cli.nodes, "at least one validator must run");

    let keys: Vec<Keypair> = (1..=cli.nodes)
        .map(|i| Keypair::from_bytes(&[i; 32]))
        .collect::<Result<_, _>>()
        .map_err(|_| anyhow::anyhow!("invalid validator key"))?;

    let genesis = GenesisConfig::builder()
        .validators(keys.iter().map(Keypair::address).collect())
        .build();

    let config = match &cli.config {
        Some(path) => {
            let mut c = NodeConfig::read(path).await?;
            c.genesis.validators = genesis.validators.clone();
            c
        }
        None => NodeConfig::builder().genesis(genesis).build(),
    };

    let genesis = config.genesis.header();
    let validators = config.genesis.validator_set();
    let chain = Arc::new(InMemoryChain::new(genesis.clone()));
    let prometheus = PrometheusMetrics::default();

    info!(validators = %validators.len(), crashed = %cli.crashed, "starting local network");

    let (out_tx, mut out_rx) = mpsc::channel(1024);
    let mut shutdowns = Vec::new();
    let mut tasks = Vec::new();

    for (i, (key, comm)) in keys.into_iter().zip(LocalNet::create(cli.nodes.into())).enumerate() {
        if i < usize::from(cli.crashed) {
            info!(node = %key.address(), "not starting crashed validator");
            continue;
        }
        let metrics = if i == usize::from(cli.crashed) {
            ConsensusMetrics::new(&prometheus)
        } else {
            ConsensusMetrics::default()
        };
        let votes = Arc::new(VoteProposer::new());
        if let Some(a) = cli.propose_validator {
            votes.auth(a)
        }
        let tally = Arc::new(VoteTallyCache::new(
            chain.clone(),
            config.tally.epochs(),
            config.tally.cache_size,
        ));
        let builder = Arc::new(LocalBuilder::new(key.address()));
        let consensus = Consensus::new(key, genesis.clone(), validators.clone(), config.consensus)
            .with_metrics(metrics);
        let (tx, rx) = oneshot::channel();
        let coordinator = Coordinator::new(
            consensus,
            comm,
            builder,
            tally,
            votes,
            config.timer,
            out_tx.clone(),
            rx,
        );
        shutdowns.push(tx);
        tasks.push(tokio::spawn(coordinator.go()));
    }
    drop(out_tx);

    let mut finalized = BTreeMap::new();
    let deadline = Duration::from_secs(cli.deadline);
    while (finalized.len() as u64) < cli.blocks {
        let block = timeout(deadline, out_rx.recv())
            .await
            .context("no block finalized before the deadline")?
            .context("all validators stopped")?;
        let number = block.block.number();
        if chain.append(&block) {
            info!(
                number = %number,
                hash   = %block.block.hash(),
                round  = %block.round,
                seals  = %block.seals.len(),
                vote   = ?block.block.header.extra.vote,
                "finalized"
            );
        }
        finalized.entry(number).or_insert(block);
    }
    drop(out_rx);

    for tx in shutdowns {
        let _ = tx.send(());
    }
    for t in tasks {
        t.await?;
    }

    if cli.metrics {
        println!("{}", prometheus.export()?);
    }

    Ok(())
}
