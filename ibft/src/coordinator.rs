use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use ibft_consensus::Consensus;
use ibft_types::{Action, Block, BlockBuilder, Comm, ExtraData, FinalizedBlock, Header};
use ibft_types::{HeaderStore, RoundIdentifier};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use vote_tally::{VoteProposer, VoteTallyCache};

use crate::TimerConfig;

type BuildResult = (RoundIdentifier, Result<Block, String>);

/// Drives a `Consensus` instance.
///
/// The coordinator owns consensus and feeds it messages, timeouts and built
/// blocks from a single task. Finalized blocks are sent to `output`.
pub struct Coordinator<C, B, H> {
    consensus: Consensus,
    comm: C,
    builder: Arc<B>,
    tally: Arc<VoteTallyCache<H>>,
    votes: Arc<VoteProposer>,
    timer: TimerConfig,
    output: mpsc::Sender<FinalizedBlock>,
    shutdown: oneshot::Receiver<()>,

    /// The running block building task, if any.
    building: Option<BuildTask>,
    built_tx: UnboundedSender<BuildResult>,
    built_rx: UnboundedReceiver<BuildResult>,
}

impl<C, B, H> Coordinator<C, B, H>
where
    C: Comm + Send,
    B: BlockBuilder + Send + Sync + 'static,
    H: HeaderStore,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        consensus: Consensus,
        comm: C,
        builder: Arc<B>,
        tally: Arc<VoteTallyCache<H>>,
        votes: Arc<VoteProposer>,
        timer: TimerConfig,
        output: mpsc::Sender<FinalizedBlock>,
        shutdown: oneshot::Receiver<()>,
    ) -> Self {
        let (built_tx, built_rx) = mpsc::unbounded_channel();
        Self {
            consensus,
            comm,
            builder,
            tally,
            votes,
            timer,
            output,
            shutdown,
            building: None,
            built_tx,
            built_rx,
        }
    }

    pub fn consensus(&self) -> &Consensus {
        &self.consensus
    }

    /// Run until shutdown is signalled or the network is closed.
    pub async fn go(mut self) {
        let mut timer: BoxFuture<'static, RoundIdentifier> = pending().boxed();

        info!(node = %self.consensus.address(), "starting coordinator");

        let actions = self.consensus.go();
        self.execute(actions, &mut timer).await;

        loop {
            tokio::select! { biased;
                _ = &mut self.shutdown => {
                    info!(node = %self.consensus.address(), "shutting down");
                    break
                },
                r = &mut timer => {
                    let actions = self.consensus.timeout(r);
                    self.execute(actions, &mut timer).await
                },
                Some((round, result)) = self.built_rx.recv() => {
                    self.build_finished(round);
                    let actions = match result {
                        Ok(block) => self.consensus.handle_block(round, block),
                        Err(err) => {
                            warn!(node = %self.consensus.address(), %round, %err, "block builder failed");
                            self.consensus.build_failed(round);
                            Vec::new()
                        }
                    };
                    self.execute(actions, &mut timer).await
                },
                msg = self.comm.receive() => match msg {
                    Ok(m) => {
                        let actions = self.consensus.handle_message(m);
                        self.execute(actions, &mut timer).await
                    }
                    Err(err) => {
                        warn!(node = %self.consensus.address(), %err, "network closed");
                        break
                    }
                }
            }
        }

        self.abort_build()
    }

    async fn execute(&mut self, actions: Vec<Action>, timer: &mut BoxFuture<'static, RoundIdentifier>) {
        let mut actions = VecDeque::from(actions);
        while let Some(action) = actions.pop_front() {
            debug!(node = %self.consensus.address(), %action, "execute");
            match action {
                Action::ResetTimer(r) => {
                    self.abort_build();
                    let d = self.timer.round_timeout(r.round());
                    *timer = sleep(d).map(move |_| r).fuse().boxed();
                }
                Action::BuildBlock {
                    round,
                    parent,
                    extra,
                } => {
                    let extra = self.with_vote(&parent, extra);
                    self.spawn_build(round, parent, extra)
                }
                Action::Deliver(block) => {
                    let head = block.block.header.clone();
                    let validators = match self.tally.validators_after_block(&head) {
                        Ok(v) => v,
                        Err(err) => {
                            warn!(node = %self.consensus.address(), %err, "keeping validators");
                            self.consensus.validators().clone()
                        }
                    };
                    if self.output.send(block).await.is_err() {
                        warn!(node = %self.consensus.address(), "finalized block receiver is gone")
                    }
                    actions.extend(self.consensus.new_chain_head(head, validators))
                }
                other => {
                    if let Some(msg) = other.into_message() {
                        if let Err(err) = self.comm.broadcast(msg).await {
                            warn!(node = %self.consensus.address(), %err, "failed to broadcast")
                        }
                    }
                }
            }
        }
    }

    /// Attach the next pending validator vote to the extra data.
    fn with_vote(&self, parent: &Header, mut extra: ExtraData) -> ExtraData {
        match self.tally.tally_after(parent) {
            Ok(t) => extra.vote = self.votes.next_vote(&self.consensus.address(), &t),
            Err(err) => warn!(node = %self.consensus.address(), %err, "no vote tally for parent"),
        }
        extra
    }

    fn spawn_build(&mut self, round: RoundIdentifier, parent: Header, extra: ExtraData) {
        self.abort_build();
        let builder = self.builder.clone();
        let tx = self.built_tx.clone();
        let handle = tokio::spawn(async move {
            let result = builder
                .build(&parent, round, extra)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send((round, result));
        });
        self.building = Some(BuildTask { round, handle })
    }

    /// Forget the running build if `round` is the round it builds for.
    fn build_finished(&mut self, round: RoundIdentifier) {
        if self.building.as_ref().is_some_and(|b| b.round == round) {
            self.building = None
        }
    }

    fn abort_build(&mut self) {
        if let Some(b) = self.building.take() {
            b.handle.abort()
        }
    }
}

/// A block building task and the round it builds for.
struct BuildTask {
    round: RoundIdentifier,
    handle: JoinHandle<()>,
}
