mod factory;
mod metrics;
mod round_change;
mod round_state;
mod validation;

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use bon::Builder;
use ibft_types::{Action, Block, Commit, ExtraData, Header, Message, Prepare, PreparedCertificate};
use ibft_types::{Proposal, RoundChange, RoundChangeCertificate, RoundIdentifier};
use quorum::{AccumulatorError, Address, AuthenticationError, Envelope, Keypair};
use quorum::{QuorumViolation, Unchecked, Validated, ValidatorSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

pub use factory::MessageFactory;
pub use metrics::ConsensusMetrics;
pub use round_change::RoundChangeManager;
pub use round_state::{Phase, RoundState, Transition};

/// Consensus parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConsensusConfig {
    /// How many rounds ahead of the current one messages are accepted.
    #[builder(default = 10)]
    pub future_round_limit: u32,

    /// Upper bound of messages buffered for later rounds.
    #[builder(default = 1000)]
    pub future_message_limit: usize,

    /// Upper bound of messages buffered for the next sequence.
    #[builder(default = 1000)]
    pub future_sequence_limit: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConsensusError {
    #[error("authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("vote not accepted: {0}")]
    Vote(#[from] AccumulatorError),

    #[error("proposal signed by {signer}, expected {expected:?}")]
    UnexpectedProposer {
        signer: Address,
        expected: Option<Address>,
    },

    #[error("round {0} is too far ahead")]
    FutureRound(RoundIdentifier),

    #[error("round {0} is stale")]
    StaleRound(RoundIdentifier),

    #[error("message of round {0} does not belong here")]
    WrongRound(RoundIdentifier),

    #[error("invalid certificate: {0}")]
    Quorum(#[from] QuorumViolation),

    #[error("invalid proposal: {0}")]
    InvalidProposal(#[from] InvalidProposal),

    #[error("invalid prepared certificate: {0}")]
    InvalidPrepared(#[from] InvalidPrepared),

    #[error("committed seal of {0} does not match its signer")]
    InvalidSeal(Address),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum InvalidProposal {
    #[error("block number {got}, expected {expected}")]
    Number { got: u64, expected: u64 },

    #[error("block does not extend the chain head")]
    Parent,

    #[error("block already carries committed seals")]
    Sealed,

    #[error("beneficiary {0} is not a validator")]
    Beneficiary(Address),

    #[error("missing round change justification")]
    MissingJustification,

    #[error("justification in round 0")]
    UnexpectedJustification,

    #[error("justification contains a round change for {0}")]
    JustificationRound(RoundIdentifier),

    #[error("block is not the highest prepared block")]
    NotHighestPrepared,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum InvalidPrepared {
    #[error("prepared in round {0}")]
    Round(RoundIdentifier),

    #[error("invalid proposal signature")]
    Signature,

    #[error("proposal signed by {0}, who is not the proposer")]
    Proposer(Address),

    #[error("prepares do not match the proposal")]
    Digest,

    #[error("prepares include the proposer")]
    ProposerPrepare,

    #[error("invalid prepares: {0}")]
    Prepares(QuorumViolation),
}

/// IBFT 2.0 consensus of a single node.
///
/// Every input is a method call returning the actions the environment is
/// expected to perform. The instance never blocks and performs no I/O.
pub struct Consensus {
    /// Signs the messages of this node.
    factory: MessageFactory,

    config: ConsensusConfig,

    /// Validators of the current sequence.
    validators: ValidatorSet,

    /// The chain head the current sequence builds on.
    parent: Header,

    /// State of the current round.
    state: RoundState,

    /// Our prepared certificate of the highest round in this sequence.
    latest_prepared: Option<PreparedCertificate>,

    /// Round changes of the current sequence.
    round_changes: RoundChangeManager,

    /// Authenticated messages for later rounds of the current sequence.
    future_rounds: BTreeMap<u32, Vec<Message<Validated>>>,

    /// Messages for the next sequence. They can only be authenticated once
    /// the validator set of their sequence is known.
    future_sequences: VecDeque<Message<Unchecked>>,

    /// Round for which a block has been requested.
    building: Option<RoundIdentifier>,

    metrics: ConsensusMetrics,

    /// Start of the current round.
    metrics_timer: Instant,
}

impl Consensus {
    pub fn new(
        keypair: Keypair,
        parent: Header,
        validators: ValidatorSet,
        config: ConsensusConfig,
    ) -> Self {
        let round = RoundIdentifier::new(parent.number + 1, 0);
        Self {
            factory: MessageFactory::new(keypair),
            config,
            state: RoundState::new(round, &validators),
            round_changes: RoundChangeManager::new(round.sequence(), validators.clone()),
            validators,
            parent,
            latest_prepared: None,
            future_rounds: BTreeMap::new(),
            future_sequences: VecDeque::new(),
            building: None,
            metrics: Default::default(),
            metrics_timer: Instant::now(),
        }
    }

    pub fn with_metrics(mut self, m: ConsensusMetrics) -> Self {
        self.metrics = m;
        self
    }

    pub fn address(&self) -> Address {
        self.factory.address()
    }

    pub fn round(&self) -> RoundIdentifier {
        self.state.round()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn round_state(&self) -> &RoundState {
        &self.state
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn parent(&self) -> &Header {
        &self.parent
    }

    pub fn latest_prepared(&self) -> Option<&PreparedCertificate> {
        self.latest_prepared.as_ref()
    }

    pub fn is_validator(&self) -> bool {
        self.validators.contains(&self.address())
    }

    /// Start round 0 of the sequence after the parent header.
    pub fn go(&mut self) -> Vec<Action> {
        info!(
            node       = %self.address(),
            round      = %self.round(),
            validators = %self.validators.len(),
            "start consensus"
        );
        self.metrics.sequence.set(self.round().sequence() as usize);
        self.start_round(0)
    }

    /// Main entry point to process a received `Message`.
    ///
    /// Rejected messages are logged and dropped.
    pub fn handle_message(&mut self, m: Message<Unchecked>) -> Vec<Action> {
        trace!(node = %self.address(), round = %self.round(), msg = %m, "handle message");
        match self.try_handle_message(m) {
            Ok(actions) => actions,
            Err(err) => {
                self.rejected(&err);
                Vec::new()
            }
        }
    }

    /// Like `handle_message` but returns the reason for rejecting a message.
    pub fn try_handle_message(
        &mut self,
        m: Message<Unchecked>,
    ) -> Result<Vec<Action>, ConsensusError> {
        let current = self.state.round();
        let r = m.round();

        if r.sequence() > current.sequence() {
            if r.sequence() != current.sequence() + 1
                || self.future_sequences.len() >= self.config.future_sequence_limit
            {
                return Err(ConsensusError::FutureRound(r));
            }
            self.future_sequences.push_back(m);
            self.metrics.future_buffer.set(self.buffered());
            return Ok(Vec::new());
        }

        if r.sequence() < current.sequence() {
            return Err(ConsensusError::StaleRound(r));
        }

        if self.state.is_committed() {
            trace!(node = %self.address(), round = %current, msg = %m, "sequence committed");
            return Ok(Vec::new());
        }

        if r.round() > current.round().saturating_add(self.config.future_round_limit) {
            return Err(ConsensusError::FutureRound(r));
        }

        let m = m.validated(&self.validators)?;
        self.process(m)
    }

    /// The timer of a round expired.
    ///
    /// Unless the round committed, we ask for a round change to the next
    /// round and move there.
    pub fn timeout(&mut self, round: RoundIdentifier) -> Vec<Action> {
        if round != self.state.round() || self.state.is_committed() {
            debug!(
                node    = %self.address(),
                round   = %self.round(),
                timeout = %round,
                "ignoring stale timeout"
            );
            return Vec::new();
        }

        info!(node = %self.address(), round = %round, "round timeout");
        self.metrics.rounds_timed_out.add(1);

        let target = round.next_round();
        let mut actions = Vec::new();
        if self.is_validator() {
            let rc = self.factory.round_change(target, self.latest_prepared.clone());
            if let Err(err) = self.round_changes.add(rc.clone()) {
                warn!(node = %self.address(), %err, "failed to add own round change");
            }
            actions.push(Action::SendRoundChange(rc));
        }
        actions.extend(self.start_round(target.round()));
        actions
    }

    /// A block requested via `Action::BuildBlock` is ready.
    pub fn handle_block(&mut self, round: RoundIdentifier, block: Block) -> Vec<Action> {
        if self.building != Some(round) || self.state.round() != round {
            debug!(
                node  = %self.address(),
                round = %self.round(),
                built = %round,
                "discarding block of another round"
            );
            return Vec::new();
        }
        self.building = None;

        if let Err(err) = validation::validate_block(&block, &self.parent, &self.validators) {
            warn!(node = %self.address(), round = %round, %err, "built block is invalid");
            return Vec::new();
        }

        if round.round() == 0 {
            return self.propose(block, None);
        }

        let Some(cert) = self.round_changes.certificate(round.round()) else {
            warn!(node = %self.address(), round = %round, "no round change quorum");
            return Vec::new();
        };

        // Round changes that arrived while building may carry a prepared
        // block, which then takes precedence.
        let block = match validation::highest_prepared(&cert) {
            Some(pc) => pc.block().clone(),
            None => block,
        };
        self.propose(block, Some(cert))
    }

    /// Building the block requested for `round` failed.
    ///
    /// Nothing is proposed in this round. The round timer takes over.
    pub fn build_failed(&mut self, round: RoundIdentifier) {
        warn!(node = %self.address(), round = %round, "failed to build block");
        if self.building == Some(round) {
            self.building = None
        }
    }

    /// A block has been finalized (locally or otherwise).
    ///
    /// Consensus moves to round 0 of the next sequence with the given
    /// validators. All state of earlier sequences is discarded.
    pub fn new_chain_head(&mut self, head: Header, validators: ValidatorSet) -> Vec<Action> {
        if head.number <= self.parent.number {
            debug!(
                node  = %self.address(),
                round = %self.round(),
                head  = %head.number,
                "ignoring old chain head"
            );
            return Vec::new();
        }

        let round = RoundIdentifier::new(head.number + 1, 0);

        info!(
            node       = %self.address(),
            round      = %round,
            head       = %head.hash(),
            validators = %validators.len(),
            "new chain head"
        );

        self.state = RoundState::new(round, &validators);
        self.round_changes = RoundChangeManager::new(round.sequence(), validators.clone());
        self.validators = validators;
        self.parent = head;
        self.latest_prepared = None;
        self.future_rounds.clear();
        self.metrics.sequence.set(round.sequence() as usize);

        let mut actions = self.start_round(0);
        for m in std::mem::take(&mut self.future_sequences) {
            if m.round().sequence() != round.sequence() {
                trace!(node = %self.address(), round = %round, msg = %m, "dropping buffered message");
                continue;
            }
            actions.extend(self.handle_message(m));
        }
        self.metrics.future_buffer.set(self.buffered());
        actions
    }

    fn start_round(&mut self, round: u32) -> Vec<Action> {
        let id = self.state.round().with_round(round);

        self.metrics
            .round_duration
            .add_point(self.metrics_timer.elapsed().as_secs_f64());
        self.metrics_timer = Instant::now();
        self.metrics.round.set(round as usize);

        self.state = RoundState::new(id, &self.validators);
        self.round_changes.discard_below(round);
        self.building = None;

        debug!(
            node     = %self.address(),
            round    = %id,
            proposer = ?self.state.proposer(),
            "start round"
        );

        let mut actions = vec![Action::ResetTimer(id)];
        actions.extend(self.try_propose());

        let mut pending = std::mem::take(&mut self.future_rounds);
        self.future_rounds = pending.split_off(&round);
        for m in self.future_rounds.remove(&round).unwrap_or_default() {
            match self.process(m) {
                Ok(a) => actions.extend(a),
                Err(err) => self.rejected(&err),
            }
        }
        self.metrics.future_buffer.set(self.buffered());

        actions
    }

    fn process(&mut self, m: Message<Validated>) -> Result<Vec<Action>, ConsensusError> {
        let current = self.state.round();
        let r = m.round();

        // Round changes are measured by their target round.
        if r.round() < current.round() {
            return Err(ConsensusError::StaleRound(r));
        }

        match m {
            Message::RoundChange(e) => self.handle_round_change(e),
            m if r.round() > current.round() => self.handle_future_round(m),
            Message::Proposal {
                proposal,
                justification,
            } => self.handle_proposal(proposal, justification),
            Message::Prepare(e) => self.handle_prepare(e),
            Message::Commit(e) => self.handle_commit(e),
        }
    }

    /// Buffer a message of a later round of this sequence.
    ///
    /// A justified proposal of the round's proposer moves us to its round
    /// right away.
    fn handle_future_round(&mut self, m: Message<Validated>) -> Result<Vec<Action>, ConsensusError> {
        let r = m.round();

        if let Message::Proposal {
            proposal,
            justification: Some(cert),
        } = &m
        {
            if Some(proposal.signer()) == r.proposer(&self.validators)
                && validation::validate_justification(cert, r, &self.validators).is_ok()
            {
                info!(
                    node   = %self.address(),
                    round  = %self.round(),
                    target = %r,
                    "justified proposal of a later round"
                );
                self.metrics.round_changes.add(1);
                let mut actions = self.start_round(r.round());
                match self.process(m) {
                    Ok(a) => actions.extend(a),
                    Err(err) => self.rejected(&err),
                }
                return Ok(actions);
            }
        }

        let n = self.future_rounds.values().map(Vec::len).sum::<usize>();
        if n >= self.config.future_message_limit {
            return Err(ConsensusError::FutureRound(r));
        }
        self.future_rounds.entry(r.round()).or_default().push(m);
        self.metrics.future_buffer.set(self.buffered());
        Ok(Vec::new())
    }

    fn handle_proposal(
        &mut self,
        e: Envelope<Proposal, Validated>,
        justification: Option<RoundChangeCertificate>,
    ) -> Result<Vec<Action>, ConsensusError> {
        let round = e.data().round();
        let expected = self.state.proposer();

        if Some(e.signer()) != expected {
            return Err(ConsensusError::UnexpectedProposer {
                signer: e.signer(),
                expected,
            });
        }

        if self.state.proposal().is_some() {
            debug!(node = %self.address(), round = %round, "duplicate proposal");
            return Ok(Vec::new());
        }

        validation::validate_block(e.data().block(), &self.parent, &self.validators)?;

        let digest = e.data().digest();

        match (round.round(), &justification) {
            (0, None) => {}
            (0, Some(_)) => return Err(InvalidProposal::UnexpectedJustification.into()),
            (_, None) => return Err(InvalidProposal::MissingJustification.into()),
            (_, Some(cert)) => {
                let highest = validation::validate_justification(cert, round, &self.validators)?;
                if highest.is_some_and(|d| d != digest) {
                    return Err(InvalidProposal::NotHighestPrepared.into());
                }
            }
        }

        debug!(node = %self.address(), round = %round, %digest, "accepted proposal");

        self.state.set_proposal(e);

        let mut actions = Vec::new();
        if self.is_validator() && expected != Some(self.address()) {
            let p = self.factory.prepare(round, digest);
            self.state.add_prepare(p.clone())?;
            actions.push(Action::SendPrepare(p));
        }
        self.advance(&mut actions)?;
        Ok(actions)
    }

    fn handle_prepare(&mut self, e: Envelope<Prepare, Validated>) -> Result<Vec<Action>, ConsensusError> {
        let signer = e.signer();
        if !self.state.add_prepare(e)? {
            trace!(node = %self.address(), round = %self.round(), %signer, "prepare ignored");
            return Ok(Vec::new());
        }
        let mut actions = Vec::new();
        self.advance(&mut actions)?;
        Ok(actions)
    }

    fn handle_commit(&mut self, e: Envelope<Commit, Validated>) -> Result<Vec<Action>, ConsensusError> {
        let signer = e.signer();
        if !self.state.add_commit(e)? {
            trace!(node = %self.address(), round = %self.round(), %signer, "commit ignored");
            return Ok(Vec::new());
        }
        let mut actions = Vec::new();
        self.advance(&mut actions)?;
        Ok(actions)
    }

    fn handle_round_change(
        &mut self,
        e: Envelope<RoundChange, Validated>,
    ) -> Result<Vec<Action>, ConsensusError> {
        let target = e.data().round();
        let signer = e.signer();
        let quorum = self.round_changes.add(e)?;
        let current = self.state.round();

        debug!(
            node   = %self.address(),
            round  = %current,
            target = %target,
            %signer,
            quorum,
            "round change"
        );

        if target.round() > current.round() && quorum {
            info!(node = %self.address(), round = %current, target = %target, "round change quorum");
            self.metrics.round_changes.add(1);
            return Ok(self.start_round(target.round()));
        }

        if target == current {
            return Ok(self.try_propose());
        }

        Ok(Vec::new())
    }

    /// Apply all phase transitions the current round state allows.
    fn advance(&mut self, actions: &mut Vec<Action>) -> Result<(), ConsensusError> {
        while let Some(t) = self.state.update() {
            let round = self.state.round();
            match t {
                Transition::Prepared => {
                    debug!(node = %self.address(), round = %round, "prepared");
                    self.latest_prepared = self.state.prepared_certificate();
                    if let Some(digest) = self.state.digest().filter(|_| self.is_validator()) {
                        let c = self.factory.commit(round, digest);
                        self.state.add_commit(c.clone())?;
                        actions.push(Action::SendCommit(c));
                    }
                }
                Transition::Committed => {
                    if let Some(b) = self.state.finalized_block() {
                        info!(
                            node  = %self.address(),
                            round = %round,
                            hash  = %b.block.hash(),
                            seals = %b.seals.len(),
                            "committed"
                        );
                        self.metrics.finalized.add(1);
                        actions.push(Action::Deliver(b))
                    }
                }
            }
        }
        Ok(())
    }

    /// Propose in the current round if we are its proposer.
    ///
    /// Rounds above 0 need a round change quorum first. If it carries a
    /// prepared block that block is proposed again, otherwise a new one is
    /// requested.
    fn try_propose(&mut self) -> Vec<Action> {
        let id = self.state.round();

        if self.state.proposer() != Some(self.address())
            || self.state.proposal().is_some()
            || self.building == Some(id)
        {
            return Vec::new();
        }

        if id.round() == 0 {
            return self.request_block();
        }

        let Some(cert) = self.round_changes.certificate(id.round()) else {
            debug!(node = %self.address(), round = %id, "awaiting round change quorum");
            return Vec::new();
        };

        match validation::highest_prepared(&cert) {
            Some(pc) => {
                let block = pc.block().clone();
                info!(
                    node     = %self.address(),
                    round    = %id,
                    prepared = %pc.round(),
                    hash     = %block.hash(),
                    "proposing prepared block"
                );
                self.propose(block, Some(cert))
            }
            None => self.request_block(),
        }
    }

    fn request_block(&mut self) -> Vec<Action> {
        let round = self.state.round();
        self.building = Some(round);
        let mut extra = ExtraData::new(self.validators.as_slice().to_vec());
        extra.round = round.round();
        vec![Action::BuildBlock {
            round,
            parent: self.parent.clone(),
            extra,
        }]
    }

    fn propose(&mut self, block: Block, justification: Option<RoundChangeCertificate>) -> Vec<Action> {
        let round = self.state.round();
        let e = self.factory.proposal(round, block);
        info!(node = %self.address(), round = %round, hash = %e.data().digest(), "proposing");
        self.state.set_proposal(e.clone());
        let mut actions = vec![Action::SendProposal(e, justification)];
        if let Err(err) = self.advance(&mut actions) {
            warn!(node = %self.address(), round = %round, %err, "failed to advance round");
        }
        actions
    }

    fn buffered(&self) -> usize {
        self.future_rounds.values().map(Vec::len).sum::<usize>() + self.future_sequences.len()
    }

    fn rejected(&self, err: &ConsensusError) {
        self.metrics.rejected.add(1);
        match err {
            ConsensusError::FutureRound(_) | ConsensusError::StaleRound(_) => {
                debug!(node = %self.address(), round = %self.round(), %err, "message dropped")
            }
            _ => warn!(node = %self.address(), round = %self.round(), %err, "message rejected"),
        }
    }
}
