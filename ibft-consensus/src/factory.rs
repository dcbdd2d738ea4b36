use alloy_primitives::B256;
use ibft_types::{Block, Commit, Prepare, PreparedCertificate, Proposal, RoundChange};
use ibft_types::RoundIdentifier;
use quorum::{Address, Envelope, Keypair};

/// Creates the signed messages of the local validator.
#[derive(Debug, Clone)]
pub struct MessageFactory {
    keypair: Keypair,
}

impl MessageFactory {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    pub fn proposal(&self, round: RoundIdentifier, block: Block) -> Envelope<Proposal> {
        Envelope::signed(Proposal::new(round, block), &self.keypair)
    }

    pub fn prepare(&self, round: RoundIdentifier, digest: B256) -> Envelope<Prepare> {
        Envelope::signed(Prepare::new(round, digest), &self.keypair)
    }

    /// A commit with the committed seal over `digest`.
    pub fn commit(&self, round: RoundIdentifier, digest: B256) -> Envelope<Commit> {
        let seal = self.keypair.sign(&digest);
        Envelope::signed(Commit::new(round, digest, seal), &self.keypair)
    }

    pub fn round_change(
        &self,
        target: RoundIdentifier,
        prepared: Option<PreparedCertificate>,
    ) -> Envelope<RoundChange> {
        Envelope::signed(RoundChange::new(target, prepared), &self.keypair)
    }
}
