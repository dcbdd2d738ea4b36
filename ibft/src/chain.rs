use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{B256, Bytes, keccak256};
use async_trait::async_trait;
use ibft_types::{Block, BlockBuilder, ExtraData, FinalizedBlock, Header, HeaderStore};
use ibft_types::RoundIdentifier;
use parking_lot::RwLock;
use quorum::Address;
use tracing::debug;

/// Finalized headers kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryChain {
    inner: RwLock<Headers>,
}

#[derive(Debug, Default)]
struct Headers {
    by_hash: HashMap<B256, Header>,
    by_number: BTreeMap<u64, B256>,
}

impl InMemoryChain {
    pub fn new(genesis: Header) -> Self {
        let chain = Self::default();
        chain.insert(genesis);
        chain
    }

    /// Add a header. Returns `false` if a header of that number exists.
    pub fn insert(&self, header: Header) -> bool {
        let mut inner = self.inner.write();
        if inner.by_number.contains_key(&header.number) {
            return false;
        }
        let hash = header.hash();
        debug!(number = %header.number, %hash, "new header");
        inner.by_number.insert(header.number, hash);
        inner.by_hash.insert(hash, header);
        true
    }

    pub fn append(&self, block: &FinalizedBlock) -> bool {
        self.insert(block.block.header.clone())
    }

    /// The header with the highest number.
    pub fn head(&self) -> Option<Header> {
        let inner = self.inner.read();
        let (_, hash) = inner.by_number.last_key_value()?;
        inner.by_hash.get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HeaderStore for InMemoryChain {
    fn header_by_hash(&self, hash: &B256) -> Option<Header> {
        self.inner.read().by_hash.get(hash).cloned()
    }

    fn header_by_number(&self, number: u64) -> Option<Header> {
        let inner = self.inner.read();
        inner.by_hash.get(inner.by_number.get(&number)?).cloned()
    }
}

/// Builds blocks with a small synthetic body.
#[derive(Debug, Clone)]
pub struct LocalBuilder {
    beneficiary: Address,
}

impl LocalBuilder {
    pub fn new(beneficiary: Address) -> Self {
        Self { beneficiary }
    }
}

#[async_trait]
impl BlockBuilder for LocalBuilder {
    type Err = Infallible;

    async fn build(
        &self,
        parent: &Header,
        round: RoundIdentifier,
        extra: ExtraData,
    ) -> Result<Block, Self::Err> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let body = Bytes::from(format!("{round} by {}", self.beneficiary).into_bytes());
        let header = Header {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            timestamp: now.max(parent.timestamp + 1),
            beneficiary: self.beneficiary,
            payload_root: keccak256(&body),
            extra,
        };
        Ok(Block { header, body })
    }
}
