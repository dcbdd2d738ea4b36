use std::error::Error;
use std::sync::Arc;

use alloy_primitives::B256;
use async_trait::async_trait;
use quorum::{Unchecked, Validated};

use crate::{Block, DecodeError, ExtraData, Header, Message, RoundIdentifier};

/// Types that provide best-effort broadcast to all validators.
#[async_trait]
pub trait Comm {
    type Err: Error + Send + Sync + 'static;

    /// Send a message to all other nodes.
    async fn broadcast(&mut self, msg: Message<Validated>) -> Result<(), Self::Err>;

    /// Await the next message.
    async fn receive(&mut self) -> Result<Message<Unchecked>, Self::Err>;
}

#[async_trait]
impl<T: Comm + Send> Comm for Box<T> {
    type Err = T::Err;

    async fn broadcast(&mut self, msg: Message<Validated>) -> Result<(), Self::Err> {
        (**self).broadcast(msg).await
    }

    async fn receive(&mut self) -> Result<Message<Unchecked>, Self::Err> {
        (**self).receive().await
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CommError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("channel closed")]
    Closed,
}

/// Builds candidate blocks for the local proposer.
#[async_trait]
pub trait BlockBuilder {
    type Err: Error + Send + Sync + 'static;

    /// Build a block on top of `parent` for the given round.
    ///
    /// The extra data template must be embedded verbatim.
    async fn build(
        &self,
        parent: &Header,
        round: RoundIdentifier,
        extra: ExtraData,
    ) -> Result<Block, Self::Err>;
}

/// Read access to finalized headers.
pub trait HeaderStore {
    fn header_by_hash(&self, hash: &B256) -> Option<Header>;

    fn header_by_number(&self, number: u64) -> Option<Header>;
}

impl<T: HeaderStore + ?Sized> HeaderStore for Arc<T> {
    fn header_by_hash(&self, hash: &B256) -> Option<Header> {
        (**self).header_by_hash(hash)
    }

    fn header_by_number(&self, number: u64) -> Option<Header> {
        (**self).header_by_number(number)
    }
}
