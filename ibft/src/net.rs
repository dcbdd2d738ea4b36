use async_trait::async_trait;
use bytes::Bytes;
use ibft_types::{Comm, CommError, Message, decode_message};
use quorum::{Unchecked, Validated};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::trace;

/// An in-process network of fully connected nodes.
///
/// Messages travel in their wire encoding. Delivery to nodes that are gone
/// is silently skipped.
#[derive(Debug)]
pub struct LocalNet;

impl LocalNet {
    /// Create the endpoints of `n` nodes.
    pub fn create(n: usize) -> Vec<LocalComm> {
        let (txs, rxs): (Vec<_>, Vec<_>) = (0..n).map(|_| unbounded_channel()).unzip();
        rxs.into_iter()
            .enumerate()
            .map(|(i, inbox)| LocalComm {
                id: i,
                peers: txs
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, tx)| tx.clone())
                    .collect(),
                inbox,
            })
            .collect()
    }
}

/// The endpoint of a node in a [`LocalNet`].
#[derive(Debug)]
pub struct LocalComm {
    id: usize,
    peers: Vec<UnboundedSender<Bytes>>,
    inbox: UnboundedReceiver<Bytes>,
}

impl LocalComm {
    pub fn id(&self) -> usize {
        self.id
    }
}

#[async_trait]
impl Comm for LocalComm {
    type Err = CommError;

    async fn broadcast(&mut self, msg: Message<Validated>) -> Result<(), Self::Err> {
        let bytes = Bytes::from(msg.encode());
        trace!(node = %self.id, %msg, len = %bytes.len(), "broadcast");
        for p in &self.peers {
            let _ = p.send(bytes.clone());
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Message<Unchecked>, Self::Err> {
        loop {
            let bytes = self.inbox.recv().await.ok_or(CommError::Closed)?;
            if let Some(m) = decode_message(&bytes) {
                return Ok(m);
            }
        }
    }
}
