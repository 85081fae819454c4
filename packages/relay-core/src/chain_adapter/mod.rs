use alloy_primitives::U256;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use crate::{
    config::ChainConfig,
    relayer::{ErrorSink, StopSignal},
    store::{BlockStore, PersistentStore},
    types::{ChainFamily, ChainId, TransferMessage},
    Error,
};

pub mod handlers;
pub mod rpc;
pub mod evm;
pub mod substrate;

pub use handlers::{HandlerRegistry, HandlerTable};

/// Reads a big-endian amount or token id of at most 256 bits.
pub(crate) fn uint256(value: &[u8]) -> Result<U256, Error> {
    U256::try_from_be_slice(value)
        .ok_or_else(|| Error::Serialization(format!("Integer of {} bytes exceeds 256 bits", value.len())))
}

/// A chain the relayer can read transfers from and write proposals to.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> ChainId;

    fn chain_type(&self) -> ChainFamily;

    /// Polls the chain and forwards decoded transfers to `messages` until
    /// `stop` is closed. Fatal errors are reported to `errors`, after which
    /// polling ends.
    async fn poll_events(
        &self,
        stop: StopSignal,
        errors: ErrorSink,
        messages: mpsc::Sender<TransferMessage>,
    );

    /// Submits a proposal for a transfer destined for this chain.
    async fn write(&self, message: TransferMessage) -> Result<(), Error>;
}

/// Transfers found in one polled block.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    pub messages: Vec<TransferMessage>,
    pub next_block: u64,
}

/// Reads transfer events from a chain through its registered handlers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn latest_block(&self) -> Result<u64, Error>;

    /// Returns the transfers of block `from`, or `None` when that block is
    /// not final yet.
    async fn poll(&self, from: u64) -> Result<Option<EventBatch>, Error>;
}

/// Turns transfers into proposals on the destination chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProposalWriter: Send + Sync {
    async fn write(&self, message: &TransferMessage) -> Result<(), Error>;
}

/// Where a chain starts polling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartPolicy {
    pub start_block: Option<u64>,
    /// Discard the stored block and start from `start_block` (or the head).
    pub fresh: bool,
}

impl StartPolicy {
    pub fn from_config(config: &ChainConfig) -> Result<Self, Error> {
        let start_block = match config.opt("startBlock") {
            Some(_) => Some(config.parse_opt("startBlock", 0u64)?),
            None => None,
        };
        Ok(Self {
            start_block,
            fresh: config.parse_opt("fresh", false)?,
        })
    }
}

/// The adapter every chain family is assembled into: one listener, one
/// writer and the shared store.
pub struct RelayedChain {
    id: ChainId,
    name: String,
    family: ChainFamily,
    listener: Box<dyn EventListener>,
    writer: Box<dyn ProposalWriter>,
    blocks: BlockStore,
    start: StartPolicy,
    poll_interval: Duration,
}

impl RelayedChain {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ChainId,
        name: impl Into<String>,
        family: ChainFamily,
        listener: Box<dyn EventListener>,
        writer: Box<dyn ProposalWriter>,
        store: Arc<dyn PersistentStore>,
        start: StartPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            family,
            listener,
            writer,
            blocks: BlockStore::new(store),
            start,
            poll_interval,
        }
    }

    async fn start_block(&self) -> Result<u64, Error> {
        let configured = match self.start.start_block {
            Some(block) => block,
            None => self.listener.latest_block().await?,
        };
        if self.start.fresh {
            self.blocks.clear(self.id).await?;
            return Ok(configured);
        }
        match self.blocks.next_block(self.id).await? {
            Some(stored) if stored > configured => Ok(stored),
            _ => Ok(configured),
        }
    }

    async fn run_poll_loop(
        &self,
        stop: &StopSignal,
        messages: &mpsc::Sender<TransferMessage>,
    ) -> Result<(), Error> {
        let mut block = self.start_block().await?;
        info!("Polling chain {} ({}) from block {}", self.name, self.id, block);

        loop {
            let polled = tokio::select! {
                _ = stop.closed() => return Ok(()),
                polled = self.listener.poll(block) => polled?,
            };

            match polled {
                Some(batch) => {
                    for message in batch.messages {
                        debug!(
                            "Chain {} found deposit {} for {}",
                            self.id, message.deposit_nonce, message.destination
                        );
                        if messages.send(message).await.is_err() {
                            // relayer stopped routing
                            return Ok(());
                        }
                    }
                    self.blocks.store_next_block(self.id, batch.next_block).await?;
                    block = batch.next_block;
                }
                None => {
                    tokio::select! {
                        _ = stop.closed() => return Ok(()),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ChainAdapter for RelayedChain {
    fn chain_id(&self) -> ChainId {
        self.id
    }

    fn chain_type(&self) -> ChainFamily {
        self.family
    }

    async fn poll_events(
        &self,
        stop: StopSignal,
        errors: ErrorSink,
        messages: mpsc::Sender<TransferMessage>,
    ) {
        match self.run_poll_loop(&stop, &messages).await {
            Ok(()) => info!("Chain {} ({}) stopped polling", self.name, self.id),
            Err(e) => {
                warn!("Chain {} ({}) failed while polling: {}", self.name, self.id, e);
                errors.report(e);
            }
        }
    }

    async fn write(&self, message: TransferMessage) -> Result<(), Error> {
        self.writer.write(&message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Payload, ResourceId};
    use mockall::predicate::eq;

    fn transfer(nonce: u64) -> TransferMessage {
        TransferMessage {
            source: 1,
            destination: 2,
            deposit_nonce: nonce,
            resource_id: ResourceId::default(),
            payload: Payload::Generic { metadata: vec![] },
        }
    }

    fn build_chain(
        listener: MockEventListener,
        writer: MockProposalWriter,
        store: Arc<MemoryStore>,
        start: StartPolicy,
    ) -> RelayedChain {
        RelayedChain::new(
            1,
            "test",
            ChainFamily::Ethereum,
            Box::new(listener),
            Box::new(writer),
            store,
            start,
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_forwards_batches_and_records_progress() {
        let mut listener = MockEventListener::new();
        listener
            .expect_poll()
            .with(eq(10))
            .returning(|_| Ok(Some(EventBatch { messages: vec![transfer(1), transfer(2)], next_block: 11 })));
        listener.expect_poll().with(eq(11)).returning(|_| Ok(None));

        let store = Arc::new(MemoryStore::new());
        let chain = build_chain(
            listener,
            MockProposalWriter::new(),
            store.clone(),
            StartPolicy { start_block: Some(10), fresh: true },
        );

        let stop = StopSignal::new();
        let (sink, mut errors) = ErrorSink::channel();
        let (tx, mut rx) = mpsc::channel(8);

        let poller = {
            let stop = stop.clone();
            async move { chain.poll_events(stop, sink, tx).await }
        };
        let handle = tokio::spawn(poller);

        assert_eq!(rx.recv().await.unwrap().deposit_nonce, 1);
        assert_eq!(rx.recv().await.unwrap().deposit_nonce, 2);

        stop.close();
        handle.await.unwrap();
        assert!(errors.try_recv().is_err());

        let blocks = BlockStore::new(store);
        assert_eq!(blocks.next_block(1).await.unwrap(), Some(11));
    }

    #[tokio::test]
    async fn test_resumes_from_stored_block() {
        let store = Arc::new(MemoryStore::new());
        BlockStore::new(store.clone()).store_next_block(1, 42).await.unwrap();

        let mut listener = MockEventListener::new();
        listener.expect_latest_block().returning(|| Ok(5));
        let chain = build_chain(listener, MockProposalWriter::new(), store.clone(), StartPolicy::default());
        assert_eq!(chain.start_block().await.unwrap(), 42);

        let listener = MockEventListener::new();
        let fresh = StartPolicy { start_block: Some(7), fresh: true };
        let chain = build_chain(listener, MockProposalWriter::new(), store.clone(), fresh);
        assert_eq!(chain.start_block().await.unwrap(), 7);
        assert_eq!(BlockStore::new(store).next_block(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_listener_error_is_reported() {
        let mut listener = MockEventListener::new();
        listener
            .expect_poll()
            .returning(|_| Err(Error::Network("connection refused".to_string())));

        let chain = build_chain(
            listener,
            MockProposalWriter::new(),
            Arc::new(MemoryStore::new()),
            StartPolicy { start_block: Some(0), fresh: false },
        );

        let (sink, mut errors) = ErrorSink::channel();
        let (tx, _rx) = mpsc::channel(1);
        chain.poll_events(StopSignal::new(), sink, tx).await;

        let err = errors.recv().await.unwrap();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_write_delegates_to_writer() {
        let mut writer = MockProposalWriter::new();
        writer
            .expect_write()
            .withf(|message| message.deposit_nonce == 9)
            .times(1)
            .returning(|_| Ok(()));

        let chain = build_chain(
            MockEventListener::new(),
            writer,
            Arc::new(MemoryStore::new()),
            StartPolicy::default(),
        );
        assert_eq!(chain.chain_id(), 1);
        assert_eq!(chain.chain_type(), ChainFamily::Ethereum);
        chain.write(transfer(9)).await.unwrap();
    }

    #[test]
    fn test_start_policy_from_config() {
        let config: ChainConfig = serde_json::from_value(serde_json::json!({
            "name": "dev",
            "type": "ethereum",
            "id": 0,
            "endpoint": "http://localhost:8545",
            "opts": { "startBlock": "120", "fresh": "true" }
        }))
        .unwrap();
        assert_eq!(
            StartPolicy::from_config(&config).unwrap(),
            StartPolicy { start_block: Some(120), fresh: true }
        );

        let mut config = config;
        config.opts.clear();
        assert_eq!(StartPolicy::from_config(&config).unwrap(), StartPolicy::default());
    }
}
