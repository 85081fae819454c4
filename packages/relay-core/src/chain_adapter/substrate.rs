use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use crate::{
    chain_adapter::{
        rpc::{parse_quantity, JsonRpcClient},
        uint256, EventBatch, EventListener, HandlerTable, ProposalWriter,
    },
    config::{ChainConfig, RelayerConfig},
    keystore::Keypair,
    types::{ChainId, Payload, Proposal, ResourceId, TransferMessage, TransferType},
    Error,
};

const DEFAULT_EVENTS_METHOD: &str = "bridge_events";
const DEFAULT_PROPOSAL_METHOD: &str = "bridge_acknowledgeProposal";
const DEFAULT_TRANSFER_CALL: &str = "Example.transfer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstrateOptions {
    /// RPC method returning the decoded bridge events of a block.
    pub events_method: String,
    /// RPC method that acknowledges a proposal on behalf of the relayer.
    pub proposal_method: String,
    /// Runtime call executed by fungible proposals.
    pub transfer_call: String,
}

impl SubstrateOptions {
    pub fn from_config(config: &ChainConfig) -> Self {
        Self {
            events_method: config.opt("eventsMethod").unwrap_or(DEFAULT_EVENTS_METHOD).to_string(),
            proposal_method: config.opt("proposalMethod").unwrap_or(DEFAULT_PROPOSAL_METHOD).to_string(),
            transfer_call: config.opt("transferCall").unwrap_or(DEFAULT_TRANSFER_CALL).to_string(),
        }
    }
}

/// A bridge pallet event as returned by the events RPC.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEvent {
    pub category: String,
    pub destination: ChainId,
    pub deposit_nonce: u64,
    pub resource_id: ResourceId,
    #[serde(default)]
    pub data: Value,
}

impl BridgeEvent {
    pub fn transfer_type(&self) -> Option<TransferType> {
        match self.category.as_str() {
            "FungibleTransfer" => Some(TransferType::Fungible),
            "NonFungibleTransfer" => Some(TransferType::NonFungible),
            "GenericTransfer" => Some(TransferType::Generic),
            _ => None,
        }
    }

    fn hex_field(&self, field: &str) -> Result<Vec<u8>, Error> {
        let raw = self.data.get(field).and_then(Value::as_str).ok_or_else(|| {
            Error::Serialization(format!("{} event {} has no {}", self.category, self.deposit_nonce, field))
        })?;
        hex::decode(raw.trim_start_matches("0x")).map_err(|e| {
            Error::Serialization(format!("Invalid {} in {} event {}: {}", field, self.category, self.deposit_nonce, e))
        })
    }

    fn message(&self, source: ChainId, payload: Payload) -> TransferMessage {
        TransferMessage {
            source,
            destination: self.destination,
            deposit_nonce: self.deposit_nonce,
            resource_id: self.resource_id,
            payload,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Header {
    number: String,
}

/// JSON-RPC access to one substrate chain.
pub struct SubstrateClient {
    rpc: JsonRpcClient,
    chain_id: ChainId,
    signer: Keypair,
    options: SubstrateOptions,
}

impl SubstrateClient {
    pub async fn connect(
        config: &ChainConfig,
        signer: Keypair,
        relayer: &RelayerConfig,
    ) -> Result<Self, Error> {
        let rpc = JsonRpcClient::new(
            &config.endpoint,
            relayer.max_retries,
            Duration::from_secs(relayer.retry_delay),
        )?;
        let chain: String = rpc.call("system_chain", json!([])).await?;
        info!(
            "Connected to {} at {} ({}), relaying as {}",
            config.name, config.endpoint, chain, signer.address
        );

        Ok(Self {
            rpc,
            chain_id: config.id,
            signer,
            options: SubstrateOptions::from_config(config),
        })
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn options(&self) -> &SubstrateOptions {
        &self.options
    }

    pub async fn finalized_block(&self) -> Result<u64, Error> {
        let hash: String = self.rpc.call("chain_getFinalizedHead", json!([])).await?;
        let header: Header = self.rpc.call("chain_getHeader", json!([hash])).await?;
        parse_quantity(&header.number)
    }

    pub async fn block_hash(&self, number: u64) -> Result<Option<String>, Error> {
        self.rpc.call("chain_getBlockHash", json!([number])).await
    }

    pub async fn bridge_events(&self, block_hash: &str) -> Result<Vec<BridgeEvent>, Error> {
        self.rpc.call(&self.options.events_method, json!([block_hash])).await
    }

    pub async fn acknowledge(&self, proposal: &Proposal) -> Result<String, Error> {
        self.rpc
            .call(
                &self.options.proposal_method,
                json!([{
                    "source": proposal.source,
                    "depositNonce": proposal.deposit_nonce,
                    "resourceId": proposal.resource_id,
                    "call": proposal.handler,
                    "data": format!("0x{}", hex::encode(&proposal.data)),
                }, self.signer.address]),
            )
            .await
    }
}

/// Converts one category of bridge events into transfer messages.
pub trait SubstrateEventHandler: Send + Sync {
    fn handle(&self, source: ChainId, event: &BridgeEvent) -> Result<TransferMessage, Error>;
}

pub struct FungibleTransferHandler;

impl SubstrateEventHandler for FungibleTransferHandler {
    fn handle(&self, source: ChainId, event: &BridgeEvent) -> Result<TransferMessage, Error> {
        let amount = uint256(&event.hex_field("amount")?)?.to_be_bytes_trimmed_vec();
        let recipient = event.hex_field("recipient")?;
        Ok(event.message(source, Payload::Fungible { amount, recipient }))
    }
}

pub struct NonFungibleTransferHandler;

impl SubstrateEventHandler for NonFungibleTransferHandler {
    fn handle(&self, source: ChainId, event: &BridgeEvent) -> Result<TransferMessage, Error> {
        let token_id = uint256(&event.hex_field("tokenId")?)?.to_be_bytes_trimmed_vec();
        let recipient = event.hex_field("recipient")?;
        let metadata = event.hex_field("metadata").unwrap_or_default();
        Ok(event.message(source, Payload::NonFungible { token_id, recipient, metadata }))
    }
}

pub struct GenericTransferHandler;

impl SubstrateEventHandler for GenericTransferHandler {
    fn handle(&self, source: ChainId, event: &BridgeEvent) -> Result<TransferMessage, Error> {
        let metadata = event.hex_field("metadata")?;
        Ok(event.message(source, Payload::Generic { metadata }))
    }
}

pub struct SubstrateListener {
    client: Arc<SubstrateClient>,
    handlers: HandlerTable<TransferType, Arc<dyn SubstrateEventHandler>>,
}

impl SubstrateListener {
    pub fn new(
        client: Arc<SubstrateClient>,
        handlers: HandlerTable<TransferType, Arc<dyn SubstrateEventHandler>>,
    ) -> Self {
        Self { client, handlers }
    }
}

#[async_trait]
impl EventListener for SubstrateListener {
    async fn latest_block(&self) -> Result<u64, Error> {
        self.client.finalized_block().await
    }

    async fn poll(&self, from: u64) -> Result<Option<EventBatch>, Error> {
        if from > self.client.finalized_block().await? {
            return Ok(None);
        }
        let Some(hash) = self.client.block_hash(from).await? else {
            return Ok(None);
        };

        let mut messages = Vec::new();
        for event in self.client.bridge_events(&hash).await? {
            let handler = event
                .transfer_type()
                .and_then(|kind| self.handlers.get(&kind));
            match handler {
                Some(handler) => messages.push(handler.handle(self.client.chain_id(), &event)?),
                None => warn!(
                    "No handler registered for {} on chain {}, skipping deposit {}",
                    event.category,
                    self.client.chain_id(),
                    event.deposit_nonce
                ),
            }
        }

        Ok(Some(EventBatch { messages, next_block: from + 1 }))
    }
}

/// Builds the runtime call for one category of transfers.
pub trait SubstrateProposalHandler: Send + Sync {
    fn build(&self, message: &TransferMessage) -> Result<Proposal, Error>;
}

/// SCALE layout of `(U256 amount, recipient)`: little-endian amount
/// followed by the raw recipient account.
pub struct FungibleProposalHandler {
    call: String,
}

impl FungibleProposalHandler {
    pub fn new(call: impl Into<String>) -> Self {
        Self { call: call.into() }
    }
}

impl SubstrateProposalHandler for FungibleProposalHandler {
    fn build(&self, message: &TransferMessage) -> Result<Proposal, Error> {
        let Payload::Fungible { amount, recipient } = &message.payload else {
            return Err(Error::Chain(format!(
                "{} cannot execute a {} transfer",
                self.call,
                message.transfer_type()
            )));
        };

        let mut data = uint256(amount)?.to_le_bytes::<32>().to_vec();
        data.extend_from_slice(recipient);

        Ok(Proposal {
            source: message.source,
            deposit_nonce: message.deposit_nonce,
            resource_id: message.resource_id,
            handler: self.call.clone(),
            data,
        })
    }
}

pub struct SubstrateWriter {
    client: Arc<SubstrateClient>,
    handlers: HandlerTable<TransferType, Arc<dyn SubstrateProposalHandler>>,
}

impl SubstrateWriter {
    pub fn new(
        client: Arc<SubstrateClient>,
        handlers: HandlerTable<TransferType, Arc<dyn SubstrateProposalHandler>>,
    ) -> Self {
        Self { client, handlers }
    }
}

#[async_trait]
impl ProposalWriter for SubstrateWriter {
    async fn write(&self, message: &TransferMessage) -> Result<(), Error> {
        let kind = message.transfer_type();
        let handler = self.handlers.get(&kind).ok_or_else(|| {
            Error::Chain(format!(
                "No proposal handler registered for {} on chain {}",
                kind,
                self.client.chain_id()
            ))
        })?;

        let proposal = handler.build(message)?;
        let tx = self.client.acknowledge(&proposal).await?;
        info!(
            "Acknowledged proposal {} from {} on {} in {}",
            proposal.deposit_nonce,
            proposal.source,
            self.client.chain_id(),
            tx
        );
        Ok(())
    }
}
