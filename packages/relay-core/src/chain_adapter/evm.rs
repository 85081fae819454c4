use alloy_primitives::{aliases::U72, keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall, SolEvent};
use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use crate::{
    chain_adapter::{
        rpc::{parse_quantity, to_quantity, JsonRpcClient},
        uint256, EventBatch, EventListener, HandlerTable, ProposalWriter,
    },
    config::{ChainConfig, RelayerConfig},
    keystore::Keypair,
    types::{ChainId, Payload, Proposal, ResourceId, TransferMessage},
    Error,
};

const DEFAULT_GAS_LIMIT: u64 = 6721975;
const DEFAULT_GAS_PRICE: u64 = 20000000000;
const DEFAULT_BLOCK_CONFIRMATIONS: u64 = 10;

// Bridge and ERC20 handler contract surface used by the relayer.
sol! {
    event Deposit(uint8 indexed destinationChainID, bytes32 indexed resourceID, uint64 indexed depositNonce);

    struct BridgeProposal {
        bytes32 _resourceID;
        bytes32 _dataHash;
        address[] _yesVotes;
        address[] _noVotes;
        uint8 _status;
        uint256 _proposedBlock;
    }

    struct DepositRecord {
        address _tokenAddress;
        uint8 _lenDestinationRecipientAddress;
        uint8 _destinationChainID;
        bytes32 _resourceID;
        bytes _destinationRecipientAddress;
        address _depositer;
        uint256 _amount;
    }

    function _resourceIDToHandlerAddress(bytes32 resourceID) external view returns (address);
    function getProposal(uint8 originChainID, uint64 depositNonce, bytes32 dataHash) external view returns (BridgeProposal memory);
    function _hasVotedOnProposal(uint72 nonceAndID, bytes32 dataHash, address relayer) external view returns (bool);
    function voteProposal(uint8 chainID, uint64 depositNonce, bytes32 resourceID, bytes32 dataHash) external;
    function executeProposal(uint8 chainID, uint64 depositNonce, bytes data, bytes32 resourceID) external;
    function getDepositRecord(uint64 depositNonce, uint8 destId) external view returns (DepositRecord memory);
}

fn abi_error(e: alloy_sol_types::Error) -> Error {
    Error::Serialization(format!("ABI decoding failed: {}", e))
}

fn parse_address(raw: &str) -> Result<Address, Error> {
    Address::from_str(raw).map_err(|e| Error::Config(format!("Invalid address {}: {}", raw, e)))
}

/// Options read from a chain config's `opts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmOptions {
    pub bridge: Address,
    pub erc20_handler: Address,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub block_confirmations: u64,
}

impl EvmOptions {
    pub fn from_config(config: &ChainConfig) -> Result<Self, Error> {
        Ok(Self {
            bridge: parse_address(config.required_opt("bridge")?)?,
            erc20_handler: parse_address(config.required_opt("erc20Handler")?)?,
            gas_limit: config.parse_opt("gasLimit", DEFAULT_GAS_LIMIT)?,
            gas_price: config.parse_opt("gasPrice", DEFAULT_GAS_PRICE)?,
            block_confirmations: config.parse_opt("blockConfirmations", DEFAULT_BLOCK_CONFIRMATIONS)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawLog {
    topics: Vec<B256>,
    #[serde(default)]
    data: Bytes,
}

/// A `Deposit` event emitted by the bridge contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositLog {
    pub destination: ChainId,
    pub resource_id: ResourceId,
    pub deposit_nonce: u64,
}

impl DepositLog {
    fn decode(log: &RawLog) -> Result<Self, Error> {
        let event = Deposit::decode_raw_log(log.topics.iter().copied(), &log.data, true).map_err(abi_error)?;
        Ok(Self {
            destination: event.destinationChainID,
            resource_id: ResourceId(event.resourceID.0),
            deposit_nonce: event.depositNonce,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
    Inactive,
    Active,
    Passed,
    Executed,
    Cancelled,
}

impl TryFrom<u8> for ProposalStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProposalStatus::Inactive),
            1 => Ok(ProposalStatus::Active),
            2 => Ok(ProposalStatus::Passed),
            3 => Ok(ProposalStatus::Executed),
            4 => Ok(ProposalStatus::Cancelled),
            other => Err(Error::Serialization(format!("Unknown proposal status {}", other))),
        }
    }
}

/// JSON-RPC access to one EVM chain and its bridge contract.
pub struct EvmClient {
    rpc: JsonRpcClient,
    chain_id: ChainId,
    from: Address,
    options: EvmOptions,
}

impl EvmClient {
    /// Builds the client and checks the endpoint answers.
    pub async fn connect(
        config: &ChainConfig,
        sender: Keypair,
        relayer: &RelayerConfig,
    ) -> Result<Self, Error> {
        let options = EvmOptions::from_config(config)?;
        let from = Address::from_str(&sender.address).map_err(|e| {
            Error::Keystore(format!("{} is not an ethereum account: {}", sender.name, e))
        })?;
        let rpc = JsonRpcClient::new(
            &config.endpoint,
            relayer.max_retries,
            Duration::from_secs(relayer.retry_delay),
        )?;

        let network: String = rpc.call("eth_chainId", json!([])).await?;
        info!(
            "Connected to {} at {} (network {}), relaying as {}",
            config.name, config.endpoint, network, from
        );

        Ok(Self { rpc, chain_id: config.id, from, options })
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn options(&self) -> &EvmOptions {
        &self.options
    }

    pub async fn latest_block(&self) -> Result<u64, Error> {
        let raw: String = self.rpc.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw)
    }

    pub async fn deposits(&self, block: u64) -> Result<Vec<DepositLog>, Error> {
        let logs: Vec<RawLog> = self
            .rpc
            .call(
                "eth_getLogs",
                json!([{
                    "fromBlock": to_quantity(block),
                    "toBlock": to_quantity(block),
                    "address": self.options.bridge,
                    "topics": [Deposit::SIGNATURE_HASH],
                }]),
            )
            .await?;
        logs.iter().map(DepositLog::decode).collect()
    }

    /// Read-only call, decoded with the function's return type.
    pub async fn call<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return, Error> {
        let raw: Bytes = self
            .rpc
            .call(
                "eth_call",
                json!([{ "to": to, "data": Bytes::from(call.abi_encode()) }, "latest"]),
            )
            .await?;
        C::abi_decode_returns(&raw, true).map_err(abi_error)
    }

    /// Sends a bridge transaction from the relayer account; the node signs it.
    pub async fn send_transaction<C: SolCall>(&self, call: C) -> Result<String, Error> {
        self.rpc
            .call(
                "eth_sendTransaction",
                json!([{
                    "from": self.from,
                    "to": self.options.bridge,
                    "data": Bytes::from(call.abi_encode()),
                    "gas": to_quantity(self.options.gas_limit),
                    "gasPrice": to_quantity(self.options.gas_price),
                }]),
            )
            .await
    }

    /// Address of the handler contract the bridge assigned to `resource_id`.
    pub async fn resource_handler(&self, resource_id: &ResourceId) -> Result<Address, Error> {
        let call = _resourceIDToHandlerAddressCall { resourceID: B256::from(resource_id.0) };
        Ok(self.call(self.options.bridge, call).await?._0)
    }

    pub async fn proposal_status(
        &self,
        source: ChainId,
        deposit_nonce: u64,
        data_hash: B256,
    ) -> Result<ProposalStatus, Error> {
        let call = getProposalCall { originChainID: source, depositNonce: deposit_nonce, dataHash: data_hash };
        let proposal = self.call(self.options.bridge, call).await?._0;
        ProposalStatus::try_from(proposal._status)
    }

    pub async fn has_voted(&self, source: ChainId, deposit_nonce: u64, data_hash: B256) -> Result<bool, Error> {
        let nonce_and_id = (u128::from(deposit_nonce) << 8) | u128::from(source);
        let call = _hasVotedOnProposalCall {
            nonceAndID: U72::from(nonce_and_id),
            dataHash: data_hash,
            relayer: self.from,
        };
        Ok(self.call(self.options.bridge, call).await?._0)
    }
}

/// Turns a deposit into a transfer message; registered per handler contract.
#[async_trait]
pub trait DepositHandler: Send + Sync {
    async fn handle(&self, source: ChainId, deposit: &DepositLog) -> Result<TransferMessage, Error>;
}

/// Reads the deposit record kept by the ERC20 handler contract.
pub struct Erc20DepositHandler {
    client: Arc<EvmClient>,
    handler: Address,
}

impl Erc20DepositHandler {
    pub fn new(client: Arc<EvmClient>, handler: Address) -> Self {
        Self { client, handler }
    }
}

#[async_trait]
impl DepositHandler for Erc20DepositHandler {
    async fn handle(&self, source: ChainId, deposit: &DepositLog) -> Result<TransferMessage, Error> {
        let call = getDepositRecordCall { depositNonce: deposit.deposit_nonce, destId: deposit.destination };
        let record = self.client.call(self.handler, call).await?._0;

        Ok(TransferMessage {
            source,
            destination: deposit.destination,
            deposit_nonce: deposit.deposit_nonce,
            resource_id: deposit.resource_id,
            payload: erc20_payload(record),
        })
    }
}

fn erc20_payload(record: DepositRecord) -> Payload {
    Payload::Fungible {
        amount: record._amount.to_be_bytes_trimmed_vec(),
        recipient: record._destinationRecipientAddress.to_vec(),
    }
}

pub struct EvmListener {
    client: Arc<EvmClient>,
    handlers: HandlerTable<Address, Arc<dyn DepositHandler>>,
}

impl EvmListener {
    /// `handlers` is keyed by handler contract address.
    pub fn new(client: Arc<EvmClient>, handlers: HandlerTable<Address, Arc<dyn DepositHandler>>) -> Self {
        Self { client, handlers }
    }
}

#[async_trait]
impl EventListener for EvmListener {
    async fn latest_block(&self) -> Result<u64, Error> {
        self.client.latest_block().await
    }

    async fn poll(&self, from: u64) -> Result<Option<EventBatch>, Error> {
        let head = self.client.latest_block().await?;
        if head < from.saturating_add(self.client.options().block_confirmations) {
            return Ok(None);
        }

        let mut messages = Vec::new();
        for deposit in self.client.deposits(from).await? {
            let handler_address = self.client.resource_handler(&deposit.resource_id).await?;
            let Some(handler) = self.handlers.get(&handler_address) else {
                warn!(
                    "No deposit handler registered for {} (resource {}), skipping deposit {}",
                    handler_address, deposit.resource_id, deposit.deposit_nonce
                );
                continue;
            };
            messages.push(handler.handle(self.client.chain_id(), &deposit).await?);
        }

        Ok(Some(EventBatch { messages, next_block: from + 1 }))
    }
}

/// Encodes a transfer into the call data a handler contract executes.
pub trait ProposalHandler: Send + Sync {
    fn build(&self, message: &TransferMessage, handler: Address) -> Result<Proposal, Error>;
}

/// `amount ++ len(recipient) ++ recipient`, as the ERC20 handler expects.
pub struct Erc20ProposalHandler;

impl ProposalHandler for Erc20ProposalHandler {
    fn build(&self, message: &TransferMessage, handler: Address) -> Result<Proposal, Error> {
        let Payload::Fungible { amount, recipient } = &message.payload else {
            return Err(Error::Chain(format!(
                "ERC20 handler cannot execute a {} transfer",
                message.transfer_type()
            )));
        };

        let mut data = Vec::with_capacity(64 + recipient.len());
        data.extend_from_slice(&uint256(amount)?.to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(recipient.len()).to_be_bytes::<32>());
        data.extend_from_slice(recipient);

        Ok(Proposal {
            source: message.source,
            deposit_nonce: message.deposit_nonce,
            resource_id: message.resource_id,
            handler: handler.to_string(),
            data,
        })
    }
}

pub struct EvmWriter {
    client: Arc<EvmClient>,
    handlers: HandlerTable<Address, Arc<dyn ProposalHandler>>,
}

impl EvmWriter {
    pub fn new(client: Arc<EvmClient>, handlers: HandlerTable<Address, Arc<dyn ProposalHandler>>) -> Self {
        Self { client, handlers }
    }

    /// `keccak256(handler ++ data)`, the hash the bridge stores proposals under.
    fn data_hash(handler: Address, data: &[u8]) -> B256 {
        let mut preimage = handler.to_vec();
        preimage.extend_from_slice(data);
        keccak256(preimage)
    }

    async fn vote(&self, proposal: &Proposal, data_hash: B256) -> Result<(), Error> {
        let tx = self
            .client
            .send_transaction(voteProposalCall {
                chainID: proposal.source,
                depositNonce: proposal.deposit_nonce,
                resourceID: B256::from(proposal.resource_id.0),
                dataHash: data_hash,
            })
            .await?;
        info!("Voted on proposal {} from {} in {}", proposal.deposit_nonce, proposal.source, tx);
        Ok(())
    }

    async fn execute(&self, proposal: &Proposal) -> Result<(), Error> {
        let tx = self
            .client
            .send_transaction(executeProposalCall {
                chainID: proposal.source,
                depositNonce: proposal.deposit_nonce,
                data: Bytes::from(proposal.data.clone()),
                resourceID: B256::from(proposal.resource_id.0),
            })
            .await?;
        info!(
            "Executed proposal {} from {} on {} in {}",
            proposal.deposit_nonce, proposal.source, self.client.chain_id(), tx
        );
        Ok(())
    }
}

#[async_trait]
impl ProposalWriter for EvmWriter {
    async fn write(&self, message: &TransferMessage) -> Result<(), Error> {
        let handler_address = self.client.resource_handler(&message.resource_id).await?;
        let handler = self.handlers.get(&handler_address).ok_or_else(|| {
            Error::Chain(format!(
                "No proposal handler registered for {} on chain {}",
                handler_address,
                self.client.chain_id()
            ))
        })?;

        let proposal = handler.build(message, handler_address)?;
        let data_hash = Self::data_hash(handler_address, &proposal.data);
        let status = self
            .client
            .proposal_status(proposal.source, proposal.deposit_nonce, data_hash)
            .await?;

        match status {
            ProposalStatus::Executed | ProposalStatus::Cancelled => {
                info!(
                    "Proposal {} from {} already {:?}, skipping",
                    proposal.deposit_nonce, proposal.source, status
                );
                Ok(())
            }
            ProposalStatus::Passed => self.execute(&proposal).await,
            ProposalStatus::Inactive | ProposalStatus::Active => {
                if !self
                    .client
                    .has_voted(proposal.source, proposal.deposit_nonce, data_hash)
                    .await?
                {
                    self.vote(&proposal, data_hash).await?;
                }

                let status = self
                    .client
                    .proposal_status(proposal.source, proposal.deposit_nonce, data_hash)
                    .await?;
                if status == ProposalStatus::Passed {
                    self.execute(&proposal).await?;
                }
                Ok(())
            }
        }
    }
}
