pub mod config;
pub mod types;
pub mod chain_adapter;
pub mod relayer;
pub mod keystore;
pub mod store;
pub mod orchestrator;
pub mod app;

pub use config::{ChainConfig, Config, RelayerConfig};
pub use types::{ChainFamily, ChainId, Payload, Proposal, ResourceId, TransferMessage, TransferType};
pub use orchestrator::{AdapterRegistry, Orchestrator};
pub use relayer::{ErrorSink, Relayer, StopSignal};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Keystore error: {0}")]
    Keystore(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("System error: {0}")]
    System(String),
}
