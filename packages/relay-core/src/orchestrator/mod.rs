//! Turns chain configurations into chain adapters.
//!
//! Each configured `type` tag is looked up in an [`AdapterRegistry`]. The
//! registered constructor builds the chain client, registers the listener and
//! writer handlers, and assembles the adapter. Registering a constructor under
//! a new tag is all it takes to support another chain family.

use async_trait::async_trait;
use log::info;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use crate::{
    chain_adapter::ChainAdapter,
    config::{ChainConfig, RelayerConfig},
    keystore::{KeyProvider, Keypair},
    store::PersistentStore,
    types::ChainFamily,
    Error,
};

mod constructors;

pub use constructors::{EthereumConstructor, SubstrateConstructor};

/// Everything a constructor gets to build one adapter.
pub struct ConstructionContext<'a> {
    pub config: &'a ChainConfig,
    pub identity: Keypair,
    pub store: Arc<dyn PersistentStore>,
    pub relayer: &'a RelayerConfig,
}

#[async_trait]
pub trait AdapterConstructor: Send + Sync {
    /// Family whose key format the identity is resolved in.
    fn family(&self) -> ChainFamily;

    async fn construct(&self, ctx: ConstructionContext<'_>) -> Result<Arc<dyn ChainAdapter>, Error>;
}

/// Dispatch table from chain type tag to adapter constructor.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    constructors: HashMap<String, Arc<dyn AdapterConstructor>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `ethereum` and `substrate` constructors.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(ChainFamily::Ethereum.as_str(), Arc::new(EthereumConstructor))
            .register(ChainFamily::Substrate.as_str(), Arc::new(SubstrateConstructor))
    }

    pub fn register(mut self, chain_type: &str, constructor: Arc<dyn AdapterConstructor>) -> Self {
        self.constructors.insert(chain_type.to_string(), constructor);
        self
    }

    pub fn resolve(&self, chain_type: &str) -> Result<Arc<dyn AdapterConstructor>, Error> {
        self.constructors.get(chain_type).cloned().ok_or_else(|| {
            Error::Config(format!(
                "Unrecognized chain type: {} (supported: {})",
                chain_type,
                self.chain_types().join(", ")
            ))
        })
    }

    pub fn chain_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

pub struct Orchestrator {
    registry: AdapterRegistry,
    keys: Arc<dyn KeyProvider>,
    store: Arc<dyn PersistentStore>,
    relayer: RelayerConfig,
}

impl Orchestrator {
    pub fn new(
        registry: AdapterRegistry,
        keys: Arc<dyn KeyProvider>,
        store: Arc<dyn PersistentStore>,
        relayer: RelayerConfig,
    ) -> Self {
        Self { registry, keys, store, relayer }
    }

    /// Builds one adapter per config, in the same order.
    ///
    /// Every chain type is resolved before anything is constructed, so an
    /// unknown type fails without touching the network. Any later failure
    /// aborts the build; a partial set is never returned.
    pub async fn build(&self, chains: &[ChainConfig]) -> Result<Vec<Arc<dyn ChainAdapter>>, Error> {
        let mut seen = HashSet::new();
        let mut plan = Vec::with_capacity(chains.len());
        for config in chains {
            if !seen.insert(config.id) {
                return Err(Error::Config(format!("Duplicate chain id: {}", config.id)));
            }
            plan.push((config, self.registry.resolve(&config.chain_type)?));
        }

        let mut adapters = Vec::with_capacity(plan.len());
        for (config, constructor) in plan {
            let identity = self.keys.resolve(&config.from, constructor.family())?;
            let adapter = constructor
                .construct(ConstructionContext {
                    config,
                    identity,
                    store: self.store.clone(),
                    relayer: &self.relayer,
                })
                .await?;
            info!("Initialized {} chain {} ({})", config.chain_type, config.name, config.id);
            adapters.push(adapter);
        }

        Ok(adapters)
    }
}
