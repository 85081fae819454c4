use alloy_primitives::Address;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use super::{AdapterConstructor, ConstructionContext};
use crate::{
    chain_adapter::{
        evm::{DepositHandler, Erc20DepositHandler, Erc20ProposalHandler, EvmClient, EvmListener, EvmWriter, ProposalHandler},
        substrate::{
            FungibleProposalHandler, FungibleTransferHandler, GenericTransferHandler, NonFungibleTransferHandler,
            SubstrateClient, SubstrateEventHandler, SubstrateListener, SubstrateProposalHandler, SubstrateWriter,
        },
        ChainAdapter, HandlerRegistry, RelayedChain, StartPolicy,
    },
    types::{ChainFamily, TransferType},
    Error,
};

/// Builds adapters for EVM chains running the bridge contracts. Deposit and
/// proposal handlers are keyed by handler contract address; the ERC20
/// handler from `opts.erc20Handler` is registered on both sides.
pub struct EthereumConstructor;

#[async_trait]
impl AdapterConstructor for EthereumConstructor {
    fn family(&self) -> ChainFamily {
        ChainFamily::Ethereum
    }

    async fn construct(&self, ctx: ConstructionContext<'_>) -> Result<Arc<dyn ChainAdapter>, Error> {
        let start = StartPolicy::from_config(ctx.config)?;
        let client = Arc::new(EvmClient::connect(ctx.config, ctx.identity, ctx.relayer).await?);
        let erc20 = client.options().erc20_handler;

        let deposits = HandlerRegistry::<Address, Arc<dyn DepositHandler>>::new()
            .register(erc20, Arc::new(Erc20DepositHandler::new(client.clone(), erc20)))
            .build();
        let proposals = HandlerRegistry::<Address, Arc<dyn ProposalHandler>>::new()
            .register(erc20, Arc::new(Erc20ProposalHandler))
            .build();

        Ok(Arc::new(RelayedChain::new(
            ctx.config.id,
            ctx.config.name.clone(),
            ChainFamily::Ethereum,
            Box::new(EvmListener::new(client.clone(), deposits)),
            Box::new(EvmWriter::new(client, proposals)),
            ctx.store,
            start,
            Duration::from_secs(ctx.relayer.poll_interval),
        )))
    }
}

/// Builds adapters for substrate chains with the bridge pallet.
pub struct SubstrateConstructor;

#[async_trait]
impl AdapterConstructor for SubstrateConstructor {
    fn family(&self) -> ChainFamily {
        ChainFamily::Substrate
    }

    async fn construct(&self, ctx: ConstructionContext<'_>) -> Result<Arc<dyn ChainAdapter>, Error> {
        let start = StartPolicy::from_config(ctx.config)?;
        let client = Arc::new(SubstrateClient::connect(ctx.config, ctx.identity, ctx.relayer).await?);

        let events = HandlerRegistry::<TransferType, Arc<dyn SubstrateEventHandler>>::new()
            .register(TransferType::Fungible, Arc::new(FungibleTransferHandler))
            .register(TransferType::NonFungible, Arc::new(NonFungibleTransferHandler))
            .register(TransferType::Generic, Arc::new(GenericTransferHandler))
            .build();
        let proposals = HandlerRegistry::<TransferType, Arc<dyn SubstrateProposalHandler>>::new()
            .register(
                TransferType::Fungible,
                Arc::new(FungibleProposalHandler::new(client.options().transfer_call.clone())),
            )
            .build();

        Ok(Arc::new(RelayedChain::new(
            ctx.config.id,
            ctx.config.name.clone(),
            ChainFamily::Substrate,
            Box::new(SubstrateListener::new(client.clone(), events)),
            Box::new(SubstrateWriter::new(client, proposals)),
            ctx.store,
            start,
            Duration::from_secs(ctx.relayer.poll_interval),
        )))
    }
}
