//! Wires the orchestrator, the relayer and process signals together.

use log::{error, info};
use std::future::Future;
use std::sync::Arc;
use crate::{
    config::{ChainConfig, Config},
    keystore::TestKeyring,
    orchestrator::{AdapterRegistry, Orchestrator},
    relayer::{wait_for_shutdown, ErrorSink, Relayer, StopSignal, TerminationSignal, TerminationSignals},
    store::RocksDbStore,
    Error,
};

/// Runs the relayer for `config` until a fatal error or a termination signal.
pub async fn run(config: Config) -> Result<(), Error> {
    let signals = TerminationSignals::install()?;
    let store = Arc::new(RocksDbStore::open(&config.relayer.blockstore_path)?);
    let orchestrator = Orchestrator::new(
        AdapterRegistry::with_defaults(),
        Arc::new(TestKeyring),
        store,
        config.relayer.clone(),
    );

    serve(&orchestrator, &config.chains, StopSignal::new(), signals.recv()).await
}

/// Builds the adapters and relays until the first fatal error or until
/// `signal` resolves.
///
/// `stop` is closed on either path, and in-flight polling and writes are
/// drained before returning. The first fatal error is returned.
pub async fn serve<S>(
    orchestrator: &Orchestrator,
    chains: &[ChainConfig],
    stop: StopSignal,
    signal: S,
) -> Result<(), Error>
where
    S: Future<Output = TerminationSignal>,
{
    let adapters = orchestrator.build(chains).await?;
    let relayer = Arc::new(Relayer::new(adapters));

    let (errors, mut error_rx) = ErrorSink::channel();
    let relaying = tokio::spawn(relayer.start(stop.clone(), errors));

    let outcome = wait_for_shutdown(&mut error_rx, &stop, signal).await;
    stop.close();

    if let Err(e) = relaying.await {
        error!("Relayer task panicked: {}", e);
    }
    info!("Shutdown complete");
    outcome
}
