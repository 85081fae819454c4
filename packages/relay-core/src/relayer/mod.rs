use std::collections::HashMap;
use std::sync::Arc;
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use crate::{
    chain_adapter::ChainAdapter,
    types::{ChainId, TransferMessage},
    Error,
};

mod lifecycle;
mod shutdown;

pub use lifecycle::{ErrorSink, StopSignal};
pub use shutdown::{wait_for_shutdown, TerminationSignal, TerminationSignals};

const MESSAGE_BUFFER: usize = 64;

/// Forwards transfer messages from every source chain to the writer of
/// their destination chain.
pub struct Relayer {
    chains: Vec<Arc<dyn ChainAdapter>>,
    registry: HashMap<ChainId, Arc<dyn ChainAdapter>>,
}

impl Relayer {
    pub fn new(chains: Vec<Arc<dyn ChainAdapter>>) -> Self {
        let registry = chains
            .iter()
            .map(|chain| (chain.chain_id(), chain.clone()))
            .collect();
        Self { chains, registry }
    }

    /// Runs until `stop` is closed, then routes whatever was already polled
    /// and waits for in-flight polling and writes to finish. Fatal adapter
    /// errors, panics included, go to `errors`.
    pub async fn start(self: Arc<Self>, stop: StopSignal, errors: ErrorSink) {
        info!("Starting relayer with {} chains", self.chains.len());

        let (messages_tx, mut messages_rx) = mpsc::channel(MESSAGE_BUFFER);
        let mut tasks = JoinSet::new();

        for chain in &self.chains {
            let chain = chain.clone();
            let stop = stop.clone();
            let errors = errors.clone();
            let messages = messages_tx.clone();
            tasks.spawn(async move { chain.poll_events(stop, errors, messages).await });
        }
        drop(messages_tx);

        loop {
            tokio::select! {
                _ = stop.closed() => break,
                message = messages_rx.recv() => match message {
                    Some(message) => self.spawn_route(&mut tasks, message, &errors),
                    None => {
                        warn!("All chains stopped polling");
                        break;
                    }
                },
                Some(joined) = tasks.join_next() => reap(joined, &errors),
            }
        }

        // Blocks for these messages are already recorded as polled.
        messages_rx.close();
        while let Some(message) = messages_rx.recv().await {
            self.spawn_route(&mut tasks, message, &errors);
        }
        while let Some(joined) = tasks.join_next().await {
            reap(joined, &errors);
        }
        info!("Relayer stopped");
    }

    fn spawn_route(self: &Arc<Self>, tasks: &mut JoinSet<()>, message: TransferMessage, errors: &ErrorSink) {
        let relayer = self.clone();
        let errors = errors.clone();
        tasks.spawn(async move { relayer.route(message, &errors).await });
    }

    async fn route(&self, message: TransferMessage, errors: &ErrorSink) {
        let Some(destination) = self.registry.get(&message.destination) else {
            error!(
                "No chain registered for destination {}, dropping deposit {} from {}",
                message.destination, message.deposit_nonce, message.source
            );
            return;
        };

        info!(
            "Routing deposit {} from {} to {}",
            message.deposit_nonce, message.source, message.destination
        );
        if let Err(e) = destination.write(message).await {
            errors.report(e);
        }
    }
}

fn reap(joined: Result<(), JoinError>, errors: &ErrorSink) {
    if let Err(e) = joined {
        error!("Relay task failed: {}", e);
        errors.report(Error::Chain(format!("Relay task failed: {}", e)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChainFamily, Payload, ResourceId};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedChain {
        id: ChainId,
        outgoing: Vec<TransferMessage>,
        fail_writes: bool,
        panic_on_poll: bool,
        stop_after_send: bool,
        written: Mutex<Vec<TransferMessage>>,
    }

    impl ScriptedChain {
        fn new(id: ChainId, outgoing: Vec<TransferMessage>) -> Self {
            Self {
                id,
                outgoing,
                fail_writes: false,
                panic_on_poll: false,
                stop_after_send: false,
                written: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChainAdapter for ScriptedChain {
        fn chain_id(&self) -> ChainId {
            self.id
        }

        fn chain_type(&self) -> ChainFamily {
            ChainFamily::Ethereum
        }

        async fn poll_events(
            &self,
            stop: StopSignal,
            _errors: ErrorSink,
            messages: mpsc::Sender<TransferMessage>,
        ) {
            if self.panic_on_poll {
                panic!("chain {} lost its connection", self.id);
            }
            for message in self.outgoing.clone() {
                if messages.send(message).await.is_err() {
                    return;
                }
            }
            if self.stop_after_send {
                stop.close();
            }
            stop.closed().await;
        }

        async fn write(&self, message: TransferMessage) -> Result<(), Error> {
            if self.fail_writes {
                return Err(Error::Chain(format!("write to {} failed", self.id)));
            }
            self.written.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn transfer(source: ChainId, destination: ChainId, nonce: u64) -> TransferMessage {
        TransferMessage {
            source,
            destination,
            deposit_nonce: nonce,
            resource_id: ResourceId::default(),
            payload: Payload::Fungible { amount: vec![10], recipient: vec![0xab; 20] },
        }
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_routes_to_destination_writer() {
        let source = Arc::new(ScriptedChain::new(1, vec![transfer(1, 2, 1), transfer(1, 2, 2)]));
        let destination = Arc::new(ScriptedChain::new(2, vec![]));
        let relayer = Arc::new(Relayer::new(vec![source.clone(), destination.clone()]));

        let stop = StopSignal::new();
        let (sink, mut errors) = ErrorSink::channel();
        let handle = tokio::spawn(relayer.start(stop.clone(), sink));

        wait_until(|| destination.written.lock().unwrap().len() == 2).await;
        assert!(source.written.lock().unwrap().is_empty());

        stop.close();
        handle.await.unwrap();
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_destination_is_dropped() {
        let source = Arc::new(ScriptedChain::new(1, vec![transfer(1, 9, 1), transfer(1, 2, 2)]));
        let destination = Arc::new(ScriptedChain::new(2, vec![]));
        let relayer = Arc::new(Relayer::new(vec![source, destination.clone()]));

        let stop = StopSignal::new();
        let (sink, mut errors) = ErrorSink::channel();
        let handle = tokio::spawn(relayer.start(stop.clone(), sink));

        wait_until(|| destination.written.lock().unwrap().len() == 1).await;
        stop.close();
        handle.await.unwrap();

        assert_eq!(destination.written.lock().unwrap()[0].deposit_nonce, 2);
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_failure_reaches_error_sink() {
        let source = Arc::new(ScriptedChain::new(1, vec![transfer(1, 2, 1)]));
        let mut failing = ScriptedChain::new(2, vec![]);
        failing.fail_writes = true;
        let relayer = Arc::new(Relayer::new(vec![source, Arc::new(failing)]));

        let stop = StopSignal::new();
        let (sink, mut errors) = ErrorSink::channel();
        let handle = tokio::spawn(relayer.start(stop.clone(), sink));

        let err = errors.recv().await.unwrap();
        assert_eq!(err.to_string(), "Chain error: write to 2 failed");

        stop.close();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_start_returns_after_stop() {
        let relayer = Arc::new(Relayer::new(vec![
            Arc::new(ScriptedChain::new(1, vec![])),
            Arc::new(ScriptedChain::new(2, vec![])),
        ]));

        let stop = StopSignal::new();
        let (sink, _errors) = ErrorSink::channel();
        let handle = tokio::spawn(relayer.start(stop.clone(), sink));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        stop.close();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relayer did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_panicking_chain_is_fatal() {
        let mut broken = ScriptedChain::new(1, vec![]);
        broken.panic_on_poll = true;
        let relayer = Arc::new(Relayer::new(vec![Arc::new(broken), Arc::new(ScriptedChain::new(2, vec![]))]));

        let stop = StopSignal::new();
        let (sink, mut errors) = ErrorSink::channel();
        let handle = tokio::spawn(relayer.start(stop.clone(), sink));

        let err = tokio::time::timeout(Duration::from_secs(1), errors.recv())
            .await
            .expect("panic was not reported")
            .unwrap();
        assert!(matches!(err, Error::Chain(ref msg) if msg.starts_with("Relay task failed")));

        stop.close();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_polled_messages_are_routed_after_stop() {
        let outgoing = vec![transfer(1, 2, 1), transfer(1, 2, 2), transfer(1, 2, 3)];
        let mut source = ScriptedChain::new(1, outgoing);
        source.stop_after_send = true;
        let destination = Arc::new(ScriptedChain::new(2, vec![]));
        let relayer = Arc::new(Relayer::new(vec![Arc::new(source), destination.clone()]));

        let (sink, mut errors) = ErrorSink::channel();
        tokio::time::timeout(Duration::from_secs(1), relayer.start(StopSignal::new(), sink))
            .await
            .expect("relayer did not stop");

        let mut nonces: Vec<u64> = destination.written.lock().unwrap().iter().map(|m| m.deposit_nonce).collect();
        nonces.sort_unstable();
        assert_eq!(nonces, vec![1, 2, 3]);
        assert!(errors.try_recv().is_err());
    }
}
