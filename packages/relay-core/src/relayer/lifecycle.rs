use std::sync::Arc;
use log::warn;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use crate::Error;

/// One-shot broadcast used to stop every relay task.
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Closes the signal. Returns `true` only for the call that actually
    /// closed it; later calls are no-ops.
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is closed, immediately if it already is.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Many-to-one sink for fatal relay errors. Only the first error is kept;
/// the entry point shuts down on it, so later ones are logged and dropped.
#[derive(Clone, Debug)]
pub struct ErrorSink {
    tx: mpsc::Sender<Error>,
}

impl ErrorSink {
    pub fn channel() -> (Self, mpsc::Receiver<Error>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    pub fn report(&self, err: Error) {
        match self.tx.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(err)) | Err(TrySendError::Closed(err)) => {
                warn!("Dropping error while shutdown is in progress: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_close_is_idempotent() {
        let stop = StopSignal::new();
        assert!(!stop.is_closed());
        assert!(stop.close());
        assert!(!stop.close());
        assert!(!stop.clone().close());
        assert!(stop.is_closed());
    }

    #[test]
    fn test_closed_wakes_waiters() {
        let stop = StopSignal::new();
        let mut waiter = task::spawn(stop.closed());
        assert_pending!(waiter.poll());

        stop.close();
        assert!(waiter.is_woken());
        assert_ready!(waiter.poll());

        let mut late = task::spawn(stop.closed());
        assert_ready!(late.poll());
    }

    #[test]
    fn test_subscribers_see_one_transition() {
        let stop = StopSignal::new();
        let mut rx = stop.subscribe();
        stop.close();
        stop.close();

        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_error_sink_keeps_first_error() {
        let (sink, mut rx) = ErrorSink::channel();
        sink.report(Error::Chain("first".to_string()));
        sink.clone().report(Error::Chain("second".to_string()));

        let err = rx.recv().await.unwrap();
        assert_eq!(err.to_string(), "Chain error: first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_error_sink_after_receiver_dropped() {
        let (sink, rx) = ErrorSink::channel();
        drop(rx);
        sink.report(Error::Network("late".to_string()));
    }
}
