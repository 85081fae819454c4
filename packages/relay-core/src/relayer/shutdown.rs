use std::fmt;
use std::future::Future;
use log::{error, info};
use tokio::sync::mpsc;
use crate::{relayer::StopSignal, Error};

/// Process signals treated as a graceful stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
    Hangup,
    Quit,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminationSignal::Interrupt => "SIGINT",
            TerminationSignal::Terminate => "SIGTERM",
            TerminationSignal::Hangup => "SIGHUP",
            TerminationSignal::Quit => "SIGQUIT",
        };
        f.write_str(name)
    }
}

/// Handlers for the termination signals, installed up front so a signal
/// arriving during startup is not lost.
pub struct TerminationSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
    #[cfg(unix)]
    quit: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    #[cfg(unix)]
    pub fn install() -> Result<Self, Error> {
        use tokio::signal::unix::{signal, SignalKind};

        let install = |kind: SignalKind| {
            signal(kind).map_err(|e| Error::System(format!("Failed to install signal handler: {}", e)))
        };

        Ok(Self {
            interrupt: install(SignalKind::interrupt())?,
            terminate: install(SignalKind::terminate())?,
            hangup: install(SignalKind::hangup())?,
            quit: install(SignalKind::quit())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> Result<Self, Error> {
        Ok(Self {})
    }

    #[cfg(unix)]
    pub async fn recv(mut self) -> TerminationSignal {
        tokio::select! {
            _ = self.interrupt.recv() => TerminationSignal::Interrupt,
            _ = self.terminate.recv() => TerminationSignal::Terminate,
            _ = self.hangup.recv() => TerminationSignal::Hangup,
            _ = self.quit.recv() => TerminationSignal::Quit,
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(self) -> TerminationSignal {
        let _ = tokio::signal::ctrl_c().await;
        TerminationSignal::Interrupt
    }
}

/// Waits once for whichever comes first: a fatal relay error or a
/// termination signal.
///
/// On an error the stop signal is closed and the error returned. On a signal
/// the call returns `Ok(())` and leaves closing stop to the caller.
pub async fn wait_for_shutdown<S>(
    errors: &mut mpsc::Receiver<Error>,
    stop: &StopSignal,
    signal: S,
) -> Result<(), Error>
where
    S: Future<Output = TerminationSignal>,
{
    tokio::select! {
        Some(err) = errors.recv() => {
            error!("Failed to listen and serve: {}", err);
            stop.close();
            Err(err)
        }
        sig = signal => {
            info!("Terminating, got [{}] signal", sig);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relayer::ErrorSink;
    use std::future;
    use std::time::Duration;

    #[tokio::test]
    async fn test_error_closes_stop() {
        let stop = StopSignal::new();
        let (sink, mut errors) = ErrorSink::channel();
        sink.report(Error::Chain("adapter 1 failed".to_string()));

        let result = wait_for_shutdown(&mut errors, &stop, future::pending()).await;
        assert!(matches!(result, Err(Error::Chain(msg)) if msg == "adapter 1 failed"));
        assert!(stop.is_closed());
    }

    #[tokio::test]
    async fn test_signal_returns_success() {
        let stop = StopSignal::new();
        let (_sink, mut errors) = ErrorSink::channel();

        let result = wait_for_shutdown(&mut errors, &stop, async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            TerminationSignal::Terminate
        })
        .await;
        assert!(result.is_ok());
        assert!(!stop.is_closed());
    }

    #[tokio::test]
    async fn test_closed_error_channel_still_waits_for_signal() {
        let stop = StopSignal::new();
        let (sink, mut errors) = ErrorSink::channel();
        drop(sink);

        let result =
            wait_for_shutdown(&mut errors, &stop, future::ready(TerminationSignal::Hangup)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_error_and_signal_race_resolves_once() {
        for _ in 0..32 {
            let stop = StopSignal::new();
            let (sink, mut errors) = ErrorSink::channel();
            sink.report(Error::Network("boom".to_string()));

            let result =
                wait_for_shutdown(&mut errors, &stop, future::ready(TerminationSignal::Quit)).await;
            match result {
                Err(_) => {
                    assert!(stop.is_closed());
                    assert!(!stop.close());
                }
                Ok(()) => {
                    assert!(!stop.is_closed());
                    assert!(errors.try_recv().is_ok());
                }
            }
        }
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(TerminationSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(TerminationSignal::Quit.to_string(), "SIGQUIT");
    }
}
