// Signal handling and the shutdown token shared with the ingestion loop

use crate::error::{PciError, Result};
use tokio::signal::unix::{signal, Signal as TokioSignal, SignalKind};
use tokio::sync::watch;

/// Operator request to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Terminate,
    Interrupt,
    Hangup,
}

impl ShutdownSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownSignal::Terminate => "terminate",
            ShutdownSignal::Interrupt => "interrupt",
            ShutdownSignal::Hangup => "hangup",
        }
    }
}

/// Signal handler that manages multiple Unix signals
pub struct SignalHandler {
    sigterm: TokioSignal,
    sigint: TokioSignal,
    sighup: TokioSignal,
}

impl SignalHandler {
    /// Sets up handlers for SIGTERM, SIGINT and SIGHUP
    pub fn new() -> Result<Self> {
        let sigterm = signal(SignalKind::terminate()).map_err(|e| PciError::Io {
            source: e,
            context: "Failed to setup SIGTERM handler".to_string(),
        })?;
        let sigint = signal(SignalKind::interrupt()).map_err(|e| PciError::Io {
            source: e,
            context: "Failed to setup SIGINT handler".to_string(),
        })?;
        let sighup = signal(SignalKind::hangup()).map_err(|e| PciError::Io {
            source: e,
            context: "Failed to setup SIGHUP handler".to_string(),
        })?;

        Ok(Self {
            sigterm,
            sigint,
            sighup,
        })
    }

    /// Wait for any signal to be received
    pub async fn wait(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                ShutdownSignal::Terminate
            }
            _ = self.sigint.recv() => {
                tracing::info!("Received SIGINT");
                ShutdownSignal::Interrupt
            }
            _ = self.sighup.recv() => {
                tracing::info!("Received SIGHUP");
                ShutdownSignal::Hangup
            }
        }
    }
}

/// Cloneable cancellation flag observed by the ingestion loop
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Request shutdown. Repeated calls are harmless.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in self, so the channel cannot close under us
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Exit code when a repeated signal cuts the shutdown short (128 + SIGINT)
pub const FORCED_EXIT_CODE: i32 = 130;

/// What a received signal asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Stop capturing and run the normal shutdown
    Shutdown,
    /// Shutdown is already under way; leave immediately
    ForceExit,
}

impl SignalAction {
    pub fn for_token(token: &ShutdownToken) -> Self {
        if token.is_triggered() {
            SignalAction::ForceExit
        } else {
            SignalAction::Shutdown
        }
    }
}

/// Install the signal handlers. The first signal triggers `token`; a signal
/// arriving once shutdown is under way exits the process with
/// [`FORCED_EXIT_CODE`]. The task runs until aborted.
pub fn spawn_signal_listener(token: ShutdownToken) -> Result<tokio::task::JoinHandle<()>> {
    let mut handler = SignalHandler::new()?;

    Ok(tokio::spawn(async move {
        loop {
            let sig = handler.wait().await;
            match SignalAction::for_token(&token) {
                SignalAction::Shutdown => {
                    tracing::info!(
                        "Stopping capture on {} signal, send it again to exit immediately",
                        sig.as_str()
                    );
                    token.trigger();
                }
                SignalAction::ForceExit => {
                    tracing::error!(
                        "Received {} signal during shutdown, exiting now",
                        sig.as_str()
                    );
                    std::process::exit(FORCED_EXIT_CODE);
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_token_starts_clear() {
        let token = ShutdownToken::new();
        assert!(!token.is_triggered());

        let pending = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_trigger_visible_to_clones() {
        let token = ShutdownToken::new();
        let clone = token.clone();

        let waiter = tokio::spawn(async move { clone.cancelled().await });
        token.trigger();
        token.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_triggered());
    }

    #[tokio::test]
    async fn test_cancelled_after_trigger_returns_immediately() {
        let token = ShutdownToken::new();
        token.trigger();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .unwrap();
    }

    #[test]
    fn test_second_signal_forces_exit() {
        let token = ShutdownToken::new();
        assert_eq!(SignalAction::for_token(&token), SignalAction::Shutdown);

        token.trigger();
        assert_eq!(SignalAction::for_token(&token), SignalAction::ForceExit);
        assert_eq!(SignalAction::for_token(&token.clone()), SignalAction::ForceExit);
    }

    #[tokio::test]
    async fn test_listener_keeps_watching_during_shutdown() {
        let token = ShutdownToken::new();
        let handle = spawn_signal_listener(token.clone()).unwrap();
        token.trigger();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        handle.abort();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(ShutdownSignal::Interrupt.as_str(), "interrupt");
        assert_eq!(ShutdownSignal::Terminate.as_str(), "terminate");
        assert_eq!(ShutdownSignal::Hangup.as_str(), "hangup");
    }
}
