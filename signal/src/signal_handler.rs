use crate::context::Context;
use log::{info, warn};
use std::process;
#[cfg(windows)]
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tokio::sync::broadcast::Sender;

#[derive(Clone)]
pub struct SignalHandler {
    context: Context,
    reload_tx: Sender<()>,
}

impl SignalHandler {
    pub fn new() -> SignalHandler {
        let (reload_tx, _) = broadcast::channel(10);
        SignalHandler { context: Context::new(), reload_tx }
    }

    /// Root context, cancelled on SIGINT/SIGTERM.
    pub fn context(&self) -> Context {
        self.context.clone()
    }

    pub fn subscribe_reload(&self) -> broadcast::Receiver<()> {
        self.reload_tx.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        self.context.is_cancelled()
    }

    pub fn spawn(self) -> Self {
        let h = self.clone();
        tokio::spawn(async move {
            h.run().await;
        });
        self
    }

    async fn run(&self) {
        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate()).expect("Failed to set up SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("Failed to set up SIGINT handler");
            let mut sighup = signal(SignalKind::hangup()).expect("Failed to set up SIGHUP handler");
            loop {
                tokio::select! {
                    _ = sigint.recv() => {
                        self.handle_signal("SIGINT");
                    },
                    _ = sigterm.recv() => {
                        self.handle_signal("SIGTERM");
                    },
                    _ = sighup.recv() => {
                        self.handle_reload();
                    },
                }
            }
        }
        #[cfg(windows)]
        {
            loop {
                tokio::select! {
                    _ = ctrl_c() => {
                        self.handle_signal("Ctrl+C");
                    },
                }
            }
        }
    }

    fn handle_signal(&self, signal: &str) {
        if self.context.is_cancelled() {
            warn!("{} received, terminating...", signal);
            process::exit(1);
        }
        warn!("{} received, stopping... (repeat for forced close)", signal);
        self.context.cancel();
    }

    fn handle_reload(&self) {
        info!("SIGHUP received, notifying subscribers");
        let _ = self.reload_tx.send(());
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
