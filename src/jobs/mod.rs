/// Background jobs
use crate::oauth::TokenStore;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// Background sweeper for expired OAuth2 token rows
///
/// Lives independently of any request; only `close` stops it.
pub struct TokenGc {
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TokenGc {
    /// Spawn the sweep loop, or return `None` when `every` is zero
    pub fn start(store: TokenStore, every: Duration) -> Option<Self> {
        if every.is_zero() {
            info!("Token garbage collection disabled");
            return None;
        }

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(Self::run(store, every, rx));
        info!(interval_secs = every.as_secs(), "Token garbage collection started");

        Some(Self {
            shutdown: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
        })
    }

    async fn run(store: TokenStore, every: Duration, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; sweep on the next one
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    match store.sweep_expired().await {
                        Ok(0) => {}
                        Ok(count) => info!("Swept {} expired OAuth2 tokens", count),
                        Err(e) => error!("Failed to sweep expired OAuth2 tokens: {}", e),
                    }
                }
            }
        }

        info!("Token garbage collection stopped");
    }

    /// Stop the loop; later calls do nothing
    pub fn close(&self) {
        let sender = self
            .shutdown
            .lock()
            .map(|mut guard| guard.take())
            .unwrap_or(None);
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// Close and wait for the loop to exit
    pub async fn shutdown(&self) {
        self.close();
        let task = self.task.lock().map(|mut guard| guard.take()).unwrap_or(None);
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for TokenGc {
    fn drop(&mut self) {
        self.close();
    }
}
