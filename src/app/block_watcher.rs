//! Chain-head poller shared by every `Trigger::NewBlock` stream.
//!
//! The poller runs only while at least one subscription is alive: the first
//! subscriber spawns it and the last one to drop aborts it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::ChainClient;

#[derive(Default)]
struct WatcherState {
    subscribers: usize,
    task: Option<JoinHandle<()>>,
}

pub struct BlockWatcher {
    chain: Arc<dyn ChainClient>,
    poll_interval: Duration,
    head: watch::Sender<u64>,
    shutdown_rx: watch::Receiver<bool>,
    state: Mutex<WatcherState>,
}

impl BlockWatcher {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        poll_interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let (head, _) = watch::channel(0);
        Self {
            chain,
            poll_interval,
            head,
            shutdown_rx,
            state: Mutex::new(WatcherState::default()),
        }
    }

    /// Registers interest in new blocks, starting the poller on the 0 -> 1 transition.
    pub fn subscribe(self: &Arc<Self>) -> BlockSubscription {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.subscribers += 1;
        if state.subscribers == 1 {
            debug!("Starting block watcher");
            state.task = Some(tokio::spawn(Self::run(
                Arc::clone(&self.chain),
                self.poll_interval,
                self.head.clone(),
                self.shutdown_rx.clone(),
            )));
        }
        BlockSubscription {
            rx: self.head.subscribe(),
            watcher: Arc::clone(self),
        }
    }

    /// Number of live subscriptions.
    pub fn subscribers(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).subscribers
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .task
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Latest observed block number, 0 before the first poll.
    pub fn head(&self) -> u64 {
        *self.head.borrow()
    }

    /// Stops the poller regardless of subscribers.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers == 0 {
            if let Some(task) = state.task.take() {
                debug!("Stopping block watcher, no subscribers left");
                task.abort();
            }
        }
    }

    async fn run(
        chain: Arc<dyn ChainClient>,
        poll_interval: Duration,
        head: watch::Sender<u64>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(poll_interval = ?poll_interval, "Block watcher running");
        loop {
            match chain.block_number().await {
                Ok(number) if number > *head.borrow() => {
                    debug!(block = number, "New chain head");
                    head.send_replace(number);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = ?e, "Error polling chain head");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Block watcher shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// A live interest in new blocks; dropping it releases the watcher.
pub struct BlockSubscription {
    rx: watch::Receiver<u64>,
    watcher: Arc<BlockWatcher>,
}

impl BlockSubscription {
    /// Waits for the next head change. Returns `false` once the watcher is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Marks the current head as seen so heads observed during a refresh are dropped.
    pub fn mark_seen(&mut self) {
        self.rx.borrow_and_update();
    }
}

impl Drop for BlockSubscription {
    fn drop(&mut self) {
        self.watcher.release();
    }
}
