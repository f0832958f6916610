//! Polling chain watcher.
//!
//! Each tick reads the chain head and, when it has moved past the last
//! processed height, notifies every block listener and then fetches and
//! dispatches the new logs of every event listener in registration order.
//! Ticks never overlap: the tick lock is held for the whole tick, and
//! [`ChainWatcher::exclusive`] lets other components run between ticks.

use crate::decode::{event_key_preimage, DecodedEvent};
use crate::error::{LedgerError, WatcherError};
use crate::ledger::{LedgerClient, LogQuery};
use crate::registry::{BlockHandler, EventListener, EventSubscription, SubscriptionRegistry};
use alloy_primitives::Address;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Default polling interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Idle delay between ticks that found no new block
    pub poll_interval: Duration,
    /// Attempts per ledger query before the watcher gives up
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl WatcherConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }
}

/// Result of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The head has not moved past the last processed height
    Idle { head: u64 },
    Advanced { head: u64, delivered: usize },
}

pub struct ChainWatcher<L> {
    ledger: Arc<L>,
    config: WatcherConfig,
    registry: Arc<RwLock<SubscriptionRegistry>>,
    latest_processed_block: AtomicU64,
    tick_lock: Mutex<()>,
    cancel_token: CancellationToken,
}

impl<L> ChainWatcher<L>
where
    L: LedgerClient + 'static,
{
    pub fn new(ledger: Arc<L>, config: WatcherConfig) -> Self {
        Self {
            ledger,
            config,
            registry: Arc::new(RwLock::new(SubscriptionRegistry::new())),
            latest_processed_block: AtomicU64::new(0),
            tick_lock: Mutex::new(()),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn registry(&self) -> Arc<RwLock<SubscriptionRegistry>> {
        self.registry.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    pub fn latest_processed_block(&self) -> u64 {
        self.latest_processed_block.load(Ordering::SeqCst)
    }

    /// Returns an id for [`Self::unregister_block_listener`].
    pub fn register_block_listener(&self, handler: Arc<dyn BlockHandler>) -> u64 {
        self.registry.write().add_block_listener(handler)
    }

    pub fn unregister_block_listener(&self, id: u64) -> bool {
        self.registry.write().remove_block_listener(id)
    }

    /// Starts delivering logs above `subscription.start_height`. An existing
    /// listener with the same contract and signature is dropped first.
    pub fn register_event_listener(&self, subscription: EventSubscription) {
        let signature_topic = self.ledger.hash(subscription.signature.as_bytes());
        let address = subscription.contract_address;
        let start_height = subscription.start_height;
        let seq = self
            .registry
            .write()
            .register(subscription, signature_topic);

        tracing::debug!(%address, seq, start_height, "Event listener registered");
    }

    /// Unregisters and re-registers under a single registry lock, so no tick
    /// observes the key with zero or two listeners.
    pub fn replace_event_listener(&self, subscription: EventSubscription) -> bool {
        let signature_topic = self.ledger.hash(subscription.signature.as_bytes());
        let address = subscription.contract_address;
        let start_height = subscription.start_height;
        let (existed, seq) = self
            .registry
            .write()
            .replace(subscription, signature_topic);

        tracing::debug!(%address, seq, start_height, existed, "Event listener replaced");
        existed
    }

    pub fn unregister_event_listener(&self, contract_address: Address, signature: &str) -> bool {
        self.registry.write().unregister(contract_address, signature)
    }

    pub fn unregister_contract(&self, contract_address: Address) -> usize {
        self.registry.write().unregister_contract(contract_address)
    }

    /// Blocks ticks until the guard is dropped.
    ///
    /// No tick runs while the guard is held, so listener checkpoints and
    /// [`Self::latest_processed_block`] do not move under the holder.
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.tick_lock.lock().await
    }

    /// Polls until cancelled or until the ledger stays unreachable.
    pub async fn run(&self, start_height: u64) -> Result<(), WatcherError> {
        self.latest_processed_block
            .fetch_max(start_height, Ordering::SeqCst);

        tracing::info!(
            start_height,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "👀 Chain watcher started"
        );

        while !self.cancel_token.is_cancelled() {
            match self.tick().await? {
                TickOutcome::Advanced { head, delivered } => {
                    tracing::debug!(head, delivered, "Tick processed new blocks");
                }
                TickOutcome::Idle { .. } => {
                    tokio::select! {
                        _ = self.cancel_token.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        tracing::info!(
            latest = self.latest_processed_block(),
            "Chain watcher stopped"
        );
        Ok(())
    }

    pub async fn tick(&self) -> Result<TickOutcome, WatcherError> {
        let _guard = self.tick_lock.lock().await;

        let head = self
            .with_retry("head height", || self.ledger.head_height())
            .await?;
        if head <= self.latest_processed_block() {
            return Ok(TickOutcome::Idle { head });
        }

        let block_listeners = self.registry.read().block_listeners();
        for handler in block_listeners {
            if let Err(e) = handler.on_block(head).await {
                tracing::warn!(head, error = %e, "Block listener failed");
            }
        }

        let mut cursor = 0;
        let mut delivered = 0;
        loop {
            let next = self.registry.read().next_after(cursor);
            let Some(listener) = next else { break };
            cursor = listener.seq;
            delivered += self.dispatch(listener, head).await?;
        }

        self.latest_processed_block
            .fetch_max(head, Ordering::SeqCst);

        Ok(TickOutcome::Advanced { head, delivered })
    }

    /// Fetches and delivers one listener's logs in `(checkpoint, head]`.
    async fn dispatch(&self, listener: EventListener, head: u64) -> Result<usize, WatcherError> {
        if head <= listener.checkpoint {
            return Ok(0);
        }

        let query = LogQuery {
            address: listener.contract_address,
            topics: listener.topics.clone(),
            from_block: listener.checkpoint + 1,
            to_block: head,
        };
        let logs = self
            .with_retry("logs", || self.ledger.logs(&query))
            .await?;

        // advanced before delivery so a failing handler is not fed the same logs again
        self.registry.write().advance_checkpoint(listener.seq, head);

        let mut delivered = 0;
        for log in logs {
            let block_timestamp = match self
                .with_retry("block timestamp", || self.ledger.block_timestamp(log.block_number))
                .await
            {
                Ok(ts) => ts,
                Err(e) => {
                    tracing::warn!(
                        signature = %listener.signature,
                        block = log.block_number,
                        error = %e,
                        "Skipping log without block timestamp"
                    );
                    continue;
                }
            };

            let event_key = self
                .ledger
                .hash(&event_key_preimage(&log.transaction_hash, log.log_index));

            let event = match DecodedEvent::from_log(
                &listener.signature,
                &listener.params,
                &log,
                block_timestamp,
                event_key,
            ) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(
                        signature = %listener.signature,
                        tx_hash = %log.transaction_hash,
                        error = %e,
                        "Failed to decode log"
                    );
                    continue;
                }
            };

            match listener.handler.handle(event).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        signature = %listener.signature,
                        contract = %listener.contract_address,
                        tx_hash = %log.transaction_hash,
                        error = %e,
                        "Event handler failed"
                    );
                }
            }
        }

        Ok(delivered)
    }

    /// Runs `op` under the configured retry policy.
    pub(crate) async fn with_retry<T, F, Fut>(
        &self,
        what: &'static str,
        mut op: F,
    ) -> Result<T, WatcherError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    tracing::warn!("Ledger {} attempt {}/{} failed: {}", what, attempt, attempts, e);
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    tracing::error!("Ledger {} failed after {} attempts: {}", what, attempts, source);
                    return Err(WatcherError::LedgerUnavailable { attempts, source });
                }
            }
        }
    }
}
