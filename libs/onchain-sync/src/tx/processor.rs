//! Serial transaction submission.
//!
//! One worker drains a FIFO queue. Each transaction is prepared (nonce, gas
//! price, value, estimated gas), signed, submitted, and followed until the
//! ledger reports it mined or failed before the next one is taken. Nonces are
//! read fresh from the ledger, so two in-flight transactions from the same
//! sender would collide.

use super::types::{TransactionState, TxHandle, TxStatus};
use crate::ledger::{LedgerClient, SubmissionEvent};
use crate::registry::block_handler;
use crate::signer::TransactionSigner;
use crate::watcher::ChainWatcher;
use alloy::rpc::types::TransactionRequest;
use alloy_primitives::{Address, Bytes, U256};
use eyre::WrapErr;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 20 gwei
pub const DEFAULT_GAS_PRICE_WEI: u128 = 20_000_000_000;
pub const DEFAULT_GAS_MARGIN_PERCENT: u64 = 10;
pub const DEFAULT_CONFIRMATIONS_TO_TRACK: u64 = 16;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub default_gas_price: u128,
    pub gas_margin_percent: u64,
    /// Mined transactions stop being tracked at this many confirmations
    pub confirmations_to_track: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            default_gas_price: DEFAULT_GAS_PRICE_WEI,
            gas_margin_percent: DEFAULT_GAS_MARGIN_PERCENT,
            confirmations_to_track: DEFAULT_CONFIRMATIONS_TO_TRACK,
        }
    }
}

/// `estimate` raised by `percent`, rounded half up.
pub fn apply_margin(estimate: u64, percent: u64) -> u64 {
    let raised = (estimate as u128 * (100 + percent as u128) + 50) / 100;
    u64::try_from(raised).unwrap_or(u64::MAX)
}

pub struct TxProcessor<L, S> {
    ledger: Arc<L>,
    signer: Arc<S>,
    config: ProcessorConfig,
    queue_tx: mpsc::UnboundedSender<TxHandle>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TxHandle>>,
    tracking: Mutex<Vec<TxHandle>>,
    next_id: AtomicU64,
    cancel_token: CancellationToken,
}

impl<L, S> TxProcessor<L, S>
where
    L: LedgerClient + 'static,
    S: TransactionSigner + 'static,
{
    /// Creates the processor and registers its confirmation counter as a
    /// block listener on `watcher`.
    pub fn new(signer: Arc<S>, watcher: &ChainWatcher<L>, config: ProcessorConfig) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let processor = Arc::new(Self {
            ledger: watcher.ledger().clone(),
            signer,
            config,
            queue_tx,
            queue_rx: tokio::sync::Mutex::new(queue_rx),
            tracking: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            cancel_token: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&processor);
        watcher.register_block_listener(block_handler(move |height| {
            let processor = weak.upgrade();
            async move {
                if let Some(processor) = processor {
                    processor.on_new_block(height);
                }
                Ok::<(), eyre::Report>(())
            }
        }));

        processor
    }

    /// Queues `tx` from `from` and returns its state handle immediately.
    /// Failures are reported on the handle.
    pub fn submit(
        &self,
        from: Address,
        tx: TransactionRequest,
        metadata: serde_json::Value,
    ) -> TxHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(RwLock::new(TransactionState::new(id, from, tx, metadata)));

        tracing::debug!(id, %from, "Transaction queued");
        if self.queue_tx.send(handle.clone()).is_err() {
            handle.write().fail("transaction processor is shut down");
        }
        handle
    }

    /// Mined transactions still gaining confirmations.
    pub fn tracked(&self) -> Vec<TxHandle> {
        self.tracking.lock().clone()
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Drains the queue one transaction at a time until stopped.
    pub async fn run(self: Arc<Self>) {
        let mut queue = self.queue_rx.lock().await;
        tracing::info!("📨 Transaction processor started");

        loop {
            let handle = tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                next = queue.recv() => match next {
                    Some(handle) => handle,
                    None => break,
                },
            };

            let this = Arc::clone(&self);
            let job = handle.clone();
            if let Err(e) = tokio::spawn(async move { this.process(job).await }).await {
                let id = handle.read().id;
                tracing::error!(id, error = %e, "Transaction processing aborted");
                handle.write().fail(format!("processing aborted: {}", e));
            }
        }

        tracing::info!("Transaction processor stopped");
    }

    async fn process(&self, handle: TxHandle) {
        let (id, from, tx) = {
            let state = handle.read();
            (state.id, state.from, state.raw.clone())
        };

        let (tx, signed) = match self.prepare(from, tx).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(id, %from, error = %e, "Transaction rejected before submission");
                handle.write().fail(format!("{:#}", e));
                return;
            }
        };

        {
            let mut state = handle.write();
            state.raw = tx;
            state.signed = Some(signed.clone());
        }

        self.follow_submission(&handle, signed).await;
    }

    /// Fills nonce, defaults and the gas limit, then signs.
    async fn prepare(
        &self,
        from: Address,
        mut tx: TransactionRequest,
    ) -> eyre::Result<(TransactionRequest, Bytes)> {
        let nonce = self
            .ledger
            .transaction_count(from)
            .await
            .wrap_err("failed to read nonce")?;

        tx.from = Some(from);
        tx.nonce = Some(nonce);
        if tx.gas_price.is_none() {
            tx.gas_price = Some(self.config.default_gas_price);
        }
        if tx.value.is_none() {
            tx.value = Some(U256::ZERO);
        }

        let estimate = self
            .ledger
            .estimate_gas(&tx)
            .await
            .wrap_err("gas estimation failed")?;
        tx.gas = Some(apply_margin(estimate, self.config.gas_margin_percent));

        let signed = self
            .signer
            .sign(tx.clone())
            .await
            .wrap_err("signing failed")?;

        Ok((tx, signed))
    }

    /// Applies submission updates until the transaction is mined or fails.
    async fn follow_submission(&self, handle: &TxHandle, signed: Bytes) {
        let id = handle.read().id;
        let mut updates = self.ledger.submit(signed);

        while let Some(update) = updates.recv().await {
            match update {
                SubmissionEvent::Hash(tx_hash) => {
                    {
                        let mut state = handle.write();
                        state.tx_hash = Some(tx_hash);
                        state.set_status(TxStatus::Submitted);
                    }
                    tracing::info!(id, %tx_hash, "Transaction submitted");
                }
                SubmissionEvent::Receipt(receipt) => {
                    let mut state = handle.write();
                    state.receipt = Some(receipt);
                    state.set_status(TxStatus::Submitted);
                }
                SubmissionEvent::Confirmed(receipt) => {
                    let (tx_hash, block) = (receipt.tx_hash, receipt.block_number);
                    {
                        let mut state = handle.write();
                        state.receipt = Some(receipt);
                        state.set_status(TxStatus::Mined);
                    }
                    self.tracking.lock().push(handle.clone());
                    tracing::info!(id, %tx_hash, block, "✅ Transaction mined");
                    return;
                }
                SubmissionEvent::Failed(reason) => {
                    tracing::warn!(id, %reason, "❌ Transaction failed");
                    handle.write().fail(reason);
                    return;
                }
            }
        }

        tracing::warn!(id, "Submission ended without confirmation");
        handle
            .write()
            .fail("submission stream closed before confirmation");
    }

    /// Adds a confirmation to every tracked transaction and drops the ones
    /// that reached the cap.
    pub fn on_new_block(&self, height: u64) {
        let cap = self.config.confirmations_to_track;
        self.tracking.lock().retain(|handle| {
            let mut state = handle.write();
            let confirmations = state.increment_confirmations();
            if confirmations >= cap {
                tracing::debug!(id = state.id, height, confirmations, "Transaction no longer tracked");
                return false;
            }
            true
        });
    }
}
