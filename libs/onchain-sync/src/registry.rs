//! Listener bookkeeping for the chain watcher.
//!
//! Event listeners are keyed by `(contract address, event signature)` and
//! visited in registration order. Each one carries its own checkpoint, the
//! highest block whose logs have already been fetched for it, so listeners
//! added while the watcher runs start from their own height.

use crate::decode::{DecodedEvent, ParamDescriptor};
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: DecodedEvent) -> eyre::Result<()>;
}

#[async_trait]
pub trait BlockHandler: Send + Sync {
    async fn on_block(&self, height: u64) -> eyre::Result<()>;
}

/// Adapts an async closure into an [`EventHandler`].
pub struct EventFn<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for EventFn<F>
where
    F: Fn(DecodedEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: DecodedEvent) -> eyre::Result<()> {
        (self.0)(event).await
    }
}

/// Adapts an async closure into a [`BlockHandler`].
pub struct BlockFn<F>(F);

#[async_trait]
impl<F, Fut> BlockHandler for BlockFn<F>
where
    F: Fn(u64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    async fn on_block(&self, height: u64) -> eyre::Result<()> {
        (self.0)(height).await
    }
}

pub fn event_handler<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(DecodedEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    Arc::new(EventFn(f))
}

pub fn block_handler<F, Fut>(f: F) -> Arc<dyn BlockHandler>
where
    F: Fn(u64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    Arc::new(BlockFn(f))
}

/// A request to watch one event of one contract.
#[derive(Clone)]
pub struct EventSubscription {
    pub contract_address: Address,
    pub signature: String,
    pub params: Vec<ParamDescriptor>,
    /// Filters for topics 1..n, `None` matches anything
    pub topic_filters: Vec<Option<B256>>,
    pub handler: Arc<dyn EventHandler>,
    /// Logs strictly above this height are delivered
    pub start_height: u64,
}

impl EventSubscription {
    pub fn new(
        contract_address: Address,
        signature: impl Into<String>,
        params: Vec<ParamDescriptor>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            contract_address,
            signature: signature.into(),
            params,
            topic_filters: Vec::new(),
            handler,
            start_height: 0,
        }
    }

    pub fn with_topic_filters(mut self, topic_filters: Vec<Option<B256>>) -> Self {
        self.topic_filters = topic_filters;
        self
    }

    pub fn starting_at(mut self, height: u64) -> Self {
        self.start_height = height;
        self
    }
}

#[derive(Clone)]
pub struct EventListener {
    pub seq: u64,
    pub contract_address: Address,
    pub signature: String,
    pub params: Vec<ParamDescriptor>,
    /// Full positional topic list, starting with the signature hash
    pub topics: Vec<Option<B256>>,
    pub handler: Arc<dyn EventHandler>,
    pub checkpoint: u64,
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListener")
            .field("seq", &self.seq)
            .field("contract_address", &self.contract_address)
            .field("signature", &self.signature)
            .field("topics", &self.topics)
            .field("checkpoint", &self.checkpoint)
            .finish()
    }
}

/// Counters of listener churn, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub registrations: u64,
    pub removals: u64,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    next_seq: u64,
    event_listeners: Vec<EventListener>,
    next_block_id: u64,
    block_listeners: Vec<(u64, Arc<dyn BlockHandler>)>,
    stats: RegistryStats,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block_listener(&mut self, handler: Arc<dyn BlockHandler>) -> u64 {
        self.next_block_id += 1;
        self.block_listeners.push((self.next_block_id, handler));
        self.next_block_id
    }

    pub fn remove_block_listener(&mut self, id: u64) -> bool {
        let before = self.block_listeners.len();
        self.block_listeners.retain(|(listener_id, _)| *listener_id != id);
        self.block_listeners.len() != before
    }

    /// Snapshot of the block listeners in registration order
    pub fn block_listeners(&self) -> Vec<Arc<dyn BlockHandler>> {
        self.block_listeners
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect()
    }

    /// Adds a listener, replacing any existing one with the same key.
    /// Returns the new listener's sequence number.
    pub fn register(&mut self, subscription: EventSubscription, signature_topic: B256) -> u64 {
        self.unregister(subscription.contract_address, &subscription.signature);

        self.next_seq += 1;
        let mut topics = Vec::with_capacity(subscription.topic_filters.len() + 1);
        topics.push(Some(signature_topic));
        topics.extend(subscription.topic_filters);

        self.event_listeners.push(EventListener {
            seq: self.next_seq,
            contract_address: subscription.contract_address,
            signature: subscription.signature,
            params: subscription.params,
            topics,
            handler: subscription.handler,
            checkpoint: subscription.start_height,
        });
        self.stats.registrations += 1;

        self.next_seq
    }

    /// Swaps the listener for the subscription's key in one step. Returns
    /// whether a previous listener existed, and the new sequence number.
    pub fn replace(&mut self, subscription: EventSubscription, signature_topic: B256) -> (bool, u64) {
        let existed = self
            .get(subscription.contract_address, &subscription.signature)
            .is_some();
        (existed, self.register(subscription, signature_topic))
    }

    /// Removes the listener for `(address, signature)`. Unknown keys are a no-op.
    pub fn unregister(&mut self, contract_address: Address, signature: &str) -> bool {
        let position = self
            .event_listeners
            .iter()
            .position(|l| l.contract_address == contract_address && l.signature == signature);

        match position {
            Some(index) => {
                self.event_listeners.remove(index);
                self.stats.removals += 1;
                true
            }
            None => false,
        }
    }

    /// Removes every listener on `contract_address`.
    pub fn unregister_contract(&mut self, contract_address: Address) -> usize {
        let before = self.event_listeners.len();
        self.event_listeners
            .retain(|l| l.contract_address != contract_address);
        let removed = before - self.event_listeners.len();
        self.stats.removals += removed as u64;
        removed
    }

    pub fn get(&self, contract_address: Address, signature: &str) -> Option<&EventListener> {
        self.event_listeners
            .iter()
            .find(|l| l.contract_address == contract_address && l.signature == signature)
    }

    /// First listener registered after `cursor`, in registration order.
    ///
    /// Walking by sequence number keeps iteration stable while handlers add
    /// and remove listeners between steps.
    pub fn next_after(&self, cursor: u64) -> Option<EventListener> {
        self.event_listeners
            .iter()
            .filter(|l| l.seq > cursor)
            .min_by_key(|l| l.seq)
            .cloned()
    }

    /// Raises the checkpoint of listener `seq`. Ignored if the listener has
    /// been replaced or removed since it was read, or if `height` is not
    /// above the current checkpoint.
    pub fn advance_checkpoint(&mut self, seq: u64, height: u64) -> bool {
        match self.event_listeners.iter_mut().find(|l| l.seq == seq) {
            Some(listener) if height > listener.checkpoint => {
                listener.checkpoint = height;
                true
            }
            _ => false,
        }
    }

    pub fn listeners(&self) -> impl Iterator<Item = &EventListener> {
        self.event_listeners.iter()
    }

    pub fn len(&self) -> usize {
        self.event_listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_listeners.is_empty()
    }

    pub fn block_listener_count(&self) -> usize {
        self.block_listeners.len()
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats
    }
}
