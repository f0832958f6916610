//! State mediator.
//!
//! Builds the asset and wallet stores from a snapshot of the chain at a
//! chosen height, then keeps them current by registering listeners with the
//! [`ChainWatcher`]. Every asset gets listeners on its token contract and on
//! whichever satellite contracts (sale manager, converter, distribution) its
//! controller links to. Distribution events are filtered to the active
//! wallet account, and the filter is swapped whenever the account changes.

mod handlers;
pub mod subscriptions;
mod sync;

pub use sync::ONE_UNIT;

use crate::asset::{AssetHandle, AssetStore, TokenKind};
use crate::decode::DecodedEvent;
use crate::ledger::ChainAccess;
use crate::price::PriceFeed;
use crate::registry::block_handler;
use crate::wallet::WalletStore;
use crate::watcher::ChainWatcher;
use alloy_primitives::Address;
use common::address::is_usable;
use futures_util::future::try_join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use subscriptions::{DISTRIBUTION_SENT, TOKEN_CREATED, TOKEN_REMOVED};
use tokio_util::sync::CancellationToken;

/// Default exchange-rate refresh period in seconds
pub const DEFAULT_PRICE_REFRESH_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct MediatorConfig {
    pub token_factory: Address,
    pub price_refresh_interval: Duration,
}

impl MediatorConfig {
    pub fn new(token_factory: Address) -> Self {
        Self {
            token_factory,
            price_refresh_interval: Duration::from_secs(DEFAULT_PRICE_REFRESH_SECS),
        }
    }

    pub fn with_price_refresh_interval(mut self, interval: Duration) -> Self {
        self.price_refresh_interval = interval;
        self
    }
}

pub struct Mediator<L> {
    ledger: Arc<L>,
    watcher: Arc<ChainWatcher<L>>,
    assets: AssetStore,
    wallet: WalletStore,
    price_feed: Option<Arc<dyn PriceFeed>>,
    config: MediatorConfig,
    initial_height: AtomicU64,
    /// Converter block listener id per token
    converter_listeners: Mutex<HashMap<Address, u64>>,
    cancel_token: CancellationToken,
}

impl<L> Mediator<L>
where
    L: ChainAccess + 'static,
{
    pub fn new(
        watcher: Arc<ChainWatcher<L>>,
        assets: AssetStore,
        wallet: WalletStore,
        config: MediatorConfig,
    ) -> Self {
        Self {
            ledger: watcher.ledger().clone(),
            watcher,
            assets,
            wallet,
            price_feed: None,
            config,
            initial_height: AtomicU64::new(0),
            converter_listeners: Mutex::new(HashMap::new()),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_price_feed(mut self, price_feed: Arc<dyn PriceFeed>) -> Self {
        self.price_feed = Some(price_feed);
        self
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn wallet(&self) -> &WalletStore {
        &self.wallet
    }

    /// Height of the bulk load
    pub fn initial_height(&self) -> u64 {
        self.initial_height.load(Ordering::SeqCst)
    }

    /// Stops the account-change and price-refresh tasks.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Loads the wallet balance and every factory token as of `height`.
    ///
    /// Tokens load concurrently; the call returns once each asset is fully
    /// derived and its listeners are registered.
    pub async fn init_from_chain(self: &Arc<Self>, height: u64) -> eyre::Result<()> {
        self.initial_height.store(height, Ordering::SeqCst);
        let factory = self.config.token_factory;

        tracing::info!(height, %factory, "🔄 Loading assets from chain");

        self.update_wallet_balance(Some(height)).await?;

        let primary = self.ledger.primary_token(factory, height).await?;
        let count = self.ledger.token_count(factory, height).await?;

        let mut tokens = vec![(primary, TokenKind::Primary)];
        for index in 0..count {
            let token = self.ledger.token_at(factory, index, height).await?;
            tokens.push((token, TokenKind::Issued));
        }
        tokens.retain(|(token, _)| {
            let usable = is_usable(token);
            if !usable {
                tracing::warn!(%factory, "Factory reported the zero address as a token");
            }
            usable
        });

        try_join_all(
            tokens
                .into_iter()
                .map(|(token, kind)| self.create_asset(token, kind, height)),
        )
        .await?;

        tracing::info!(assets = self.assets.len(), height, "✅ Assets loaded");
        Ok(())
    }

    /// Registers the factory listeners, the wallet-balance block listener and
    /// the account-change hook, and starts the price refresh.
    pub fn start_event_listening(self: &Arc<Self>) {
        let factory = self.config.token_factory;
        let start_height = self.initial_height();

        tracing::info!(%factory, start_height, "Mediator listening for events");

        let this = Arc::clone(self);
        self.subscribe(factory, &TOKEN_CREATED, start_height, move |event| {
            let this = this.clone();
            async move { this.handle_token_created(event).await }
        });

        let this = Arc::clone(self);
        self.subscribe(factory, &TOKEN_REMOVED, start_height, move |event| {
            let result = this.handle_token_removed(&event);
            async move { result }
        });

        let this = Arc::clone(self);
        self.watcher.register_block_listener(block_handler(move |height| {
            let this = this.clone();
            async move { this.update_wallet_balance(Some(height)).await }
        }));

        self.spawn_account_watch();

        if self.price_feed.is_some() {
            self.spawn_price_refresh();
        }
    }

    /// Derives `token` at `height` and starts its listeners from there.
    /// Returns false if the asset is already tracked.
    pub async fn create_asset(
        self: &Arc<Self>,
        token: Address,
        kind: TokenKind,
        height: u64,
    ) -> eyre::Result<bool> {
        if self.assets.has_asset(&token) {
            tracing::warn!(%token, "Asset already tracked, ignoring");
            return Ok(false);
        }

        let asset = self.load_asset(token, kind, height).await?;
        let symbol = asset.symbol.clone();

        let Some(handle) = self.assets.add_asset(asset) else {
            tracing::warn!(%token, "Asset already tracked, ignoring");
            return Ok(false);
        };
        self.register_asset_listeners(&handle, height);

        tracing::info!(%token, %symbol, height, "Asset created");
        Ok(true)
    }

    /// Drops `token` from the store along with the listeners on its contracts.
    pub fn remove_asset(&self, token: Address) -> bool {
        let Some(handle) = self.assets.remove_asset(&token) else {
            tracing::warn!(%token, "Removed token was not tracked");
            return false;
        };

        let contracts: Vec<Address> = {
            let asset = handle.read();
            [Some(asset.address), asset.sale_manager, asset.converter, asset.distribution]
                .into_iter()
                .flatten()
                .collect()
        };
        let listeners: usize = contracts
            .into_iter()
            .map(|contract| self.watcher.unregister_contract(contract))
            .sum();
        let block_listener = self.converter_listeners.lock().remove(&token);
        if let Some(id) = block_listener {
            self.watcher.unregister_block_listener(id);
        }

        tracing::info!(%token, listeners, "Asset removed");
        true
    }

    async fn handle_token_created(self: &Arc<Self>, event: DecodedEvent) -> eyre::Result<()> {
        let token = event.address("tokenAddress")?;
        if !is_usable(&token) {
            eyre::bail!("TokenCreated with zero address");
        }
        self.create_asset(token, TokenKind::Issued, event.block_number)
            .await
            .map(|_| ())
    }

    fn handle_token_removed(&self, event: &DecodedEvent) -> eyre::Result<()> {
        let token = event.address("tokenAddress")?;
        self.remove_asset(token);
        Ok(())
    }

    /// Native balance of the active account, at `at` or at the head.
    pub async fn update_wallet_balance(&self, at: Option<u64>) -> eyre::Result<()> {
        let Some(account) = self.wallet.active_account() else {
            return Ok(());
        };

        let balance = self.ledger.native_balance(account, at).await?;
        self.wallet.set_native_balance(balance);
        Ok(())
    }

    pub async fn refresh_prices(&self) {
        let Some(feed) = &self.price_feed else {
            return;
        };

        match feed.fetch().await {
            Ok(rates) => {
                tracing::debug!(usd_per_eth = rates.usd_per_eth, "Exchange rates refreshed");
                self.wallet.set_rates(rates);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to refresh exchange rates"),
        }
    }

    /// Re-derives account-specific state after the active account changed.
    ///
    /// Runs with ticks excluded: every distribution history is re-read up to
    /// the last processed height and its listener is swapped to the new
    /// account starting at that same height. When the re-read fails the new
    /// listener starts from zero and the watcher replays the history.
    pub async fn on_account_changed(&self, account: Option<Address>) {
        tracing::info!(account = ?account, "Active account changed");

        if let Err(e) = self.update_wallet_balance(None).await {
            tracing::warn!(error = %e, "Failed to refresh wallet balance");
        }

        let _guard = self.watcher.exclusive().await;
        let checkpoint = self.watcher.latest_processed_block();

        for asset in self.assets.handles() {
            let distribution = asset.read().distribution;
            if let Some(distribution) = distribution {
                self.resubscribe_distribution(&asset, distribution, account, checkpoint)
                    .await;
            }
        }
    }

    async fn resubscribe_distribution(
        &self,
        asset: &AssetHandle,
        distribution: Address,
        account: Option<Address>,
        checkpoint: u64,
    ) {
        asset.write().clear_distributions();

        let start_height = match self
            .fetch_distributions(Some(distribution), account, checkpoint)
            .await
        {
            Ok(history) => {
                asset.write().distributions = history;
                checkpoint
            }
            Err(e) => {
                tracing::warn!(
                    %distribution,
                    error = %e,
                    "Failed to re-derive distribution history, replaying from genesis"
                );
                0
            }
        };

        match account {
            Some(account) => {
                self.watcher.replace_event_listener(self.distribution_subscription(
                    asset,
                    distribution,
                    &account,
                    start_height,
                ));
            }
            None => {
                self.watcher
                    .unregister_event_listener(distribution, DISTRIBUTION_SENT.signature);
            }
        }
    }

    fn spawn_account_watch(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let mut changes = self.wallet.subscribe();
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let account = *changes.borrow_and_update();
                        this.on_account_changed(account).await;
                    }
                }
            }
        });
    }

    fn spawn_price_refresh(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel_token = self.cancel_token.clone();
        let period = self.config.price_refresh_interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = interval.tick() => this.refresh_prices().await,
                }
            }
        });
    }
}
