use clap::Parser;
use eyre::Result;
use onchain_sync::{
    AlloyLedger, AssetStore, ChainWatcher, LedgerClient, LocalWalletSigner, Mediator,
    MediatorConfig, TxProcessor, WalletStore,
};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod price_feed;

use config::RelqdConfig;
use price_feed::HttpPriceFeed;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration directory
    #[arg(long, default_value = "./configs/dev")]
    config_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Height to bulk-load assets at (defaults to the chain head)
    #[arg(long)]
    start_block: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RELQD backend");

    let config_path = PathBuf::from(&cli.config_path).join("relqd.json");
    let config = if config_path.exists() {
        RelqdConfig::load_from_file(&config_path).await?
    } else {
        tracing::warn!(path = %config_path.display(), "relqd.json not found, using defaults");
        RelqdConfig::default()
    }
    .with_env_overrides();

    tracing::info!(
        rpc_url = %config.blockchain.rpc_url,
        chain_id = config.blockchain.chain_id,
        factory = %config.blockchain.token_factory_address,
        "Config loaded"
    );

    use alloy::providers::ProviderBuilder;

    let private_key = std::env::var("PRIVATE_KEY")
        .map_err(|_| eyre::eyre!("PRIVATE_KEY environment variable is required"))?;
    let signer = Arc::new(LocalWalletSigner::from_private_key(
        &private_key,
        config.blockchain.chain_id,
    )?);

    let provider = ProviderBuilder::new().connect_http(config.blockchain.rpc_url.parse()?);
    let ledger = Arc::new(AlloyLedger::new(provider));

    let factory = ledger.canonical_address(&config.blockchain.token_factory_address)?;
    let account = match &config.blockchain.default_account {
        Some(account) => ledger.canonical_address(account)?,
        None => signer.address(),
    };
    tracing::info!(%account, signer = %signer.address(), "Wallet loaded");

    let watcher = Arc::new(ChainWatcher::new(ledger.clone(), config.watcher_config()));

    let mut mediator = Mediator::new(
        watcher.clone(),
        AssetStore::new(),
        WalletStore::new(Some(account)),
        MediatorConfig::new(factory).with_price_refresh_interval(config.price_refresh_interval()),
    );
    if let Some(url) = &config.price.url {
        let feed = HttpPriceFeed::new(url.clone(), config.price.timeout_secs)?;
        mediator = mediator.with_price_feed(Arc::new(feed));
    }
    let mediator = Arc::new(mediator);

    let processor = TxProcessor::new(signer.clone(), &watcher, config.processor_config());

    let start_height = match cli.start_block.or(config.blockchain.start_block) {
        Some(height) => height,
        None => ledger.head_height().await?,
    };

    mediator.init_from_chain(start_height).await?;
    tracing::debug!(assets = ?mediator.assets().addresses(), "Tracked tokens");
    mediator.start_event_listening();

    let mut watcher_handle = {
        let watcher = watcher.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher.run(start_height).await {
                tracing::error!(error = %e, "Chain watcher failed");
            }
        })
    };
    let processor_handle = tokio::spawn(processor.clone().run());

    tracing::info!(
        start_height,
        assets = mediator.assets().len(),
        "🚀 RELQD backend running"
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutdown requested");
        }
        _ = &mut watcher_handle => {
            tracing::error!("Chain watcher exited, shutting down");
        }
    }

    watcher.stop();
    processor.stop();
    mediator.stop();

    let _ = watcher_handle.await;
    let _ = processor_handle.await;

    tracing::info!("RELQD backend stopped");
    Ok(())
}
