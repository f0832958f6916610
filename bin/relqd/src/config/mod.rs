use crate::price_feed::CRYPTOCOMPARE_URL;
use onchain_sync::mediator::DEFAULT_PRICE_REFRESH_SECS;
use onchain_sync::tx::{DEFAULT_CONFIRMATIONS_TO_TRACK, DEFAULT_GAS_MARGIN_PERCENT, DEFAULT_GAS_PRICE_WEI};
use onchain_sync::watcher::DEFAULT_POLL_INTERVAL_MS;
use onchain_sync::{ProcessorConfig, WatcherConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelqdConfig {
    pub blockchain: BlockchainConfig,
    pub watcher: WatcherSection,
    pub processor: ProcessorSection,
    pub price: PriceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockchainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub token_factory_address: String,
    /// Active account; the signer's address when absent
    pub default_account: Option<String>,
    /// Bulk-load height; the chain head when absent
    pub start_block: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSection {
    pub poll_interval_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSection {
    pub default_gas_price_wei: u64,
    pub gas_margin_percent: u64,
    pub confirmations_to_track: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    /// Price feed endpoint; `null` disables exchange rates
    pub url: Option<String>,
    pub refresh_interval_secs: u64,
    pub timeout_secs: u64,
}

impl RelqdConfig {
    pub async fn load_from_file(path: &Path) -> eyre::Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Applies `RELQD_RPC_URL`, `RELQD_TOKEN_FACTORY` and `RELQD_START_BLOCK`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(rpc_url) = std::env::var("RELQD_RPC_URL") {
            self.blockchain.rpc_url = rpc_url;
        }
        if let Ok(factory) = std::env::var("RELQD_TOKEN_FACTORY") {
            self.blockchain.token_factory_address = factory;
        }
        if let Some(start_block) = std::env::var("RELQD_START_BLOCK")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.blockchain.start_block = Some(start_block);
        }
        self
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig::default()
            .with_poll_interval(Duration::from_millis(self.watcher.poll_interval_ms))
            .with_retry(
                self.watcher.retry_attempts,
                Duration::from_millis(self.watcher.retry_delay_ms),
            )
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            default_gas_price: self.processor.default_gas_price_wei as u128,
            gas_margin_percent: self.processor.gas_margin_percent,
            confirmations_to_track: self.processor.confirmations_to_track,
        }
    }

    pub fn price_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.price.refresh_interval_secs)
    }
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: 1337,
            token_factory_address: "0x0000000000000000000000000000000000000000".to_string(),
            default_account: None,
            start_block: None,
        }
    }
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
        }
    }
}

impl Default for ProcessorSection {
    fn default() -> Self {
        Self {
            default_gas_price_wei: DEFAULT_GAS_PRICE_WEI as u64,
            gas_margin_percent: DEFAULT_GAS_MARGIN_PERCENT,
            confirmations_to_track: DEFAULT_CONFIRMATIONS_TO_TRACK,
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            url: Some(CRYPTOCOMPARE_URL.to_string()),
            refresh_interval_secs: DEFAULT_PRICE_REFRESH_SECS,
            timeout_secs: 10,
        }
    }
}
