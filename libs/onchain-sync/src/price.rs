use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Fiat exchange rates of the native currency
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRates {
    pub usd_per_eth: f64,
    pub eth_per_usd: f64,
}

/// External source of [`ExchangeRates`].
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn fetch(&self) -> eyre::Result<ExchangeRates>;
}
