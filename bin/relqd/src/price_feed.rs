use async_trait::async_trait;
use onchain_sync::{ExchangeRates, PriceFeed};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// CryptoCompare `pricemulti` endpoint quoting ETH in USD and back
pub const CRYPTOCOMPARE_URL: &str =
    "https://min-api.cryptocompare.com/data/pricemulti?fsyms=USD,ETH&tsyms=ETH,USD";

/// Exchange rates over HTTP from a CryptoCompare-style `pricemulti` response.
pub struct HttpPriceFeed {
    client: Client,
    url: String,
}

impl HttpPriceFeed {
    pub fn new(url: String, timeout_secs: u64) -> eyre::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn fetch(&self) -> eyre::Result<ExchangeRates> {
        tracing::debug!(url = %self.url, "Fetching exchange rates");

        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            eyre::bail!("Price request failed: HTTP {}", response.status());
        }

        let body: Value = response.json().await?;
        parse_rates(&body)
    }
}

fn parse_rates(body: &Value) -> eyre::Result<ExchangeRates> {
    let rate = |from: &str, to: &str| {
        body[from][to]
            .as_f64()
            .ok_or_else(|| eyre::eyre!("Missing {}/{} rate in price response", from, to))
    };

    Ok(ExchangeRates {
        usd_per_eth: rate("ETH", "USD")?,
        eth_per_usd: rate("USD", "ETH")?,
    })
}
