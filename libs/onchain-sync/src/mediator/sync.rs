//! Chain reads that derive asset state at a given height.

use super::handlers::distribution_from_event;
use super::subscriptions::{distribution_topic_filters, DISTRIBUTION_SENT};
use super::Mediator;
use crate::asset::{Asset, AssetHandle, Distribution, Sale, TokenKind};
use crate::decode::{event_key_preimage, DecodedEvent};
use crate::ledger::{ChainAccess, LogQuery};
use alloy_primitives::{Address, B256, U256};
use common::address::is_usable;
use common::fixed_string;

/// 1e18, one whole token or one ether in base units
pub const ONE_UNIT: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

fn usable(address: Address) -> Option<Address> {
    Some(address).filter(is_usable)
}

impl<L> Mediator<L>
where
    L: ChainAccess + 'static,
{
    /// Reads everything known about `token` at `height`.
    pub(crate) async fn load_asset(
        &self,
        token: Address,
        kind: TokenKind,
        height: u64,
    ) -> eyre::Result<Asset> {
        let metadata = self.ledger.token_metadata(token, height).await?;

        let mut asset = Asset::new(token, kind);
        asset.name = metadata.name;
        asset.symbol = metadata.symbol;
        asset.decimals = metadata.decimals;
        asset.total_supply = metadata.total_supply;
        asset.controller = usable(metadata.controller);

        let (documents, holders, ()) = tokio::try_join!(
            self.fetch_documents(token, height),
            self.fetch_holders(token, height),
            self.load_controller_data(&mut asset, height),
        )?;

        for (name, url, hash) in documents {
            asset.put_document(name, url, hash);
        }
        for (holder, balance) in holders {
            asset.set_balance_of(holder, balance);
        }

        Ok(asset)
    }

    async fn fetch_documents(
        &self,
        token: Address,
        height: u64,
    ) -> eyre::Result<Vec<(String, String, B256)>> {
        let count = self.ledger.document_count(token, height).await?;
        let mut documents = Vec::new();
        for index in 0..count {
            let doc = self.ledger.document_at(token, index, height).await?;
            documents.push((fixed_string::decode_bytes(doc.name.as_slice()), doc.url, doc.hash));
        }
        Ok(documents)
    }

    async fn fetch_holders(&self, token: Address, height: u64) -> eyre::Result<Vec<(Address, U256)>> {
        let count = self.ledger.holder_count(token, height).await?;
        let mut holders = Vec::new();
        for index in 0..count {
            let holder = self.ledger.holder_at(token, index, height).await?;
            let balance = self.ledger.balance_of(token, holder, height).await?;
            holders.push((holder, balance));
        }
        Ok(holders)
    }

    /// Resolves the satellite contracts and loads sales, converter state and
    /// distribution history. An absent controller leaves all of them empty.
    async fn load_controller_data(&self, asset: &mut Asset, height: u64) -> eyre::Result<()> {
        let Some(controller) = asset.controller else {
            return Ok(());
        };

        let links = self.ledger.controller_links(controller, height).await?;
        asset.ledger = usable(links.ledger);
        asset.sale_manager = usable(links.sale_manager);
        asset.converter = usable(links.converter);
        asset.distribution = usable(links.distribution);

        let account = self.wallet.active_account();
        let (token, sale_manager, converter, distribution) =
            (asset.address, asset.sale_manager, asset.converter, asset.distribution);
        let (sales, quotes, balances, distributions) = tokio::try_join!(
            self.fetch_sales(sale_manager, height),
            async { Ok::<_, eyre::Report>(self.fetch_converter_quotes(converter, height).await) },
            self.fetch_converter_balances(token, converter, height),
            self.fetch_distributions(distribution, account, height),
        )?;

        for (id, sale) in sales {
            asset.add_sale(id, sale);
        }
        if let Some((tokens_per_eth, eth_per_token)) = quotes {
            asset.set_converter_quotes(tokens_per_eth, eth_per_token);
        }
        if let Some((eth_balance, token_balance)) = balances {
            asset.set_converter_balances(eth_balance, token_balance);
        }
        asset.distributions = distributions;

        Ok(())
    }

    async fn fetch_sales(
        &self,
        sale_manager: Option<Address>,
        height: u64,
    ) -> eyre::Result<Vec<(u64, Sale)>> {
        let Some(sale_manager) = sale_manager else {
            return Ok(Vec::new());
        };

        let count = self.ledger.sale_count(sale_manager, height).await?;
        let mut sales = Vec::new();
        for index in 0..count {
            let record = self.ledger.sale_at(sale_manager, index, height).await?;
            sales.push((
                index,
                Sale {
                    start_time: record.start_time,
                    end_time: record.end_time,
                    tokens_to_mint: record.tokens_to_mint,
                    tokens_remaining: record.tokens_remaining,
                    rate: record.rate,
                    frozen: record.frozen,
                },
            ));
        }
        Ok(sales)
    }

    /// Buy and sell quotes for one whole unit. A failing quote reads as zero.
    async fn fetch_converter_quotes(
        &self,
        converter: Option<Address>,
        height: u64,
    ) -> Option<(U256, U256)> {
        let converter = converter?;

        let (buy, sell) = tokio::join!(
            self.ledger.calc_buy_amount(converter, ONE_UNIT, height),
            self.ledger.calc_sell_amount(converter, ONE_UNIT, height),
        );

        let tokens_per_eth = buy.unwrap_or_else(|e| {
            tracing::warn!(%converter, error = %e, "Converter calcBuyAmount failed");
            U256::ZERO
        });
        let eth_per_token = sell.unwrap_or_else(|e| {
            tracing::warn!(%converter, error = %e, "Converter calcSellAmount failed");
            U256::ZERO
        });

        Some((tokens_per_eth, eth_per_token))
    }

    async fn fetch_converter_balances(
        &self,
        token: Address,
        converter: Option<Address>,
        height: u64,
    ) -> eyre::Result<Option<(U256, U256)>> {
        let Some(converter) = converter else {
            return Ok(None);
        };

        let (eth_balance, token_balance) = tokio::try_join!(
            self.ledger.native_balance(converter, Some(height)),
            self.ledger.balance_of(token, converter, height),
        )?;
        Ok(Some((eth_balance, token_balance)))
    }

    /// All distributions paid to `account` up to and including `height`.
    pub(crate) async fn fetch_distributions(
        &self,
        distribution: Option<Address>,
        account: Option<Address>,
        height: u64,
    ) -> eyre::Result<Vec<Distribution>> {
        let (Some(distribution), Some(account)) = (distribution, account) else {
            return Ok(Vec::new());
        };

        let mut topics = vec![Some(self.ledger.hash(DISTRIBUTION_SENT.signature.as_bytes()))];
        topics.extend(distribution_topic_filters(&account));
        let query = LogQuery {
            address: distribution,
            topics,
            from_block: 0,
            to_block: height,
        };

        let descriptors = DISTRIBUTION_SENT.descriptors();
        let mut distributions = Vec::new();
        let logs = self
            .watcher
            .with_retry("distribution logs", || self.ledger.logs(&query))
            .await?;
        for log in logs {
            let block_number = log.block_number;
            let block_timestamp = self
                .watcher
                .with_retry("block timestamp", || self.ledger.block_timestamp(block_number))
                .await?;
            let event_key = self
                .ledger
                .hash(&event_key_preimage(&log.transaction_hash, log.log_index));
            let event = DecodedEvent::from_log(
                DISTRIBUTION_SENT.signature,
                &descriptors,
                &log,
                block_timestamp,
                event_key,
            )?;
            distributions.push(distribution_from_event(&event)?);
        }

        Ok(distributions)
    }

    /// Re-reads converter quotes and balances after trading activity.
    pub(crate) async fn refresh_converter(&self, asset: &AssetHandle, height: u64) -> eyre::Result<()> {
        let (token, converter) = {
            let asset = asset.read();
            (asset.address, asset.converter)
        };

        let quotes = self.fetch_converter_quotes(converter, height).await;
        let balances = self.fetch_converter_balances(token, converter, height).await?;

        let mut asset = asset.write();
        if let Some((tokens_per_eth, eth_per_token)) = quotes {
            asset.set_converter_quotes(tokens_per_eth, eth_per_token);
        }
        if let Some((eth_balance, token_balance)) = balances {
            asset.set_converter_balances(eth_balance, token_balance);
        }
        Ok(())
    }

    /// Block-listener body: converter reserves at `height`, skipped once the
    /// asset has been removed.
    pub(crate) async fn refresh_converter_balances(
        &self,
        asset: &AssetHandle,
        height: u64,
    ) -> eyre::Result<()> {
        let (token, converter) = {
            let asset = asset.read();
            (asset.address, asset.converter)
        };
        if !self.assets.has_asset(&token) {
            return Ok(());
        }

        if let Some((eth_balance, token_balance)) =
            self.fetch_converter_balances(token, converter, height).await?
        {
            asset.write().set_converter_balances(eth_balance, token_balance);
        }
        Ok(())
    }
}
