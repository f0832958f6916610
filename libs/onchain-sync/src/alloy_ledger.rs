use crate::error::LedgerError;
use crate::ledger::{
    ContractReader, ControllerLinks, DocumentRecord, LedgerClient, LogQuery, RawLog, SaleRecord,
    SubmissionEvent, SubmissionUpdates, TokenMetadata, TxReceipt,
};
use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, TransactionRequest};
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::interfaces::asset_token::IAssetToken;
use common::interfaces::controller::IAssetController;
use common::interfaces::converter::IConverter;
use common::interfaces::sale_manager::ISaleManager;
use common::interfaces::token_factory::ITokenFactory;
use tokio::sync::mpsc;

/// Ledger access over an alloy provider.
pub struct AlloyLedger<P> {
    provider: P,
}

impl<P> AlloyLedger<P>
where
    P: Provider + Clone + 'static,
{
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Read-only call at a fixed height
    async fn read<C: SolCall>(&self, to: Address, call: C, at: u64) -> Result<C::Return, LedgerError> {
        let tx = TransactionRequest::default()
            .to(to)
            .input(call.abi_encode().into());

        let result_bytes = self
            .provider
            .call(tx)
            .block(BlockId::number(at))
            .await
            .map_err(|e| LedgerError::Call {
                address: to,
                call: C::SIGNATURE,
                reason: e.to_string(),
            })?;

        C::abi_decode_returns(&result_bytes).map_err(|e| LedgerError::Decode {
            call: C::SIGNATURE,
            reason: e.to_string(),
        })
    }
}

fn to_u64(value: U256, call: &'static str) -> Result<u64, LedgerError> {
    u64::try_from(value).map_err(|_| LedgerError::Decode {
        call,
        reason: format!("{} does not fit in u64", value),
    })
}

#[async_trait]
impl<P> LedgerClient for AlloyLedger<P>
where
    P: Provider + Clone + 'static,
{
    async fn head_height(&self) -> Result<u64, LedgerError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn block_timestamp(&self, height: u64) -> Result<DateTime<Utc>, LedgerError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(height))
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?
            .ok_or(LedgerError::BlockNotFound(height))?;

        let seconds = i64::try_from(block.header.timestamp)
            .map_err(|_| LedgerError::Rpc(format!("block {} timestamp out of range", height)))?;

        DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| LedgerError::Rpc(format!("block {} timestamp out of range", height)))
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, LedgerError> {
        let mut filter = Filter::new()
            .address(query.address)
            .from_block(query.from_block)
            .to_block(query.to_block);

        for (position, topic) in query.topics.iter().enumerate() {
            let Some(topic) = topic else { continue };
            filter = match position {
                0 => filter.event_signature(*topic),
                1 => filter.topic1(*topic),
                2 => filter.topic2(*topic),
                3 => filter.topic3(*topic),
                _ => filter,
            };
        }

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;

        Ok(logs
            .into_iter()
            .map(|log| RawLog {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.data().data.clone(),
                block_number: log.block_number.unwrap_or(0),
                transaction_hash: log.transaction_hash.unwrap_or_default(),
                log_index: log.log_index.unwrap_or(0),
            })
            .collect())
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, LedgerError> {
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, LedgerError> {
        self.provider
            .estimate_gas(tx.clone())
            .await
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    async fn native_balance(
        &self,
        address: Address,
        at: Option<u64>,
    ) -> Result<U256, LedgerError> {
        let request = self.provider.get_balance(address);
        let request = match at {
            Some(height) => request.block_id(BlockId::number(height)),
            None => request,
        };
        request.await.map_err(|e| LedgerError::Rpc(e.to_string()))
    }

    fn submit(&self, signed: Bytes) -> SubmissionUpdates {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let provider = self.provider.clone();

        tokio::spawn(async move {
            let pending_tx = match provider.send_raw_transaction(&signed).await {
                Ok(pending_tx) => pending_tx,
                Err(e) => {
                    let _ = updates_tx.send(SubmissionEvent::Failed(e.to_string()));
                    return;
                }
            };
            let tx_hash = *pending_tx.tx_hash();
            tracing::debug!("Transaction sent: {:?}", tx_hash);
            let _ = updates_tx.send(SubmissionEvent::Hash(tx_hash));

            match pending_tx.get_receipt().await {
                Ok(receipt) => {
                    let receipt = TxReceipt {
                        tx_hash: receipt.transaction_hash,
                        block_number: receipt.block_number.unwrap_or(0),
                        gas_used: receipt.gas_used,
                        status: receipt.status(),
                    };
                    let _ = updates_tx.send(SubmissionEvent::Receipt(receipt.clone()));
                    let last = if receipt.status {
                        SubmissionEvent::Confirmed(receipt)
                    } else {
                        SubmissionEvent::Failed(format!("transaction {:?} reverted", tx_hash))
                    };
                    let _ = updates_tx.send(last);
                }
                Err(e) => {
                    let _ = updates_tx.send(SubmissionEvent::Failed(e.to_string()));
                }
            }
        });

        updates_rx
    }
}

#[async_trait]
impl<P> ContractReader for AlloyLedger<P>
where
    P: Provider + Clone + 'static,
{
    async fn primary_token(&self, factory: Address, at: u64) -> Result<Address, LedgerError> {
        self.read(factory, ITokenFactory::relqdTokenCall {}, at).await
    }

    async fn token_count(&self, factory: Address, at: u64) -> Result<u64, LedgerError> {
        let count = self.read(factory, ITokenFactory::getNumTokensCall {}, at).await?;
        to_u64(count, ITokenFactory::getNumTokensCall::SIGNATURE)
    }

    async fn token_at(
        &self,
        factory: Address,
        index: u64,
        at: u64,
    ) -> Result<Address, LedgerError> {
        let call = ITokenFactory::tokensCall {
            index: U256::from(index),
        };
        self.read(factory, call, at).await
    }

    async fn token_metadata(&self, token: Address, at: u64) -> Result<TokenMetadata, LedgerError> {
        let (name, symbol, decimals, total_supply, controller) = futures_util::try_join!(
            self.read(token, IAssetToken::nameCall {}, at),
            self.read(token, IAssetToken::symbolCall {}, at),
            self.read(token, IAssetToken::decimalsCall {}, at),
            self.read(token, IAssetToken::totalSupplyCall {}, at),
            self.read(token, IAssetToken::controllerCall {}, at),
        )?;

        Ok(TokenMetadata {
            name,
            symbol,
            decimals,
            total_supply,
            controller,
        })
    }

    async fn document_count(&self, token: Address, at: u64) -> Result<u64, LedgerError> {
        let count = self.read(token, IAssetToken::getNumDocsCall {}, at).await?;
        to_u64(count, IAssetToken::getNumDocsCall::SIGNATURE)
    }

    async fn document_at(
        &self,
        token: Address,
        index: u64,
        at: u64,
    ) -> Result<DocumentRecord, LedgerError> {
        let call = IAssetToken::docsCall {
            index: U256::from(index),
        };
        let doc = self.read(token, call, at).await?;

        Ok(DocumentRecord {
            name: doc.name,
            url: doc.url,
            hash: doc.docHash,
        })
    }

    async fn holder_count(&self, token: Address, at: u64) -> Result<u64, LedgerError> {
        let count = self.read(token, IAssetToken::holderCountCall {}, at).await?;
        to_u64(count, IAssetToken::holderCountCall::SIGNATURE)
    }

    async fn holder_at(
        &self,
        token: Address,
        index: u64,
        at: u64,
    ) -> Result<Address, LedgerError> {
        let call = IAssetToken::holderCall {
            index: U256::from(index),
        };
        self.read(token, call, at).await
    }

    async fn balance_of(
        &self,
        token: Address,
        owner: Address,
        at: u64,
    ) -> Result<U256, LedgerError> {
        self.read(token, IAssetToken::balanceOfCall { owner }, at).await
    }

    async fn controller_links(
        &self,
        controller: Address,
        at: u64,
    ) -> Result<ControllerLinks, LedgerError> {
        let (ledger, sale_manager, converter, distribution) = futures_util::try_join!(
            self.read(controller, IAssetController::ledgerCall {}, at),
            self.read(controller, IAssetController::saleCall {}, at),
            self.read(controller, IAssetController::converterCall {}, at),
            self.read(controller, IAssetController::distributionCall {}, at),
        )?;

        Ok(ControllerLinks {
            ledger,
            sale_manager,
            converter,
            distribution,
        })
    }

    async fn sale_count(&self, sale_manager: Address, at: u64) -> Result<u64, LedgerError> {
        let count = self.read(sale_manager, ISaleManager::getNumSalesCall {}, at).await?;
        to_u64(count, ISaleManager::getNumSalesCall::SIGNATURE)
    }

    async fn sale_at(
        &self,
        sale_manager: Address,
        index: u64,
        at: u64,
    ) -> Result<SaleRecord, LedgerError> {
        let call = ISaleManager::salesCall {
            index: U256::from(index),
        };
        let sale = self.read(sale_manager, call, at).await?;

        Ok(SaleRecord {
            start_time: to_u64(sale.startTime, ISaleManager::salesCall::SIGNATURE)?,
            end_time: to_u64(sale.endTime, ISaleManager::salesCall::SIGNATURE)?,
            tokens_to_mint: sale.tokensToMint,
            rate: sale.rate,
            tokens_remaining: sale.tokensRemaining,
            frozen: sale.frozen,
        })
    }

    async fn calc_buy_amount(
        &self,
        converter: Address,
        amount_wei: U256,
        at: u64,
    ) -> Result<U256, LedgerError> {
        let call = IConverter::calcBuyAmountCall {
            amountWei: amount_wei,
        };
        self.read(converter, call, at).await
    }

    async fn calc_sell_amount(
        &self,
        converter: Address,
        amount_tokens: U256,
        at: u64,
    ) -> Result<U256, LedgerError> {
        let call = IConverter::calcSellAmountCall {
            amountTokens: amount_tokens,
        };
        self.read(converter, call, at).await
    }
}
