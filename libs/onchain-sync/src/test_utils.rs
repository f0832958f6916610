//! In-memory ledger used by the unit tests of this crate.

use crate::error::LedgerError;
use crate::ledger::{
    ContractReader, ControllerLinks, DocumentRecord, LedgerClient, LogQuery, RawLog, SaleRecord,
    SubmissionEvent, SubmissionUpdates, TokenMetadata, TxReceipt,
};
use crate::signer::TransactionSigner;
use alloy::rpc::types::TransactionRequest;
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) const GENESIS_TIME: i64 = 1_500_000_000;

pub(crate) fn timestamp_of(height: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(GENESIS_TIME + height as i64 * 15, 0).unwrap()
}

pub(crate) fn make_log(
    address: Address,
    signature: &str,
    indexed: Vec<B256>,
    data: Vec<u8>,
    block_number: u64,
    log_index: u64,
) -> RawLog {
    let mut topics = vec![keccak256(signature.as_bytes())];
    topics.extend(indexed);

    RawLog {
        address,
        topics,
        data: Bytes::from(data),
        block_number,
        transaction_hash: keccak256(format!("{}:{}:{}", address, block_number, log_index)),
        log_index,
    }
}

pub(crate) struct MockToken {
    pub metadata: TokenMetadata,
    pub documents: Vec<DocumentRecord>,
    pub holders: Vec<(Address, U256)>,
}

/// Quotes per converter; `None` makes the call fail.
#[derive(Default)]
pub(crate) struct MockConverter {
    pub buy: Option<U256>,
    pub sell: Option<U256>,
    pub token_balance: U256,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum SubmissionMode {
    /// Hash, receipt and confirmation are delivered immediately
    #[default]
    Confirm,
    /// The receipt reports a revert
    Revert,
    /// Only the hash is delivered, then the stream closes
    Close,
    /// The sender is parked in `held_streams` for the test to drive
    Manual,
}

#[derive(Default)]
pub(crate) struct MockState {
    pub head: u64,
    pub head_failures: u32,
    pub log_failures: u32,
    pub logs: Vec<RawLog>,
    pub log_queries: Vec<LogQuery>,

    pub native_balances: HashMap<Address, U256>,
    pub balance_queries: Vec<(Address, Option<u64>)>,

    pub primary: Address,
    pub issued: Vec<Address>,
    pub tokens: HashMap<Address, MockToken>,
    pub controllers: HashMap<Address, ControllerLinks>,
    pub sales: HashMap<Address, Vec<SaleRecord>>,
    pub converters: HashMap<Address, MockConverter>,

    pub nonces: HashMap<Address, u64>,
    pub estimate: u64,
    pub failing_estimates: HashSet<Address>,
    pub fail_signing: bool,
    pub submission_mode: SubmissionMode,
    pub submitted: Vec<Bytes>,
    pub held_streams: Vec<mpsc::UnboundedSender<SubmissionEvent>>,
    pub journal: Vec<String>,
}

#[derive(Clone, Default)]
pub(crate) struct MockLedger {
    state: Arc<Mutex<MockState>>,
}

impl MockLedger {
    pub fn new() -> Self {
        let ledger = Self::default();
        ledger.with(|s| s.estimate = 21_000);
        ledger
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn set_head(&self, head: u64) {
        self.with(|s| s.head = head);
    }

    pub fn push_log(&self, log: RawLog) {
        self.with(|s| s.logs.push(log));
    }

    pub fn journal(&self) -> Vec<String> {
        self.with(|s| s.journal.clone())
    }

    pub fn add_token(&self, address: Address, name: &str, controller: Address) {
        self.with(|s| {
            s.tokens.insert(
                address,
                MockToken {
                    metadata: TokenMetadata {
                        name: name.to_string(),
                        symbol: name.to_uppercase(),
                        decimals: 18,
                        total_supply: U256::from(1_000_000u64),
                        controller,
                    },
                    documents: Vec::new(),
                    holders: Vec::new(),
                },
            );
        });
    }

    fn missing(address: Address, call: &'static str) -> LedgerError {
        LedgerError::Call {
            address,
            call,
            reason: "execution reverted".to_string(),
        }
    }

    fn token<R>(
        &self,
        token: Address,
        call: &'static str,
        f: impl FnOnce(&MockToken) -> Option<R>,
    ) -> Result<R, LedgerError> {
        self.with(|s| s.tokens.get(&token).and_then(f))
            .ok_or_else(|| Self::missing(token, call))
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn head_height(&self) -> Result<u64, LedgerError> {
        self.with(|s| {
            if s.head_failures > 0 {
                s.head_failures -= 1;
                return Err(LedgerError::Rpc("connection refused".to_string()));
            }
            Ok(s.head)
        })
    }

    async fn block_timestamp(&self, height: u64) -> Result<DateTime<Utc>, LedgerError> {
        Ok(timestamp_of(height))
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, LedgerError> {
        self.with(|s| {
            s.log_queries.push(query.clone());
            if s.log_failures > 0 {
                s.log_failures -= 1;
                return Err(LedgerError::Rpc("timeout".to_string()));
            }
            Ok(s.logs.iter().filter(|l| query.matches(l)).cloned().collect())
        })
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, LedgerError> {
        self.with(|s| {
            let nonce = s.nonces.get(&address).copied().unwrap_or(0);
            s.journal.push(format!("nonce:{}", nonce));
            Ok(nonce)
        })
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, LedgerError> {
        let to = tx.to.and_then(|kind| kind.to().copied()).unwrap_or_default();
        self.with(|s| {
            if s.failing_estimates.contains(&to) {
                return Err(LedgerError::Rpc("gas required exceeds allowance".to_string()));
            }
            Ok(s.estimate)
        })
    }

    async fn native_balance(
        &self,
        address: Address,
        at: Option<u64>,
    ) -> Result<U256, LedgerError> {
        self.with(|s| {
            s.balance_queries.push((address, at));
            Ok(s.native_balances.get(&address).copied().unwrap_or_default())
        })
    }

    fn submit(&self, signed: Bytes) -> SubmissionUpdates {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        self.with(|s| {
            s.journal.push("submit".to_string());
            s.submitted.push(signed.clone());

            let tx_hash = keccak256(&signed);
            let receipt = TxReceipt {
                tx_hash,
                block_number: s.head + 1,
                gas_used: s.estimate,
                status: s.submission_mode != SubmissionMode::Revert,
            };

            match s.submission_mode {
                SubmissionMode::Confirm => {
                    let _ = updates_tx.send(SubmissionEvent::Hash(tx_hash));
                    let _ = updates_tx.send(SubmissionEvent::Receipt(receipt.clone()));
                    // the sender's nonce is consumed once the transaction is mined
                    if let Some(from) = s.journal_sender() {
                        *s.nonces.entry(from).or_default() += 1;
                    }
                    s.journal.push("confirmed".to_string());
                    let _ = updates_tx.send(SubmissionEvent::Confirmed(receipt));
                }
                SubmissionMode::Revert => {
                    let _ = updates_tx.send(SubmissionEvent::Hash(tx_hash));
                    let _ = updates_tx.send(SubmissionEvent::Receipt(receipt));
                    let _ = updates_tx.send(SubmissionEvent::Failed("reverted".to_string()));
                }
                SubmissionMode::Close => {
                    let _ = updates_tx.send(SubmissionEvent::Hash(tx_hash));
                }
                SubmissionMode::Manual => s.held_streams.push(updates_tx),
            }
        });

        updates_rx
    }
}

impl MockState {
    /// Sender of the most recently signed transaction, as recorded by the mock signer.
    fn journal_sender(&self) -> Option<Address> {
        self.journal
            .iter()
            .rev()
            .find_map(|entry| entry.strip_prefix("sign:"))
            .and_then(|from| from.parse().ok())
    }
}

#[async_trait]
impl TransactionSigner for MockLedger {
    async fn sign(&self, tx: TransactionRequest) -> eyre::Result<Bytes> {
        self.with(|s| {
            if s.fail_signing {
                eyre::bail!("no key for sender");
            }
            let from = tx.from.unwrap_or_default();
            s.journal.push(format!("sign:{}", from));
            Ok(Bytes::from(
                format!(
                    "{}:{}:{}",
                    from,
                    tx.nonce.unwrap_or_default(),
                    tx.gas.unwrap_or_default()
                )
                .into_bytes(),
            ))
        })
    }
}

#[async_trait]
impl ContractReader for MockLedger {
    async fn primary_token(&self, _factory: Address, _at: u64) -> Result<Address, LedgerError> {
        Ok(self.with(|s| s.primary))
    }

    async fn token_count(&self, _factory: Address, _at: u64) -> Result<u64, LedgerError> {
        Ok(self.with(|s| s.issued.len() as u64))
    }

    async fn token_at(
        &self,
        factory: Address,
        index: u64,
        _at: u64,
    ) -> Result<Address, LedgerError> {
        self.with(|s| s.issued.get(index as usize).copied())
            .ok_or_else(|| Self::missing(factory, "tokens(uint256)"))
    }

    async fn token_metadata(&self, token: Address, _at: u64) -> Result<TokenMetadata, LedgerError> {
        self.token(token, "name()", |t| Some(t.metadata.clone()))
    }

    async fn document_count(&self, token: Address, _at: u64) -> Result<u64, LedgerError> {
        self.token(token, "getNumDocs()", |t| Some(t.documents.len() as u64))
    }

    async fn document_at(
        &self,
        token: Address,
        index: u64,
        _at: u64,
    ) -> Result<DocumentRecord, LedgerError> {
        self.token(token, "docs(uint256)", |t| {
            t.documents.get(index as usize).cloned()
        })
    }

    async fn holder_count(&self, token: Address, _at: u64) -> Result<u64, LedgerError> {
        self.token(token, "holderCount()", |t| Some(t.holders.len() as u64))
    }

    async fn holder_at(
        &self,
        token: Address,
        index: u64,
        _at: u64,
    ) -> Result<Address, LedgerError> {
        self.token(token, "holder(uint256)", |t| {
            t.holders.get(index as usize).map(|(holder, _)| *holder)
        })
    }

    async fn balance_of(
        &self,
        token: Address,
        owner: Address,
        _at: u64,
    ) -> Result<U256, LedgerError> {
        let converter_balance = self.with(|s| {
            s.converters
                .get(&owner)
                .map(|c| c.token_balance)
        });
        if let Some(balance) = converter_balance {
            return Ok(balance);
        }

        self.token(token, "balanceOf(address)", |t| {
            Some(
                t.holders
                    .iter()
                    .find(|(holder, _)| *holder == owner)
                    .map(|(_, balance)| *balance)
                    .unwrap_or_default(),
            )
        })
    }

    async fn controller_links(
        &self,
        controller: Address,
        _at: u64,
    ) -> Result<ControllerLinks, LedgerError> {
        self.with(|s| s.controllers.get(&controller).copied())
            .ok_or_else(|| Self::missing(controller, "sale()"))
    }

    async fn sale_count(&self, sale_manager: Address, _at: u64) -> Result<u64, LedgerError> {
        Ok(self.with(|s| {
            s.sales
                .get(&sale_manager)
                .map(|sales| sales.len() as u64)
                .unwrap_or(0)
        }))
    }

    async fn sale_at(
        &self,
        sale_manager: Address,
        index: u64,
        _at: u64,
    ) -> Result<SaleRecord, LedgerError> {
        self.with(|s| {
            s.sales
                .get(&sale_manager)
                .and_then(|sales| sales.get(index as usize).cloned())
        })
        .ok_or_else(|| Self::missing(sale_manager, "sales(uint256)"))
    }

    async fn calc_buy_amount(
        &self,
        converter: Address,
        _amount_wei: U256,
        _at: u64,
    ) -> Result<U256, LedgerError> {
        self.with(|s| s.converters.get(&converter).and_then(|c| c.buy))
            .ok_or_else(|| Self::missing(converter, "calcBuyAmount(uint256)"))
    }

    async fn calc_sell_amount(
        &self,
        converter: Address,
        _amount_tokens: U256,
        _at: u64,
    ) -> Result<U256, LedgerError> {
        self.with(|s| s.converters.get(&converter).and_then(|c| c.sell))
            .ok_or_else(|| Self::missing(converter, "calcSellAmount(uint256)"))
    }
}
