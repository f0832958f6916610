//! The ledger capability consumed by the watcher, mediator and processor.
//!
//! [`LedgerClient`] covers block/log access and transaction submission.
//! [`ContractReader`] covers the typed contract reads the mediator performs
//! during bulk synchronization. Both are implemented over alloy by
//! [`crate::AlloyLedger`] and in memory by the test mock.

use crate::error::LedgerError;
use alloy::rpc::types::TransactionRequest;
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Log filter: one contract, positional topics (`None` is a wildcard) and an
/// inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub topics: Vec<Option<B256>>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogQuery {
    /// Whether `log` would be returned by this query.
    pub fn matches(&self, log: &RawLog) -> bool {
        if log.address != self.address
            || log.block_number < self.from_block
            || log.block_number > self.to_block
        {
            return false;
        }

        self.topics.iter().enumerate().all(|(i, wanted)| match wanted {
            Some(topic) => log.topics.get(i) == Some(topic),
            None => true,
        })
    }
}

/// A log entry as returned by the ledger, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

/// Transaction receipt information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    pub status: bool,
}

/// Ordered progress of a submitted transaction.
///
/// A stream carries at most one `Hash` and one `Receipt`, and ends with
/// exactly one `Confirmed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionEvent {
    Hash(B256),
    Receipt(TxReceipt),
    Confirmed(TxReceipt),
    Failed(String),
}

pub type SubmissionUpdates = mpsc::UnboundedReceiver<SubmissionEvent>;

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn head_height(&self) -> Result<u64, LedgerError>;

    async fn block_timestamp(&self, height: u64) -> Result<DateTime<Utc>, LedgerError>;

    async fn logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, LedgerError>;

    /// Outstanding transaction count of `address`, used as its next nonce.
    async fn transaction_count(&self, address: Address) -> Result<u64, LedgerError>;

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, LedgerError>;

    /// Native currency balance, at `at` or at the head when `None`.
    async fn native_balance(&self, address: Address, at: Option<u64>)
        -> Result<U256, LedgerError>;

    /// Broadcasts a signed transaction and reports its progress.
    fn submit(&self, signed: Bytes) -> SubmissionUpdates;

    fn hash(&self, bytes: &[u8]) -> B256 {
        keccak256(bytes)
    }

    fn canonical_address(&self, raw: &str) -> Result<Address, LedgerError> {
        raw.trim()
            .parse::<Address>()
            .map_err(|_| LedgerError::InvalidAddress(raw.to_string()))
    }
}

/// Token identity as read from the token contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: U256,
    pub controller: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    /// NUL-padded name, see `common::fixed_string`
    pub name: B256,
    pub url: String,
    pub hash: B256,
}

/// Satellite contracts of a token. Zero means the feature is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerLinks {
    pub ledger: Address,
    pub sale_manager: Address,
    pub converter: Address,
    pub distribution: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleRecord {
    pub start_time: u64,
    pub end_time: u64,
    pub tokens_to_mint: U256,
    pub rate: U256,
    pub tokens_remaining: U256,
    pub frozen: bool,
}

/// Typed contract reads, all evaluated at an explicit block height.
#[async_trait]
pub trait ContractReader: Send + Sync {
    async fn primary_token(&self, factory: Address, at: u64) -> Result<Address, LedgerError>;

    async fn token_count(&self, factory: Address, at: u64) -> Result<u64, LedgerError>;

    async fn token_at(&self, factory: Address, index: u64, at: u64)
        -> Result<Address, LedgerError>;

    async fn token_metadata(&self, token: Address, at: u64) -> Result<TokenMetadata, LedgerError>;

    async fn document_count(&self, token: Address, at: u64) -> Result<u64, LedgerError>;

    async fn document_at(
        &self,
        token: Address,
        index: u64,
        at: u64,
    ) -> Result<DocumentRecord, LedgerError>;

    async fn holder_count(&self, token: Address, at: u64) -> Result<u64, LedgerError>;

    async fn holder_at(&self, token: Address, index: u64, at: u64)
        -> Result<Address, LedgerError>;

    async fn balance_of(&self, token: Address, owner: Address, at: u64)
        -> Result<U256, LedgerError>;

    async fn controller_links(
        &self,
        controller: Address,
        at: u64,
    ) -> Result<ControllerLinks, LedgerError>;

    async fn sale_count(&self, sale_manager: Address, at: u64) -> Result<u64, LedgerError>;

    async fn sale_at(
        &self,
        sale_manager: Address,
        index: u64,
        at: u64,
    ) -> Result<SaleRecord, LedgerError>;

    async fn calc_buy_amount(
        &self,
        converter: Address,
        amount_wei: U256,
        at: u64,
    ) -> Result<U256, LedgerError>;

    async fn calc_sell_amount(
        &self,
        converter: Address,
        amount_tokens: U256,
        at: u64,
    ) -> Result<U256, LedgerError>;
}

/// Everything the mediator needs from the chain.
pub trait ChainAccess: LedgerClient + ContractReader {}

impl<T: LedgerClient + ContractReader + ?Sized> ChainAccess for T {}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_at(block: u64, topics: Vec<B256>) -> RawLog {
        RawLog {
            address: Address::repeat_byte(0xaa),
            topics,
            data: Bytes::new(),
            block_number: block,
            transaction_hash: B256::repeat_byte(1),
            log_index: 0,
        }
    }

    #[test]
    fn test_query_matches_range_inclusive() {
        let query = LogQuery {
            address: Address::repeat_byte(0xaa),
            topics: vec![],
            from_block: 5,
            to_block: 10,
        };

        assert!(!query.matches(&log_at(4, vec![])));
        assert!(query.matches(&log_at(5, vec![])));
        assert!(query.matches(&log_at(10, vec![])));
        assert!(!query.matches(&log_at(11, vec![])));
    }

    #[test]
    fn test_query_matches_positional_topics() {
        let sig = B256::repeat_byte(0x01);
        let to = B256::repeat_byte(0x02);
        let query = LogQuery {
            address: Address::repeat_byte(0xaa),
            topics: vec![Some(sig), None, Some(to)],
            from_block: 0,
            to_block: 100,
        };

        assert!(query.matches(&log_at(1, vec![sig, B256::repeat_byte(9), to])));
        assert!(!query.matches(&log_at(1, vec![sig, B256::repeat_byte(9), sig])));
        assert!(!query.matches(&log_at(1, vec![sig])));
    }

    #[test]
    fn test_canonical_address_rejects_malformed() {
        struct Hashing;

        #[async_trait]
        impl LedgerClient for Hashing {
            async fn head_height(&self) -> Result<u64, LedgerError> {
                Ok(0)
            }
            async fn block_timestamp(&self, _: u64) -> Result<DateTime<Utc>, LedgerError> {
                Ok(Utc::now())
            }
            async fn logs(&self, _: &LogQuery) -> Result<Vec<RawLog>, LedgerError> {
                Ok(vec![])
            }
            async fn transaction_count(&self, _: Address) -> Result<u64, LedgerError> {
                Ok(0)
            }
            async fn estimate_gas(&self, _: &TransactionRequest) -> Result<u64, LedgerError> {
                Ok(0)
            }
            async fn native_balance(&self, _: Address, _: Option<u64>) -> Result<U256, LedgerError> {
                Ok(U256::ZERO)
            }
            fn submit(&self, _: Bytes) -> SubmissionUpdates {
                mpsc::unbounded_channel().1
            }
        }

        let ledger = Hashing;
        assert!(ledger.canonical_address("0x12").is_err());
        assert_eq!(
            ledger
                .canonical_address(" 0x5654Fb7027636dE7B985C778Cc063A9de1406Ef8 ")
                .unwrap(),
            "0x5654fb7027636de7b985c778cc063a9de1406ef8".parse::<Address>().unwrap()
        );
        assert_eq!(ledger.hash(b""), keccak256(b""));
    }
}
