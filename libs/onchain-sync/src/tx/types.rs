use crate::ledger::TxReceipt;
use alloy::rpc::types::TransactionRequest;
use alloy_primitives::{Address, Bytes, B256};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// `Pending -> Submitted -> {Mined | Error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Submitted,
    Mined,
    Error,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Mined | TxStatus::Error)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TxStatus::Pending => "pending",
            TxStatus::Submitted => "submitted",
            TxStatus::Mined => "mined",
            TxStatus::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct TransactionState {
    pub id: u64,
    /// Fields as submitted, with nonce, gas and defaults filled in during processing
    pub raw: TransactionRequest,
    pub from: Address,
    pub signed: Option<Bytes>,
    pub status: TxStatus,
    pub error: Option<String>,
    pub tx_hash: Option<B256>,
    pub receipt: Option<TxReceipt>,
    pub confirmations: u64,
    pub metadata: serde_json::Value,
}

impl TransactionState {
    pub fn new(id: u64, from: Address, raw: TransactionRequest, metadata: serde_json::Value) -> Self {
        Self {
            id,
            raw,
            from,
            signed: None,
            status: TxStatus::Pending,
            error: None,
            tx_hash: None,
            receipt: None,
            confirmations: 0,
            metadata,
        }
    }

    /// Moves to `status` unless already terminal.
    pub fn set_status(&mut self, status: TxStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if !self.set_status(TxStatus::Error) {
            return false;
        }
        self.error = Some(error.into());
        true
    }

    /// Counts one more block on a mined transaction. Returns the new count.
    pub fn increment_confirmations(&mut self) -> u64 {
        if self.status == TxStatus::Mined {
            self.confirmations += 1;
        }
        self.confirmations
    }
}

pub type TxHandle = Arc<RwLock<TransactionState>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> TransactionState {
        TransactionState::new(1, Address::ZERO, TransactionRequest::default(), serde_json::Value::Null)
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut tx = state();
        assert!(tx.set_status(TxStatus::Submitted));
        assert!(tx.set_status(TxStatus::Mined));

        assert!(!tx.set_status(TxStatus::Submitted));
        assert!(!tx.fail("late error"));
        assert_eq!(tx.status, TxStatus::Mined);
        assert_eq!(tx.error, None);
    }

    #[test]
    fn test_fail_records_cause() {
        let mut tx = state();
        assert!(tx.fail("gas estimation failed"));

        assert_eq!(tx.status, TxStatus::Error);
        assert_eq!(tx.error.as_deref(), Some("gas estimation failed"));
        assert_eq!(tx.status.to_string(), "error");
    }

    #[test]
    fn test_only_mined_counts_confirmations() {
        let mut tx = state();
        assert_eq!(tx.increment_confirmations(), 0);

        tx.set_status(TxStatus::Mined);
        tx.increment_confirmations();
        assert_eq!(tx.increment_confirmations(), 2);
    }
}
