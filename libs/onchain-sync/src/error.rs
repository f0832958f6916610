//! Error types for ledger access, log decoding and the watcher loop.

use alloy_primitives::Address;
use thiserror::Error;

/// Failures reported by a [`crate::LedgerClient`] or [`crate::ContractReader`].
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("failed to decode {call} result: {reason}")]
    Decode { call: &'static str, reason: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("contract {address} call {call} failed: {reason}")]
    Call {
        address: Address,
        call: &'static str,
        reason: String,
    },
}

/// Failures turning a raw log into a [`crate::DecodedEvent`].
///
/// These are contained at the listener that produced them, like handler errors.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid parameter type `{ty}` for `{name}`: {reason}")]
    InvalidType {
        name: String,
        ty: String,
        reason: String,
    },

    #[error("log has {actual} topics, expected {expected}")]
    TopicCount { expected: usize, actual: usize },

    #[error("failed to decode log data: {0}")]
    Data(String),

    #[error("missing event field `{0}`")]
    MissingField(String),

    #[error("event field `{field}` is not a {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
}

/// Fatal watcher conditions. Everything else is logged and skipped.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("ledger unavailable after {attempts} attempts: {source}")]
    LedgerUnavailable {
        attempts: u32,
        #[source]
        source: LedgerError,
    },
}
