//! Keeps RELQD asset state in sync with the chain and drives transactions
//! back into it.
//!
//! - [`watcher::ChainWatcher`] polls the head and dispatches new logs to the
//!   listeners held in its [`registry::SubscriptionRegistry`]
//! - [`mediator::Mediator`] bulk-loads every factory token at a height and
//!   keeps the [`asset::AssetStore`] and [`wallet::WalletStore`] current
//! - [`tx::TxProcessor`] submits queued transactions one at a time and counts
//!   their confirmations
//!
//! All chain access goes through the [`ledger::LedgerClient`] and
//! [`ledger::ContractReader`] capabilities; [`alloy_ledger::AlloyLedger`]
//! implements both over an alloy provider.

pub mod alloy_ledger;
pub mod asset;
pub mod decode;
pub mod error;
pub mod ledger;
pub mod mediator;
pub mod price;
pub mod registry;
pub mod signer;
pub mod tx;
pub mod wallet;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_utils;

pub use alloy_ledger::AlloyLedger;
pub use asset::{Asset, AssetHandle, AssetStore, TokenKind};
pub use decode::{DecodedEvent, ParamDescriptor};
pub use error::{DecodeError, LedgerError, WatcherError};
pub use ledger::{ChainAccess, ContractReader, LedgerClient};
pub use mediator::{Mediator, MediatorConfig};
pub use price::{ExchangeRates, PriceFeed};
pub use registry::{EventSubscription, SubscriptionRegistry};
pub use signer::{LocalWalletSigner, TransactionSigner};
pub use tx::{ProcessorConfig, TxHandle, TxProcessor, TxStatus};
pub use wallet::WalletStore;
pub use watcher::{ChainWatcher, WatcherConfig};
