//! Local wallet state: the active account, its native balance and the
//! current exchange rates.

use crate::price::ExchangeRates;
use alloy_primitives::{Address, U256};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

struct WalletInner {
    active_account: watch::Sender<Option<Address>>,
    native_balance: RwLock<U256>,
    rates: RwLock<Option<ExchangeRates>>,
}

/// Shared wallet state. Cloning shares the underlying values.
#[derive(Clone)]
pub struct WalletStore {
    inner: Arc<WalletInner>,
}

impl WalletStore {
    pub fn new(active_account: Option<Address>) -> Self {
        let (active_account, _) = watch::channel(active_account);
        Self {
            inner: Arc::new(WalletInner {
                active_account,
                native_balance: RwLock::new(U256::ZERO),
                rates: RwLock::new(None),
            }),
        }
    }

    pub fn active_account(&self) -> Option<Address> {
        *self.inner.active_account.borrow()
    }

    /// Switches the active account. Subscribers are only notified when the
    /// account actually changes.
    pub fn set_active_account(&self, account: Option<Address>) -> bool {
        self.inner.active_account.send_if_modified(|current| {
            if *current == account {
                return false;
            }
            *current = account;
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Address>> {
        self.inner.active_account.subscribe()
    }

    pub fn native_balance(&self) -> U256 {
        *self.inner.native_balance.read()
    }

    pub fn set_native_balance(&self, balance: U256) {
        *self.inner.native_balance.write() = balance;
    }

    pub fn rates(&self) -> Option<ExchangeRates> {
        *self.inner.rates.read()
    }

    pub fn set_rates(&self, rates: ExchangeRates) {
        *self.inner.rates.write() = Some(rates);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_account_change_notifies_once() {
        let wallet = WalletStore::new(Some(Address::repeat_byte(1)));
        let mut changes = wallet.subscribe();

        assert!(!wallet.set_active_account(Some(Address::repeat_byte(1))));
        assert!(!changes.has_changed().unwrap());

        assert!(wallet.set_active_account(Some(Address::repeat_byte(2))));
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow_and_update(), Some(Address::repeat_byte(2)));
        assert_eq!(wallet.active_account(), Some(Address::repeat_byte(2)));
    }

    #[test]
    fn test_clones_share_state() {
        let wallet = WalletStore::new(None);
        let other = wallet.clone();

        other.set_native_balance(U256::from(7u64));
        other.set_rates(ExchangeRates {
            usd_per_eth: 500.0,
            eth_per_usd: 0.002,
        });

        assert_eq!(wallet.native_balance(), U256::from(7u64));
        assert_eq!(wallet.rates().unwrap().usd_per_eth, 500.0);
    }
}
