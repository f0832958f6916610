//! In-memory asset model and the store the mediator keeps it in.

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// The platform token reported by the factory
    Primary,
    Issued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub url: String,
    pub hash: B256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sale {
    pub start_time: u64,
    /// Exclusive
    pub end_time: u64,
    pub tokens_to_mint: U256,
    pub tokens_remaining: U256,
    /// Wei per token
    pub rate: U256,
    pub frozen: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub to: Address,
    pub token_balance: U256,
    pub amount_sent: U256,
    pub timestamp: DateTime<Utc>,
}

/// Converter quotes and reserves
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConverterState {
    /// Tokens bought with one ether
    pub tokens_per_eth: U256,
    /// Wei received for one whole token
    pub eth_per_token: U256,
    pub eth_balance: U256,
    pub token_balance: U256,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub address: Address,
    pub kind: TokenKind,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: U256,

    pub controller: Option<Address>,
    pub ledger: Option<Address>,
    pub sale_manager: Option<Address>,
    pub converter: Option<Address>,
    pub distribution: Option<Address>,

    pub balances: HashMap<Address, U256>,
    pub documents: BTreeMap<String, Document>,
    pub sales: BTreeMap<u64, Sale>,
    pub converter_state: ConverterState,
    pub distributions: Vec<Distribution>,
}

impl Asset {
    pub fn new(address: Address, kind: TokenKind) -> Self {
        Self {
            address,
            kind,
            name: String::new(),
            symbol: String::new(),
            decimals: 0,
            total_supply: U256::ZERO,
            controller: None,
            ledger: None,
            sale_manager: None,
            converter: None,
            distribution: None,
            balances: HashMap::new(),
            documents: BTreeMap::new(),
            sales: BTreeMap::new(),
            converter_state: ConverterState::default(),
            distributions: Vec::new(),
        }
    }

    pub fn balance_of(&self, holder: &Address) -> U256 {
        self.balances.get(holder).copied().unwrap_or_default()
    }

    pub fn set_balance_of(&mut self, holder: Address, balance: U256) {
        self.balances.insert(holder, balance);
    }

    /// Moves `value` between holders. The zero address stands for minting
    /// and burning and is never credited or debited.
    pub fn handle_transfer(&mut self, from: Address, to: Address, value: U256) {
        if !from.is_zero() {
            let balance = self.balance_of(&from).saturating_sub(value);
            self.set_balance_of(from, balance);
        }
        if !to.is_zero() {
            let balance = self.balance_of(&to).saturating_add(value);
            self.set_balance_of(to, balance);
        }
    }

    /// Inserts or overwrites the document called `name`.
    pub fn put_document(&mut self, name: String, url: String, hash: B256) {
        self.documents.insert(name, Document { url, hash });
    }

    pub fn remove_document(&mut self, name: &str) -> bool {
        self.documents.remove(name).is_some()
    }

    pub fn add_sale(&mut self, id: u64, sale: Sale) {
        self.sales.insert(id, sale);
    }

    pub fn set_sale_frozen(&mut self, id: u64, frozen: bool) -> bool {
        match self.sales.get_mut(&id) {
            Some(sale) => {
                sale.frozen = frozen;
                true
            }
            None => false,
        }
    }

    /// Reduces the sale's remaining tokens by `amount_tokens`.
    pub fn handle_payment_received(&mut self, id: u64, amount_tokens: U256) -> bool {
        match self.sales.get_mut(&id) {
            Some(sale) => {
                sale.tokens_remaining = sale.tokens_remaining.saturating_sub(amount_tokens);
                true
            }
            None => false,
        }
    }

    pub fn set_converter_quotes(&mut self, tokens_per_eth: U256, eth_per_token: U256) {
        self.converter_state.tokens_per_eth = tokens_per_eth;
        self.converter_state.eth_per_token = eth_per_token;
    }

    pub fn set_converter_balances(&mut self, eth_balance: U256, token_balance: U256) {
        self.converter_state.eth_balance = eth_balance;
        self.converter_state.token_balance = token_balance;
    }

    pub fn add_distribution(&mut self, distribution: Distribution) {
        self.distributions.push(distribution);
    }

    pub fn clear_distributions(&mut self) {
        self.distributions.clear();
    }
}

pub type AssetHandle = Arc<RwLock<Asset>>;

/// Assets by token address. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct AssetStore {
    assets: Arc<RwLock<HashMap<Address, AssetHandle>>>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_asset(&self, address: &Address) -> bool {
        self.assets.read().contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<AssetHandle> {
        self.assets.read().get(address).cloned()
    }

    /// Adds `asset` unless its address is already present.
    pub fn add_asset(&self, asset: Asset) -> Option<AssetHandle> {
        let address = asset.address;
        let mut assets = self.assets.write();
        if assets.contains_key(&address) {
            return None;
        }
        let handle = Arc::new(RwLock::new(asset));
        assets.insert(address, handle.clone());
        Some(handle)
    }

    pub fn remove_asset(&self, address: &Address) -> Option<AssetHandle> {
        self.assets.write().remove(address)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.assets.read().keys().copied().collect()
    }

    pub fn handles(&self) -> Vec<AssetHandle> {
        self.assets.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.assets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn sale(remaining: u64) -> Sale {
        Sale {
            start_time: 100,
            end_time: 200,
            tokens_to_mint: U256::from(1_000u64),
            tokens_remaining: U256::from(remaining),
            rate: U256::from(5u64),
            frozen: false,
        }
    }

    #[test]
    fn test_transfer_moves_balance() {
        let mut asset = Asset::new(holder(0xaa), TokenKind::Issued);
        asset.set_balance_of(holder(1), U256::from(100u64));

        asset.handle_transfer(holder(1), holder(2), U256::from(30u64));

        assert_eq!(asset.balance_of(&holder(1)), U256::from(70u64));
        assert_eq!(asset.balance_of(&holder(2)), U256::from(30u64));
    }

    #[test]
    fn test_mint_and_burn_skip_zero_address() {
        let mut asset = Asset::new(holder(0xaa), TokenKind::Issued);

        asset.handle_transfer(Address::ZERO, holder(1), U256::from(50u64));
        asset.handle_transfer(holder(1), Address::ZERO, U256::from(20u64));

        assert_eq!(asset.balance_of(&holder(1)), U256::from(30u64));
        assert!(!asset.balances.contains_key(&Address::ZERO));
    }

    #[test]
    fn test_documents_overwrite_and_remove() {
        let mut asset = Asset::new(holder(0xaa), TokenKind::Issued);
        asset.put_document("Prospectus".into(), "ipfs://a".into(), B256::repeat_byte(1));
        asset.put_document("Prospectus".into(), "ipfs://b".into(), B256::repeat_byte(2));

        assert_eq!(asset.documents.len(), 1);
        assert_eq!(asset.documents["Prospectus"].url, "ipfs://b");
        assert!(asset.remove_document("Prospectus"));
        assert!(!asset.remove_document("Prospectus"));
    }

    #[test]
    fn test_sale_freeze_and_payment() {
        let mut asset = Asset::new(holder(0xaa), TokenKind::Issued);
        asset.add_sale(0, sale(1_000));

        assert!(asset.set_sale_frozen(0, true));
        assert!(asset.sales[&0].frozen);
        assert!(asset.handle_payment_received(0, U256::from(250u64)));
        assert_eq!(asset.sales[&0].tokens_remaining, U256::from(750u64));

        assert!(!asset.set_sale_frozen(3, true));
        assert!(!asset.handle_payment_received(3, U256::from(1u64)));
    }

    #[test]
    fn test_store_rejects_duplicate_address() {
        let store = AssetStore::new();

        assert!(store
            .add_asset(Asset::new(holder(1), TokenKind::Primary))
            .is_some());
        assert!(store
            .add_asset(Asset::new(holder(1), TokenKind::Issued))
            .is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.addresses(), vec![holder(1)]);
        assert_eq!(store.get(&holder(1)).unwrap().read().kind, TokenKind::Primary);
        assert!(store.remove_asset(&holder(1)).is_some());
        assert!(store.is_empty());
    }
}
