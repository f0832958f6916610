//! Event definitions watched by the mediator and the per-asset listener set.

use super::{handlers, Mediator};
use crate::asset::AssetHandle;
use crate::decode::{DecodedEvent, ParamDescriptor};
use crate::ledger::ChainAccess;
use crate::registry::{block_handler, event_handler, EventSubscription};
use alloy_primitives::{Address, B256};
use alloy_sol_types::SolEvent;
use common::address::pad_for_topic;
use common::interfaces::asset_token::IAssetToken;
use common::interfaces::converter::IConverter;
use common::interfaces::distribution::IDistribution;
use common::interfaces::sale_manager::ISaleManager;
use common::interfaces::token_factory::ITokenFactory;
use std::future::Future;
use std::sync::Arc;

/// Signature and parameter layout of one contract event.
#[derive(Debug, Clone, Copy)]
pub struct EventDef {
    pub signature: &'static str,
    /// `(name, solidity type, indexed)` in declaration order
    pub params: &'static [(&'static str, &'static str, bool)],
}

impl EventDef {
    pub fn descriptors(&self) -> Vec<ParamDescriptor> {
        self.params
            .iter()
            .map(|(name, ty, indexed)| ParamDescriptor::new(name, ty, *indexed))
            .collect()
    }
}

pub const TOKEN_CREATED: EventDef = EventDef {
    signature: ITokenFactory::TokenCreated::SIGNATURE,
    params: &[("tokenAddress", "address", false)],
};

pub const TOKEN_REMOVED: EventDef = EventDef {
    signature: ITokenFactory::TokenRemoved::SIGNATURE,
    params: &[("tokenAddress", "address", false)],
};

pub const TRANSFER: EventDef = EventDef {
    signature: IAssetToken::Transfer::SIGNATURE,
    params: &[
        ("from", "address", true),
        ("to", "address", true),
        ("value", "uint256", false),
    ],
};

const DOCUMENT_PARAMS: &[(&str, &str, bool)] = &[
    ("name", "bytes32", false),
    ("url", "string", false),
    ("documentHash", "bytes32", false),
];

pub const DOCUMENT_ADDED: EventDef = EventDef {
    signature: IAssetToken::DocumentAdded::SIGNATURE,
    params: DOCUMENT_PARAMS,
};

pub const DOCUMENT_UPDATED: EventDef = EventDef {
    signature: IAssetToken::DocumentUpdated::SIGNATURE,
    params: DOCUMENT_PARAMS,
};

pub const DOCUMENT_REMOVED: EventDef = EventDef {
    signature: IAssetToken::DocumentRemoved::SIGNATURE,
    params: DOCUMENT_PARAMS,
};

pub const SALE_CREATED: EventDef = EventDef {
    signature: ISaleManager::SaleCreated::SIGNATURE,
    params: &[
        ("saleId", "uint256", false),
        ("startTime", "uint256", false),
        ("endTime", "uint256", false),
        ("tokensToMint", "uint256", false),
        ("rate", "uint256", false),
    ],
};

pub const SALE_FROZEN: EventDef = EventDef {
    signature: ISaleManager::SaleFrozen::SIGNATURE,
    params: &[("saleId", "uint256", true)],
};

pub const SALE_UNFROZEN: EventDef = EventDef {
    signature: ISaleManager::SaleUnfrozen::SIGNATURE,
    params: &[("saleId", "uint256", true)],
};

pub const PAYMENT_RECEIVED: EventDef = EventDef {
    signature: ISaleManager::PaymentReceived::SIGNATURE,
    params: &[
        ("saleId", "uint256", true),
        ("from", "address", true),
        ("amountWei", "uint256", false),
        ("amountTokens", "uint256", false),
    ],
};

const CONVERTER_TRADE_PARAMS: &[(&str, &str, bool)] = &[
    ("addr", "address", true),
    ("amountWei", "uint256", false),
    ("amountTokens", "uint256", false),
];

pub const TOKENS_PURCHASED: EventDef = EventDef {
    signature: IConverter::TokensPurchased::SIGNATURE,
    params: CONVERTER_TRADE_PARAMS,
};

pub const TOKENS_SOLD: EventDef = EventDef {
    signature: IConverter::TokensSold::SIGNATURE,
    params: CONVERTER_TRADE_PARAMS,
};

pub const DEPOSIT_RECEIVED: EventDef = EventDef {
    signature: IConverter::DepositReceived::SIGNATURE,
    params: &[("from", "address", true), ("amount", "uint256", false)],
};

pub const DISTRIBUTION_SENT: EventDef = EventDef {
    signature: IDistribution::DistributionSent::SIGNATURE,
    params: &[
        ("id", "uint256", true),
        ("to", "address", true),
        ("tokenBalance", "uint256", false),
        ("amountSent", "uint256", false),
    ],
};

/// Topic filters selecting `DistributionSent` logs paid to `account`.
pub(crate) fn distribution_topic_filters(account: &Address) -> Vec<Option<B256>> {
    vec![None, Some(pad_for_topic(account))]
}

impl<L> Mediator<L>
where
    L: ChainAccess + 'static,
{
    pub(super) fn subscribe<F, Fut>(
        &self,
        contract: Address,
        def: &EventDef,
        start_height: u64,
        handler: F,
    ) where
        F: Fn(DecodedEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        self.watcher.register_event_listener(
            EventSubscription::new(contract, def.signature, def.descriptors(), event_handler(handler))
                .starting_at(start_height),
        );
    }

    /// Applies a synchronous asset mutation for every `def` log of `contract`.
    fn subscribe_asset(
        &self,
        contract: Address,
        def: &EventDef,
        asset: &AssetHandle,
        start_height: u64,
        apply: fn(&AssetHandle, &DecodedEvent) -> eyre::Result<()>,
    ) {
        let asset = asset.clone();
        self.subscribe(contract, def, start_height, move |event| {
            let result = apply(&asset, &event);
            async move { result }
        });
    }

    /// Registers every listener an asset needs, starting above `start_height`.
    pub(crate) fn register_asset_listeners(self: &Arc<Self>, asset: &AssetHandle, start_height: u64) {
        let (token, sale_manager, converter, distribution) = {
            let asset = asset.read();
            (asset.address, asset.sale_manager, asset.converter, asset.distribution)
        };

        self.subscribe_asset(token, &TRANSFER, asset, start_height, handlers::apply_transfer);
        self.subscribe_asset(token, &DOCUMENT_ADDED, asset, start_height, handlers::apply_document_put);
        self.subscribe_asset(token, &DOCUMENT_UPDATED, asset, start_height, handlers::apply_document_put);
        self.subscribe_asset(token, &DOCUMENT_REMOVED, asset, start_height, handlers::apply_document_removed);

        if let Some(sale_manager) = sale_manager {
            self.subscribe_asset(sale_manager, &SALE_CREATED, asset, start_height, handlers::apply_sale_created);
            self.subscribe_asset(sale_manager, &SALE_FROZEN, asset, start_height, handlers::apply_sale_frozen);
            self.subscribe_asset(sale_manager, &SALE_UNFROZEN, asset, start_height, handlers::apply_sale_unfrozen);
            self.subscribe_asset(sale_manager, &PAYMENT_RECEIVED, asset, start_height, handlers::apply_payment_received);
        }

        if let Some(converter) = converter {
            for def in [&TOKENS_PURCHASED, &TOKENS_SOLD, &DEPOSIT_RECEIVED] {
                let this = Arc::clone(self);
                let asset = asset.clone();
                self.subscribe(converter, def, start_height, move |event| {
                    let this = this.clone();
                    let asset = asset.clone();
                    async move { this.refresh_converter(&asset, event.block_number).await }
                });
            }

            let this = Arc::clone(self);
            let handle = asset.clone();
            let id = self.watcher.register_block_listener(block_handler(move |height| {
                let this = this.clone();
                let asset = handle.clone();
                async move { this.refresh_converter_balances(&asset, height).await }
            }));
            let stale = self.converter_listeners.lock().insert(token, id);
            if let Some(stale) = stale {
                self.watcher.unregister_block_listener(stale);
            }
        }

        if let (Some(distribution), Some(account)) = (distribution, self.wallet.active_account()) {
            self.watcher
                .register_event_listener(self.distribution_subscription(asset, distribution, &account, start_height));
        }
    }

    pub(crate) fn distribution_subscription(
        &self,
        asset: &AssetHandle,
        distribution: Address,
        account: &Address,
        start_height: u64,
    ) -> EventSubscription {
        let asset = asset.clone();
        EventSubscription::new(
            distribution,
            DISTRIBUTION_SENT.signature,
            DISTRIBUTION_SENT.descriptors(),
            event_handler(move |event| {
                let result = handlers::apply_distribution_sent(&asset, &event);
                async move { result }
            }),
        )
        .with_topic_filters(distribution_topic_filters(account))
        .starting_at(start_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;

    #[test]
    fn test_signatures_match_declarations() {
        assert_eq!(TRANSFER.signature, "Transfer(address,address,uint256)");
        assert_eq!(DOCUMENT_REMOVED.signature, "DocumentRemoved(bytes32,string,bytes32)");
        assert_eq!(
            PAYMENT_RECEIVED.signature,
            "PaymentReceived(uint256,address,uint256,uint256)"
        );
        assert_eq!(
            DISTRIBUTION_SENT.signature,
            "DistributionSent(uint256,address,uint256,uint256)"
        );
        assert_eq!(
            keccak256(TRANSFER.signature),
            IAssetToken::Transfer::SIGNATURE_HASH
        );
    }

    #[test]
    fn test_descriptor_types_follow_signature() {
        for def in [
            TOKEN_CREATED,
            TRANSFER,
            DOCUMENT_ADDED,
            SALE_CREATED,
            PAYMENT_RECEIVED,
            TOKENS_PURCHASED,
            DEPOSIT_RECEIVED,
            DISTRIBUTION_SENT,
        ] {
            let types: Vec<&str> = def.params.iter().map(|(_, ty, _)| *ty).collect();
            let expected = format!(
                "{}({})",
                def.signature.split('(').next().unwrap(),
                types.join(",")
            );
            assert_eq!(def.signature, expected);
        }
    }

    #[test]
    fn test_distribution_filter_targets_recipient_topic() {
        let account: Address = "0x5654Fb7027636dE7B985C778Cc063A9de1406Ef8".parse().unwrap();
        let filters = distribution_topic_filters(&account);

        assert_eq!(filters[0], None);
        assert_eq!(
            filters[1].unwrap().to_string(),
            "0x0000000000000000000000005654fb7027636de7b985c778cc063a9de1406ef8"
        );
    }
}
