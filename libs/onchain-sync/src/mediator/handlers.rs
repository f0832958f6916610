//! Asset mutations driven by decoded events.

use crate::asset::{AssetHandle, Distribution, Sale};
use crate::decode::DecodedEvent;
use common::fixed_string;
use eyre::eyre;

fn small_uint(event: &DecodedEvent, name: &str) -> eyre::Result<u64> {
    let value = event.uint(name)?;
    u64::try_from(value).map_err(|_| eyre!("{} out of range: {}", name, value))
}

pub(crate) fn apply_transfer(asset: &AssetHandle, event: &DecodedEvent) -> eyre::Result<()> {
    let from = event.address("from")?;
    let to = event.address("to")?;
    let value = event.uint("value")?;

    asset.write().handle_transfer(from, to, value);
    Ok(())
}

/// Handles both added and updated documents.
pub(crate) fn apply_document_put(asset: &AssetHandle, event: &DecodedEvent) -> eyre::Result<()> {
    let name = fixed_string::decode_bytes(event.fixed_bytes("name")?.as_slice());
    let url = event.string("url")?;
    let hash = event.fixed_bytes("documentHash")?;

    asset.write().put_document(name, url, hash);
    Ok(())
}

pub(crate) fn apply_document_removed(asset: &AssetHandle, event: &DecodedEvent) -> eyre::Result<()> {
    let name = fixed_string::decode_bytes(event.fixed_bytes("name")?.as_slice());

    if !asset.write().remove_document(&name) {
        tracing::debug!(document = %name, "Removed document was not cached");
    }
    Ok(())
}

pub(crate) fn apply_sale_created(asset: &AssetHandle, event: &DecodedEvent) -> eyre::Result<()> {
    let id = small_uint(event, "saleId")?;
    let tokens_to_mint = event.uint("tokensToMint")?;
    let sale = Sale {
        start_time: small_uint(event, "startTime")?,
        end_time: small_uint(event, "endTime")?,
        tokens_to_mint,
        tokens_remaining: tokens_to_mint,
        rate: event.uint("rate")?,
        frozen: false,
    };

    asset.write().add_sale(id, sale);
    Ok(())
}

fn set_frozen(asset: &AssetHandle, event: &DecodedEvent, frozen: bool) -> eyre::Result<()> {
    let id = small_uint(event, "saleId")?;
    if !asset.write().set_sale_frozen(id, frozen) {
        return Err(eyre!("unknown sale {}", id));
    }
    Ok(())
}

pub(crate) fn apply_sale_frozen(asset: &AssetHandle, event: &DecodedEvent) -> eyre::Result<()> {
    set_frozen(asset, event, true)
}

pub(crate) fn apply_sale_unfrozen(asset: &AssetHandle, event: &DecodedEvent) -> eyre::Result<()> {
    set_frozen(asset, event, false)
}

pub(crate) fn apply_payment_received(asset: &AssetHandle, event: &DecodedEvent) -> eyre::Result<()> {
    let id = small_uint(event, "saleId")?;
    let amount_tokens = event.uint("amountTokens")?;

    if !asset.write().handle_payment_received(id, amount_tokens) {
        return Err(eyre!("payment for unknown sale {}", id));
    }
    Ok(())
}

pub(crate) fn distribution_from_event(event: &DecodedEvent) -> eyre::Result<Distribution> {
    Ok(Distribution {
        to: event.address("to")?,
        token_balance: event.uint("tokenBalance")?,
        amount_sent: event.uint("amountSent")?,
        timestamp: event.block_timestamp,
    })
}

pub(crate) fn apply_distribution_sent(asset: &AssetHandle, event: &DecodedEvent) -> eyre::Result<()> {
    let distribution = distribution_from_event(event)?;
    asset.write().add_distribution(distribution);
    Ok(())
}
