use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;

/// Turns a fully populated transaction request into raw signed bytes.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, tx: TransactionRequest) -> eyre::Result<Bytes>;
}

/// Signs with a single in-process private key
pub struct LocalWalletSigner {
    wallet: EthereumWallet,
    address: Address,
    chain_id: u64,
}

impl LocalWalletSigner {
    pub fn from_private_key(private_key: &str, chain_id: u64) -> eyre::Result<Self> {
        let signer: PrivateKeySigner = private_key.parse()?;
        let address = signer.address();

        Ok(Self {
            wallet: EthereumWallet::from(signer),
            address,
            chain_id,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl TransactionSigner for LocalWalletSigner {
    async fn sign(&self, tx: TransactionRequest) -> eyre::Result<Bytes> {
        if let Some(from) = tx.from {
            if from != self.address {
                eyre::bail!("no key for sender {}", from);
            }
        }

        let envelope = tx.with_chain_id(self.chain_id).build(&self.wallet).await?;
        Ok(envelope.encoded_2718().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // anvil account #0
    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_signer_address_from_key() {
        let signer = LocalWalletSigner::from_private_key(KEY, 1).unwrap();
        assert_eq!(
            signer.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
        );
    }

    #[test]
    fn test_rejects_malformed_key() {
        assert!(LocalWalletSigner::from_private_key("not-a-key", 1).is_err());
    }

    #[tokio::test]
    async fn test_sign_legacy_transaction() {
        let signer = LocalWalletSigner::from_private_key(KEY, 1).unwrap();
        let tx = TransactionRequest::default()
            .with_from(signer.address())
            .with_to(Address::repeat_byte(0x11))
            .with_nonce(0)
            .with_gas_limit(21_000)
            .with_gas_price(20_000_000_000)
            .with_value(alloy_primitives::U256::from(1u64));

        let signed = signer.sign(tx).await.unwrap();
        assert!(!signed.is_empty());
    }

    #[tokio::test]
    async fn test_refuses_foreign_sender() {
        let signer = LocalWalletSigner::from_private_key(KEY, 1).unwrap();
        let tx = TransactionRequest::default().with_from(Address::repeat_byte(0x22));

        assert!(signer.sign(tx).await.is_err());
    }
}
