//! Local key signing

use crate::error::{SubmitterError, SubmitterResult};
use crate::ports::TransactionSigner;
use crate::types::Account;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{transaction::eip2718::TypedTransaction, Address, Bytes};
use tracing::info;

/// Signs for the single account whose key it holds
pub struct LocalWalletSigner {
    wallet: LocalWallet,
}

impl LocalWalletSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    /// Load the key from the environment variable `var`
    pub fn from_env(var: &str) -> SubmitterResult<Self> {
        let key = std::env::var(var).map_err(|_| {
            SubmitterError::Wallet(format!("No wallet configured. Set {}", var))
        })?;
        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| SubmitterError::Wallet(format!("Invalid private key: {}", e)))?;

        info!("Signer initialized with wallet: {:?}", wallet.address());
        Ok(Self::new(wallet))
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }
}

#[async_trait]
impl TransactionSigner for LocalWalletSigner {
    async fn sign(&self, account: &Account, tx: &TypedTransaction) -> SubmitterResult<Bytes> {
        if account.address != self.wallet.address() {
            return Err(SubmitterError::Wallet(format!(
                "No key for account {:?}",
                account.address
            )));
        }

        let chain_id = tx
            .chain_id()
            .ok_or_else(|| SubmitterError::Wallet("Transaction has no chain id".to_string()))?;
        let wallet = self.wallet.clone().with_chain_id(chain_id.as_u64());

        let signature = wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| SubmitterError::Wallet(e.to_string()))?;

        Ok(tx.rlp_signed(&signature))
    }
}
