//! Chain provider with multi-RPC support, automatic failover and an
//! optional private relay endpoint

use crate::config::{ChainConfig, GasPriceStrategy};
use crate::error::{SubmitterError, SubmitterResult};
use crate::types::{FeeParams, SubmissionChannel};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Private relay, used for both nonce queries and broadcast on the
    /// private channel
    private_provider: Option<Provider<Http>>,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: ChainConfig) -> SubmitterResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(SubmitterError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        let private_provider = match config.private_rpc_url {
            Some(ref url) => Some(Provider::<Http>::try_from(url.as_str()).map_err(|e| {
                SubmitterError::Config(format!(
                    "Invalid private relay URL for chain {}: {}",
                    config.chain_id, e
                ))
            })?),
            None => None,
        };

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            private_provider,
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Provider serving `channel`
    pub fn provider_for(&self, channel: SubmissionChannel) -> SubmitterResult<&Provider<Http>> {
        match channel {
            SubmissionChannel::Public => Ok(self.http()),
            SubmissionChannel::Private => {
                self.private_provider
                    .as_ref()
                    .ok_or_else(|| SubmitterError::ChainConnection {
                        chain_id: self.config.chain_id,
                        message: "No private relay configured".to_string(),
                    })
            }
        }
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!(
            "Chain {} failover to provider {}",
            self.config.chain_id, next
        );
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> SubmitterResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(SubmitterError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed".to_string(),
        })
    }

    /// Transaction count of `address` including the node's pending pool
    pub async fn pending_transaction_count(
        &self,
        address: Address,
        channel: SubmissionChannel,
    ) -> SubmitterResult<u64> {
        let count = self
            .provider_for(channel)?
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| SubmitterError::Nonce {
                chain_id: self.config.chain_id,
                message: e.to_string(),
            })?;

        Ok(count.as_u64())
    }

    /// Get transaction receipt status: `Some(true)` mined, `Some(false)` reverted
    pub async fn receipt_status(&self, tx_hash: H256) -> SubmitterResult<Option<bool>> {
        let receipt = self
            .http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| SubmitterError::ChainConnection {
                chain_id: self.config.chain_id,
                message: e.to_string(),
            })?;

        Ok(receipt
            .filter(|r| r.block_number.is_some())
            .map(|r| r.status == Some(U64::from(1))))
    }

    /// Estimate gas for a transaction
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> SubmitterResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| SubmitterError::ChainConnection {
                chain_id: self.config.chain_id,
                message: format!("gas estimation failed: {}", e),
            })
    }

    /// Broadcast a signed transaction through the channel's endpoint
    pub async fn send_raw_transaction(
        &self,
        raw: Bytes,
        channel: SubmissionChannel,
    ) -> Result<H256, ProviderError> {
        let provider = self
            .provider_for(channel)
            .map_err(|e| ProviderError::CustomError(e.to_string()))?;
        let pending = provider.send_raw_transaction(raw).await?;
        Ok(pending.tx_hash())
    }

    /// Get current gas price based on chain strategy
    pub async fn get_gas_price(&self) -> SubmitterResult<FeeParams> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => {
                let gas_price = self.http().get_gas_price().await.map_err(|e| {
                    SubmitterError::ChainConnection {
                        chain_id: self.config.chain_id,
                        message: e.to_string(),
                    }
                })?;
                Ok(FeeParams::Legacy {
                    gas_price: gas_price.min(self.max_gas_price()),
                })
            }
            GasPriceStrategy::Eip1559 => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                Ok(FeeParams::Dynamic {
                    max_priority_fee_per_gas: priority_fee,
                    max_fee_per_gas: max_fee,
                })
            }
        }
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(&self) -> SubmitterResult<(U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| SubmitterError::ChainConnection {
                chain_id: self.config.chain_id,
                message: e.to_string(),
            })?
            .ok_or_else(|| SubmitterError::ChainConnection {
                chain_id: self.config.chain_id,
                message: "No latest block".to_string(),
            })?;

        let base_fee = block.base_fee_per_gas.ok_or_else(|| {
            SubmitterError::UnsupportedFeeShape(format!(
                "chain {} has no base fee, use the legacy strategy",
                self.config.chain_id
            ))
        })?;

        let priority_fee = U256::from(2_000_000_000u64); // 2 gwei

        // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
        let max_fee = base_fee * 2 + priority_fee;
        let max_fee = std::cmp::min(max_fee, self.max_gas_price());

        Ok((max_fee, priority_fee.min(max_fee)))
    }

    fn max_gas_price(&self) -> U256 {
        U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64)
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn supports_private_relay(&self) -> bool {
        self.private_provider.is_some()
    }
}
