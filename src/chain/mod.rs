//! Chain module - handles connections to every configured chain
//!
//! This module provides:
//! - Multi-RPC provider management with automatic failover
//! - Private relay endpoints per chain
//! - The node query and fee oracle used by the submission core

pub mod provider;

pub use provider::ChainProvider;

use crate::config::Settings;
use crate::error::{SubmitterError, SubmitterResult};
use crate::ports::{FeeOracle, NodeQuery};
use crate::types::{FeeParams, SubmissionChannel};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, H256};
use std::sync::Arc;
use tracing::info;

/// Manages connections to all configured chains
#[derive(Default)]
pub struct ChainManager {
    /// Chain providers indexed by chain ID
    providers: DashMap<u64, Arc<ChainProvider>>,
}

impl ChainManager {
    /// Create a new chain manager with all configured chains
    pub fn new(settings: &Settings) -> SubmitterResult<Self> {
        let providers = DashMap::new();

        for (_, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} (ID: {}, private relay: {})",
                chain_config.name,
                chain_config.chain_id,
                chain_config.private_rpc_url.is_some()
            );

            let provider = ChainProvider::new(chain_config.clone())?;
            providers.insert(chain_config.chain_id, Arc::new(provider));
        }

        Ok(Self { providers })
    }

    /// Get provider for a specific chain
    pub fn get_provider(&self, chain_id: u64) -> SubmitterResult<Arc<ChainProvider>> {
        self.providers
            .get(&chain_id)
            .map(|p| p.clone())
            .ok_or(SubmitterError::ChainNotFound { chain_id })
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let providers: Vec<_> = self
            .providers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut results = Vec::with_capacity(providers.len());
        for provider in providers {
            let healthy = provider.health_check().await;
            results.push((provider.chain_id(), healthy));

            crate::metrics::record_chain_health(provider.chain_id(), healthy);
        }

        results
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        self.providers.iter().map(|e| *e.key()).collect()
    }

    /// Chains with a private relay endpoint
    pub fn private_relay_chains(&self) -> Vec<u64> {
        self.providers
            .iter()
            .filter(|e| e.value().supports_private_relay())
            .map(|e| *e.key())
            .collect()
    }
}

#[async_trait]
impl NodeQuery for ChainManager {
    async fn pending_transaction_count(
        &self,
        address: Address,
        chain_id: u64,
        channel: SubmissionChannel,
    ) -> SubmitterResult<u64> {
        self.get_provider(chain_id)?
            .pending_transaction_count(address, channel)
            .await
    }

    async fn receipt_status(&self, chain_id: u64, tx_hash: H256) -> SubmitterResult<Option<bool>> {
        self.get_provider(chain_id)?.receipt_status(tx_hash).await
    }
}

#[async_trait]
impl FeeOracle for ChainManager {
    async fn network_fees(&self, chain_id: u64) -> SubmitterResult<FeeParams> {
        self.get_provider(chain_id)?.get_gas_price().await
    }
}
