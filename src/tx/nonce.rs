//! Nonce resolution across public and private relay pools
//!
//! A public node's "pending" transaction count does not include
//! transactions sitting in a private relay. Those are counted from the
//! local store and added on top when submitting publicly.

use crate::error::SubmitterResult;
use crate::ports::{NodeQuery, PendingTransactionStore};
use crate::types::SubmissionChannel;

use ethers::types::Address;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct NonceReconciler {
    node: Arc<dyn NodeQuery>,
    store: Arc<dyn PendingTransactionStore>,
}

impl NonceReconciler {
    pub fn new(node: Arc<dyn NodeQuery>, store: Arc<dyn PendingTransactionStore>) -> Self {
        Self { node, store }
    }

    /// Next nonce for `address` on `chain_id` when submitting via `channel`
    pub async fn resolve_nonce(
        &self,
        address: Address,
        chain_id: u64,
        channel: SubmissionChannel,
    ) -> SubmitterResult<u64> {
        let public_nonce = self
            .node
            .pending_transaction_count(address, chain_id, channel)
            .await?;

        let private_in_flight = self.private_in_flight_count(address, chain_id).await;

        let nonce = match channel {
            // The private relay already accounts for its own queue
            SubmissionChannel::Private => public_nonce,
            SubmissionChannel::Public => public_nonce + private_in_flight,
        };

        debug!(
            "Resolved nonce {} for {:?} on chain {} via {} channel ({} private in flight)",
            nonce, address, chain_id, channel, private_in_flight
        );
        crate::metrics::record_private_in_flight(chain_id, private_in_flight);

        Ok(nonce)
    }

    /// Nonces held by pending private-channel transactions for `address`
    /// on `chain_id`. A cancellation shares its original's nonce and is
    /// counted once. An unavailable store counts as none.
    pub async fn private_in_flight_count(&self, address: Address, chain_id: u64) -> u64 {
        match self.store.list_pending(address).await {
            Ok(records) => {
                let mut nonces = HashSet::new();
                let mut unnumbered = 0u64;
                for record in records.iter().filter(|r| r.is_private_in_flight(chain_id)) {
                    match record.nonce {
                        Some(nonce) => {
                            nonces.insert(nonce);
                        }
                        None => unnumbered += 1,
                    }
                }
                nonces.len() as u64 + unnumbered
            }
            Err(e) => {
                warn!(
                    "Could not read pending transactions for {:?}, assuming none in flight: {}",
                    address, e
                );
                0
            }
        }
    }
}
