//! Submission sink that signs and broadcasts through chain RPC endpoints

use crate::chain::{ChainManager, ChainProvider};
use crate::ports::{
    PendingTransactionStore, SendParams, SinkReceipt, SinkRejection, SubmissionSink,
    TransactionSigner,
};
use crate::types::{
    FeeParams, PendingTransactionRecord, RequestFormat, TransactionStatus, TxRequest,
};

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Eip1559TransactionRequest, TransactionRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Signs, broadcasts and records transactions. Never retries: a send that
/// timed out may still have reached the pool.
pub struct RpcSubmissionSink {
    chains: Arc<ChainManager>,
    signer: Arc<dyn TransactionSigner>,
    store: Arc<dyn PendingTransactionStore>,
}

impl RpcSubmissionSink {
    pub fn new(
        chains: Arc<ChainManager>,
        signer: Arc<dyn TransactionSigner>,
        store: Arc<dyn PendingTransactionStore>,
    ) -> Self {
        Self {
            chains,
            signer,
            store,
        }
    }

    /// Fill in whatever pricing the caller left out
    async fn complete(
        &self,
        provider: &ChainProvider,
        request: TxRequest,
        chain_id: u64,
        nonce: u64,
    ) -> Result<(TxRequest, TypedTransaction), SinkRejection> {
        let fee = match request.fee {
            Some(fee) => fee,
            None => provider
                .get_gas_price()
                .await
                .map_err(|e| SinkRejection::new(e.to_string()))?,
        };

        let mut tx = build_typed_tx(&request, chain_id, nonce, fee);
        let gas_limit = match request.gas_limit {
            Some(gas_limit) => gas_limit,
            None => provider
                .estimate_gas(&tx)
                .await
                .map_err(|e| SinkRejection::new(e.to_string()))?,
        };
        tx.set_gas(gas_limit);

        let request = TxRequest {
            chain_id: Some(chain_id),
            ..request
        }
        .with_fee(fee)
        .with_gas_limit(gas_limit);

        Ok((request, tx))
    }
}

#[async_trait]
impl SubmissionSink for RpcSubmissionSink {
    async fn send(&self, request: TxRequest, params: SendParams) -> Result<SinkReceipt, SinkRejection> {
        let chain_id = params.chain_id;
        let nonce = request
            .nonce
            .ok_or_else(|| SinkRejection::new("request has no nonce"))?;
        let provider = self
            .chains
            .get_provider(chain_id)
            .map_err(|e| SinkRejection::new(e.to_string()))?;

        let (request, tx) = self.complete(&provider, request, chain_id, nonce).await?;

        let raw = self
            .signer
            .sign(&params.account, &tx)
            .await
            .map_err(|e| SinkRejection::new(e.to_string()))?;
        debug!(
            "Signed {} transaction for chain {}: 0x{}",
            params.type_info.kind(),
            chain_id,
            hex::encode(&raw)
        );

        let tx_hash = match timeout(
            SEND_TIMEOUT,
            provider.send_raw_transaction(raw, params.channel),
        )
        .await
        {
            Ok(Ok(tx_hash)) => tx_hash,
            Ok(Err(e)) => {
                warn!(
                    "Chain {} rejected {} transaction with nonce {}: {}",
                    chain_id,
                    params.type_info.kind(),
                    nonce,
                    e
                );
                return Err(SinkRejection::new(e.to_string()));
            }
            Err(_) => {
                return Err(SinkRejection::new(format!(
                    "broadcast timed out after {:?}",
                    SEND_TIMEOUT
                )))
            }
        };

        let kind = params.type_info.kind();
        let id = params.tx_id.unwrap_or_else(Uuid::new_v4);
        let record = PendingTransactionRecord {
            id,
            chain_id,
            from: params.account.address,
            nonce: Some(nonce),
            status: TransactionStatus::Pending,
            channel: params.channel,
            format: RequestFormat::Classic,
            type_info: params.type_info,
            request,
            tx_hash: Some(tx_hash),
            added_at: Utc::now(),
        };

        // Already broadcast: losing the record must not turn into a rejection
        if let Err(e) = self.store.insert(record).await {
            error!("Failed to record transaction {} ({:?}): {}", id, tx_hash, e);
        }

        crate::metrics::record_tx_submitted(chain_id, kind, params.channel);
        info!(
            analytics = %params.analytics,
            "Sent {} transaction {:?} on chain {} via {} channel (nonce {})",
            kind, tx_hash, chain_id, params.channel, nonce
        );

        Ok(SinkReceipt { id, tx_hash, nonce })
    }
}

/// Typed transaction matching the fee shape: legacy or EIP-1559
pub fn build_typed_tx(request: &TxRequest, chain_id: u64, nonce: u64, fee: FeeParams) -> TypedTransaction {
    match fee {
        FeeParams::Legacy { gas_price } => {
            let mut tx = TransactionRequest::new()
                .from(request.from)
                .value(request.value)
                .data(request.data.clone())
                .nonce(nonce)
                .gas_price(gas_price)
                .chain_id(chain_id);
            if let Some(to) = request.to {
                tx = tx.to(to);
            }
            if let Some(gas) = request.gas_limit {
                tx = tx.gas(gas);
            }
            TypedTransaction::Legacy(tx)
        }
        FeeParams::Dynamic {
            max_priority_fee_per_gas,
            max_fee_per_gas,
        } => {
            let mut tx = Eip1559TransactionRequest::new()
                .from(request.from)
                .value(request.value)
                .data(request.data.clone())
                .nonce(nonce)
                .max_fee_per_gas(max_fee_per_gas)
                .max_priority_fee_per_gas(max_priority_fee_per_gas)
                .chain_id(chain_id);
            if let Some(to) = request.to {
                tx = tx.to(to);
            }
            if let Some(gas) = request.gas_limit {
                tx = tx.gas(gas);
            }
            TypedTransaction::Eip1559(tx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, Bytes, NameOrAddress, U256, U64};

    fn request() -> TxRequest {
        TxRequest::new(10, Address::repeat_byte(0x01), Address::repeat_byte(0x02))
            .with_value(U256::from(7))
            .with_data(Bytes::from(vec![0x09, 0x5e, 0xa7, 0xb3]))
            .with_gas_limit(U256::from(60_000))
    }

    #[test]
    fn legacy_fee_builds_legacy_tx() {
        let tx = build_typed_tx(
            &request(),
            10,
            3,
            FeeParams::Legacy {
                gas_price: U256::from(1_000),
            },
        );

        assert!(matches!(tx, TypedTransaction::Legacy(_)));
        assert_eq!(tx.gas_price(), Some(U256::from(1_000)));
        assert_eq!(tx.nonce(), Some(&U256::from(3)));
        assert_eq!(tx.chain_id(), Some(U64::from(10)));
        assert_eq!(tx.gas(), Some(&U256::from(60_000)));
        assert_eq!(
            tx.to(),
            Some(&NameOrAddress::Address(Address::repeat_byte(0x02)))
        );
    }

    #[test]
    fn dynamic_fee_builds_eip1559_tx() {
        let tx = build_typed_tx(
            &request(),
            10,
            4,
            FeeParams::Dynamic {
                max_priority_fee_per_gas: U256::from(2),
                max_fee_per_gas: U256::from(90),
            },
        );

        match tx {
            TypedTransaction::Eip1559(inner) => {
                assert_eq!(inner.max_fee_per_gas, Some(U256::from(90)));
                assert_eq!(inner.max_priority_fee_per_gas, Some(U256::from(2)));
                assert_eq!(inner.value, Some(U256::from(7)));
                assert_eq!(inner.nonce, Some(U256::from(4)));
            }
            other => panic!("expected an EIP-1559 transaction, got {:?}", other),
        }
    }
}
