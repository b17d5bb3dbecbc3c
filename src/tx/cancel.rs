//! Cancellation of pending transactions
//!
//! A cancellation reuses the pending transaction's nonce for a zero-value
//! transfer to the sender itself, priced above the original so nodes
//! accept it as a replacement.

use super::gas::{self, AdjustmentFactor};
use super::sequencer::SubmittedTx;
use crate::error::{SubmitterError, SubmitterResult};
use crate::ports::{FeeOracle, SendParams, SubmissionSink};
use crate::types::{
    Account, AnalyticsContext, PendingTransactionRecord, RequestFormat, TransactionKind,
    TransactionStatus, TransactionTypeInfo, TxRequest,
};

use ethers::types::{Bytes, U256};
use std::sync::Arc;
use tracing::info;

/// Gas used by a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// A priced cancellation, ready to confirm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationPlan {
    pub request: TxRequest,
    /// Worst-case cost in wei
    pub fee: U256,
}

pub struct CancellationPlanner {
    oracle: Arc<dyn FeeOracle>,
    sink: Arc<dyn SubmissionSink>,
    factor: AdjustmentFactor,
}

impl CancellationPlanner {
    pub fn new(
        oracle: Arc<dyn FeeOracle>,
        sink: Arc<dyn SubmissionSink>,
        factor: AdjustmentFactor,
    ) -> Self {
        Self {
            oracle,
            sink,
            factor,
        }
    }

    /// Build the replacement for `record` without sending it
    pub async fn plan(&self, record: &PendingTransactionRecord) -> SubmitterResult<CancellationPlan> {
        if record.format == RequestFormat::RelayOrder {
            return Err(SubmitterError::UnsupportedOperation(
                "relay orders cannot be cancelled on chain".to_string(),
            ));
        }
        if record.status != TransactionStatus::Pending {
            return Err(SubmitterError::UnsupportedOperation(format!(
                "transaction {} is {}, only pending transactions can be cancelled",
                record.id, record.status
            )));
        }

        let nonce = record.nonce.or(record.request.nonce).ok_or_else(|| {
            SubmitterError::MalformedRequest(format!("transaction {} has no nonce", record.id))
        })?;
        let original_fee = record.request.fee.ok_or_else(|| {
            SubmitterError::UnsupportedFeeShape(format!(
                "transaction {} carries no fee parameters",
                record.id
            ))
        })?;

        let network_fee = self.oracle.network_fees(record.chain_id).await?;
        let fee = gas::adjust_for_replacement(&original_fee, &network_fee, self.factor)?;
        let gas_limit = record
            .request
            .gas_limit
            .unwrap_or_else(|| U256::from(TRANSFER_GAS_LIMIT));

        let request = TxRequest {
            chain_id: Some(record.chain_id),
            from: record.from,
            to: Some(record.from),
            nonce: Some(nonce),
            value: U256::zero(),
            data: Bytes::default(),
            fee: Some(fee),
            gas_limit: Some(gas_limit),
        };

        Ok(CancellationPlan {
            fee: gas::total_fee(&fee, gas_limit)?,
            request,
        })
    }

    /// Plan and send the cancellation on the channel the original used
    pub async fn submit(
        &self,
        record: &PendingTransactionRecord,
        account: Account,
        analytics: AnalyticsContext,
    ) -> SubmitterResult<SubmittedTx> {
        if account.address != record.from {
            return Err(SubmitterError::UnsupportedOperation(format!(
                "transaction {} was not sent by {:?}",
                record.id, account.address
            )));
        }

        let plan = self.plan(record).await?;
        let nonce = plan.request.nonce;
        let params = SendParams {
            tx_id: None,
            chain_id: record.chain_id,
            account,
            channel: record.channel,
            type_info: TransactionTypeInfo::Cancel {
                replaced_id: record.id,
            },
            analytics,
        };

        let receipt = self.sink.send(plan.request, params).await.map_err(|rejection| {
            crate::metrics::record_sink_rejection(record.chain_id, TransactionKind::Cancel);
            SubmitterError::SinkRejection {
                chain_id: record.chain_id,
                kind: TransactionKind::Cancel,
                nonce,
                reason: rejection.reason,
            }
        })?;

        info!(
            "Cancellation of {} sent on chain {}: {:?} (max fee {} wei)",
            record.id, record.chain_id, receipt.tx_hash, plan.fee
        );
        crate::metrics::record_cancellation(record.chain_id);

        Ok(receipt.into())
    }
}
