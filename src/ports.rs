//! Boundaries between the submission core and the outside world
//!
//! The sequencer, nonce reconciler and cancellation planner only talk to
//! these traits. Production implementations live in `chain`, `tx`,
//! `policy` and `state`.

use crate::error::SubmitterResult;
use crate::types::{
    Account, AnalyticsContext, FeeParams, PendingTransactionRecord, SubmissionChannel,
    TransactionStatus, TransactionTypeInfo, TxRequest,
};

use async_trait::async_trait;
use ethers::types::{transaction::eip2718::TypedTransaction, Address, Bytes, H256};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Read access to a chain node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeQuery: Send + Sync {
    /// Transaction count of `address` in the "pending" block view of the
    /// node serving `channel`
    async fn pending_transaction_count(
        &self,
        address: Address,
        chain_id: u64,
        channel: SubmissionChannel,
    ) -> SubmitterResult<u64>;

    /// `Some(true)` once mined successfully, `Some(false)` if reverted,
    /// `None` while unmined
    async fn receipt_status(&self, chain_id: u64, tx_hash: H256) -> SubmitterResult<Option<bool>>;
}

/// Current network fee conditions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeeOracle: Send + Sync {
    async fn network_fees(&self, chain_id: u64) -> SubmitterResult<FeeParams>;
}

/// Everything a sink needs to know about a submission besides the request
#[derive(Debug, Clone)]
pub struct SendParams {
    pub tx_id: Option<Uuid>,
    pub chain_id: u64,
    pub account: Account,
    pub channel: SubmissionChannel,
    pub type_info: TransactionTypeInfo,
    pub analytics: AnalyticsContext,
}

/// Acknowledgment that the sink accepted a transaction. Says nothing about
/// on-chain inclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReceipt {
    pub id: Uuid,
    pub tx_hash: H256,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct SinkRejection {
    pub reason: String,
}

impl SinkRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Where transactions are sent
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn send(&self, request: TxRequest, params: SendParams) -> Result<SinkReceipt, SinkRejection>;
}

/// Locally tracked transactions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PendingTransactionStore: Send + Sync {
    /// All records still tracked for `address`, any status
    async fn list_pending(&self, address: Address) -> SubmitterResult<Vec<PendingTransactionRecord>>;

    /// Records in `status` across all accounts
    async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> SubmitterResult<Vec<PendingTransactionRecord>>;

    async fn get(&self, id: Uuid) -> SubmitterResult<Option<PendingTransactionRecord>>;

    async fn insert(&self, record: PendingTransactionRecord) -> SubmitterResult<()>;

    /// Fails with `InvalidStateTransition` on any regression
    async fn update_status(&self, id: Uuid, status: TransactionStatus) -> SubmitterResult<()>;

    /// Marks Pending records older than `max_age` Unknown, returns how many
    async fn expire_stale(&self, max_age: Duration) -> SubmitterResult<usize>;

    /// Drops finalized and Unknown records older than `max_age`, returns how many
    async fn prune_finalized(&self, max_age: Duration) -> SubmitterResult<usize>;

    async fn health_check(&self) -> SubmitterResult<()>;
}

/// Decides whether a chain's transactions go through the private relay
#[cfg_attr(test, mockall::automock)]
pub trait PrivateChannelPolicy: Send + Sync {
    fn is_private_channel_eligible(&self, chain_id: u64) -> bool;
}

/// Signing capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Returns the RLP encoded signed transaction
    async fn sign(&self, account: &Account, tx: &TypedTransaction) -> SubmitterResult<Bytes>;
}
