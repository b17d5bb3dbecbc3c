//! Approve-then-swap submission
//!
//! An optional token approval is sent first with the resolved nonce, the
//! swap follows with the next one. Both go through the same sink on the
//! same channel. Callers must not run two submissions for one account at
//! the same time: nonce resolution is not synchronized here.

use super::nonce::NonceReconciler;
use crate::error::{SubmitterError, SubmitterResult};
use crate::ports::{PrivateChannelPolicy, SendParams, SinkReceipt, SubmissionSink};
use crate::types::{Account, AnalyticsContext, SubmissionChannel, TransactionTypeInfo, TxRequest};

use ethers::types::{Address, H256};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// A swap, optionally preceded by the approval it depends on
#[derive(Debug, Clone)]
pub struct SwapParams {
    /// Id to record the swap under; generated when absent
    pub tx_id: Option<Uuid>,
    pub account: Account,
    pub approve_request: Option<TxRequest>,
    pub swap_request: TxRequest,
    pub swap_type_info: TransactionTypeInfo,
    pub analytics: AnalyticsContext,
}

/// A transaction the sink accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedTx {
    pub id: Uuid,
    pub nonce: u64,
    pub tx_hash: H256,
}

impl From<SinkReceipt> for SubmittedTx {
    fn from(receipt: SinkReceipt) -> Self {
        Self {
            id: receipt.id,
            nonce: receipt.nonce,
            tx_hash: receipt.tx_hash,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapSubmission {
    pub chain_id: u64,
    pub channel: SubmissionChannel,
    pub approval: Option<SubmittedTx>,
    pub swap: SubmittedTx,
}

pub struct SwapSequencer {
    nonces: Arc<NonceReconciler>,
    sink: Arc<dyn SubmissionSink>,
    policy: Arc<dyn PrivateChannelPolicy>,
}

impl SwapSequencer {
    pub fn new(
        nonces: Arc<NonceReconciler>,
        sink: Arc<dyn SubmissionSink>,
        policy: Arc<dyn PrivateChannelPolicy>,
    ) -> Self {
        Self {
            nonces,
            sink,
            policy,
        }
    }

    /// Submit the approval (if any) and then the swap.
    ///
    /// Stops at the first rejection: a refused approval means the swap is
    /// never sent.
    pub async fn submit(&self, params: SwapParams) -> SubmitterResult<SwapSubmission> {
        let (chain_id, spender) = validate(&params)?;

        let channel =
            SubmissionChannel::from_private_flag(self.policy.is_private_channel_eligible(chain_id));
        let nonce = self
            .nonces
            .resolve_nonce(params.account.address, chain_id, channel)
            .await?;

        info!(
            "Submitting swap for {:?} on chain {} via {} channel starting at nonce {}",
            params.account.address, chain_id, channel, nonce
        );

        let approval = match params.approve_request {
            Some(ref approve_request) => {
                let token_address = approve_request.to.unwrap_or_default();
                let request = approve_request.clone().with_nonce(nonce);
                let send_params = SendParams {
                    tx_id: None,
                    chain_id,
                    account: params.account,
                    channel,
                    type_info: TransactionTypeInfo::Approve {
                        token_address,
                        spender,
                    },
                    analytics: params.analytics.clone(),
                };
                Some(self.send(request, send_params).await?)
            }
            None => None,
        };

        let swap_nonce = if approval.is_some() { nonce + 1 } else { nonce };
        let send_params = SendParams {
            tx_id: params.tx_id,
            chain_id,
            account: params.account,
            channel,
            type_info: params.swap_type_info,
            analytics: params.analytics,
        };
        let swap = self
            .send(params.swap_request.with_nonce(swap_nonce), send_params)
            .await?;

        Ok(SwapSubmission {
            chain_id,
            channel,
            approval,
            swap,
        })
    }

    /// Same as [`submit`](Self::submit) but logs failures instead of
    /// returning them, for fire-and-forget callers.
    pub async fn submit_logged(&self, params: SwapParams) -> Option<SwapSubmission> {
        let analytics = params.analytics.clone();
        match self.submit(params).await {
            Ok(submission) => Some(submission),
            Err(e) => {
                error!(analytics = %analytics, "Approve and swap failed: {}", e);
                None
            }
        }
    }

    async fn send(&self, request: TxRequest, params: SendParams) -> SubmitterResult<SubmittedTx> {
        let chain_id = params.chain_id;
        let kind = params.type_info.kind();
        let nonce = request.nonce;

        match self.sink.send(request, params).await {
            Ok(receipt) => {
                info!(
                    "{} transaction accepted on chain {}: {:?} (nonce {})",
                    kind, chain_id, receipt.tx_hash, receipt.nonce
                );
                Ok(receipt.into())
            }
            Err(rejection) => {
                crate::metrics::record_sink_rejection(chain_id, kind);
                Err(SubmitterError::SinkRejection {
                    chain_id,
                    kind,
                    nonce,
                    reason: rejection.reason,
                })
            }
        }
    }
}

/// Returns the chain id and the swap target (the approval's spender)
fn validate(params: &SwapParams) -> SubmitterResult<(u64, Address)> {
    let chain_id = params.swap_request.chain_id.ok_or_else(|| {
        SubmitterError::MalformedRequest("swap request has no chain id".to_string())
    })?;
    let spender = params.swap_request.to.ok_or_else(|| {
        SubmitterError::MalformedRequest("swap request has no destination".to_string())
    })?;

    if let Some(ref approve_request) = params.approve_request {
        if approve_request.to.is_none() {
            return Err(SubmitterError::MalformedRequest(
                "approve request has no destination".to_string(),
            ));
        }
        if approve_request.chain_id.is_some_and(|id| id != chain_id) {
            return Err(SubmitterError::MalformedRequest(format!(
                "approve request targets chain {:?} but swap targets chain {}",
                approve_request.chain_id, chain_id
            )));
        }
    }

    Ok((chain_id, spender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{
        MockNodeQuery, MockPendingTransactionStore, MockPrivateChannelPolicy, MockSubmissionSink,
        SinkRejection,
    };
    use crate::types::TransactionKind;

    use ethers::types::U256;
    use mockall::{predicate::eq, Sequence};

    const CHAIN: u64 = 1;

    fn account() -> Account {
        Account::new(Address::repeat_byte(0xaa))
    }

    fn token() -> Address {
        Address::repeat_byte(0x70)
    }

    fn router() -> Address {
        Address::repeat_byte(0x80)
    }

    fn swap_params(with_approval: bool) -> SwapParams {
        SwapParams {
            tx_id: None,
            account: account(),
            approve_request: with_approval
                .then(|| TxRequest::new(CHAIN, account().address, token())),
            swap_request: TxRequest::new(CHAIN, account().address, router())
                .with_value(U256::from(1_000)),
            swap_type_info: TransactionTypeInfo::Swap {
                input_currency_id: "1-ETH".into(),
                output_currency_id: "1-DAI".into(),
            },
            analytics: AnalyticsContext::new().with("route", "v3"),
        }
    }

    fn reconciler(public_nonce: u64) -> Arc<NonceReconciler> {
        let mut node = MockNodeQuery::new();
        node.expect_pending_transaction_count()
            .returning(move |_, _, _| Ok(public_nonce));
        let mut store = MockPendingTransactionStore::new();
        store.expect_list_pending().returning(|_| Ok(vec![]));
        Arc::new(NonceReconciler::new(Arc::new(node), Arc::new(store)))
    }

    fn policy(private: bool) -> Arc<MockPrivateChannelPolicy> {
        let mut policy = MockPrivateChannelPolicy::new();
        policy
            .expect_is_private_channel_eligible()
            .with(eq(CHAIN))
            .return_const(private);
        Arc::new(policy)
    }

    fn accept(request: &TxRequest) -> Result<SinkReceipt, SinkRejection> {
        Ok(SinkReceipt {
            id: Uuid::new_v4(),
            tx_hash: H256::from_low_u64_be(request.nonce.unwrap_or_default() + 1),
            nonce: request.nonce.unwrap_or_default(),
        })
    }

    #[tokio::test]
    async fn approval_is_sent_before_swap_with_consecutive_nonces() {
        let mut seq = Sequence::new();
        let mut sink = MockSubmissionSink::new();
        sink.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|request, params| {
                request.nonce == Some(9)
                    && request.to == Some(token())
                    && params.type_info
                        == TransactionTypeInfo::Approve {
                            token_address: token(),
                            spender: router(),
                        }
                    && params.channel == SubmissionChannel::Private
            })
            .returning(|request, _| accept(&request));
        sink.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|request, params| {
                request.nonce == Some(10)
                    && request.to == Some(router())
                    && params.type_info.kind() == TransactionKind::Swap
                    && params.channel == SubmissionChannel::Private
                    && params.analytics.get("route") == Some(&serde_json::json!("v3"))
            })
            .returning(|request, _| accept(&request));

        let sequencer = SwapSequencer::new(reconciler(9), Arc::new(sink), policy(true));
        let submission = sequencer.submit(swap_params(true)).await.unwrap();

        let approval = submission.approval.unwrap();
        assert_eq!(approval.nonce, 9);
        assert_eq!(submission.swap.nonce, approval.nonce + 1);
        assert_eq!(submission.channel, SubmissionChannel::Private);
    }

    #[tokio::test]
    async fn swap_alone_uses_resolved_nonce() {
        let mut sink = MockSubmissionSink::new();
        sink.expect_send()
            .times(1)
            .withf(|request, params| {
                request.nonce == Some(4) && params.channel == SubmissionChannel::Public
            })
            .returning(|request, _| accept(&request));

        let sequencer = SwapSequencer::new(reconciler(4), Arc::new(sink), policy(false));
        let submission = sequencer.submit(swap_params(false)).await.unwrap();

        assert!(submission.approval.is_none());
        assert_eq!(submission.swap.nonce, 4);
    }

    #[tokio::test]
    async fn rejected_approval_halts_sequence() {
        let mut sink = MockSubmissionSink::new();
        sink.expect_send()
            .times(1)
            .withf(|_, params| params.type_info.kind() == TransactionKind::Approve)
            .returning(|_, _| Err(SinkRejection::new("gas required exceeds allowance")));

        let sequencer = SwapSequencer::new(reconciler(0), Arc::new(sink), policy(false));
        let err = sequencer.submit(swap_params(true)).await.unwrap_err();

        match err {
            SubmitterError::SinkRejection {
                kind,
                nonce,
                chain_id,
                ..
            } => {
                assert_eq!(kind, TransactionKind::Approve);
                assert_eq!(nonce, Some(0));
                assert_eq!(chain_id, CHAIN);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn rejected_swap_reports_swap_leg() {
        let mut sink = MockSubmissionSink::new();
        sink.expect_send()
            .withf(|_, params| params.type_info.kind() == TransactionKind::Approve)
            .returning(|request, _| accept(&request));
        sink.expect_send()
            .withf(|_, params| params.type_info.kind() == TransactionKind::Swap)
            .returning(|_, _| Err(SinkRejection::new("insufficient funds")));

        let sequencer = SwapSequencer::new(reconciler(2), Arc::new(sink), policy(false));
        let err = sequencer.submit(swap_params(true)).await.unwrap_err();

        assert!(matches!(
            err,
            SubmitterError::SinkRejection {
                kind: TransactionKind::Swap,
                nonce: Some(3),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn malformed_requests_fail_before_any_io() {
        // No expectations: any call to node, store or sink panics
        let sequencer = SwapSequencer::new(
            Arc::new(NonceReconciler::new(
                Arc::new(MockNodeQuery::new()),
                Arc::new(MockPendingTransactionStore::new()),
            )),
            Arc::new(MockSubmissionSink::new()),
            Arc::new(MockPrivateChannelPolicy::new()),
        );

        let mut no_chain = swap_params(false);
        no_chain.swap_request.chain_id = None;
        let mut no_swap_to = swap_params(false);
        no_swap_to.swap_request.to = None;
        let mut no_approve_to = swap_params(true);
        if let Some(ref mut approve) = no_approve_to.approve_request {
            approve.to = None;
        }

        for params in [no_chain, no_swap_to, no_approve_to] {
            assert!(matches!(
                sequencer.submit(params).await,
                Err(SubmitterError::MalformedRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn submit_logged_swallows_errors() {
        let mut sink = MockSubmissionSink::new();
        sink.expect_send()
            .returning(|_, _| Err(SinkRejection::new("nonce too low")));

        let sequencer = SwapSequencer::new(reconciler(1), Arc::new(sink), policy(false));
        assert!(sequencer.submit_logged(swap_params(false)).await.is_none());
    }
}
