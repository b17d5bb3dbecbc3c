//! Periodic reconciliation of locally tracked transactions against the chain

use crate::error::SubmitterResult;
use crate::ports::{NodeQuery, PendingTransactionStore};
use crate::types::{PendingTransactionRecord, TransactionStatus, TransactionTypeInfo};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub confirmed: usize,
    pub failed: usize,
    pub expired: usize,
    pub pruned: usize,
    /// Losers of a cancellation race moved to Failed
    pub replaced: usize,
}

pub struct TransactionWatcher {
    node: Arc<dyn NodeQuery>,
    store: Arc<dyn PendingTransactionStore>,
    /// Pending records older than this become Unknown
    stale_after: Duration,
    /// Finalized records older than this are dropped
    retention: Duration,
    shutdown: Arc<RwLock<bool>>,
}

impl TransactionWatcher {
    pub fn new(
        node: Arc<dyn NodeQuery>,
        store: Arc<dyn PendingTransactionStore>,
        stale_after: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            node,
            store,
            stale_after,
            retention,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Sweep every `period` until stopped
    pub async fn run(&self, period: Duration) -> SubmitterResult<()> {
        let mut ticker = interval(period);
        info!("Transaction watcher started");

        loop {
            ticker.tick().await;
            if *self.shutdown.read().await {
                break;
            }

            match self.sweep().await {
                Ok(report) if report != SweepReport::default() => {
                    info!("Transaction sweep: {:?}", report)
                }
                Ok(_) => {}
                Err(e) => error!("Transaction sweep failed: {}", e),
            }
        }

        info!("Transaction watcher stopped");
        Ok(())
    }

    pub async fn sweep(&self) -> SubmitterResult<SweepReport> {
        let mut report = SweepReport::default();

        let pending = self.store.list_by_status(TransactionStatus::Pending).await?;

        for record in &pending {
            let Some(tx_hash) = record.tx_hash else {
                continue;
            };

            let status = match self.node.receipt_status(record.chain_id, tx_hash).await {
                Ok(Some(true)) => TransactionStatus::Confirmed,
                Ok(Some(false)) => TransactionStatus::Failed,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        "Receipt lookup for {:?} on chain {} failed: {}",
                        tx_hash, record.chain_id, e
                    );
                    continue;
                }
            };

            self.store.update_status(record.id, status).await?;
            debug!("Transaction {} is now {}", record.id, status);

            if status == TransactionStatus::Confirmed {
                report.confirmed += 1;
                crate::metrics::record_tx_finalized(record.chain_id, record.type_info.kind());
            } else {
                report.failed += 1;
                crate::metrics::record_tx_failed(record.chain_id, record.type_info.kind());
            }

            // Mined, even reverted, consumes the shared nonce
            report.replaced += self.settle_replacements(record, &pending).await;
        }

        report.expired = self.store.expire_stale(self.stale_after).await?;
        report.pruned = self.store.prune_finalized(self.retention).await?;

        Ok(report)
    }

    /// A cancellation and the transaction it replaces share a nonce, so
    /// once either is mined the other never will be
    async fn settle_replacements(
        &self,
        mined: &PendingTransactionRecord,
        pending: &[PendingTransactionRecord],
    ) -> usize {
        let mut losers: Vec<Uuid> = pending
            .iter()
            .filter(|other| {
                matches!(other.type_info, TransactionTypeInfo::Cancel { replaced_id } if replaced_id == mined.id)
            })
            .map(|other| other.id)
            .collect();
        if let TransactionTypeInfo::Cancel { replaced_id } = mined.type_info {
            losers.push(replaced_id);
        }

        let mut settled = 0;
        for id in losers {
            match self.store.update_status(id, TransactionStatus::Failed).await {
                Ok(()) => {
                    debug!("Transaction {} was replaced by {}", id, mined.id);
                    settled += 1;
                }
                Err(e) => warn!(
                    "Could not mark transaction {} as replaced by {}: {}",
                    id, mined.id, e
                ),
            }
        }
        settled
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Transaction watcher shutdown initiated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubmitterError;
    use crate::ports::{MockNodeQuery, MockPendingTransactionStore};
    use crate::types::{
        PendingTransactionRecord, RequestFormat, SubmissionChannel, TransactionTypeInfo, TxRequest,
    };

    use chrono::Utc;
    use ethers::types::{Address, H256};
    use mockall::predicate::eq;
    use uuid::Uuid;

    fn record(hash: Option<H256>) -> PendingTransactionRecord {
        let from = Address::repeat_byte(0x01);
        PendingTransactionRecord {
            id: Uuid::new_v4(),
            chain_id: 1,
            from,
            nonce: Some(0),
            status: TransactionStatus::Pending,
            channel: SubmissionChannel::Public,
            format: RequestFormat::Classic,
            type_info: TransactionTypeInfo::Approve {
                token_address: Address::repeat_byte(0x02),
                spender: Address::repeat_byte(0x03),
            },
            request: TxRequest::new(1, from, Address::repeat_byte(0x02)),
            tx_hash: hash,
            added_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn sweep_applies_receipts_and_expiry() {
        let mined = record(Some(H256::repeat_byte(0x0a)));
        let reverted = record(Some(H256::repeat_byte(0x0b)));
        let unmined = record(Some(H256::repeat_byte(0x0c)));
        let unsent = record(None);
        let (mined_id, reverted_id) = (mined.id, reverted.id);

        let mut store = MockPendingTransactionStore::new();
        let records = vec![mined, reverted, unmined, unsent];
        store
            .expect_list_by_status()
            .with(eq(TransactionStatus::Pending))
            .returning(move |_| Ok(records.clone()));
        store
            .expect_update_status()
            .with(eq(mined_id), eq(TransactionStatus::Confirmed))
            .times(1)
            .returning(|_, _| Ok(()));
        store
            .expect_update_status()
            .with(eq(reverted_id), eq(TransactionStatus::Failed))
            .times(1)
            .returning(|_, _| Ok(()));
        store.expect_expire_stale().returning(|_| Ok(2));
        store.expect_prune_finalized().returning(|_| Ok(1));

        let mut node = MockNodeQuery::new();
        node.expect_receipt_status()
            .returning(|_, hash| match hash.0[0] {
                0x0a => Ok(Some(true)),
                0x0b => Ok(Some(false)),
                _ => Ok(None),
            });

        let watcher = TransactionWatcher::new(
            Arc::new(node),
            Arc::new(store),
            Duration::from_secs(600),
            Duration::from_secs(3600),
        );
        let report = watcher.sweep().await.unwrap();

        assert_eq!(
            report,
            SweepReport {
                confirmed: 1,
                failed: 1,
                expired: 2,
                pruned: 1,
                replaced: 0,
            }
        );
    }

    #[tokio::test]
    async fn mined_cancellation_fails_the_replaced_transaction() {
        let original = record(Some(H256::repeat_byte(0x0c)));
        let mut cancel = record(Some(H256::repeat_byte(0x0a)));
        cancel.type_info = TransactionTypeInfo::Cancel {
            replaced_id: original.id,
        };
        let (original_id, cancel_id) = (original.id, cancel.id);

        let mut store = MockPendingTransactionStore::new();
        let records = vec![original, cancel];
        store
            .expect_list_by_status()
            .returning(move |_| Ok(records.clone()));
        store
            .expect_update_status()
            .with(eq(cancel_id), eq(TransactionStatus::Confirmed))
            .times(1)
            .returning(|_, _| Ok(()));
        store
            .expect_update_status()
            .with(eq(original_id), eq(TransactionStatus::Failed))
            .times(1)
            .returning(|_, _| Ok(()));
        store.expect_expire_stale().returning(|_| Ok(0));
        store.expect_prune_finalized().returning(|_| Ok(0));

        let mut node = MockNodeQuery::new();
        node.expect_receipt_status()
            .returning(|_, hash| Ok((hash.0[0] == 0x0a).then_some(true)));

        let watcher = TransactionWatcher::new(
            Arc::new(node),
            Arc::new(store),
            Duration::from_secs(600),
            Duration::from_secs(3600),
        );
        let report = watcher.sweep().await.unwrap();
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.replaced, 1);
    }

    #[tokio::test]
    async fn mined_original_fails_its_pending_cancellation() {
        let original = record(Some(H256::repeat_byte(0x0a)));
        let mut cancel = record(Some(H256::repeat_byte(0x0c)));
        cancel.type_info = TransactionTypeInfo::Cancel {
            replaced_id: original.id,
        };
        let (original_id, cancel_id) = (original.id, cancel.id);

        let mut store = MockPendingTransactionStore::new();
        let records = vec![original, cancel];
        store
            .expect_list_by_status()
            .returning(move |_| Ok(records.clone()));
        store
            .expect_update_status()
            .with(eq(original_id), eq(TransactionStatus::Confirmed))
            .times(1)
            .returning(|_, _| Ok(()));
        store
            .expect_update_status()
            .with(eq(cancel_id), eq(TransactionStatus::Failed))
            .times(1)
            .returning(|_, _| {
                Err(SubmitterError::InvalidStateTransition {
                    from: "failed".into(),
                    to: "failed".into(),
                })
            });
        store.expect_expire_stale().returning(|_| Ok(0));
        store.expect_prune_finalized().returning(|_| Ok(0));

        let mut node = MockNodeQuery::new();
        node.expect_receipt_status()
            .returning(|_, hash| Ok((hash.0[0] == 0x0a).then_some(true)));

        let watcher = TransactionWatcher::new(
            Arc::new(node),
            Arc::new(store),
            Duration::from_secs(600),
            Duration::from_secs(3600),
        );

        // A failed settle is logged, not fatal to the sweep
        let report = watcher.sweep().await.unwrap();
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.replaced, 0);
    }

    #[tokio::test]
    async fn receipt_errors_leave_records_pending() {
        let mut store = MockPendingTransactionStore::new();
        let records = vec![record(Some(H256::repeat_byte(0x0a)))];
        store
            .expect_list_by_status()
            .returning(move |_| Ok(records.clone()));
        store.expect_update_status().never();
        store.expect_expire_stale().returning(|_| Ok(0));
        store.expect_prune_finalized().returning(|_| Ok(0));

        let mut node = MockNodeQuery::new();
        node.expect_receipt_status().returning(|chain_id, _| {
            Err(SubmitterError::ChainConnection {
                chain_id,
                message: "timeout".into(),
            })
        });

        let watcher = TransactionWatcher::new(
            Arc::new(node),
            Arc::new(store),
            Duration::from_secs(600),
            Duration::from_secs(3600),
        );
        assert_eq!(watcher.sweep().await.unwrap(), SweepReport::default());
    }
}
