//! In-memory pending transaction store

use crate::error::{SubmitterError, SubmitterResult};
use crate::ports::PendingTransactionStore;
use crate::types::{PendingTransactionRecord, TransactionStatus};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use ethers::types::Address;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Store used when no database is configured. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<Uuid, PendingTransactionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn collect(&self, filter: impl Fn(&PendingTransactionRecord) -> bool) -> Vec<PendingTransactionRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| r.added_at);
        records
    }
}

pub(crate) fn check_transition(from: TransactionStatus, to: TransactionStatus) -> SubmitterResult<()> {
    if from == to || from.can_transition_to(to) {
        Ok(())
    } else {
        Err(SubmitterError::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

fn cutoff(max_age: Duration) -> chrono::DateTime<Utc> {
    Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero())
}

#[async_trait]
impl PendingTransactionStore for MemoryStore {
    async fn list_pending(&self, address: Address) -> SubmitterResult<Vec<PendingTransactionRecord>> {
        Ok(self.collect(|r| r.from == address))
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> SubmitterResult<Vec<PendingTransactionRecord>> {
        Ok(self.collect(|r| r.status == status))
    }

    async fn get(&self, id: Uuid) -> SubmitterResult<Option<PendingTransactionRecord>> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn insert(&self, record: PendingTransactionRecord) -> SubmitterResult<()> {
        debug!("Tracking transaction {} on chain {}", record.id, record.chain_id);
        self.records.insert(record.id, record);
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: TransactionStatus) -> SubmitterResult<()> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| SubmitterError::TransactionNotFound { tx_id: id.to_string() })?;

        check_transition(record.status, status)?;
        record.status = status;
        Ok(())
    }

    async fn expire_stale(&self, max_age: Duration) -> SubmitterResult<usize> {
        let cutoff = cutoff(max_age);
        let mut expired = 0;

        for mut entry in self.records.iter_mut() {
            let record = entry.value_mut();
            if record.status == TransactionStatus::Pending && record.added_at < cutoff {
                record.status = TransactionStatus::Unknown;
                expired += 1;
            }
        }

        Ok(expired)
    }

    async fn prune_finalized(&self, max_age: Duration) -> SubmitterResult<usize> {
        let cutoff = cutoff(max_age);
        let before = self.records.len();

        self.records.retain(|_, record| {
            record.status == TransactionStatus::Pending || record.added_at >= cutoff
        });

        Ok(before - self.records.len())
    }

    async fn health_check(&self) -> SubmitterResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RequestFormat, SubmissionChannel, TransactionTypeInfo, TxRequest};

    fn record(from: Address, status: TransactionStatus, age_secs: i64) -> PendingTransactionRecord {
        PendingTransactionRecord {
            id: Uuid::new_v4(),
            chain_id: 1,
            from,
            nonce: Some(0),
            status,
            channel: SubmissionChannel::Public,
            format: RequestFormat::Classic,
            type_info: TransactionTypeInfo::Swap {
                input_currency_id: "1-0x0".to_string(),
                output_currency_id: "1-0x1".to_string(),
            },
            request: TxRequest::new(1, from, Address::zero()),
            tx_hash: None,
            added_at: Utc::now() - chrono::Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn lists_records_per_account() {
        let store = MemoryStore::new();
        let alice = Address::repeat_byte(0xa1);
        let bob = Address::repeat_byte(0xb0);

        store.insert(record(alice, TransactionStatus::Pending, 0)).await.unwrap();
        store.insert(record(alice, TransactionStatus::Confirmed, 0)).await.unwrap();
        store.insert(record(bob, TransactionStatus::Pending, 0)).await.unwrap();

        assert_eq!(store.list_pending(alice).await.unwrap().len(), 2);
        assert_eq!(
            store
                .list_by_status(TransactionStatus::Pending)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn status_updates_are_monotonic() {
        let store = MemoryStore::new();
        let rec = record(Address::zero(), TransactionStatus::Pending, 0);
        let id = rec.id;
        store.insert(rec).await.unwrap();

        store.update_status(id, TransactionStatus::Confirmed).await.unwrap();
        store.update_status(id, TransactionStatus::Confirmed).await.unwrap();

        let err = store
            .update_status(id, TransactionStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitterError::InvalidStateTransition { .. }));

        let missing = store
            .update_status(Uuid::new_v4(), TransactionStatus::Failed)
            .await;
        assert!(matches!(missing, Err(SubmitterError::TransactionNotFound { .. })));
    }

    #[tokio::test]
    async fn stale_pending_become_unknown_then_get_pruned() {
        let store = MemoryStore::new();
        let stale = record(Address::zero(), TransactionStatus::Pending, 3_600);
        let fresh = record(Address::zero(), TransactionStatus::Pending, 0);
        let stale_id = stale.id;
        store.insert(stale).await.unwrap();
        store.insert(fresh).await.unwrap();

        assert_eq!(store.expire_stale(Duration::from_secs(600)).await.unwrap(), 1);
        assert_eq!(
            store.get(stale_id).await.unwrap().unwrap().status,
            TransactionStatus::Unknown
        );

        assert_eq!(store.prune_finalized(Duration::from_secs(600)).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
