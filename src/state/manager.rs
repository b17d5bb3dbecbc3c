//! PostgreSQL state manager

use super::memory::check_transition;
use crate::config::DatabaseConfig;
use crate::error::{SubmitterError, SubmitterResult};
use crate::ports::PendingTransactionStore;
use crate::types::{PendingTransactionRecord, TransactionStatus};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SELECT_RECORD: &str = r#"
    SELECT id, chain_id, from_address, nonce, status, channel, format,
           type_info, request, tx_hash, added_at
    FROM wallet_transactions
"#;

/// State manager for PostgreSQL persistence
pub struct StateManager {
    pool: PgPool,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig) -> SubmitterResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> SubmitterResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet_transactions (
                id UUID PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                from_address VARCHAR(42) NOT NULL,
                nonce BIGINT,
                status VARCHAR(20) NOT NULL,
                channel VARCHAR(10) NOT NULL,
                format VARCHAR(20) NOT NULL,
                type_info JSONB NOT NULL,
                request JSONB NOT NULL,
                tx_hash VARCHAR(66),
                added_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_wallet_transactions_from
            ON wallet_transactions (from_address, chain_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_wallet_transactions_status
            ON wallet_transactions (status, added_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    async fn current_status(&self, id: Uuid) -> SubmitterResult<TransactionStatus> {
        let row = sqlx::query("SELECT status FROM wallet_transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| SubmitterError::TransactionNotFound { tx_id: id.to_string() })?;

        row.get::<String, _>("status").parse()
    }
}

fn cutoff(max_age: Duration) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero())
}

fn corrupt(column: &str, e: impl std::fmt::Display) -> SubmitterError {
    SubmitterError::Internal(format!("corrupt {} column: {}", column, e))
}

fn record_from_row(row: &PgRow) -> SubmitterResult<PendingTransactionRecord> {
    let from: String = row.get("from_address");
    let tx_hash: Option<String> = row.get("tx_hash");
    let status: String = row.get("status");
    let channel: String = row.get("channel");
    let format: String = row.get("format");

    Ok(PendingTransactionRecord {
        id: row.get("id"),
        chain_id: row.get::<i64, _>("chain_id") as u64,
        from: from.parse::<Address>().map_err(|e| corrupt("from_address", e))?,
        nonce: row.get::<Option<i64>, _>("nonce").map(|n| n as u64),
        status: status.parse()?,
        channel: channel.parse()?,
        format: format.parse()?,
        type_info: serde_json::from_value(row.get("type_info"))
            .map_err(|e| corrupt("type_info", e))?,
        request: serde_json::from_value(row.get("request")).map_err(|e| corrupt("request", e))?,
        tx_hash: tx_hash
            .map(|h| h.parse::<H256>().map_err(|e| corrupt("tx_hash", e)))
            .transpose()?,
        added_at: row.get("added_at"),
    })
}

fn records_from_rows(rows: Vec<PgRow>) -> Vec<PendingTransactionRecord> {
    rows.iter()
        .filter_map(|row| match record_from_row(row) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping unreadable transaction row: {}", e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl PendingTransactionStore for StateManager {
    async fn list_pending(&self, address: Address) -> SubmitterResult<Vec<PendingTransactionRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE from_address = $1 ORDER BY added_at",
            SELECT_RECORD
        ))
        .bind(format!("{:?}", address))
        .fetch_all(&self.pool)
        .await?;

        Ok(records_from_rows(rows))
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
    ) -> SubmitterResult<Vec<PendingTransactionRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE status = $1 ORDER BY added_at",
            SELECT_RECORD
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(records_from_rows(rows))
    }

    async fn get(&self, id: Uuid) -> SubmitterResult<Option<PendingTransactionRecord>> {
        let row = sqlx::query(&format!("{} WHERE id = $1", SELECT_RECORD))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn insert(&self, record: PendingTransactionRecord) -> SubmitterResult<()> {
        let type_info = serde_json::to_value(&record.type_info)
            .map_err(|e| SubmitterError::Internal(e.to_string()))?;
        let request = serde_json::to_value(&record.request)
            .map_err(|e| SubmitterError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO wallet_transactions
                (id, chain_id, from_address, nonce, status, channel, format,
                 type_info, request, tx_hash, added_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.chain_id as i64)
        .bind(format!("{:?}", record.from))
        .bind(record.nonce.map(|n| n as i64))
        .bind(record.status.as_str())
        .bind(record.channel.as_str())
        .bind(record.format.as_str())
        .bind(type_info)
        .bind(request)
        .bind(record.tx_hash.map(|h| format!("{:?}", h)))
        .bind(record.added_at)
        .execute(&self.pool)
        .await?;

        debug!("Stored transaction {} on chain {}", record.id, record.chain_id);
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: TransactionStatus) -> SubmitterResult<()> {
        let current = self.current_status(id).await?;
        check_transition(current, status)?;

        // Guarded on the status we checked against
        let result = sqlx::query(
            r#"
            UPDATE wallet_transactions
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(current.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let now = self.current_status(id).await?;
            return check_transition(now, status);
        }

        Ok(())
    }

    async fn expire_stale(&self, max_age: Duration) -> SubmitterResult<usize> {
        let result = sqlx::query(
            r#"
            UPDATE wallet_transactions
            SET status = 'unknown', updated_at = NOW()
            WHERE status = 'pending' AND added_at < $1
            "#,
        )
        .bind(cutoff(max_age))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn prune_finalized(&self, max_age: Duration) -> SubmitterResult<usize> {
        let result = sqlx::query(
            r#"
            DELETE FROM wallet_transactions
            WHERE status <> 'pending' AND added_at < $1
            "#,
        )
        .bind(cutoff(max_age))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn health_check(&self) -> SubmitterResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
