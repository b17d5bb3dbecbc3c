//! Error types for the swap submitter

use crate::types::TransactionKind;

use thiserror::Error;

/// Main error type for the submitter
#[derive(Error, Debug)]
pub enum SubmitterError {
    #[error("Malformed transaction request: {0}")]
    MalformedRequest(String),

    #[error("{kind} transaction with nonce {nonce:?} rejected on chain {chain_id}: {reason}")]
    SinkRejection {
        chain_id: u64,
        kind: TransactionKind,
        nonce: Option<u64>,
        reason: String,
    },

    #[error("Unsupported fee shape: {0}")]
    UnsupportedFeeShape(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Fee arithmetic overflowed")]
    FeeOverflow,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Nonce error for chain {chain_id}: {message}")]
    Nonce { chain_id: u64, message: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Transaction {tx_id} not found")]
    TransactionNotFound { tx_id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SubmitterError {
    /// Check if error is retryable.
    ///
    /// Submission errors never are: resending a transaction that may already
    /// be in a pool risks reusing its nonce.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubmitterError::ChainConnection { .. } | SubmitterError::Timeout { .. }
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        match self {
            SubmitterError::Wallet(_) => true,
            SubmitterError::SinkRejection { reason, .. } => reason.contains("insufficient funds"),
            _ => false,
        }
    }
}

/// Result type for submitter operations
pub type SubmitterResult<T> = Result<T, SubmitterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_errors_are_never_retryable() {
        let rejection = SubmitterError::SinkRejection {
            chain_id: 1,
            kind: TransactionKind::Swap,
            nonce: Some(4),
            reason: "execution reverted".to_string(),
        };
        assert!(!rejection.is_retryable());
        assert!(!SubmitterError::MalformedRequest("missing to".into()).is_retryable());
        assert!(!SubmitterError::UnsupportedFeeShape("none".into()).is_retryable());
        assert!(SubmitterError::Timeout {
            operation: "send".into()
        }
        .is_retryable());
    }

    #[test]
    fn insufficient_funds_rejection_alerts() {
        let rejection = SubmitterError::SinkRejection {
            chain_id: 10,
            kind: TransactionKind::Approve,
            nonce: None,
            reason: "insufficient funds for gas * price + value".to_string(),
        };
        assert!(rejection.should_alert());
        assert_eq!(
            rejection.to_string(),
            "approve transaction with nonce None rejected on chain 10: insufficient funds for gas * price + value"
        );
    }
}
