//! Swap Submitter - approve-then-swap transaction submission
//!
//! Resolves nonces across the public mempool and private relay pools,
//! sequences token approvals ahead of the swaps that depend on them and
//! prices cancellations of pending transactions.

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod ports;
pub mod state;
pub mod tx;
pub mod types;

pub use error::{SubmitterError, SubmitterResult};
