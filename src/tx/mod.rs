//! Transaction submission: nonce resolution, approve-then-swap sequencing,
//! fee bumping and cancellation

pub mod cancel;
pub mod gas;
mod nonce;
pub mod sender;
mod sequencer;
mod signer;
mod watcher;

pub use cancel::{CancellationPlan, CancellationPlanner};
pub use gas::AdjustmentFactor;
pub use nonce::NonceReconciler;
pub use sender::RpcSubmissionSink;
pub use sequencer::{SubmittedTx, SwapParams, SwapSequencer, SwapSubmission};
pub use signer::LocalWalletSigner;
pub use watcher::{SweepReport, TransactionWatcher};
