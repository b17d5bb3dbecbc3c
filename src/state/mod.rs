//! Pending transaction stores
//!
//! - `MemoryStore`: process-local, used without a database and in tests
//! - `StateManager`: PostgreSQL persistence

mod manager;
mod memory;

pub use manager::StateManager;
pub use memory::MemoryStore;
