//! Storage traits and implementations
//!
//! Mail rows go through the [`MailStore`] trait so the cycle controller
//! can run against SQLite or an in-memory store. The checkpoint has its
//! own file-backed store with snapshot/restore.

mod checkpoint;
mod deferred;
mod memory;
mod sqlite;
mod traits;

pub use checkpoint::{CHECKPOINT_FILE, CheckpointStore, SnapshotHandle};
pub use deferred::DeferredSqliteStore;
pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub use traits::MailStore;
