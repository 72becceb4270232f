//! Storage backends for targets, call records, minute stats and alerts
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` allows swapping implementations
//! - **Async**: all operations are async for use from Tokio tasks
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded database file
//! - **In-Memory**: no persistence, for tests or throwaway sessions
//!
//! ## Usage
//!
//! ```no_run
//! use websvc_monitor::storage::sqlite::SqliteBackend;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./webservice_monitor.db").await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{CleanupCounts, HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
