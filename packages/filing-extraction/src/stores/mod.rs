//! Storage implementations for the filing extraction library.
//!
//! Available backends:
//! - `MemoryStore` - In-memory storage (always available)
//! - `SqliteStore` - SQLite file-based storage (requires `sqlite` feature)
//!
//! `AuditLog` is the append-only JSONL mirror used alongside `SqliteStore`.

pub mod audit;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use audit::AuditLog;
pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
