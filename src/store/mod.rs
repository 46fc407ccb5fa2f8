//! Versioned cache store: named generations of captured responses.
//!
//! A generation is a versioned snapshot of the application shell, keyed by
//! request identity (method + URL). The store trait hides the backend so the
//! worker can run against SQLite on disk or fully in memory.

mod storage;
mod types;

pub use storage::{CacheStore, MemoryStore, SqliteStore};
pub use types::{CacheEntryMeta, GenerationInfo, RequestIdentity, StoredResponse};
