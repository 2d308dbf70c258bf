//! Storage drivers for persisted store fields.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::StoreError;

/// Trait for key/value storage backends.
///
/// Values are opaque strings; encoding is the store's job. Implementations
/// must be shareable across tasks because writes are spawned onto the tokio
/// runtime.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Read the value stored under `key`, or `None` if nothing is stored.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
}

/// In-memory driver for tests and development.
///
/// Clones share the same entries. Reads and writes can be made to fail to
/// exercise the store's fallback paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    entries: Arc<DashMap<String, String>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryDriver {
    /// Create an empty driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value without going through the async interface.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// The raw stored value, if any.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Make every subsequent `get` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `set` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Driver(format!("read of {key} refused")));
        }
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Driver(format!("write of {key} refused")));
        }
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }
}
