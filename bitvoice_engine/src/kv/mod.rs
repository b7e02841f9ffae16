//! The ordered key-value storage adapter consumed by the invoice store.
//!
//! The engine never talks to a storage engine directly. Everything goes through [`KvStore`]: an ordered byte-keyed
//! map with atomic batched writes. Two bindings are provided: [`MemoryKv`] for tests and ephemeral runs, and
//! [`RedbKv`] for durable on-disk storage.

mod memory;
mod redb_store;

use thiserror::Error;

pub use memory::MemoryKv;
pub use redb_store::RedbKv;

#[derive(Debug, Clone, Error)]
pub enum KvError {
    #[error("Storage engine error: {0}")]
    Backend(String),
}

//--------------------------------------    WriteBatch    ------------------------------------------------------------
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// A set of writes that must be applied atomically: either every operation is visible, or none are.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Put { key: key.into(), value: value.into() });
        self
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

//--------------------------------------      KvStore      -----------------------------------------------------------
/// An ordered byte-keyed store with atomic batched writes.
///
/// Keys are sorted lexicographically, which the invoice store relies on for its chronological secondary index and
/// for per-invoice ordering of notification jobs.
pub trait KvStore: Clone + Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    fn delete(&self, key: &[u8]) -> Result<(), KvError>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;

    /// Up to `limit` entries under `prefix` with keys strictly greater than `after`, in key order.
    fn scan_after(&self, prefix: &[u8], after: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;

    /// Apply a batch atomically.
    fn commit(&self, batch: WriteBatch) -> Result<(), KvError>;
}
