use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{Arc, RwLock},
};

use super::{BatchOp, KvError, KvStore, WriteBatch};

/// An in-memory [`KvStore`] over a `BTreeMap`. Used by the test suites and for ephemeral gateway runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    inner: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let entries = map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(entries)
    }

    fn scan_after(&self, prefix: &[u8], after: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let start = if after < prefix {
            Bound::Included(prefix.to_vec())
        } else {
            Bound::Excluded(after.to_vec())
        };
        let entries = map
            .range((start, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(entries)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), KvError> {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                },
                BatchOp::Delete { key } => {
                    map.remove(&key);
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ordered_scans() {
        let kv = MemoryKv::new();
        kv.put(b"a/1", b"one").unwrap();
        kv.put(b"a/2", b"two").unwrap();
        kv.put(b"a/3", b"three").unwrap();
        kv.put(b"b/1", b"other").unwrap();

        let all = kv.scan_prefix(b"a/").unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].0, b"a/1".to_vec());
        assert_eq!(all[2].1, b"three".to_vec());

        let page = kv.scan_after(b"a/", b"a/1", 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].0, b"a/2".to_vec());

        let from_start = kv.scan_after(b"a/", b"", 10).unwrap();
        assert_eq!(from_start.len(), 3);
    }

    #[test]
    fn batch_is_applied_in_order() {
        let kv = MemoryKv::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"v1".to_vec());
        batch.delete(b"k".to_vec());
        batch.put(b"k".to_vec(), b"v2".to_vec());
        kv.commit(batch).unwrap();
        assert_eq!(kv.get(b"k").unwrap(), Some(b"v2".to_vec()));
    }
}
