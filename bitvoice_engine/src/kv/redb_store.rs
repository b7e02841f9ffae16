use std::{fmt::Display, ops::Bound, path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};

use super::{BatchOp, KvError, KvStore, WriteBatch};

// Flat byte keyspace; the invoice store layers its own key prefixes on top.
const KV_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("bitvoice_kv");

fn backend<E: Display>(e: E) -> KvError {
    KvError::Backend(e.to_string())
}

/// A durable [`KvStore`] binding over a single-table redb database. Every [`WriteBatch`] commits in one redb write
/// transaction.
#[derive(Debug, Clone)]
pub struct RedbKv {
    db: Arc<Database>,
}

impl RedbKv {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let db = Database::create(path).map_err(backend)?;
        // Create the table up front so that reads before the first write find it.
        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(KV_TABLE).map_err(backend)?;
        txn.commit().map_err(backend)?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl KvStore for RedbKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(KV_TABLE).map_err(backend)?;
        let value = table.get(key).map_err(backend)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let mut batch = WriteBatch::new();
        batch.put(key.to_vec(), value.to_vec());
        self.commit(batch)
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        let mut batch = WriteBatch::new();
        batch.delete(key.to_vec());
        self.commit(batch)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(KV_TABLE).map_err(backend)?;
        let mut entries = Vec::new();
        for item in table.range(prefix..).map_err(backend)? {
            let (k, v) = item.map_err(backend)?;
            if !k.value().starts_with(prefix) {
                break;
            }
            entries.push((k.value().to_vec(), v.value().to_vec()));
        }
        Ok(entries)
    }

    fn scan_after(&self, prefix: &[u8], after: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(KV_TABLE).map_err(backend)?;
        let start: Bound<&[u8]> = if after < prefix { Bound::Included(prefix) } else { Bound::Excluded(after) };
        let mut entries = Vec::new();
        let range: (Bound<&[u8]>, Bound<&[u8]>) = (start, Bound::Unbounded);
        for item in table.range::<&[u8]>(range).map_err(backend)? {
            let (k, v) = item.map_err(backend)?;
            if !k.value().starts_with(prefix) {
                break;
            }
            entries.push((k.value().to_vec(), v.value().to_vec()));
            if entries.len() == limit {
                break;
            }
        }
        Ok(entries)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), KvError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(KV_TABLE).map_err(backend)?;
            for op in batch.into_ops() {
                match op {
                    BatchOp::Put { key, value } => {
                        table.insert(key.as_slice(), value.as_slice()).map_err(backend)?;
                    },
                    BatchOp::Delete { key } => {
                        table.remove(key.as_slice()).map_err(backend)?;
                    },
                }
            }
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_and_scans() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.redb");
        let kv = RedbKv::open(&path).unwrap();
        kv.put(b"invoice/a", b"1").unwrap();
        kv.put(b"invoice/b", b"2").unwrap();
        kv.put(b"meta/v", b"x").unwrap();

        assert_eq!(kv.get(b"invoice/a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get(b"missing").unwrap(), None);

        let invoices = kv.scan_prefix(b"invoice/").unwrap();
        assert_eq!(invoices.len(), 2);
        let page = kv.scan_after(b"invoice/", b"invoice/a", 5).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].0, b"invoice/b".to_vec());
    }

    #[test]
    fn batch_commits_atomically_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.redb");
        {
            let kv = RedbKv::open(&path).unwrap();
            let mut batch = WriteBatch::new();
            batch.put(b"a".to_vec(), b"1".to_vec());
            batch.put(b"b".to_vec(), b"2".to_vec());
            batch.delete(b"a".to_vec());
            kv.commit(batch).unwrap();
        }
        let kv = RedbKv::open(&path).unwrap();
        assert_eq!(kv.get(b"a").unwrap(), None);
        assert_eq!(kv.get(b"b").unwrap(), Some(b"2".to_vec()));
    }
}
