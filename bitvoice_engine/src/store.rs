//! Durable, versioned invoice storage over the KV adapter.
//!
//! Key layout (all keys are UTF-8 prefixes with big-endian integer suffixes where noted):
//!
//! * `invoice/{id}` — primary record, JSON.
//! * `created/{index:be64}` — chronological secondary index; the value is the invoice id.
//! * `meta/schema_version` — layout version marker, checked at open.
//! * `meta/created_counter` — allocator for the chronological index.
//! * `job/{id}/{sequence:be64}` — pending notification jobs.
//! * `dead/{id}/{sequence:be64}` — dead-lettered notification jobs, kept for operator inspection.
//!
//! All mutation of invoice records goes through [`InvoiceStore::cas_update`]. The new record, its notification job
//! and any touched index entries commit in a single atomic batch, so a crash can never separate a persisted
//! transition from the notification announcing it.

use std::sync::{Arc, Mutex};

use log::*;
use thiserror::Error;

use crate::{
    db_types::{Invoice, InvoiceId, NotificationJob},
    events::InvoiceEventKind,
    kv::{KvError, KvStore, WriteBatch},
};

/// Bumped when the persisted layout changes. A store written by a different version refuses to open; there is no
/// silent migration.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &[u8] = b"meta/schema_version";
const CREATED_COUNTER_KEY: &[u8] = b"meta/created_counter";
const CREATED_PREFIX: &[u8] = b"created/";
const JOB_PREFIX: &[u8] = b"job/";
const DEAD_PREFIX: &[u8] = b"dead/";

fn invoice_key(id: &InvoiceId) -> Vec<u8> {
    format!("invoice/{}", id.as_str()).into_bytes()
}

fn created_key(index: u64) -> Vec<u8> {
    let mut key = CREATED_PREFIX.to_vec();
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn job_key(id: &InvoiceId, sequence: u64) -> Vec<u8> {
    let mut key = format!("job/{}/", id.as_str()).into_bytes();
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

fn dead_key(id: &InvoiceId, sequence: u64) -> Vec<u8> {
    let mut key = format!("dead/{}/", id.as_str()).into_bytes();
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

//--------------------------------------     StoreError      ---------------------------------------------------------
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("An invoice with id {0} already exists")]
    DuplicateId(InvoiceId),
    #[error("Invoice {0} not found")]
    NotFound(InvoiceId),
    #[error("The supplied token does not grant access to invoice {0}")]
    Unauthorized(InvoiceId),
    #[error("Invoice {id} changed concurrently: expected sequence {expected}, found {found}")]
    Conflict { id: InvoiceId, expected: u64, found: u64 },
    #[error("Schema version mismatch: the store is at version {found}, this binary expects {expected}")]
    SchemaVersion { found: u32, expected: u32 },
    #[error("Storage backend error: {0}")]
    Storage(#[from] KvError),
    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

//--------------------------------------     CasOutcome      ---------------------------------------------------------
/// Result of a [`InvoiceStore::cas_update`] whose sequence check passed.
#[derive(Debug, Clone)]
pub enum CasOutcome {
    /// The mutator declined to change anything; nothing was written and no sequence number was consumed.
    Unchanged(Invoice),
    /// The new record was committed, together with the notification job announcing it (absent when the invoice has
    /// no notification URL).
    Updated { invoice: Invoice, job: Option<NotificationJob> },
}

//--------------------------------------    InvoiceStore     ---------------------------------------------------------
/// Invoice CRUD plus the chronological index and the notification-job queue, over any [`KvStore`].
///
/// Writers serialise on an internal lock; the KV engine is owned by this process. A caller that read a record
/// before the lock was taken can still lose the race, which surfaces as [`StoreError::Conflict`] for its retry
/// loop.
#[derive(Debug, Clone)]
pub struct InvoiceStore<S: KvStore> {
    kv: S,
    write_lock: Arc<Mutex<()>>,
}

impl<S: KvStore> InvoiceStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv, write_lock: Arc::new(Mutex::new(())) }
    }

    /// Verify the schema-version marker, initialising it on first use. Fails fast on a mismatch so an incompatible
    /// binary cannot scramble existing data.
    pub async fn open(&self) -> Result<(), StoreError> {
        match self.kv.get(SCHEMA_VERSION_KEY)? {
            None => {
                self.kv.put(SCHEMA_VERSION_KEY, &SCHEMA_VERSION.to_be_bytes())?;
                info!("🗃️ Invoice store initialised at schema version {SCHEMA_VERSION}");
                Ok(())
            },
            Some(bytes) => {
                let found = bytes
                    .as_slice()
                    .try_into()
                    .map(u32::from_be_bytes)
                    .map_err(|_| StoreError::Corrupt("schema version marker is not a u32".to_string()))?;
                if found == SCHEMA_VERSION {
                    debug!("🗃️ Invoice store opened at schema version {found}");
                    Ok(())
                } else {
                    Err(StoreError::SchemaVersion { found, expected: SCHEMA_VERSION })
                }
            },
        }
    }

    /// Persist a brand-new invoice. The chronological index position is assigned here; everything commits in one
    /// batch.
    pub async fn create(&self, mut invoice: Invoice) -> Result<Invoice, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let key = invoice_key(&invoice.id);
        if self.kv.get(&key)?.is_some() {
            return Err(StoreError::DuplicateId(invoice.id));
        }
        let index = match self.kv.get(CREATED_COUNTER_KEY)? {
            None => 0u64,
            Some(bytes) => bytes
                .as_slice()
                .try_into()
                .map(u64::from_be_bytes)
                .map_err(|_| StoreError::Corrupt("creation counter is not a u64".to_string()))?,
        };
        invoice.created_index = index;
        let mut batch = WriteBatch::new();
        batch.put(key, serde_json::to_vec(&invoice)?);
        batch.put(created_key(index), invoice.id.as_str().as_bytes().to_vec());
        batch.put(CREATED_COUNTER_KEY.to_vec(), (index + 1).to_be_bytes().to_vec());
        self.kv.commit(batch)?;
        debug!("🗃️ Invoice {} stored at index {index}", invoice.id);
        Ok(invoice)
    }

    pub async fn get_by_id(&self, id: &InvoiceId) -> Result<Invoice, StoreError> {
        match self.kv.get(&invoice_key(id))? {
            None => Err(StoreError::NotFound(id.clone())),
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        }
    }

    /// Token-gated lookup. The token is the only capability attached to an invoice; an exact match is required.
    pub async fn get_by_token(&self, id: &InvoiceId, token: &str) -> Result<Invoice, StoreError> {
        let invoice = self.get_by_id(id).await?;
        if invoice.token.reveal() == token {
            Ok(invoice)
        } else {
            warn!("🗃️ Rejected token for invoice {id}");
            Err(StoreError::Unauthorized(id.clone()))
        }
    }

    /// The sole mutation path for invoice records.
    ///
    /// Reads the current record under the write lock, verifies its sequence still equals `expected_sequence`
    /// (returning [`StoreError::Conflict`] otherwise, for the caller to retry with a fresh read), applies the
    /// mutator, and commits the bumped record together with the notification job describing the change.
    pub async fn cas_update<F>(
        &self,
        id: &InvoiceId,
        expected_sequence: u64,
        mutator: F,
    ) -> Result<CasOutcome, StoreError>
    where
        F: FnOnce(&Invoice) -> Option<(Invoice, InvoiceEventKind)>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = match self.kv.get(&invoice_key(id))? {
            None => return Err(StoreError::NotFound(id.clone())),
            Some(bytes) => serde_json::from_slice::<Invoice>(&bytes)?,
        };
        if current.sequence != expected_sequence {
            return Err(StoreError::Conflict { id: id.clone(), expected: expected_sequence, found: current.sequence });
        }
        let Some((mut updated, event)) = mutator(&current) else {
            return Ok(CasOutcome::Unchanged(current));
        };
        updated.sequence = current.sequence + 1;
        let job = updated.notification_url.clone().map(|url| NotificationJob {
            invoice_id: updated.id.clone(),
            sequence: updated.sequence,
            event,
            url,
            attempt: 0,
            next_attempt_at: updated.updated_at,
            created_at: updated.updated_at,
        });
        let mut batch = WriteBatch::new();
        batch.put(invoice_key(id), serde_json::to_vec(&updated)?);
        if let Some(job) = &job {
            batch.put(job_key(id, job.sequence), serde_json::to_vec(job)?);
        }
        self.kv.commit(batch)?;
        debug!("🗃️ Invoice {id} advanced to sequence {} ({event})", updated.sequence);
        Ok(CasOutcome::Updated { invoice: updated, job })
    }

    /// Chronological page scan over the secondary index. `cursor` is exclusive; pass `None` to start from the
    /// beginning. Returns the page and the cursor for the next one (when the page was full).
    pub async fn list_created_after(
        &self,
        cursor: Option<u64>,
        limit: usize,
    ) -> Result<(Vec<Invoice>, Option<u64>), StoreError> {
        let after = match cursor {
            None => Vec::new(),
            Some(c) => created_key(c),
        };
        let entries = self.kv.scan_after(CREATED_PREFIX, &after, limit)?;
        let full_page = entries.len() == limit;
        let mut last_index = None;
        let mut invoices = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let index_bytes = key
                .get(CREATED_PREFIX.len()..)
                .and_then(|b| <[u8; 8]>::try_from(b).ok())
                .ok_or_else(|| StoreError::Corrupt("malformed chronological index key".to_string()))?;
            let id = InvoiceId(String::from_utf8_lossy(&value).into_owned());
            match self.get_by_id(&id).await {
                Ok(invoice) => invoices.push(invoice),
                Err(StoreError::NotFound(_)) => {
                    error!("🗃️ Chronological index points at missing invoice {id}; skipping");
                },
                Err(e) => return Err(e),
            }
            last_index = Some(u64::from_be_bytes(index_bytes));
        }
        let next_cursor = if full_page { last_index } else { None };
        Ok((invoices, next_cursor))
    }

    //----------------------------------   Notification queue   ------------------------------------------------------

    /// All pending jobs, ordered by invoice id and then sequence.
    pub async fn pending_jobs(&self) -> Result<Vec<NotificationJob>, StoreError> {
        let entries = self.kv.scan_prefix(JOB_PREFIX)?;
        let mut jobs = Vec::with_capacity(entries.len());
        for (_, value) in entries {
            jobs.push(serde_json::from_slice(&value)?);
        }
        Ok(jobs)
    }

    /// Durably persist a job outside the CAS path. Used when re-queueing work that already consumed its sequence
    /// number.
    pub async fn enqueue_job(&self, job: &NotificationJob) -> Result<(), StoreError> {
        self.kv.put(&job_key(&job.invoice_id, job.sequence), &serde_json::to_vec(job)?)?;
        Ok(())
    }

    /// Persist an updated attempt count / next-attempt time for a pending job.
    pub async fn update_job(&self, job: &NotificationJob) -> Result<(), StoreError> {
        self.enqueue_job(job).await
    }

    /// Remove a delivered job.
    pub async fn complete_job(&self, job: &NotificationJob) -> Result<(), StoreError> {
        self.kv.delete(&job_key(&job.invoice_id, job.sequence))?;
        Ok(())
    }

    /// Move a job to the dead-letter keyspace after its attempts are exhausted. Atomic, so the job cannot vanish
    /// or exist in both places.
    pub async fn dead_letter_job(&self, job: &NotificationJob) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.delete(job_key(&job.invoice_id, job.sequence));
        batch.put(dead_key(&job.invoice_id, job.sequence), serde_json::to_vec(job)?);
        self.kv.commit(batch)?;
        Ok(())
    }

    /// Dead-lettered jobs, for operator inspection.
    pub async fn dead_letters(&self) -> Result<Vec<NotificationJob>, StoreError> {
        let entries = self.kv.scan_prefix(DEAD_PREFIX)?;
        let mut jobs = Vec::with_capacity(entries.len());
        for (_, value) in entries {
            jobs.push(serde_json::from_slice(&value)?);
        }
        Ok(jobs)
    }
}
