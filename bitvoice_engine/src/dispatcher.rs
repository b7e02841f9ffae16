//! At-least-once webhook delivery.
//!
//! Jobs are created durably in the same atomic batch as the state transition they announce (see the store module),
//! so this worker only ever consumes the queue: deliver, reschedule with capped exponential backoff, or
//! dead-letter after the attempt cap. A crash between a successful POST and the bookkeeping write causes a
//! redelivery; merchants de-duplicate on `(invoiceId, sequence)`.

use std::sync::Arc;

use chrono::Duration;
use futures_util::future::join_all;
use log::*;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::Notify;

use crate::{
    db_types::NotificationJob,
    events::WebhookPayload,
    invoice_objects::InvoiceResult,
    kv::KvStore,
    store::{InvoiceStore, StoreError},
    traits::Clock,
};

#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("Webhook endpoint answered HTTP {0}")]
    HttpStatus(u16),
    #[error("Webhook request failed: {0}")]
    Network(String),
}

//--------------------------------------    WebhookSender    ---------------------------------------------------------
/// Outbound HTTP seam, injected so tests can record deliveries instead of opening sockets.
#[allow(async_fn_in_trait)]
pub trait WebhookSender: Clone + Send + Sync + 'static {
    async fn post(&self, url: &str, payload: &WebhookPayload) -> Result<(), DeliveryError>;
}

/// The production sender: a plain JSON POST with a request timeout. Timeouts apply to outbound webhook calls only;
/// nothing else in the engine is time-limited.
#[derive(Debug, Clone)]
pub struct HttpWebhookSender {
    client: Client,
}

impl HttpWebhookSender {
    pub fn new(timeout: std::time::Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| DeliveryError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

impl WebhookSender for HttpWebhookSender {
    async fn post(&self, url: &str, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        let response =
            self.client.post(url).json(payload).send().await.map_err(|e| DeliveryError::Network(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DeliveryError::HttpStatus(response.status().as_u16()))
        }
    }
}

//--------------------------------------  DispatcherConfig   ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How often the queue is polled when nothing wakes the worker explicitly.
    pub poll_interval: std::time::Duration,
    /// First retry delay; doubles per failed attempt.
    pub backoff_base: Duration,
    /// Upper bound on the retry delay.
    pub backoff_cap: Duration,
    /// Attempts before a job is dead-lettered.
    pub max_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: std::time::Duration::from_secs(5),
            backoff_base: Duration::seconds(5),
            backoff_cap: Duration::hours(1),
            max_attempts: 10,
        }
    }
}

fn backoff(config: &DispatcherConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = config.backoff_base * (1i32 << exponent);
    delay.min(config.backoff_cap)
}

//-------------------------------------- NotificationDispatcher ------------------------------------------------------
/// The delivery worker. Within one invoice only the lowest-sequence pending job is ever attempted, so merchants
/// see per-invoice notifications in sequence order; distinct invoices deliver concurrently.
pub struct NotificationDispatcher<S: KvStore, W: WebhookSender> {
    store: InvoiceStore<S>,
    sender: W,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
    wake: Arc<Notify>,
}

impl<S: KvStore, W: WebhookSender> NotificationDispatcher<S, W> {
    pub fn new(store: InvoiceStore<S>, sender: W, clock: Arc<dyn Clock>, config: DispatcherConfig) -> Self {
        Self { store, sender, clock, config, wake: Arc::new(Notify::new()) }
    }

    /// Handle for other components to nudge the worker after enqueueing work.
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Delivery loop; runs until the task is dropped at shutdown. Jobs left mid-flight are redelivered on the next
    /// start, which at-least-once semantics allow.
    pub async fn run(self) {
        info!("📬️ Notification dispatcher started");
        let mut tick = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {},
                _ = self.wake.notified() => {},
            }
            if let Err(e) = self.deliver_due().await {
                error!("📬️ Delivery pass failed: {e}");
            }
        }
    }

    /// One pass: attempt every due head-of-queue job. Returns the number of jobs attempted.
    pub async fn deliver_due(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let pending = self.store.pending_jobs().await?;
        // Jobs arrive ordered by (invoice, sequence); keep only each invoice's head so delivery stays in order
        let mut heads: Vec<NotificationJob> = Vec::new();
        for job in pending {
            match heads.last() {
                Some(head) if head.invoice_id == job.invoice_id => {},
                _ => heads.push(job),
            }
        }
        let due: Vec<_> = heads.into_iter().filter(|j| j.next_attempt_at <= now).collect();
        if due.is_empty() {
            return Ok(0);
        }
        debug!("📬️ {} notification(s) due", due.len());
        let attempted = due.len();
        let results = join_all(due.into_iter().map(|job| self.deliver(job))).await;
        for result in results {
            if let Err(e) = result {
                error!("📬️ Could not persist delivery bookkeeping: {e}");
            }
        }
        Ok(attempted)
    }

    async fn deliver(&self, mut job: NotificationJob) -> Result<(), StoreError> {
        let invoice = match self.store.get_by_id(&job.invoice_id).await {
            Ok(invoice) => invoice,
            Err(StoreError::NotFound(id)) => {
                error!("📬️ Job {} #{} refers to a missing invoice {id}; dead-lettering", job.event, job.sequence);
                return self.store.dead_letter_job(&job).await;
            },
            Err(e) => return Err(e),
        };
        // Always the invoice's *current* representation, not a snapshot from transition time
        let payload =
            WebhookPayload { invoice: InvoiceResult::from(&invoice), event: job.event, sequence: job.sequence };
        match self.sender.post(&job.url, &payload).await {
            Ok(()) => {
                debug!("📬️ Delivered {} #{} for invoice {}", job.event, job.sequence, job.invoice_id);
                self.store.complete_job(&job).await
            },
            Err(e) => {
                job.attempt += 1;
                if job.attempt >= self.config.max_attempts {
                    error!(
                        "📬️ Giving up on {} #{} for invoice {} after {} attempts: {e}. Job moved to the dead-letter \
                         queue.",
                        job.event, job.sequence, job.invoice_id, job.attempt
                    );
                    self.store.dead_letter_job(&job).await
                } else {
                    let delay = backoff(&self.config, job.attempt);
                    job.next_attempt_at = self.clock.now() + delay;
                    warn!(
                        "📬️ Delivery of {} #{} for invoice {} failed (attempt {}): {e}. Retrying in {}s",
                        job.event,
                        job.sequence,
                        job.invoice_id,
                        job.attempt,
                        delay.num_seconds()
                    );
                    self.store.update_job(&job).await
                }
            },
        }
    }
}
