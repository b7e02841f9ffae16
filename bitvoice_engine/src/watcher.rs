//! The orchestrator: feed events in, persisted transitions and notification jobs out.
//!
//! The watcher owns the typed feed channel. For every event it loads the invoice, lets the state machine evaluate
//! the guards, and routes the outcome through the store's compare-and-set path, retrying with a fresh read when it
//! loses an update race. The companion sweep worker drives the purely time- and depth-based transitions the feed
//! will never announce.

use std::sync::Arc;

use log::*;
use tokio::{
    sync::{mpsc, Notify},
    task::JoinHandle,
};

use crate::{
    db_types::{BaseState, Invoice, InvoiceId},
    events::FeedEvent,
    kv::KvStore,
    state_machine::{Signal, StateMachine},
    store::{CasOutcome, InvoiceStore, StoreError},
    traits::Clock,
};

const MAX_CAS_RETRIES: usize = 5;
const FEED_BUFFER: usize = 256;
const SWEEP_PAGE_SIZE: usize = 100;

//--------------------------------------   PaymentWatcher    ---------------------------------------------------------
pub struct PaymentWatcher<S: KvStore> {
    store: InvoiceStore<S>,
    machine: StateMachine,
    clock: Arc<dyn Clock>,
    events: mpsc::Receiver<FeedEvent>,
    requeue: mpsc::Sender<FeedEvent>,
    dispatcher_wake: Arc<Notify>,
}

impl<S: KvStore> PaymentWatcher<S> {
    /// Build the watcher and hand back the sender half of its feed channel. Everything that observes the chain
    /// (the wallet callback routes, in production) pushes events through that sender.
    pub fn new(
        store: InvoiceStore<S>,
        machine: StateMachine,
        clock: Arc<dyn Clock>,
        dispatcher_wake: Arc<Notify>,
    ) -> (Self, mpsc::Sender<FeedEvent>) {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let watcher = Self { store, machine, clock, events: rx, requeue: tx.clone(), dispatcher_wake };
        (watcher, tx)
    }

    /// Event loop; returns when every sender (including the internal re-queue handle) is dropped.
    pub async fn run(mut self) {
        info!("🔄️ Payment watcher started");
        while let Some(event) = self.events.recv().await {
            if let Err(e) = self.process_event(&event).await {
                error!("🔄️ Failed to process feed event for invoice {}: {e}", event.invoice_id());
            }
        }
        info!("🔄️ Feed channel closed; payment watcher shutting down");
    }

    /// Apply one feed event through the CAS path. Returns the updated invoice when a transition was persisted.
    ///
    /// Losing an update race triggers a bounded re-read/re-evaluate loop: the guard runs against the winner's
    /// record, so a racing expiry and payment cannot both apply. When the retries are exhausted the event goes
    /// back on the feed channel rather than being dropped.
    pub async fn process_event(&self, event: &FeedEvent) -> Result<Option<Invoice>, StoreError> {
        let id = event.invoice_id().clone();
        let signal = match event {
            FeedEvent::TxObserved { txid, outputs, confirmations, .. } => Signal::TxObserved {
                txid: txid.clone(),
                outputs: outputs.clone(),
                confirmations: *confirmations,
            },
            FeedEvent::Reorg { txid, .. } => Signal::TxEvicted { txid: txid.clone() },
        };
        for attempt in 1..=MAX_CAS_RETRIES {
            match self.try_apply(&id, &signal).await {
                Ok(outcome) => {
                    if let Some(invoice) = &outcome {
                        debug!("🔄️ Invoice {} is now {} (sequence {})", id, invoice.base_state, invoice.sequence);
                    }
                    return Ok(outcome);
                },
                Err(StoreError::Conflict { .. }) => {
                    debug!("🔄️ Lost an update race on invoice {id} (attempt {attempt}); re-evaluating");
                },
                Err(StoreError::NotFound(_)) => {
                    warn!("🔄️ Feed event for unknown invoice {id}; dropping");
                    return Ok(None);
                },
                Err(e) => return Err(e),
            }
        }
        warn!("🔄️ Could not apply feed event for invoice {id} after {MAX_CAS_RETRIES} attempts; re-queueing");
        let requeue = self.requeue.clone();
        let event = event.clone();
        tokio::spawn(async move {
            if let Err(e) = requeue.send(event).await {
                error!("🔄️ Could not re-queue feed event: {e}");
            }
        });
        Ok(None)
    }

    async fn try_apply(&self, id: &InvoiceId, signal: &Signal) -> Result<Option<Invoice>, StoreError> {
        let current = self.store.get_by_id(id).await?;
        let now = self.clock.now();
        let machine = &self.machine;
        match self.store.cas_update(id, current.sequence, |inv| machine.apply(inv, signal, now).into_update()).await? {
            CasOutcome::Unchanged(_) => Ok(None),
            CasOutcome::Updated { invoice, job } => {
                if job.is_some() {
                    self.dispatcher_wake.notify_one();
                }
                Ok(Some(invoice))
            },
        }
    }
}

//--------------------------------------    Sweep worker     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepResult {
    pub expired: usize,
    pub confirmed: usize,
    pub completed: usize,
}

impl SweepResult {
    pub fn total(&self) -> usize {
        self.expired + self.confirmed + self.completed
    }
}

/// Starts the expiry/settlement sweep worker. Do not await the returned JoinHandle, as it runs indefinitely.
pub fn start_sweep_worker<S: KvStore>(
    store: InvoiceStore<S>,
    machine: StateMachine,
    clock: Arc<dyn Clock>,
    dispatcher_wake: Arc<Notify>,
    every: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(every);
        info!("🕰️ Expiry/settlement sweep worker started");
        loop {
            timer.tick().await;
            match run_sweep(&store, &machine, clock.as_ref()).await {
                Ok(result) if result.total() > 0 => {
                    info!(
                        "🕰️ Sweep: {} expired, {} confirmed, {} completed",
                        result.expired, result.confirmed, result.completed
                    );
                    dispatcher_wake.notify_one();
                },
                Ok(_) => debug!("🕰️ Sweep made no changes"),
                Err(e) => error!("🕰️ Sweep failed: {e}"),
            }
        }
    })
}

/// One pass over every invoice, driving the transitions that only time or recorded depth can trigger:
/// `new -> expired`, `paid -> confirmed` (from the depth recorded at the last persisted change) and
/// `confirmed -> complete`.
pub async fn run_sweep<S: KvStore>(
    store: &InvoiceStore<S>,
    machine: &StateMachine,
    clock: &dyn Clock,
) -> Result<SweepResult, StoreError> {
    let mut result = SweepResult::default();
    let mut cursor = None;
    loop {
        let (page, next) = store.list_created_after(cursor, SWEEP_PAGE_SIZE).await?;
        for invoice in &page {
            let signal = match invoice.base_state {
                BaseState::New => Signal::ExpiryTick,
                BaseState::Paid => Signal::DepthCheck,
                BaseState::Confirmed => Signal::SettlementTick,
                _ => continue,
            };
            if let Some(updated) = apply_with_retry(store, machine, &invoice.id, &signal, clock).await? {
                match updated.base_state {
                    BaseState::Expired => result.expired += 1,
                    BaseState::Confirmed => result.confirmed += 1,
                    BaseState::Complete => result.completed += 1,
                    _ => {},
                }
            }
        }
        match next {
            Some(n) => cursor = Some(n),
            None => break,
        }
    }
    Ok(result)
}

async fn apply_with_retry<S: KvStore>(
    store: &InvoiceStore<S>,
    machine: &StateMachine,
    id: &InvoiceId,
    signal: &Signal,
    clock: &dyn Clock,
) -> Result<Option<Invoice>, StoreError> {
    for _ in 0..MAX_CAS_RETRIES {
        let current = match store.get_by_id(id).await {
            Ok(invoice) => invoice,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let now = clock.now();
        match store.cas_update(id, current.sequence, |inv| machine.apply(inv, signal, now).into_update()).await {
            Ok(CasOutcome::Unchanged(_)) => return Ok(None),
            Ok(CasOutcome::Updated { invoice, .. }) => return Ok(Some(invoice)),
            Err(StoreError::Conflict { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    // The next sweep pass retries shortly; losing every race here only defers the tick
    Ok(None)
}
