//! Typed messages passed between the watcher, the state machine and the notification dispatcher.
//!
//! Components communicate over explicit channels carrying these types; there is no listener registry. The wallet
//! collaborator's feed arrives as [`FeedEvent`]s and leaves, after a persisted transition, as a notification job
//! tagged with an [`InvoiceEventKind`].

use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::{
    db_types::{BaseState, InvoiceId, TxOutput},
    invoice_objects::InvoiceResult,
};

//--------------------------------------      FeedEvent      ---------------------------------------------------------
/// An observation pushed by the blockchain/wallet collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A transaction paying a watched address was observed (or re-observed at a new confirmation depth).
    TxObserved { invoice_id: InvoiceId, txid: String, outputs: Vec<TxOutput>, confirmations: u32 },
    /// A previously observed transaction was evicted or replaced by a conflicting transaction.
    Reorg { invoice_id: InvoiceId, txid: String },
}

impl FeedEvent {
    pub fn invoice_id(&self) -> &InvoiceId {
        match self {
            FeedEvent::TxObserved { invoice_id, .. } => invoice_id,
            FeedEvent::Reorg { invoice_id, .. } => invoice_id,
        }
    }
}

//--------------------------------------   InvoiceEventKind  ---------------------------------------------------------
/// The merchant-visible event vocabulary. One of these tags every notification job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEventKind {
    #[serde(rename = "invoice_paid")]
    Paid,
    #[serde(rename = "invoice_confirmed")]
    Confirmed,
    #[serde(rename = "invoice_complete")]
    Complete,
    #[serde(rename = "invoice_expired")]
    Expired,
    #[serde(rename = "invoice_invalid")]
    Invalid,
    #[serde(rename = "invoice_paidPartial")]
    PaidPartial,
    #[serde(rename = "invoice_paidOver")]
    PaidOver,
}

impl InvoiceEventKind {
    /// The event reported when an invoice lands in (or re-enters) the given base state. `New` has no event: nothing
    /// is announced at creation.
    pub fn for_base_state(state: BaseState) -> Option<Self> {
        match state {
            BaseState::New => None,
            BaseState::Paid => Some(Self::Paid),
            BaseState::Confirmed => Some(Self::Confirmed),
            BaseState::Complete => Some(Self::Complete),
            BaseState::Expired => Some(Self::Expired),
            BaseState::Invalid => Some(Self::Invalid),
        }
    }
}

impl Display for InvoiceEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvoiceEventKind::Paid => write!(f, "invoice_paid"),
            InvoiceEventKind::Confirmed => write!(f, "invoice_confirmed"),
            InvoiceEventKind::Complete => write!(f, "invoice_complete"),
            InvoiceEventKind::Expired => write!(f, "invoice_expired"),
            InvoiceEventKind::Invalid => write!(f, "invoice_invalid"),
            InvoiceEventKind::PaidPartial => write!(f, "invoice_paidPartial"),
            InvoiceEventKind::PaidOver => write!(f, "invoice_paidOver"),
        }
    }
}

//--------------------------------------    WebhookPayload   ---------------------------------------------------------
/// The body POSTed to the merchant's notification URL: the invoice's public representation plus the event tag and
/// the sequence number the job reports.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    #[serde(flatten)]
    pub invoice: InvoiceResult,
    pub event: InvoiceEventKind,
    pub sequence: u64,
}
