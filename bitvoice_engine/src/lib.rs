//! BitVoice Payment Engine
//!
//! The core of the BitVoice gateway: a BitPay-compatible invoice lifecycle engine. Merchants create invoices, the
//! gateway allocates a receiving address and watches the wallet backend's observation feed, each invoice advances
//! through its lifecycle as confirmations accrue, and every state change is announced to the merchant with an
//! at-least-once webhook.
//!
//! The library is provider-agnostic at every seam:
//! 1. Storage goes through the [`mod@kv`] adapter: an ordered byte-keyed store with atomic batched writes. A
//!    durable redb binding and an in-memory binding are included.
//! 2. The blockchain/wallet collaborator is consumed through the [`WalletBackend`] trait plus a typed feed channel
//!    into the [`PaymentWatcher`]; none of its internals leak into the engine.
//! 3. Outbound webhook delivery goes through the [`WebhookSender`] seam so the retry machinery can be tested
//!    without sockets.
//!
//! All invoice mutation funnels through [`InvoiceStore::cas_update`], which makes the storage layer the single
//! serialisation point per invoice: concurrent observers race on the compare-and-set and losers re-evaluate
//! against the winner's record.

pub mod db_types;
pub mod events;
pub mod helpers;
pub mod invoice_objects;
pub mod kv;
pub mod test_utils;

mod api;
mod dispatcher;
mod matcher;
mod state_machine;
mod store;
mod traits;
mod watcher;

pub use api::{ApiError, InvoiceApi};
pub use dispatcher::{
    DeliveryError,
    DispatcherConfig,
    HttpWebhookSender,
    NotificationDispatcher,
    WebhookSender,
};
pub use matcher::{classify, match_outputs, PaymentMatch};
pub use state_machine::{Outcome, PaymentPolicy, ReorgPolicy, Signal, StateMachine};
pub use store::{CasOutcome, InvoiceStore, StoreError, SCHEMA_VERSION};
pub use traits::{Clock, SystemClock, WalletBackend, WalletError};
pub use watcher::{run_sweep, start_sweep_worker, PaymentWatcher, SweepResult};
