//! Interfaces of the external collaborators the engine consumes.
//!
//! The engine never reaches for a wallet, a clock or a storage engine directly. Each component receives its
//! collaborators at construction, which is also what makes the wall-clock guards and outbound calls testable.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum WalletError {
    #[error("Wallet backend is unreachable: {0}")]
    Unreachable(String),
    #[error("Wallet backend rejected the request: {0}")]
    Rejected(String),
}

/// The blockchain/wallet collaborator. The engine only ever asks it for receiving addresses and subscriptions;
/// observations flow back through the watcher's feed channel.
#[allow(async_fn_in_trait)]
pub trait WalletBackend: Clone + Send + Sync + 'static {
    /// Allocate a fresh receiving address for a new invoice.
    async fn new_address(&self) -> Result<String, WalletError>;

    /// Subscribe the backend's observer to `address` so payments to it appear on the feed.
    async fn watch_address(&self, address: &str) -> Result<(), WalletError>;
}

/// Injected time source. Production wiring uses [`SystemClock`]; tests drive a manual clock to exercise expiry and
/// settlement guards without sleeping.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
