//! Fakes and fixtures shared by the unit and integration test suites.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use bvg_common::{Satoshi, Secret};
use chrono::{DateTime, Duration, Utc};

use crate::{
    db_types::{BaseState, ExceptionState, Invoice, InvoiceId},
    dispatcher::{DeliveryError, WebhookSender},
    events::WebhookPayload,
    traits::{Clock, WalletBackend, WalletError},
};

//--------------------------------------     ManualClock     ---------------------------------------------------------
/// A clock the test drives by hand, so expiry and settlement guards can be exercised without sleeping.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

//--------------------------------------    MemoryWallet     ---------------------------------------------------------
/// Wallet backend that hands out deterministic regtest-looking addresses and records watch subscriptions.
#[derive(Debug, Clone, Default)]
pub struct MemoryWallet {
    counter: Arc<AtomicU64>,
    watched: Arc<Mutex<Vec<String>>>,
}

impl MemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watched(&self) -> Vec<String> {
        self.watched.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl WalletBackend for MemoryWallet {
    async fn new_address(&self) -> Result<String, WalletError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("bcrt1qtest{n:06}"))
    }

    async fn watch_address(&self, address: &str) -> Result<(), WalletError> {
        self.watched.lock().unwrap_or_else(|e| e.into_inner()).push(address.to_string());
        Ok(())
    }
}

//--------------------------------------   RecordingSender   ---------------------------------------------------------
/// Webhook sender that records every payload instead of opening sockets, and can be told to fail the next `n`
/// posts to exercise the retry path.
#[derive(Debug, Clone, Default)]
pub struct RecordingSender {
    delivered: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    failures_left: Arc<AtomicU32>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<(String, serde_json::Value)> {
        self.delivered.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl WebhookSender for RecordingSender {
    async fn post(&self, url: &str, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(DeliveryError::Network("simulated failure".to_string()));
        }
        let value = serde_json::to_value(payload).map_err(|e| DeliveryError::Network(e.to_string()))?;
        self.delivered.lock().unwrap_or_else(|e| e.into_inner()).push((url.to_string(), value));
        Ok(())
    }
}

//--------------------------------------      Fixtures       ---------------------------------------------------------
/// A fresh `new` invoice with a 15 minute TTL, priced in satoshi, paying to `addr1`, with a notification URL set.
pub fn sample_invoice(price: i64) -> Invoice {
    let now = Utc::now();
    Invoice {
        id: InvoiceId("inv1".into()),
        token: Secret::new("tok".into()),
        price: Satoshi::from(price),
        currency: "BTC".into(),
        order_id: None,
        item_desc: None,
        pos_data: None,
        notification_url: Some("https://merchant.example/hook".into()),
        notification_email: None,
        redirect_url: None,
        address: "addr1".into(),
        base_state: BaseState::New,
        exception_state: ExceptionState::None,
        created_at: now,
        expires_at: now + Duration::minutes(15),
        updated_at: now,
        confirmed_at: None,
        sequence: 0,
        created_index: 0,
        matched_total: Satoshi::default(),
        transactions: BTreeMap::new(),
        confirmation_depth: 0,
    }
}
