//! The merchant-facing invoice API: creation and token-gated queries.

use std::{collections::BTreeMap, sync::Arc};

use bvg_common::{Satoshi, Secret};
use log::*;
use thiserror::Error;

use crate::{
    db_types::{BaseState, ExceptionState, Invoice, InvoiceId, NewInvoice},
    helpers,
    kv::KvStore,
    state_machine::PaymentPolicy,
    store::{InvoiceStore, StoreError},
    traits::{Clock, WalletBackend, WalletError},
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("Wallet backend error: {0}")]
    Wallet(#[from] WalletError),
}

#[derive(Clone)]
pub struct InvoiceApi<S: KvStore, W: WalletBackend> {
    store: InvoiceStore<S>,
    wallet: W,
    policy: PaymentPolicy,
    clock: Arc<dyn Clock>,
}

impl<S: KvStore, W: WalletBackend> InvoiceApi<S, W> {
    pub fn new(store: InvoiceStore<S>, wallet: W, policy: PaymentPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { store, wallet, policy, clock }
    }

    /// Allocate a receiving address, subscribe the wallet's observer to it, and persist the new invoice.
    ///
    /// The address is watched before the invoice is stored: a failure after `watch_address` leaves an unused
    /// subscription behind, which is harmless, whereas the reverse order could persist an invoice no one watches.
    pub async fn create_invoice(&self, new_invoice: NewInvoice) -> Result<Invoice, ApiError> {
        let address = self.wallet.new_address().await?;
        self.wallet.watch_address(&address).await?;
        let now = self.clock.now();
        let invoice = Invoice {
            id: InvoiceId(helpers::new_invoice_id()),
            token: Secret::new(helpers::new_access_token()),
            price: new_invoice.price,
            currency: new_invoice.currency,
            order_id: new_invoice.order_id,
            item_desc: new_invoice.item_desc,
            pos_data: new_invoice.pos_data,
            notification_url: new_invoice.notification_url,
            notification_email: new_invoice.notification_email,
            redirect_url: new_invoice.redirect_url,
            address,
            base_state: BaseState::New,
            exception_state: ExceptionState::None,
            created_at: now,
            expires_at: now + self.policy.invoice_ttl,
            updated_at: now,
            confirmed_at: None,
            sequence: 0,
            created_index: 0, // assigned by the store
            matched_total: Satoshi::default(),
            transactions: BTreeMap::new(),
            confirmation_depth: 0,
        };
        let invoice = self.store.create(invoice).await?;
        info!(
            "🧾️ Invoice {} created: {} {} payable to {} until {}",
            invoice.id, invoice.price, invoice.currency, invoice.address, invoice.expires_at
        );
        Ok(invoice)
    }

    pub async fn invoice(&self, id: &InvoiceId) -> Result<Invoice, ApiError> {
        Ok(self.store.get_by_id(id).await?)
    }

    pub async fn invoice_with_token(&self, id: &InvoiceId, token: &str) -> Result<Invoice, ApiError> {
        Ok(self.store.get_by_token(id, token).await?)
    }

    pub async fn list_invoices(
        &self,
        cursor: Option<u64>,
        limit: usize,
    ) -> Result<(Vec<Invoice>, Option<u64>), ApiError> {
        Ok(self.store.list_created_after(cursor, limit).await?)
    }

    pub fn policy(&self) -> &PaymentPolicy {
        &self.policy
    }

    pub fn store(&self) -> &InvoiceStore<S> {
        &self.store
    }
}
