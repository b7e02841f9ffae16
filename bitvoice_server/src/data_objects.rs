use std::fmt::Display;

use bitvoice_engine::{
    db_types::{InvoiceId, NewInvoice, TxOutput, ValidationError},
    events::FeedEvent,
    invoice_objects::InvoiceResult,
};
use bvg_common::Satoshi;
use serde::{Deserialize, Serialize};

//--------------------------------------  CreateInvoiceRequest  ------------------------------------------------------
/// The `POST /invoices` body. Unknown fields are rejected outright; everything else is validated on the way into
/// [`NewInvoice`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateInvoiceRequest {
    /// Invoice price in satoshi.
    pub price: i64,
    pub currency: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub item_desc: Option<String>,
    #[serde(default)]
    pub pos_data: Option<String>,
    #[serde(default, rename = "notificationURL")]
    pub notification_url: Option<String>,
    #[serde(default)]
    pub notification_email: Option<String>,
    #[serde(default, rename = "redirectURL")]
    pub redirect_url: Option<String>,
}

impl TryFrom<CreateInvoiceRequest> for NewInvoice {
    type Error = ValidationError;

    fn try_from(req: CreateInvoiceRequest) -> Result<Self, Self::Error> {
        let mut invoice = NewInvoice::try_new(Satoshi::from(req.price), &req.currency)?;
        if let Some(order_id) = req.order_id {
            invoice = invoice.with_order_id(order_id);
        }
        if let Some(item_desc) = req.item_desc {
            invoice = invoice.with_item_desc(item_desc);
        }
        if let Some(pos_data) = req.pos_data {
            invoice = invoice.with_pos_data(pos_data)?;
        }
        if let Some(url) = req.notification_url {
            invoice = invoice.with_notification_url(&url)?;
        }
        if let Some(email) = req.notification_email {
            invoice = invoice.with_notification_email(email);
        }
        if let Some(url) = req.redirect_url {
            invoice = invoice.with_redirect_url(&url)?;
        }
        Ok(invoice)
    }
}

//--------------------------------------   Wallet callbacks    -------------------------------------------------------
/// Wallet daemon callback: a transaction paying a watched address was observed, or re-observed at a new depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TxObservedNotification {
    pub invoice_id: InvoiceId,
    pub txid: String,
    pub outputs: Vec<TxOutput>,
    pub confirmations: u32,
}

impl From<TxObservedNotification> for FeedEvent {
    fn from(n: TxObservedNotification) -> Self {
        FeedEvent::TxObserved {
            invoice_id: n.invoice_id,
            txid: n.txid,
            outputs: n.outputs,
            confirmations: n.confirmations,
        }
    }
}

/// Wallet daemon callback: a previously reported transaction was evicted by a conflicting spend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReorgNotification {
    pub invoice_id: InvoiceId,
    pub txid: String,
}

impl From<ReorgNotification> for FeedEvent {
    fn from(n: ReorgNotification) -> Self {
        FeedEvent::Reorg { invoice_id: n.invoice_id, txid: n.txid }
    }
}

//--------------------------------------     Miscellaneous     -------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub cursor: Option<u64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceListResult {
    pub invoices: Vec<InvoiceResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<u64>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn create_request_rejects_unknown_fields() {
        let body = r#"{"price": 1000, "currency": "BTC", "surprise": true}"#;
        assert!(serde_json::from_str::<CreateInvoiceRequest>(body).is_err());
    }

    #[test]
    fn create_request_validates_into_new_invoice() {
        let body = r#"{
            "price": 100000,
            "currency": "btc",
            "orderId": "order-1",
            "notificationURL": "https://merchant.example/hook"
        }"#;
        let req: CreateInvoiceRequest = serde_json::from_str(body).unwrap();
        let invoice = NewInvoice::try_from(req).unwrap();
        assert_eq!(invoice.price, Satoshi::from(100_000));
        assert_eq!(invoice.currency, "BTC");
        assert_eq!(invoice.order_id.as_deref(), Some("order-1"));
        assert_eq!(invoice.notification_url.as_deref(), Some("https://merchant.example/hook"));
    }

    #[test]
    fn create_request_rejects_bad_input() {
        let req: CreateInvoiceRequest =
            serde_json::from_str(r#"{"price": 0, "currency": "BTC"}"#).unwrap();
        assert!(NewInvoice::try_from(req).is_err());

        let req: CreateInvoiceRequest =
            serde_json::from_str(r#"{"price": 10, "currency": "BTC", "notificationURL": "nope"}"#).unwrap();
        assert!(NewInvoice::try_from(req).is_err());
    }

    #[test]
    fn wallet_callbacks_map_to_feed_events() {
        let body = r#"{
            "invoiceId": "inv1",
            "txid": "deadbeef",
            "outputs": [{"address": "bc1q", "value": 5000}],
            "confirmations": 2
        }"#;
        let n: TxObservedNotification = serde_json::from_str(body).unwrap();
        let event = FeedEvent::from(n);
        let FeedEvent::TxObserved { invoice_id, txid, outputs, confirmations } = event else {
            panic!("wrong event kind");
        };
        assert_eq!(invoice_id.as_str(), "inv1");
        assert_eq!(txid, "deadbeef");
        assert_eq!(outputs[0].value, Satoshi::from(5000));
        assert_eq!(confirmations, 2);

        let n: ReorgNotification = serde_json::from_str(r#"{"invoiceId": "inv1", "txid": "deadbeef"}"#).unwrap();
        assert!(matches!(FeedEvent::from(n), FeedEvent::Reorg { .. }));
    }
}
