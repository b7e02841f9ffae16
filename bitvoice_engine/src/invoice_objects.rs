//! Public (BitPay-compatible) invoice representations.

use bvg_common::{Satoshi, Secret};
use serde::{Deserialize, Serialize};

use crate::db_types::{BaseState, ExceptionState, Invoice, InvoiceId};

/// The invoice as merchants see it: returned from the REST endpoints and embedded in webhook bodies.
///
/// Times are unix epoch milliseconds, field names are the BitPay camelCase vocabulary, and `exceptionStatus`
/// serialises as `false` / `"paidPartial"` / `"paidOver"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceResult {
    pub id: InvoiceId,
    pub token: Secret<String>,
    pub status: BaseState,
    pub exception_status: ExceptionState,
    pub price: Satoshi,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos_data: Option<String>,
    #[serde(default, rename = "redirectURL", skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub payment_address: String,
    pub amount_paid: Satoshi,
    pub confirmations: u32,
    pub invoice_time: i64,
    pub expiration_time: i64,
}

impl From<&Invoice> for InvoiceResult {
    fn from(invoice: &Invoice) -> Self {
        Self {
            id: invoice.id.clone(),
            token: invoice.token.clone(),
            status: invoice.base_state,
            exception_status: invoice.exception_state,
            price: invoice.price,
            currency: invoice.currency.clone(),
            order_id: invoice.order_id.clone(),
            item_desc: invoice.item_desc.clone(),
            pos_data: invoice.pos_data.clone(),
            redirect_url: invoice.redirect_url.clone(),
            payment_address: invoice.address.clone(),
            amount_paid: invoice.matched_total,
            confirmations: invoice.confirmation_depth,
            invoice_time: invoice.created_at.timestamp_millis(),
            expiration_time: invoice.expires_at.timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn public_json_uses_bitpay_field_names() {
        let created = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let invoice = Invoice {
            id: InvoiceId("inv123".into()),
            token: Secret::new("tok456".into()),
            price: Satoshi::from(100_000),
            currency: "BTC".into(),
            order_id: Some("order-9".into()),
            item_desc: None,
            pos_data: None,
            notification_url: Some("https://merchant.example/hook".into()),
            notification_email: None,
            redirect_url: Some("https://merchant.example/thanks".into()),
            address: "bc1qexample".into(),
            base_state: BaseState::Paid,
            exception_state: ExceptionState::PaidOver,
            created_at: created,
            expires_at: created + chrono::Duration::minutes(15),
            updated_at: created,
            confirmed_at: None,
            sequence: 1,
            created_index: 0,
            matched_total: Satoshi::from(150_000),
            transactions: BTreeMap::new(),
            confirmation_depth: 2,
        };
        let json = serde_json::to_value(InvoiceResult::from(&invoice)).unwrap();
        assert_eq!(json["id"], "inv123");
        assert_eq!(json["token"], "tok456");
        assert_eq!(json["status"], "paid");
        assert_eq!(json["exceptionStatus"], "paidOver");
        assert_eq!(json["price"], 100_000);
        assert_eq!(json["orderId"], "order-9");
        assert_eq!(json["redirectURL"], "https://merchant.example/thanks");
        assert_eq!(json["paymentAddress"], "bc1qexample");
        assert_eq!(json["amountPaid"], 150_000);
        assert_eq!(json["invoiceTime"], 1_700_000_000_000i64);
        assert!(json.get("itemDesc").is_none());
    }
}
