//! Payment matching: classify observed transaction outputs against an invoice's expected amount.
//!
//! This module is pure. It never mutates an invoice; the state machine applies the classification it returns.

use bvg_common::Satoshi;

use crate::db_types::{ExceptionState, Invoice, TxOutput};

/// The result of matching one observed transaction against an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentMatch {
    /// Value the transaction's outputs add to the invoice. Zero when the transaction is already counted or pays
    /// nothing to the invoice's address.
    pub delta: Satoshi,
    /// `matched_total + delta`.
    pub new_total: Satoshi,
    /// Classification of `new_total` against the tolerance-widened price band.
    pub exception: ExceptionState,
    /// True when `new_total` reaches the lower bound of the band, i.e. the invoice is payable as exact or over.
    pub qualifies: bool,
}

/// Sum the outputs of `txid` paying the invoice's address, skipping transactions already counted, and classify the
/// prospective new total. `tolerance_bps` widens the acceptance band around the price in basis points.
pub fn match_outputs(invoice: &Invoice, txid: &str, outputs: &[TxOutput], tolerance_bps: u32) -> PaymentMatch {
    let delta = if invoice.has_transaction(txid) {
        Satoshi::default()
    } else {
        outputs.iter().filter(|o| o.address == invoice.address).map(|o| o.value).sum()
    };
    let new_total = invoice.matched_total + delta;
    let (exception, qualifies) = classify(invoice.price, new_total, tolerance_bps);
    PaymentMatch { delta, new_total, exception, qualifies }
}

/// Classify `total` against `price` widened by `tolerance_bps`.
pub fn classify(price: Satoshi, total: Satoshi, tolerance_bps: u32) -> (ExceptionState, bool) {
    let bps = i128::from(tolerance_bps);
    let price = i128::from(price.value());
    let total = i128::from(total.value());
    let lower = price * (10_000 - bps) / 10_000;
    let upper = price * (10_000 + bps) / 10_000;
    if total < lower {
        (ExceptionState::PaidPartial, false)
    } else if total > upper {
        (ExceptionState::PaidOver, true)
    } else {
        (ExceptionState::None, true)
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use bvg_common::Secret;
    use chrono::Utc;

    use super::*;
    use crate::db_types::{BaseState, InvoiceId};

    fn invoice(price: i64) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: InvoiceId("inv1".into()),
            token: Secret::new("tok".into()),
            price: Satoshi::from(price),
            currency: "BTC".into(),
            order_id: None,
            item_desc: None,
            pos_data: None,
            notification_url: None,
            notification_email: None,
            redirect_url: None,
            address: "addr1".into(),
            base_state: BaseState::New,
            exception_state: ExceptionState::None,
            created_at: now,
            expires_at: now + chrono::Duration::minutes(15),
            updated_at: now,
            confirmed_at: None,
            sequence: 0,
            created_index: 0,
            matched_total: Satoshi::default(),
            transactions: BTreeMap::new(),
            confirmation_depth: 0,
        }
    }

    #[test]
    fn exact_payment_qualifies() {
        let inv = invoice(100_000);
        let m = match_outputs(&inv, "tx1", &[TxOutput::new("addr1", Satoshi::from(100_000))], 0);
        assert_eq!(m.delta, Satoshi::from(100_000));
        assert_eq!(m.exception, ExceptionState::None);
        assert!(m.qualifies);
    }

    #[test]
    fn underpayment_is_partial() {
        let inv = invoice(100_000);
        let m = match_outputs(&inv, "tx1", &[TxOutput::new("addr1", Satoshi::from(50_000))], 0);
        assert_eq!(m.exception, ExceptionState::PaidPartial);
        assert!(!m.qualifies);
    }

    #[test]
    fn overpayment_qualifies_with_flag() {
        let inv = invoice(100_000);
        let m = match_outputs(&inv, "tx1", &[TxOutput::new("addr1", Satoshi::from(150_000))], 0);
        assert_eq!(m.exception, ExceptionState::PaidOver);
        assert!(m.qualifies);
    }

    #[test]
    fn counted_transaction_adds_nothing() {
        let mut inv = invoice(100_000);
        inv.transactions.insert("tx1".into(), Satoshi::from(60_000));
        inv.matched_total = Satoshi::from(60_000);
        let m = match_outputs(&inv, "tx1", &[TxOutput::new("addr1", Satoshi::from(60_000))], 0);
        assert_eq!(m.delta, Satoshi::default());
        assert_eq!(m.new_total, Satoshi::from(60_000));
        assert_eq!(m.exception, ExceptionState::PaidPartial);
    }

    #[test]
    fn outputs_to_other_addresses_are_ignored() {
        let inv = invoice(100_000);
        let outputs = [
            TxOutput::new("elsewhere", Satoshi::from(90_000)),
            TxOutput::new("addr1", Satoshi::from(40_000)),
            TxOutput::new("addr1", Satoshi::from(60_000)),
        ];
        let m = match_outputs(&inv, "tx1", &outputs, 0);
        assert_eq!(m.delta, Satoshi::from(100_000));
        assert_eq!(m.exception, ExceptionState::None);
    }

    #[test]
    fn tolerance_widens_the_band() {
        // 1% tolerance on 100_000 accepts 99_000..=101_000 as exact
        let inv = invoice(100_000);
        let m = match_outputs(&inv, "tx1", &[TxOutput::new("addr1", Satoshi::from(99_000))], 100);
        assert_eq!(m.exception, ExceptionState::None);
        assert!(m.qualifies);
        let m = match_outputs(&inv, "tx2", &[TxOutput::new("addr1", Satoshi::from(98_999))], 100);
        assert_eq!(m.exception, ExceptionState::PaidPartial);
        let m = match_outputs(&inv, "tx3", &[TxOutput::new("addr1", Satoshi::from(101_001))], 100);
        assert_eq!(m.exception, ExceptionState::PaidOver);
        assert!(m.qualifies);
    }
}
