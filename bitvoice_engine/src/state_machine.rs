//! The invoice lifecycle state machine.
//!
//! [`StateMachine::apply`] is the single transition function: it takes the current invoice record, one signal, and
//! the current time, and returns either "no change" or the fully-updated record plus the one event to announce.
//! It never persists anything itself; the watcher routes the outcome through the store's compare-and-set path.
//!
//! Base-state edges:
//!
//! | From      | Guard                                               | To        |
//! |-----------|-----------------------------------------------------|-----------|
//! | new       | qualifying payment observed before expiry           | paid      |
//! | new       | TTL elapsed without a qualifying payment            | expired   |
//! | paid      | confirmation depth reaches the configured threshold | confirmed |
//! | confirmed | settlement window elapsed                           | complete  |
//! | new, paid, confirmed | backing transaction evicted              | invalid   |
//!
//! `complete`, `expired` and `invalid` are terminal; signals against them are discarded with a log line.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use log::*;

use crate::{
    db_types::{BaseState, ConversionError, ExceptionState, Invoice, TxOutput},
    events::InvoiceEventKind,
    matcher::{classify, match_outputs},
};

//--------------------------------------    PaymentPolicy    ---------------------------------------------------------
/// The tunables behind the lifecycle guards. Thresholds live here rather than in the transition code.
#[derive(Debug, Clone)]
pub struct PaymentPolicy {
    /// Under/over-payment tolerance in basis points. 0 means exact-amount matching.
    pub tolerance_bps: u32,
    /// Confirmation depth required for `paid -> confirmed`.
    pub required_confirmations: u32,
    /// Time after confirmation before an invoice is `complete`.
    pub settlement_window: Duration,
    /// Time a fresh invoice stays payable.
    pub invoice_ttl: Duration,
    /// What to do when a confirmed invoice's backing transaction sinks below the confirmation threshold without
    /// being double-spent.
    pub reorg_policy: ReorgPolicy,
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        Self {
            tolerance_bps: 0,
            required_confirmations: 6,
            settlement_window: Duration::hours(1),
            invoice_ttl: Duration::minutes(15),
            reorg_policy: ReorgPolicy::ForceInvalid,
        }
    }
}

/// Policy for a confirmed invoice whose backing transaction drops below the confirmation threshold while still in
/// the chain (a reorg shuffled it into a younger block).
///
/// `ForceInvalid` preserves the forward-only movement of base states at the cost of killing an invoice that would
/// often re-confirm on its own. `RevertToPaid` is the single sanctioned backward edge for operators who prefer to
/// let the invoice re-confirm; an actual eviction still invalidates regardless of this setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReorgPolicy {
    #[default]
    ForceInvalid,
    RevertToPaid,
}

impl FromStr for ReorgPolicy {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "invalid" | "force_invalid" => Ok(Self::ForceInvalid),
            "revert" | "revert_to_paid" => Ok(Self::RevertToPaid),
            s => Err(ConversionError(format!("unknown reorg policy {s}"))),
        }
    }
}

//--------------------------------------       Signal        ---------------------------------------------------------
/// One input to the transition function. Observation signals come from the wallet feed; tick signals come from the
/// sweep worker.
#[derive(Debug, Clone)]
pub enum Signal {
    TxObserved { txid: String, outputs: Vec<TxOutput>, confirmations: u32 },
    TxEvicted { txid: String },
    ExpiryTick,
    DepthCheck,
    SettlementTick,
}

//--------------------------------------       Outcome       ---------------------------------------------------------
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The guards did not fire; nothing is persisted and no sequence number is consumed.
    Unchanged,
    /// The updated record to persist (still carrying the old sequence; the store bumps it) and the event to emit.
    Transition { invoice: Invoice, event: InvoiceEventKind },
}

impl Outcome {
    pub fn into_update(self) -> Option<(Invoice, InvoiceEventKind)> {
        match self {
            Outcome::Unchanged => None,
            Outcome::Transition { invoice, event } => Some((invoice, event)),
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, Outcome::Unchanged)
    }
}

//--------------------------------------     StateMachine    ---------------------------------------------------------
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    policy: PaymentPolicy,
}

impl StateMachine {
    pub fn new(policy: PaymentPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PaymentPolicy {
        &self.policy
    }

    /// Evaluate one signal against the current record. Pure apart from logging.
    pub fn apply(&self, invoice: &Invoice, signal: &Signal, now: DateTime<Utc>) -> Outcome {
        if invoice.is_terminal() {
            debug!("🔄️ Invoice {} is terminal ({}); discarding {signal:?}", invoice.id, invoice.base_state);
            return Outcome::Unchanged;
        }
        match signal {
            Signal::TxObserved { txid, outputs, confirmations } => {
                self.on_tx_observed(invoice, txid, outputs, *confirmations, now)
            },
            Signal::TxEvicted { txid } => self.on_tx_evicted(invoice, txid, now),
            Signal::ExpiryTick => self.on_expiry_tick(invoice, now),
            Signal::DepthCheck => self.on_depth_check(invoice, now),
            Signal::SettlementTick => self.on_settlement_tick(invoice, now),
        }
    }

    fn on_tx_observed(
        &self,
        invoice: &Invoice,
        txid: &str,
        outputs: &[TxOutput],
        confirmations: u32,
        now: DateTime<Utc>,
    ) -> Outcome {
        match invoice.base_state {
            BaseState::New => {
                if now >= invoice.expires_at {
                    // The TTL ran out before the sweep got here. Expire now; the late payment is not counted.
                    info!("🔄️ Invoice {} received a payment after its expiry time; expiring instead", invoice.id);
                    return self.expire(invoice, now);
                }
                let m = match_outputs(invoice, txid, outputs, self.policy.tolerance_bps);
                if !m.delta.is_positive() {
                    debug!("🔄️ Tx {txid} adds nothing to invoice {}; ignoring", invoice.id);
                    return Outcome::Unchanged;
                }
                let mut updated = invoice.clone();
                updated.transactions.insert(txid.to_string(), m.delta);
                updated.matched_total = m.new_total;
                updated.confirmation_depth = updated.confirmation_depth.max(confirmations);
                updated.exception_state = m.exception;
                updated.updated_at = now;
                if m.qualifies {
                    updated.base_state = BaseState::Paid;
                    info!("🔄️💰️ Invoice {} paid: {} against {}", invoice.id, m.new_total, invoice.price);
                    Outcome::Transition { invoice: updated, event: InvoiceEventKind::Paid }
                } else {
                    info!("🔄️💰️ Invoice {} partially paid: {} of {}", invoice.id, m.new_total, invoice.price);
                    Outcome::Transition { invoice: updated, event: InvoiceEventKind::PaidPartial }
                }
            },
            BaseState::Paid | BaseState::Confirmed => self.on_tx_while_paid(invoice, txid, outputs, confirmations, now),
            // Terminal states are screened out in apply()
            _ => Outcome::Unchanged,
        }
    }

    /// Observations against an already-paid invoice: additional payments widen the exception state, and the
    /// confirmation depth drives `paid -> confirmed` or, on a downgrade, the reorg policy.
    fn on_tx_while_paid(
        &self,
        invoice: &Invoice,
        txid: &str,
        outputs: &[TxOutput],
        confirmations: u32,
        now: DateTime<Utc>,
    ) -> Outcome {
        let counted = invoice.has_transaction(txid);
        if invoice.base_state == BaseState::Confirmed && counted && confirmations < self.policy.required_confirmations {
            return self.downgrade(invoice, txid, confirmations, now);
        }

        let m = match_outputs(invoice, txid, outputs, self.policy.tolerance_bps);
        let relevant = counted || m.delta.is_positive();
        let new_depth =
            if relevant { invoice.confirmation_depth.max(confirmations) } else { invoice.confirmation_depth };

        let mut updated = invoice.clone();
        let mut event = None;
        let mut changed = false;
        if m.delta.is_positive() {
            updated.transactions.insert(txid.to_string(), m.delta);
            updated.matched_total = m.new_total;
            // A new transaction only pushes the total up, so the exception can only widen to paidOver here.
            if m.exception == ExceptionState::PaidOver {
                updated.exception_state = ExceptionState::PaidOver;
            }
            changed = true;
        }
        if invoice.base_state == BaseState::Paid && new_depth >= self.policy.required_confirmations {
            updated.base_state = BaseState::Confirmed;
            updated.confirmed_at = Some(now);
            event = Some(InvoiceEventKind::Confirmed);
            changed = true;
        }
        if !changed {
            // A depth report below the threshold carries no durable information; guards re-evaluate against the
            // fresher value on the next signal.
            return Outcome::Unchanged;
        }
        updated.confirmation_depth = new_depth;
        updated.updated_at = now;

        let base_kind = match invoice.base_state {
            BaseState::Confirmed => InvoiceEventKind::Confirmed,
            _ => InvoiceEventKind::Paid,
        };
        let event = match event {
            Some(e) => e,
            None if updated.exception_state != invoice.exception_state => InvoiceEventKind::PaidOver,
            None => base_kind,
        };
        info!("🔄️💰️ Invoice {}: {} (total {}, depth {})", invoice.id, event, updated.matched_total, new_depth);
        Outcome::Transition { invoice: updated, event }
    }

    fn downgrade(&self, invoice: &Invoice, txid: &str, confirmations: u32, now: DateTime<Utc>) -> Outcome {
        match self.policy.reorg_policy {
            ReorgPolicy::ForceInvalid => {
                warn!(
                    "🔄️⛓️ Invoice {}: backing tx {txid} fell to {confirmations} confirmation(s); invalidating",
                    invoice.id
                );
                let mut updated = invoice.clone();
                updated.base_state = BaseState::Invalid;
                updated.confirmation_depth = confirmations;
                updated.updated_at = now;
                Outcome::Transition { invoice: updated, event: InvoiceEventKind::Invalid }
            },
            ReorgPolicy::RevertToPaid => {
                warn!(
                    "🔄️⛓️ Invoice {}: backing tx {txid} fell to {confirmations} confirmation(s); reverting to paid",
                    invoice.id
                );
                let mut updated = invoice.clone();
                updated.base_state = BaseState::Paid;
                updated.confirmed_at = None;
                updated.confirmation_depth = confirmations;
                updated.updated_at = now;
                Outcome::Transition { invoice: updated, event: InvoiceEventKind::Paid }
            },
        }
    }

    fn on_tx_evicted(&self, invoice: &Invoice, txid: &str, now: DateTime<Utc>) -> Outcome {
        let Some(contribution) = invoice.transactions.get(txid).copied() else {
            debug!("🔄️⛓️ Reorg of tx {txid} does not affect invoice {}", invoice.id);
            return Outcome::Unchanged;
        };
        warn!("🔄️⛓️ Tx {txid} backing invoice {} was evicted; {} no longer counts", invoice.id, contribution);
        let mut updated = invoice.clone();
        updated.transactions.remove(txid);
        updated.matched_total = updated.matched_total - contribution;
        updated.exception_state = if updated.matched_total.value() == 0 {
            ExceptionState::None
        } else {
            classify(updated.price, updated.matched_total, self.policy.tolerance_bps).0
        };
        updated.base_state = BaseState::Invalid;
        updated.updated_at = now;
        Outcome::Transition { invoice: updated, event: InvoiceEventKind::Invalid }
    }

    fn on_expiry_tick(&self, invoice: &Invoice, now: DateTime<Utc>) -> Outcome {
        if invoice.base_state == BaseState::New && now >= invoice.expires_at {
            self.expire(invoice, now)
        } else {
            Outcome::Unchanged
        }
    }

    fn expire(&self, invoice: &Invoice, now: DateTime<Utc>) -> Outcome {
        info!("🔄️🕰️ Invoice {} expired", invoice.id);
        let mut updated = invoice.clone();
        updated.base_state = BaseState::Expired;
        updated.updated_at = now;
        Outcome::Transition { invoice: updated, event: InvoiceEventKind::Expired }
    }

    /// Drive `paid -> confirmed` from the depth recorded at the last persisted change. Covers the case where the
    /// qualifying observation already carried enough confirmations and no further feed event is coming.
    fn on_depth_check(&self, invoice: &Invoice, now: DateTime<Utc>) -> Outcome {
        if invoice.base_state == BaseState::Paid && invoice.confirmation_depth >= self.policy.required_confirmations {
            let mut updated = invoice.clone();
            updated.base_state = BaseState::Confirmed;
            updated.confirmed_at = Some(now);
            updated.updated_at = now;
            info!("🔄️ Invoice {} confirmed at depth {}", invoice.id, invoice.confirmation_depth);
            Outcome::Transition { invoice: updated, event: InvoiceEventKind::Confirmed }
        } else {
            Outcome::Unchanged
        }
    }

    fn on_settlement_tick(&self, invoice: &Invoice, now: DateTime<Utc>) -> Outcome {
        if invoice.base_state != BaseState::Confirmed {
            return Outcome::Unchanged;
        }
        match invoice.confirmed_at {
            Some(confirmed_at) if confirmed_at + self.policy.settlement_window <= now => {
                info!("🔄️ Invoice {} complete", invoice.id);
                let mut updated = invoice.clone();
                updated.base_state = BaseState::Complete;
                updated.updated_at = now;
                Outcome::Transition { invoice: updated, event: InvoiceEventKind::Complete }
            },
            Some(_) => Outcome::Unchanged,
            None => {
                warn!("🔄️ Invoice {} is confirmed but carries no confirmation timestamp", invoice.id);
                Outcome::Unchanged
            },
        }
    }
}

#[cfg(test)]
mod test {
    use bvg_common::Satoshi;
    use chrono::Utc;

    use super::*;
    use crate::test_utils::sample_invoice;

    fn machine() -> StateMachine {
        StateMachine::new(PaymentPolicy::default())
    }

    fn observed(txid: &str, value: i64, confirmations: u32) -> Signal {
        Signal::TxObserved {
            txid: txid.to_string(),
            outputs: vec![TxOutput::new("addr1", Satoshi::from(value))],
            confirmations,
        }
    }

    #[test]
    fn exact_payment_moves_new_to_paid() {
        let inv = sample_invoice(100_000);
        let now = Utc::now();
        let Outcome::Transition { invoice, event } = machine().apply(&inv, &observed("tx1", 100_000, 0), now) else {
            panic!("expected a transition");
        };
        assert_eq!(invoice.base_state, BaseState::Paid);
        assert_eq!(invoice.exception_state, ExceptionState::None);
        assert_eq!(invoice.matched_total, Satoshi::from(100_000));
        assert_eq!(event, InvoiceEventKind::Paid);
    }

    #[test]
    fn underpayment_stays_new_with_partial_flag() {
        let inv = sample_invoice(100_000);
        let now = Utc::now();
        let Outcome::Transition { invoice, event } = machine().apply(&inv, &observed("tx1", 50_000, 0), now) else {
            panic!("expected a transition");
        };
        assert_eq!(invoice.base_state, BaseState::New);
        assert_eq!(invoice.exception_state, ExceptionState::PaidPartial);
        assert_eq!(event, InvoiceEventKind::PaidPartial);
    }

    #[test]
    fn overpayment_moves_to_paid_with_over_flag() {
        let inv = sample_invoice(100_000);
        let now = Utc::now();
        let Outcome::Transition { invoice, event } = machine().apply(&inv, &observed("tx1", 150_000, 0), now) else {
            panic!("expected a transition");
        };
        assert_eq!(invoice.base_state, BaseState::Paid);
        assert_eq!(invoice.exception_state, ExceptionState::PaidOver);
        assert_eq!(event, InvoiceEventKind::Paid);
    }

    #[test]
    fn redelivered_observation_is_idempotent() {
        let inv = sample_invoice(100_000);
        let now = Utc::now();
        let Outcome::Transition { invoice: paid, .. } = machine().apply(&inv, &observed("tx1", 100_000, 0), now)
        else {
            panic!("expected a transition");
        };
        // The same observation again: the tx is already counted and the depth is unchanged
        assert!(machine().apply(&paid, &observed("tx1", 100_000, 0), now).is_unchanged());
        assert_eq!(paid.matched_total, Satoshi::from(100_000));
    }

    #[test]
    fn depth_threshold_confirms() {
        let mut inv = sample_invoice(100_000);
        inv.base_state = BaseState::Paid;
        inv.transactions.insert("tx1".into(), Satoshi::from(100_000));
        inv.matched_total = Satoshi::from(100_000);
        let now = Utc::now();
        assert!(machine().apply(&inv, &observed("tx1", 0, 5), now).is_unchanged());
        let Outcome::Transition { invoice, event } = machine().apply(&inv, &observed("tx1", 0, 6), now) else {
            panic!("expected a transition");
        };
        assert_eq!(invoice.base_state, BaseState::Confirmed);
        assert_eq!(invoice.confirmed_at, Some(now));
        assert_eq!(event, InvoiceEventKind::Confirmed);
    }

    #[test]
    fn settlement_window_completes() {
        let mut inv = sample_invoice(100_000);
        inv.base_state = BaseState::Confirmed;
        let now = Utc::now();
        inv.confirmed_at = Some(now - Duration::minutes(30));
        assert!(machine().apply(&inv, &Signal::SettlementTick, now).is_unchanged());
        let later = now + Duration::minutes(31);
        let Outcome::Transition { invoice, event } = machine().apply(&inv, &Signal::SettlementTick, later) else {
            panic!("expected a transition");
        };
        assert_eq!(invoice.base_state, BaseState::Complete);
        assert_eq!(event, InvoiceEventKind::Complete);
    }

    #[test]
    fn expiry_fires_only_from_new() {
        let mut inv = sample_invoice(100_000);
        let past_expiry = inv.expires_at + Duration::seconds(1);
        let Outcome::Transition { invoice, event } = machine().apply(&inv, &Signal::ExpiryTick, past_expiry) else {
            panic!("expected a transition");
        };
        assert_eq!(invoice.base_state, BaseState::Expired);
        assert_eq!(event, InvoiceEventKind::Expired);

        inv.base_state = BaseState::Paid;
        assert!(machine().apply(&inv, &Signal::ExpiryTick, past_expiry).is_unchanged());
    }

    #[test]
    fn late_payment_expires_instead_of_paying() {
        let inv = sample_invoice(100_000);
        let past_expiry = inv.expires_at + Duration::seconds(1);
        let Outcome::Transition { invoice, event } = machine().apply(&inv, &observed("tx1", 100_000, 0), past_expiry)
        else {
            panic!("expected a transition");
        };
        assert_eq!(invoice.base_state, BaseState::Expired);
        assert_eq!(event, InvoiceEventKind::Expired);
        assert_eq!(invoice.matched_total, Satoshi::default());
    }

    #[test]
    fn terminal_states_absorb_everything() {
        let mut inv = sample_invoice(100_000);
        let now = Utc::now();
        for terminal in [BaseState::Complete, BaseState::Expired, BaseState::Invalid] {
            inv.base_state = terminal;
            assert!(machine().apply(&inv, &observed("tx9", 100_000, 0), now).is_unchanged());
            assert!(machine().apply(&inv, &Signal::ExpiryTick, now).is_unchanged());
            assert!(machine()
                .apply(&inv, &Signal::TxEvicted { txid: "tx9".into() }, now)
                .is_unchanged());
        }
    }

    #[test]
    fn eviction_invalidates_and_uncounts() {
        let mut inv = sample_invoice(100_000);
        inv.base_state = BaseState::Confirmed;
        inv.transactions.insert("tx1".into(), Satoshi::from(100_000));
        inv.matched_total = Satoshi::from(100_000);
        let now = Utc::now();
        let Outcome::Transition { invoice, event } =
            machine().apply(&inv, &Signal::TxEvicted { txid: "tx1".into() }, now)
        else {
            panic!("expected a transition");
        };
        assert_eq!(invoice.base_state, BaseState::Invalid);
        assert_eq!(invoice.matched_total, Satoshi::default());
        assert!(invoice.transactions.is_empty());
        assert_eq!(invoice.exception_state, ExceptionState::None);
        assert_eq!(event, InvoiceEventKind::Invalid);

        // A reorg of a transaction we never counted is a no-op
        assert!(machine().apply(&inv, &Signal::TxEvicted { txid: "txX".into() }, now).is_unchanged());
    }

    #[test]
    fn depth_downgrade_follows_policy() {
        let mut inv = sample_invoice(100_000);
        inv.base_state = BaseState::Confirmed;
        inv.confirmed_at = Some(Utc::now());
        inv.transactions.insert("tx1".into(), Satoshi::from(100_000));
        inv.matched_total = Satoshi::from(100_000);
        inv.confirmation_depth = 6;
        let now = Utc::now();

        let force = StateMachine::new(PaymentPolicy::default());
        let Outcome::Transition { invoice, event } = force.apply(&inv, &observed("tx1", 0, 2), now) else {
            panic!("expected a transition");
        };
        assert_eq!(invoice.base_state, BaseState::Invalid);
        assert_eq!(event, InvoiceEventKind::Invalid);

        let revert =
            StateMachine::new(PaymentPolicy { reorg_policy: ReorgPolicy::RevertToPaid, ..PaymentPolicy::default() });
        let Outcome::Transition { invoice, event } = revert.apply(&inv, &observed("tx1", 0, 2), now) else {
            panic!("expected a transition");
        };
        assert_eq!(invoice.base_state, BaseState::Paid);
        assert_eq!(invoice.confirmed_at, None);
        assert_eq!(invoice.confirmation_depth, 2);
        assert_eq!(event, InvoiceEventKind::Paid);
    }

    #[test]
    fn second_payment_while_paid_widens_exception() {
        let mut inv = sample_invoice(100_000);
        inv.base_state = BaseState::Paid;
        inv.transactions.insert("tx1".into(), Satoshi::from(100_000));
        inv.matched_total = Satoshi::from(100_000);
        let now = Utc::now();
        let Outcome::Transition { invoice, event } = machine().apply(&inv, &observed("tx2", 40_000, 0), now) else {
            panic!("expected a transition");
        };
        assert_eq!(invoice.base_state, BaseState::Paid);
        assert_eq!(invoice.exception_state, ExceptionState::PaidOver);
        assert_eq!(invoice.matched_total, Satoshi::from(140_000));
        assert_eq!(event, InvoiceEventKind::PaidOver);
    }

    #[test]
    fn depth_check_confirms_from_recorded_depth() {
        let mut inv = sample_invoice(100_000);
        inv.base_state = BaseState::Paid;
        inv.confirmation_depth = 6;
        let now = Utc::now();
        let Outcome::Transition { invoice, event } = machine().apply(&inv, &Signal::DepthCheck, now) else {
            panic!("expected a transition");
        };
        assert_eq!(invoice.base_state, BaseState::Confirmed);
        assert_eq!(event, InvoiceEventKind::Confirmed);

        inv.confirmation_depth = 3;
        assert!(machine().apply(&inv, &Signal::DepthCheck, now).is_unchanged());
    }

    #[test]
    fn reorg_policy_parses() {
        assert_eq!("invalid".parse::<ReorgPolicy>().unwrap(), ReorgPolicy::ForceInvalid);
        assert_eq!("REVERT".parse::<ReorgPolicy>().unwrap(), ReorgPolicy::RevertToPaid);
        assert!("maybe".parse::<ReorgPolicy>().is_err());
    }
}
