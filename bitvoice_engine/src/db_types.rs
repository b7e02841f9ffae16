use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use bvg_common::{Satoshi, Secret};
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::events::InvoiceEventKind;

/// Merchant-supplied `posData` is carried opaquely, but bounded so a single invoice cannot bloat the store.
pub const POS_DATA_MAX_LEN: usize = 100;

//--------------------------------------      InvoiceId      ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub String);

impl FromStr for InvoiceId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for InvoiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for InvoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl InvoiceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------      BaseState      ---------------------------------------------------------
/// The primary lifecycle status of an invoice.
///
/// `New` is the initial state. `Complete`, `Expired` and `Invalid` are terminal: once reached, the invoice never
/// changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BaseState {
    /// Newly created; no qualifying payment has been observed.
    New,
    /// A qualifying payment has been observed but is not yet buried deep enough in the chain.
    Paid,
    /// The payment has reached the configured confirmation depth.
    Confirmed,
    /// The settlement window has elapsed after confirmation.
    Complete,
    /// The invoice TTL elapsed without a qualifying payment.
    Expired,
    /// The backing payment was evicted or conflicted away by the chain.
    Invalid,
}

impl BaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BaseState::Complete | BaseState::Expired | BaseState::Invalid)
    }
}

impl Display for BaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BaseState::New => write!(f, "new"),
            BaseState::Paid => write!(f, "paid"),
            BaseState::Confirmed => write!(f, "confirmed"),
            BaseState::Complete => write!(f, "complete"),
            BaseState::Expired => write!(f, "expired"),
            BaseState::Invalid => write!(f, "invalid"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConversionError(pub String);

impl FromStr for BaseState {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "paid" => Ok(Self::Paid),
            "confirmed" => Ok(Self::Confirmed),
            "complete" => Ok(Self::Complete),
            "expired" => Ok(Self::Expired),
            "invalid" => Ok(Self::Invalid),
            s => Err(ConversionError(format!("invalid invoice state {s}"))),
        }
    }
}

//--------------------------------------    ExceptionState    --------------------------------------------------------
/// The orthogonal under/over-payment flag. Serialised BitPay-style: `false` when clear, otherwise the string
/// `"paidPartial"` or `"paidOver"`, in storage and API payloads alike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExceptionState {
    #[default]
    None,
    PaidPartial,
    PaidOver,
}

impl Display for ExceptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExceptionState::None => write!(f, "false"),
            ExceptionState::PaidPartial => write!(f, "paidPartial"),
            ExceptionState::PaidOver => write!(f, "paidOver"),
        }
    }
}

impl Serialize for ExceptionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExceptionState::None => serializer.serialize_bool(false),
            ExceptionState::PaidPartial => serializer.serialize_str("paidPartial"),
            ExceptionState::PaidOver => serializer.serialize_str("paidOver"),
        }
    }
}

impl<'de> Deserialize<'de> for ExceptionState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = ExceptionState;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("false, \"paidPartial\" or \"paidOver\"")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                if v {
                    Err(E::custom("true is not a valid exception status"))
                } else {
                    Ok(ExceptionState::None)
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                match v {
                    "paidPartial" => Ok(ExceptionState::PaidPartial),
                    "paidOver" => Ok(ExceptionState::PaidOver),
                    "false" => Ok(ExceptionState::None),
                    s => Err(E::custom(format!("Invalid exception status: {s}"))),
                }
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

//--------------------------------------      TxOutput       ---------------------------------------------------------
/// A single transaction output as reported by the wallet collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub value: Satoshi,
}

impl TxOutput {
    pub fn new(address: impl Into<String>, value: Satoshi) -> Self {
        Self { address: address.into(), value }
    }
}

//--------------------------------------       Invoice       ---------------------------------------------------------
/// The central entity: a merchant-created request for a specific payment amount with a tracked lifecycle.
///
/// Commercial and callback fields are immutable after creation. Lifecycle fields are mutated exclusively through
/// the invoice store's compare-and-set update path, which bumps `sequence` by exactly one per persisted change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    /// Capability secret for status queries. Redacted in Debug/Display output.
    pub token: Secret<String>,
    pub price: Satoshi,
    pub currency: String,
    pub order_id: Option<String>,
    pub item_desc: Option<String>,
    pub pos_data: Option<String>,
    pub notification_url: Option<String>,
    pub notification_email: Option<String>,
    pub redirect_url: Option<String>,
    /// The receiving address allocated from the wallet backend at creation.
    pub address: String,
    pub base_state: BaseState,
    pub exception_state: ExceptionState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the invoice enters `Confirmed`; drives the settlement window.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Event counter; strictly increases by one per persisted change. Notification idempotency key.
    pub sequence: u64,
    /// Position in the chronological secondary index, assigned by the store at creation.
    pub created_index: u64,
    /// Sum of the values in `transactions`.
    pub matched_total: Satoshi,
    /// Every counted transaction and the value it contributed. Membership prevents double counting; the recorded
    /// value lets a reorg subtract exactly the evicted contribution.
    pub transactions: BTreeMap<String, Satoshi>,
    /// Maximum confirmation depth observed across counted transactions at the last persisted change.
    pub confirmation_depth: u32,
}

impl Invoice {
    pub fn has_transaction(&self, txid: &str) -> bool {
        self.transactions.contains_key(txid)
    }

    pub fn is_terminal(&self) -> bool {
        self.base_state.is_terminal()
    }
}

//--------------------------------------     NewInvoice      ---------------------------------------------------------
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("The invoice price must be positive, got {0}")]
    NonPositivePrice(Satoshi),
    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),
    #[error("Invalid {field} URL: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
    #[error("posData exceeds {POS_DATA_MAX_LEN} characters")]
    PosDataTooLong,
}

/// Validated invoice-creation input.
///
/// Construction goes through [`NewInvoice::try_new`] and the `with_*` setters, each of which rejects malformed
/// input at the boundary, so an instance of this type is known-good by the time it reaches the store.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub price: Satoshi,
    pub currency: String,
    pub order_id: Option<String>,
    pub item_desc: Option<String>,
    pub pos_data: Option<String>,
    pub notification_url: Option<String>,
    pub notification_email: Option<String>,
    pub redirect_url: Option<String>,
}

impl NewInvoice {
    pub fn try_new(price: Satoshi, currency: &str) -> Result<Self, ValidationError> {
        if !price.is_positive() {
            return Err(ValidationError::NonPositivePrice(price));
        }
        let code = currency.trim();
        if !(3..=5).contains(&code.len()) || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidCurrency(currency.to_string()));
        }
        Ok(Self {
            price,
            currency: code.to_ascii_uppercase(),
            order_id: None,
            item_desc: None,
            pos_data: None,
            notification_url: None,
            notification_email: None,
            redirect_url: None,
        })
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_item_desc(mut self, item_desc: impl Into<String>) -> Self {
        self.item_desc = Some(item_desc.into());
        self
    }

    pub fn with_pos_data(mut self, pos_data: impl Into<String>) -> Result<Self, ValidationError> {
        let pos_data = pos_data.into();
        if pos_data.chars().count() > POS_DATA_MAX_LEN {
            return Err(ValidationError::PosDataTooLong);
        }
        self.pos_data = Some(pos_data);
        Ok(self)
    }

    pub fn with_notification_url(mut self, url: &str) -> Result<Self, ValidationError> {
        validate_url("notification", url)?;
        self.notification_url = Some(url.to_string());
        Ok(self)
    }

    pub fn with_notification_email(mut self, email: impl Into<String>) -> Self {
        self.notification_email = Some(email.into());
        self
    }

    pub fn with_redirect_url(mut self, url: &str) -> Result<Self, ValidationError> {
        validate_url("redirect", url)?;
        self.redirect_url = Some(url.to_string());
        Ok(self)
    }
}

fn validate_url(field: &'static str, url: &str) -> Result<(), ValidationError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| ValidationError::InvalidUrl { field, reason: e.to_string() })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        s => Err(ValidationError::InvalidUrl { field, reason: format!("unsupported scheme {s}") }),
    }
}

//--------------------------------------   NotificationJob   ---------------------------------------------------------
/// A pending merchant notification. Created in the same atomic batch as the state change it reports, owned by the
/// notification dispatcher until delivered or dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub invoice_id: InvoiceId,
    /// The invoice sequence the job reports. `(invoice_id, sequence)` is the merchant-side dedupe key.
    pub sequence: u64,
    pub event: InvoiceEventKind,
    pub url: String,
    pub attempt: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
