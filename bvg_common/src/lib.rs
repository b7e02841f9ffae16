mod helpers;

pub mod op;
mod satoshi;
mod secret;

pub use helpers::{parse_boolean_flag, parse_seconds};
pub use satoshi::{Satoshi, SatoshiConversionError, BTC_CURRENCY_CODE, BTC_CURRENCY_CODE_LOWER, SATS_PER_BTC};
pub use secret::Secret;
