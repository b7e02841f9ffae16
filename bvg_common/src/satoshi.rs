use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul, Neg, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::op;

pub const BTC_CURRENCY_CODE: &str = "BTC";
pub const BTC_CURRENCY_CODE_LOWER: &str = "btc";
pub const SATS_PER_BTC: i64 = 100_000_000;

//--------------------------------------      Satoshi       ----------------------------------------------------------
/// A bitcoin amount in satoshi. Signed, so that reorg adjustments and balancing arithmetic cannot underflow silently.
#[derive(Debug, Clone, Copy, Default, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Satoshi(i64);

op!(binary Satoshi, Add, add);
op!(binary Satoshi, Sub, sub);
op!(inplace Satoshi, SubAssign, sub_assign);
op!(unary Satoshi, Neg, neg);

impl Mul<i64> for Satoshi {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for Satoshi {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in satoshi: {0}")]
pub struct SatoshiConversionError(String);

impl From<i64> for Satoshi {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for Satoshi {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Satoshi {}

impl TryFrom<u64> for Satoshi {
    type Error = SatoshiConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(SatoshiConversionError(format!("Value {} is too large to convert to Satoshi", value)))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for Satoshi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.abs() < 100_000 {
            write!(f, "{} sats", self.0)
        } else {
            let btc = self.0 as f64 / SATS_PER_BTC as f64;
            write!(f, "{btc:0.8} BTC")
        }
    }
}

impl Satoshi {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_btc(btc: i64) -> Self {
        Self(btc * SATS_PER_BTC)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arithmetic() {
        let a = Satoshi::from(1_500);
        let b = Satoshi::from(500);
        assert_eq!(a + b, Satoshi::from(2_000));
        assert_eq!(a - b, Satoshi::from(1_000));
        assert_eq!(b * 3, a);
        assert_eq!(-b, Satoshi::from(-500));
        let total: Satoshi = vec![a, b, b].into_iter().sum();
        assert_eq!(total, Satoshi::from(2_500));
    }

    #[test]
    fn display() {
        assert_eq!(Satoshi::from(950).to_string(), "950 sats");
        assert_eq!(Satoshi::from_btc(1).to_string(), "1.00000000 BTC");
        assert_eq!(Satoshi::from(150_000_000).to_string(), "1.50000000 BTC");
    }

    #[test]
    fn u64_conversion() {
        assert_eq!(Satoshi::try_from(42u64).unwrap(), Satoshi::from(42));
        assert!(Satoshi::try_from(u64::MAX).is_err());
    }
}
