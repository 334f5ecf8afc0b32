use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Neg, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

/// A monetary value in processor minor units (cents for two-exponent currencies).
///
/// Payment processors report `amount.value` in minor units, so the whole ledger is
/// kept in minor units and only converted to a major-unit representation for display
/// and for parsing the `"EUR 150.00"`-style strings found in partial-payment
/// notifications.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Amount(i64);

#[derive(Debug, Clone, Error)]
#[error("Could not parse amount: {0}")]
pub struct AmountParseError(pub String);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Parses a major-unit decimal string (e.g. `"150.00"` or `"150"`) into minor units.
    ///
    /// A fixed currency exponent of 2 is assumed. Zero-decimal currencies (JPY et al.)
    /// would need an exponent lookup; the processors this gateway is used with settle
    /// in two-exponent currencies.
    pub fn parse_major(s: &str) -> Result<Amount, AmountParseError> {
        let s = s.trim();
        let negative = s.starts_with('-');
        let s = s.trim_start_matches('-');
        let (units, cents) = match s.split_once('.') {
            Some((u, c)) => (u, c),
            None => (s, ""),
        };
        let units = if units.is_empty() {
            0
        } else {
            units.parse::<i64>().map_err(|e| AmountParseError(format!("{s}: {e}")))?
        };
        let cents = match cents.len() {
            0 => 0,
            1 => 10 * cents.parse::<i64>().map_err(|e| AmountParseError(format!("{s}: {e}")))?,
            2 => cents.parse::<i64>().map_err(|e| AmountParseError(format!("{s}: {e}")))?,
            _ => return Err(AmountParseError(format!("{s}: more than 2 decimal places"))),
        };
        let value = units * 100 + cents;
        Ok(Amount(if negative { -value } else { value }))
    }

    /// Formats the amount in major units with two decimal places.
    pub fn to_major_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        format!("{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_major_string())
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        self.0 -= rhs.0;
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Self::Output {
        Amount(-self.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, Add::add)
    }
}
