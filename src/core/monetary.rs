/// Monetary units of the ledger
///
/// Balances are fixed-point integers with 8 decimal places, the same split as a coin and
/// its satoshis. Floating point never touches a balance: amounts are parsed from decimal
/// strings and rendered back with exactly 8 fraction digits, which is also the form that
/// goes into transaction ids and signing payloads.
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of base units in one coin
pub const UNITS_PER_COIN: u64 = 100_000_000;

/// Number of decimal places in the canonical rendering
pub const DECIMALS: usize = 8;

/// Basis points in 100%
pub const BPS_DENOMINATOR: u64 = 10_000;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_units(units: u64) -> Amount {
        Amount(units)
    }

    pub fn from_coins(coins: u64) -> Result<Amount> {
        coins
            .checked_mul(UNITS_PER_COIN)
            .map(Amount)
            .ok_or_else(|| LedgerError::InvalidAmount(format!("{coins} coins overflows")))
    }

    pub const fn units(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a decimal string such as `"40"`, `"0.5"` or `"12.34567890"`.
    ///
    /// More than 8 fraction digits, signs, exponents and empty parts are rejected
    /// rather than rounded.
    pub fn parse(input: &str) -> Result<Amount> {
        let trimmed = input.trim();
        let invalid = || LedgerError::InvalidAmount(format!("'{input}' is not a valid amount"));

        let (whole, frac) = match trimmed.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (trimmed, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        if frac.len() > DECIMALS {
            return Err(LedgerError::InvalidAmount(format!(
                "'{input}' has more than {DECIMALS} decimal places"
            )));
        }

        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<u64>().map_err(|_| invalid())?
        };
        let frac_units = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<width$}", width = DECIMALS)
                .parse::<u64>()
                .map_err(|_| invalid())?
        };

        whole_units
            .checked_mul(UNITS_PER_COIN)
            .and_then(|units| units.checked_add(frac_units))
            .map(Amount)
            .ok_or_else(|| LedgerError::InvalidAmount(format!("'{input}' overflows")))
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// `self * bps / 10000`, rounded down.
    pub fn percent_bps(self, bps: u64) -> Amount {
        let scaled = (self.0 as u128 * bps as u128) / BPS_DENOMINATOR as u128;
        Amount(scaled.min(u64::MAX as u128) as u64)
    }

    /// Sum a sequence of amounts, failing on overflow.
    pub fn sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Result<Amount> {
        amounts.into_iter().try_fold(Amount::ZERO, |acc, amount| {
            acc.checked_add(amount)
                .ok_or_else(|| LedgerError::InvalidAmount("sum overflows".to_string()))
        })
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:0width$}",
            self.0 / UNITS_PER_COIN,
            self.0 % UNITS_PER_COIN,
            width = DECIMALS
        )
    }
}

impl FromStr for Amount {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Amount::parse(s)
    }
}
