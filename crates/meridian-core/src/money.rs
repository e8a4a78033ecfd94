//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Fixed-Point Decimal?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In binary floating point:                                              │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  In a pricing pipeline that error compounds: a discount allocation      │
//! │  that is off by 0.0001 per line drifts the grand total on every         │
//! │  recalculation.                                                         │
//! │                                                                         │
//! │  OUR SOLUTION: decimal(18,4)                                            │
//! │    All amounts are rust_decimal values rounded to 4 fractional          │
//! │    digits, half away from zero. Recalculating an unchanged cart         │
//! │    twice yields byte-identical totals.                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use meridian_core::money::{CurrencyCode, Money};
//! use rust_decimal_macros::dec;
//!
//! let usd: CurrencyCode = "USD".parse().unwrap();
//! let price = Money::new(dec!(10.99), usd);
//!
//! // Arithmetic between currencies is fallible by design:
//! let total = price.try_add(&Money::new(dec!(5.00), usd)).unwrap();
//! assert_eq!(total.amount(), dec!(15.9900));
//! ```

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

/// Number of fractional digits carried by every monetary amount.
pub const MONEY_SCALE: u32 = 4;

// =============================================================================
// Currency Code
// =============================================================================

/// A 3-letter ISO 4217 currency code (`USD`, `EUR`, ...).
///
/// ## Design Decisions
/// - **`[u8; 3]` storage**: keeps `Money` `Copy`, no heap allocation
/// - **Uppercased on construction**: `"usd"` and `"USD"` compare equal
/// - **Serialized as a plain string** for wire compatibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CurrencyCode([u8; 3]);

impl CurrencyCode {
    /// Parses a currency code, rejecting anything that is not exactly
    /// three ASCII letters.
    ///
    /// ## Example
    /// ```rust
    /// use meridian_core::money::CurrencyCode;
    ///
    /// assert!(CurrencyCode::new("USD").is_ok());
    /// assert!(CurrencyCode::new("usd").is_ok()); // normalized to USD
    /// assert!(CurrencyCode::new("US").is_err());
    /// assert!(CurrencyCode::new("U$D").is_err());
    /// ```
    pub fn new(code: &str) -> CoreResult<Self> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_alphabetic()) {
            return Err(CoreError::InvalidCurrencyCode(code.to_string()));
        }
        Ok(CurrencyCode([
            bytes[0].to_ascii_uppercase(),
            bytes[1].to_ascii_uppercase(),
            bytes[2].to_ascii_uppercase(),
        ]))
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        // Construction guarantees ASCII letters.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for CurrencyCode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CurrencyCode::new(s)
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CurrencyCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CurrencyCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CurrencyCode::new(&s).map_err(de::Error::custom)
    }
}

// =============================================================================
// Money Type
// =============================================================================

/// A monetary amount in a specific currency, always held at 4 fractional
/// digits (rounded half away from zero).
///
/// ## Design Decisions
/// - **`Decimal` amount**: exact base-10 arithmetic, never binary floats
/// - **Currency carried on the value**: mixing currencies is a typed error
///   (`CoreError::CurrencyMismatch`), never a silent add
/// - **`Copy`**: both fields are plain data, values flow freely through
///   the engines
///
/// ## Rounding Policy
/// Every constructor and every scaling operation rounds to [`MONEY_SCALE`]
/// with `RoundingStrategy::MidpointAwayFromZero`. Engines that need full
/// precision for intermediate shares (proportional allocation) work on raw
/// `Decimal`s and construct `Money` at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: CurrencyCode,
}

impl Money {
    /// Creates a monetary value, rounding the amount to 4 fractional digits.
    ///
    /// ## Example
    /// ```rust
    /// use meridian_core::money::{CurrencyCode, Money};
    /// use rust_decimal_macros::dec;
    ///
    /// let usd = CurrencyCode::new("USD").unwrap();
    /// let m = Money::new(dec!(1.23456), usd);
    /// assert_eq!(m.amount(), dec!(1.2346)); // half away from zero
    /// ```
    pub fn new(amount: Decimal, currency: CurrencyCode) -> Self {
        Money {
            amount: round_amount(amount),
            currency,
        }
    }

    /// Zero in the given currency.
    pub fn zero(currency: CurrencyCode) -> Self {
        Money::new(Decimal::ZERO, currency)
    }

    /// The rounded amount.
    #[inline]
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// The currency this amount is denominated in.
    #[inline]
    pub fn currency(&self) -> CurrencyCode {
        self.currency
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        Money {
            amount: self.amount.abs(),
            currency: self.currency,
        }
    }

    /// Adds two amounts of the same currency.
    ///
    /// ## Errors
    /// `CoreError::CurrencyMismatch` when the currencies differ. There is no
    /// implicit conversion anywhere in the engine; conversion is an explicit
    /// step owned by the caller.
    pub fn try_add(&self, other: &Money) -> CoreResult<Money> {
        self.require_same_currency(other)?;
        Ok(Money::new(self.amount + other.amount, self.currency))
    }

    /// Subtracts `other` from `self`, requiring equal currencies.
    pub fn try_sub(&self, other: &Money) -> CoreResult<Money> {
        self.require_same_currency(other)?;
        Ok(Money::new(self.amount - other.amount, self.currency))
    }

    /// The smaller of two same-currency amounts.
    pub fn try_min(&self, other: &Money) -> CoreResult<Money> {
        self.require_same_currency(other)?;
        Ok(if self.amount <= other.amount {
            *self
        } else {
            *other
        })
    }

    /// Multiplies by an integer quantity.
    pub fn mul_quantity(&self, qty: i64) -> Money {
        Money::new(self.amount * Decimal::from(qty), self.currency)
    }

    /// Multiplies by a decimal factor, rounding the result.
    pub fn mul_decimal(&self, factor: Decimal) -> Money {
        Money::new(self.amount * factor, self.currency)
    }

    /// Takes `pct` percent of this amount.
    ///
    /// ## Example
    /// ```rust
    /// use meridian_core::money::{CurrencyCode, Money};
    /// use rust_decimal_macros::dec;
    ///
    /// let usd = CurrencyCode::new("USD").unwrap();
    /// let subtotal = Money::new(dec!(100), usd);
    /// assert_eq!(subtotal.percent_of(dec!(10)).amount(), dec!(10.0000));
    /// ```
    pub fn percent_of(&self, pct: Decimal) -> Money {
        Money::new(self.amount * pct / Decimal::ONE_HUNDRED, self.currency)
    }

    /// Clamps negative amounts to zero. Discount math must never push a
    /// total below zero.
    pub fn clamp_non_negative(&self) -> Money {
        if self.is_negative() {
            Money::zero(self.currency)
        } else {
            *self
        }
    }

    fn require_same_currency(&self, other: &Money) -> CoreResult<()> {
        if self.currency != other.currency {
            return Err(CoreError::CurrencyMismatch {
                expected: self.currency.to_string(),
                found: other.currency.to_string(),
            });
        }
        Ok(())
    }
}

/// Rounds a raw decimal to the money scale, half away from zero.
///
/// The result is always held at exactly [`MONEY_SCALE`] fractional digits:
/// wider values are rounded, narrower values are rescaled up, so display
/// and serialized output stay byte-stable regardless of the input scale.
///
/// Exposed so the allocation helpers can round full-precision shares with
/// exactly the same policy the `Money` constructors use.
pub fn round_amount(amount: Decimal) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Display implementation shows the amount with its currency code.
///
/// This is for debugging and logs. Receipt formatting belongs to the
/// presentation layer, which handles localization.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
