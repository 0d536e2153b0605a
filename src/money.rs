// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Currency-tagged amounts and per-currency rounding.
//!
//! Every amount in the engine is a [`Money`]: a [`Decimal`] paired with the
//! [`Currency`] it is denominated in. Arithmetic between two `Money` values is
//! only defined when the currencies agree; crossing currencies requires an
//! explicit [`ExchangeRate::convert`].
//!
//! # Rounding
//!
//! | Currency | Canonical rounding |
//! |----------|--------------------|
//! | USD | nearest cent (2 dp), half-up |
//! | KHR | nearest 100 riel, half-up |
//!
//! Half-up means ties move toward positive infinity: `50 → 100`, `49 → 0`,
//! `-50 → 0`, `-51 → -100`. Canonical rounding is idempotent, so re-running a
//! calculation over already-rounded amounts leaves them unchanged.
//!
//! # Example
//!
//! ```
//! use parcel_settlement::{Currency, Money, round_khr};
//! use rust_decimal_macros::dec;
//!
//! assert_eq!(round_khr(dec!(20450)), dec!(20500));
//!
//! let cod = Money::new(dec!(40000), Currency::Khr);
//! let fee = Money::new(dec!(20500), Currency::Khr);
//! assert_eq!(cod.try_sub(fee).unwrap().amount(), dec!(19500));
//! assert!(cod.try_add(Money::new(dec!(1), Currency::Usd)).is_err());
//! ```

use crate::error::SettlementError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// Settlement currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum Currency {
    #[serde(rename = "USD", alias = "usd")]
    Usd,
    #[serde(rename = "KHR", alias = "khr")]
    Khr,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Usd, Currency::Khr];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Khr => "KHR",
        }
    }

    /// Applies this currency's canonical rounding.
    pub fn round(&self, amount: Decimal) -> Decimal {
        match self {
            Currency::Usd => round_usd(amount),
            Currency::Khr => round_khr(amount),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "KHR" => Ok(Currency::Khr),
            _ => Err(SettlementError::UnknownCurrency(s.to_owned())),
        }
    }
}

/// Rounds to `step` with ties toward positive infinity.
fn round_half_up(amount: Decimal, step: Decimal) -> Decimal {
    (amount / step + dec!(0.5)).floor() * step
}

/// Rounds a riel amount to the nearest 100 (half-up at the 50 boundary).
pub fn round_khr(amount: Decimal) -> Decimal {
    round_half_up(amount, dec!(100))
}

/// Rounds a dollar amount to the nearest cent (half-up).
pub fn round_usd(amount: Decimal) -> Decimal {
    round_half_up(amount, dec!(0.01))
}

/// Parses a user-entered amount, rejecting non-numeric and negative input.
pub fn parse_amount(raw: &str, field: &'static str) -> Result<Decimal, SettlementError> {
    let amount = Decimal::from_str(raw.trim())
        .map_err(|_| SettlementError::InvalidAmount(raw.to_owned()))?;
    ensure_non_negative(amount, field)?;
    Ok(amount)
}

pub(crate) fn ensure_non_negative(
    amount: Decimal,
    field: &'static str,
) -> Result<(), SettlementError> {
    if amount < Decimal::ZERO {
        return Err(SettlementError::NegativeAmount { field });
    }
    Ok(())
}

/// A decimal amount tagged with its currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    pub fn usd(amount: Decimal) -> Self {
        Self::new(amount, Currency::Usd)
    }

    pub fn khr(amount: Decimal) -> Self {
        Self::new(amount, Currency::Khr)
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Returns the amount under its currency's canonical rounding.
    pub fn rounded(&self) -> Self {
        Self::new(self.currency.round(self.amount), self.currency)
    }

    /// Multiplies by a plain factor, keeping the currency.
    pub fn scale(&self, factor: Decimal) -> Self {
        Self::new(self.amount * factor, self.currency)
    }

    /// One of `parts` equal shares, keeping the currency.
    pub fn split(&self, parts: NonZeroUsize) -> Self {
        Self::new(self.amount / Decimal::from(parts.get()), self.currency)
    }

    pub fn try_add(&self, other: Money) -> Result<Money, SettlementError> {
        self.ensure_same_currency(&other)?;
        Ok(Self::new(self.amount + other.amount, self.currency))
    }

    pub fn try_sub(&self, other: Money) -> Result<Money, SettlementError> {
        self.ensure_same_currency(&other)?;
        Ok(Self::new(self.amount - other.amount, self.currency))
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), SettlementError> {
        if self.currency != other.currency {
            return Err(SettlementError::CurrencyMismatch {
                expected: self.currency,
                found: other.currency,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// USD→KHR multiplier used for commission and settlement conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeRate(Decimal);

impl ExchangeRate {
    pub const DEFAULT_USD_TO_KHR: Decimal = dec!(4100);

    pub fn new(usd_to_khr: Decimal) -> Result<Self, SettlementError> {
        if usd_to_khr <= Decimal::ZERO {
            return Err(SettlementError::InvalidExchangeRate);
        }
        Ok(Self(usd_to_khr))
    }

    pub fn usd_to_khr(&self) -> Decimal {
        self.0
    }

    /// Converts `money` into `target`. USD→KHR multiplies by the rate, KHR→USD
    /// divides. The result is not rounded; callers round once at the point the
    /// amount enters a report.
    pub fn convert(&self, money: Money, target: Currency) -> Money {
        let converted = match (money.currency(), target) {
            (Currency::Usd, Currency::Usd) | (Currency::Khr, Currency::Khr) => return money,
            (Currency::Usd, Currency::Khr) => money.amount() * self.0,
            (Currency::Khr, Currency::Usd) => money.amount() / self.0,
        };
        tracing::debug!(
            from = %money,
            to = %target,
            rate = %self.0,
            result = %converted,
            "converted amount"
        );
        Money::new(converted, target)
    }
}

impl Default for ExchangeRate {
    fn default() -> Self {
        Self(Self::DEFAULT_USD_TO_KHR)
    }
}
