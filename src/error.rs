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

//! Error types for settlement processing.
//!
//! Three kinds of problem are distinguished:
//!
//! - [`SettlementError`]: a rejected operation. Validation failures are raised
//!   before any state is touched, so a rejected write never leaves a partial
//!   update behind.
//! - [`StoreError`]: the document store collaborator failed. Reported to the
//!   caller as-is; retry policy belongs to the store.
//! - [`ConfigWarning`]: configuration was missing and a documented fallback was
//!   used. Never fatal and never persisted.

use crate::money::Currency;
use thiserror::Error;

/// Settlement processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// Amount could not be parsed as a decimal number
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Amount is negative where only zero or positive values are allowed
    #[error("{field} must not be negative")]
    NegativeAmount { field: &'static str },

    /// A required text field is blank
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// Fixed-amount commission rule without a currency
    #[error("fixed amount commission rule requires a currency")]
    MissingRuleCurrency,

    /// Percentage outside 0..=100
    #[error("percentage must be between 0 and 100")]
    InvalidPercentage,

    /// Milestone referral rule with a count of zero
    #[error("milestone count must be at least 1")]
    InvalidMilestone,

    /// Exchange rate is zero or negative
    #[error("exchange rate must be positive")]
    InvalidExchangeRate,

    /// Customer cancellation attempted after the booking left PENDING
    #[error("booking is no longer pending")]
    NotPending,

    /// Status change requested on a booking or item that already reached a terminal status
    #[error("{0} is in a terminal status and can no longer change")]
    TerminalStatus(String),

    /// Arithmetic attempted across two currencies without a conversion
    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },

    /// Currency code outside the supported set
    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    /// Status string that does not name a parcel status
    #[error("unknown status: {0}")]
    UnknownStatus(String),

    /// Item id not present on the booking
    #[error("item {0} not found on booking")]
    ItemNotFound(String),

    /// Settlement requested for an item that is not marked settled
    #[error("item {0} is not settled")]
    ItemNotSettled(String),

    /// Booking with no items cannot split its delivery fee
    #[error("booking {0} has no items")]
    EmptyBooking(String),

    /// Configuration could not be read
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failure reported by the document store
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Document store failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No document with the given id in the collection
    #[error("{collection}/{id} not found")]
    NotFound { collection: String, id: String },

    /// Conditional write lost against a concurrent writer
    #[error("{collection}/{id} changed concurrently (expected revision {expected}, found {found})")]
    Conflict {
        collection: String,
        id: String,
        expected: u64,
        found: u64,
    },

    /// Document could not be converted to or from its typed form
    #[error("malformed document: {0}")]
    Serialization(String),

    /// The store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Missing configuration resolved through a fallback value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No commission rule matched, the default percentage was applied
    #[error("no commission rule configured for {scope}; applied default {percent}% of the delivery fee")]
    CommissionRuleMissing { scope: String, percent: String },

    /// Currency absent from the configured currency list
    #[error("currency {0} missing from configuration; using built-in defaults")]
    CurrencyMissing(String),

    /// More than one rule is flagged default in the same scope
    #[error("{count} default commission rules for {scope}; using {chosen}")]
    MultipleDefaults {
        scope: String,
        count: usize,
        chosen: String,
    },
}
