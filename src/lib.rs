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

//! # Parcel Settlement
//!
//! This library is the settlement engine of a parcel delivery platform. It
//! resolves one delivery status per booking, tracks cash-on-delivery (COD)
//! amounts across audited edits, computes driver commission and referral
//! rewards under configurable rules, and reconciles settled items into net
//! payouts in USD and KHR.
//!
//! ## Core Components
//!
//! - [`Money`]: currency-tagged amount with per-currency rounding ([`round_khr`], [`round_usd`])
//! - [`effective_status`]: one authoritative status from booking and item statuses
//! - [`compute_commission`] / [`CommissionRuleBook`]: driver commission rule selection
//! - [`ReferralLedger`]: first-order and milestone referral rewards, awarded once
//! - [`SettlementCalculator`]: per-item net payout with cross-currency fee conversion
//! - [`SettlementReport`]: per-currency totals and CSV export
//! - [`ledger`]: append-only modification records for audited item edits
//!
//! ## Example
//!
//! ```
//! use chrono::{NaiveDate, TimeZone, Utc};
//! use parcel_settlement::{
//!     Currency, ParcelBooking, ParcelItem, SettlementCalculator, SettlementConfig,
//!     SettlementReport,
//! };
//! use rust_decimal_macros::dec;
//!
//! let booking = ParcelBooking::new(
//!     "b1", "c1",
//!     NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
//!     Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap(),
//!     Currency::Usd, dec!(3),
//! )
//! .unwrap()
//! .with_item(ParcelItem::new("i1", "TRK1", dec!(25), Currency::Usd).unwrap().settled());
//!
//! let config = SettlementConfig::default();
//! let rows = SettlementCalculator::new(&config).settle_booking(&booking).unwrap();
//! let report = SettlementReport::aggregate(&rows).unwrap();
//! assert_eq!(report.usd().net.amount(), dec!(22.00));
//! assert_eq!(report.khr().count, 0);
//! ```
//!
//! ## Purity
//!
//! Calculators operate on immutable snapshots and an explicitly passed
//! [`SettlementConfig`]; re-running them over the same input yields identical
//! output. Only [`store::BookingRepository`] performs I/O.

mod base;
mod booking;
mod commission;
mod config;
pub mod error;
pub mod ledger;
mod money;
mod referral;
mod report;
mod settlement;
mod status;
pub mod store;

pub use base::{Actor, BookingId, CustomerId, ItemId, RuleId, UserId};
pub use booking::{
    CANCELLED_BY_CUSTOMER, CustomerSettlementStatus, ParcelBooking, ParcelItem,
    StatusHistoryEntry,
};
pub use commission::{
    AppliedCommission, CommissionEvent, CommissionFor, CommissionOutcome, CommissionRuleBook,
    CommissionType, DriverCommissionRule, DriverSalaryType, RuleResolution, compute_commission,
    resolve_rule,
};
pub use config::{
    COMMISSION_RATE_ENV_VAR, CurrencyConfig, DEFAULT_COMMISSION_ENV_VAR, SettlementConfig,
};
pub use error::{ConfigWarning, SettlementError, StoreError};
pub use ledger::{ItemEdit, Modification, ModificationField};
pub use money::{Currency, ExchangeRate, Money, parse_amount, round_khr, round_usd};
pub use referral::{
    CompletedOrder, RefereeHistory, ReferralAward, ReferralLedger, ReferralRule,
    ReferralTrigger, RewardInstruction, RewardRole, evaluate_rule,
};
pub use report::{
    CSV_HEADER, CurrencyTotals, SettlementReport, export_file_name, write_settled_csv,
};
pub use settlement::{SettledItem, SettlementCalculator};
pub use status::{BookingGroups, IN_FLIGHT_PRIORITY, ParcelStatus, effective_status, partition_bookings};
