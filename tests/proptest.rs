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

//! Property-based tests for the settlement engine.
//!
//! These tests verify invariants that should hold for any booking, amount,
//! or sequence of rule writes.

use chrono::{NaiveDate, TimeZone, Utc};
use parcel_settlement::{
    CommissionFor, CommissionRuleBook, CommissionType, Currency, DriverCommissionRule,
    DriverSalaryType, IN_FLIGHT_PRIORITY, ParcelBooking, ParcelItem, ParcelStatus, RuleId,
    SettlementCalculator, SettlementConfig, SettlementReport, effective_status, round_khr,
    round_usd,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Generate an amount from 0 to 1,000,000 with 2 decimal places.
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (0i64..=100_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Generate a signed amount with up to 4 decimal places.
fn arb_signed_amount() -> impl Strategy<Value = Decimal> {
    (-100_000_000i64..=100_000_000i64).prop_map(|units| Decimal::new(units, 4))
}

fn arb_currency() -> impl Strategy<Value = Currency> {
    prop_oneof![Just(Currency::Usd), Just(Currency::Khr)]
}

fn arb_status() -> impl Strategy<Value = ParcelStatus> {
    prop::sample::select(vec![
        ParcelStatus::Pending,
        ParcelStatus::Confirmed,
        ParcelStatus::PickedUp,
        ParcelStatus::AtWarehouse,
        ParcelStatus::InTransit,
        ParcelStatus::OutForDelivery,
        ParcelStatus::Delivered,
        ParcelStatus::Cancelled,
        ParcelStatus::ReturnToSender,
        ParcelStatus::Completed,
        ParcelStatus::Returned,
    ])
}

/// Generate a booking with 1 to 6 settled items in mixed currencies.
fn arb_booking() -> impl Strategy<Value = ParcelBooking> {
    (
        arb_amount(),
        arb_currency(),
        prop::collection::vec((arb_amount(), arb_currency()), 1..6),
    )
        .prop_map(|(fee, currency, items)| {
            let mut booking = ParcelBooking::new(
                "b1",
                "c1",
                NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
                currency,
                fee,
            )
            .unwrap();
            for (i, (price, cod_currency)) in items.into_iter().enumerate() {
                let item = ParcelItem::new(format!("i{i}"), format!("T{i}"), price, cod_currency)
                    .unwrap()
                    .settled();
                booking = booking.with_item(item);
            }
            booking
        })
}

fn arb_rule() -> impl Strategy<Value = DriverCommissionRule> {
    (
        0u8..6,
        any::<bool>(),
        prop_oneof![Just(CommissionFor::Delivery), Just(CommissionFor::Pickup)],
        0u32..=100,
    )
        .prop_map(|(id, is_default, commission_for, value)| DriverCommissionRule {
            id: RuleId::new(format!("r{id}")),
            zone_name: format!("Zone {id}"),
            commission_for,
            driver_salary_type: DriverSalaryType::All,
            commission_type: CommissionType::Percentage,
            value: Decimal::from(value),
            currency: None,
            is_default,
            updated_at: None,
        })
}

// =============================================================================
// Rounding Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// KHR rounding lands on a multiple of 100 within 50 of the input.
    #[test]
    fn khr_rounding_is_a_near_multiple_of_100(amount in arb_signed_amount()) {
        let rounded = round_khr(amount);
        prop_assert_eq!(rounded % dec!(100), Decimal::ZERO);
        prop_assert!((rounded - amount).abs() <= dec!(50));
    }

    /// Rounding an already-rounded KHR amount changes nothing.
    #[test]
    fn khr_rounding_is_idempotent(amount in arb_signed_amount()) {
        let once = round_khr(amount);
        prop_assert_eq!(round_khr(once), once);
    }

    /// USD rounding lands on whole cents within half a cent of the input.
    #[test]
    fn usd_rounding_is_a_near_cent(amount in arb_signed_amount()) {
        let rounded = round_usd(amount);
        prop_assert_eq!((rounded * dec!(100)).fract(), Decimal::ZERO);
        prop_assert!((rounded - amount).abs() <= dec!(0.005));
        prop_assert_eq!(round_usd(rounded), rounded);
    }
}

// =============================================================================
// Settlement Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Every row satisfies cod - fee == net in the item's currency.
    #[test]
    fn net_is_cod_minus_fee(booking in arb_booking()) {
        let config = SettlementConfig::default();
        let rows = SettlementCalculator::new(&config).settle_booking(&booking).unwrap();

        prop_assert_eq!(rows.len(), booking.items().len());
        for row in &rows {
            prop_assert_eq!(row.fee_currency, row.cod_currency);
            prop_assert_eq!(row.cod_amount - row.fee, row.net_payout);
            prop_assert_eq!(row.cod_currency.round(row.fee), row.fee);
        }
    }

    /// Settling the same snapshot twice yields identical rows.
    #[test]
    fn settlement_is_idempotent(booking in arb_booking()) {
        let config = SettlementConfig::default();
        let calculator = SettlementCalculator::new(&config);
        let first = calculator.settle_booking(&booking).unwrap();
        let second = calculator.settle_booking(&booking).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Report totals equal the per-currency sums of the rows.
    #[test]
    fn report_totals_match_row_sums(
        bookings in prop::collection::vec(arb_booking(), 1..5),
    ) {
        let config = SettlementConfig::default();
        let calculator = SettlementCalculator::new(&config);
        let rows: Vec<_> = bookings
            .iter()
            .flat_map(|booking| calculator.settle_booking(booking).unwrap())
            .collect();

        let report = SettlementReport::aggregate(&rows).unwrap();
        for currency in Currency::ALL {
            let bucket: Vec<_> = rows.iter().filter(|row| row.cod_currency == currency).collect();
            let totals = report.totals(currency);
            prop_assert_eq!(totals.count, bucket.len());
            prop_assert_eq!(totals.cod.amount(), bucket.iter().map(|r| r.cod_amount).sum::<Decimal>());
            prop_assert_eq!(totals.fee.amount(), bucket.iter().map(|r| r.fee).sum::<Decimal>());
            prop_assert_eq!(totals.net.amount(), bucket.iter().map(|r| r.net_payout).sum::<Decimal>());
            prop_assert_eq!(totals.cod.currency(), currency);
        }
        prop_assert_eq!(report.count(), rows.len());
    }
}

// =============================================================================
// Status and Rule Invariant Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// The most advanced in-flight item status always wins on an in-progress booking.
    #[test]
    fn furthest_in_flight_item_wins(items in prop::collection::vec(arb_status(), 0..8)) {
        let resolved = effective_status(ParcelStatus::InTransit, items.iter().copied());
        let best = IN_FLIGHT_PRIORITY.iter().find(|status| items.contains(status));
        match best {
            Some(status) => {
                prop_assert_eq!(resolved, *status);
            }
            None if !items.is_empty() && items.iter().all(|s| *s == ParcelStatus::Delivered) => {
                prop_assert_eq!(resolved, ParcelStatus::Delivered);
            }
            None => {
                prop_assert_eq!(resolved, ParcelStatus::InTransit);
            }
        }
    }

    /// A cancelled booking stays cancelled whatever its items say.
    #[test]
    fn cancelled_booking_is_always_cancelled(items in prop::collection::vec(arb_status(), 0..8)) {
        prop_assert_eq!(
            effective_status(ParcelStatus::Cancelled, items),
            ParcelStatus::Cancelled
        );
    }

    /// At most one default rule per scope survives any sequence of writes.
    #[test]
    fn rule_book_keeps_one_default_per_scope(rules in prop::collection::vec(arb_rule(), 1..20)) {
        let mut book = CommissionRuleBook::new();
        for rule in rules {
            book.upsert(rule).unwrap();
        }

        for scope in [CommissionFor::Delivery, CommissionFor::Pickup] {
            let defaults = book
                .rules()
                .iter()
                .filter(|rule| rule.commission_for == scope && rule.is_default)
                .count();
            prop_assert!(defaults <= 1);
            prop_assert_eq!(defaults == 1, book.default_for(scope).is_some());
        }
    }
}
