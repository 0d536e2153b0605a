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

//! Per-item settlement.
//!
//! The [`SettlementCalculator`] turns a settled [`ParcelItem`] into a
//! [`SettledItem`] report row:
//!
//! 1. The booking's total delivery fee is split evenly across all of its items
//!    (not in proportion to COD value).
//! 2. The per-item fee is converted into the item's COD currency with the
//!    commission exchange rate; the fee is always reported in the COD currency.
//! 3. Fee and COD amount are each rounded once with the COD currency's
//!    canonical rounding, then subtracted, so every row satisfies
//!    `cod - fee == net` exactly.
//!
//! Calculation is pure: the booking is only read, and re-running over the same
//! snapshot yields identical rows.
//!
//! # Example
//!
//! ```
//! use chrono::{NaiveDate, TimeZone, Utc};
//! use parcel_settlement::{Currency, ParcelBooking, ParcelItem, SettlementCalculator, SettlementConfig};
//! use rust_decimal_macros::dec;
//!
//! let booking = ParcelBooking::new(
//!     "b1", "c1",
//!     NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
//!     Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap(),
//!     Currency::Usd, dec!(10),
//! )
//! .unwrap()
//! .with_item(ParcelItem::new("i1", "TRK1", dec!(40000), Currency::Khr).unwrap().settled())
//! .with_item(ParcelItem::new("i2", "TRK2", dec!(20), Currency::Usd).unwrap());
//!
//! let config = SettlementConfig::default();
//! let rows = SettlementCalculator::new(&config).settle_booking(&booking).unwrap();
//! assert_eq!(rows.len(), 1);
//! assert_eq!(rows[0].fee, dec!(20500));
//! assert_eq!(rows[0].net_payout, dec!(19500));
//! ```

use crate::base::{BookingId, CustomerId, ItemId};
use crate::booking::{ParcelBooking, ParcelItem};
use crate::config::SettlementConfig;
use crate::error::SettlementError;
use crate::money::{Currency, Money};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// One settled item as it appears in settlement reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledItem {
    pub booking_id: BookingId,
    pub item_id: ItemId,
    pub tracking_code: String,
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub customer_phone: String,
    pub receiver_name: String,
    pub receiver_phone: String,
    pub delivery_date: NaiveDate,
    pub cod_amount: Decimal,
    pub cod_currency: Currency,
    pub fee: Decimal,
    /// Always equal to `cod_currency`.
    pub fee_currency: Currency,
    pub net_payout: Decimal,
}

impl SettledItem {
    pub fn cod(&self) -> Money {
        Money::new(self.cod_amount, self.cod_currency)
    }

    pub fn fee(&self) -> Money {
        Money::new(self.fee, self.fee_currency)
    }

    pub fn net(&self) -> Money {
        Money::new(self.net_payout, self.cod_currency)
    }
}

/// Computes settlement rows under one configuration.
#[derive(Debug, Clone, Copy)]
pub struct SettlementCalculator<'a> {
    config: &'a SettlementConfig,
}

impl<'a> SettlementCalculator<'a> {
    pub fn new(config: &'a SettlementConfig) -> Self {
        Self { config }
    }

    /// The equal share of the booking's delivery fee carried by each item,
    /// in the booking's fee currency and not yet rounded.
    pub fn per_item_fee(&self, booking: &ParcelBooking) -> Result<Money, SettlementError> {
        let count = NonZeroUsize::new(booking.items().len())
            .ok_or_else(|| SettlementError::EmptyBooking(booking.id.to_string()))?;
        Ok(booking.delivery_fee().split(count))
    }

    /// Settles one item of a booking.
    ///
    /// # Errors
    ///
    /// - [`SettlementError::NegativeAmount`] if the booking carries a negative amount.
    /// - [`SettlementError::ItemNotFound`] if the booking has no such item.
    /// - [`SettlementError::ItemNotSettled`] unless the item is marked `SETTLED`.
    pub fn settle_item(
        &self,
        booking: &ParcelBooking,
        item_id: &ItemId,
    ) -> Result<SettledItem, SettlementError> {
        booking.validate()?;
        let item = booking
            .item(item_id)
            .ok_or_else(|| SettlementError::ItemNotFound(item_id.to_string()))?;
        if !item.is_settled() {
            return Err(SettlementError::ItemNotSettled(item_id.to_string()));
        }
        self.settle(booking, item)
    }

    /// Settles every `SETTLED` item of a booking, in item order. The whole
    /// booking is validated first.
    pub fn settle_booking(
        &self,
        booking: &ParcelBooking,
    ) -> Result<Vec<SettledItem>, SettlementError> {
        booking.validate()?;
        booking
            .items()
            .iter()
            .filter(|item| item.is_settled())
            .map(|item| self.settle(booking, item))
            .collect()
    }

    /// Settles every `SETTLED` item of bookings delivered within `from..=to`.
    pub fn settle_range(
        &self,
        bookings: &[ParcelBooking],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SettledItem>, SettlementError> {
        let mut rows = Vec::new();
        for booking in bookings {
            let delivered = booking.delivery_date();
            if delivered < from || delivered > to {
                continue;
            }
            rows.extend(self.settle_booking(booking)?);
        }
        tracing::debug!(%from, %to, rows = rows.len(), "settled date range");
        Ok(rows)
    }

    fn settle(
        &self,
        booking: &ParcelBooking,
        item: &ParcelItem,
    ) -> Result<SettledItem, SettlementError> {
        let cod_currency = item.cod_currency();
        let fee = self
            .config
            .commission_exchange_rate
            .convert(self.per_item_fee(booking)?, cod_currency)
            .rounded();
        let cod = item.cod().rounded();
        let net = cod.try_sub(fee)?;

        Ok(SettledItem {
            booking_id: booking.id.clone(),
            item_id: item.id.clone(),
            tracking_code: item.tracking_code.clone(),
            customer_id: booking.sender_id.clone(),
            customer_name: booking.sender_name.clone(),
            customer_phone: booking.sender_phone.clone(),
            receiver_name: item.receiver_name.clone(),
            receiver_phone: item.receiver_phone.clone(),
            delivery_date: booking.delivery_date(),
            cod_amount: cod.amount(),
            cod_currency,
            fee: fee.amount(),
            fee_currency: fee.currency(),
            net_payout: net.amount(),
        })
    }
}
