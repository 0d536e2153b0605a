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

//! Parcel bookings and their items.
//!
//! A [`ParcelBooking`] exclusively owns its ordered [`ParcelItem`]s. Fields
//! that carry audit obligations (booking status and history, item COD amount,
//! COD currency, and status) are only writable through the operations here and
//! in [`crate::ledger`], so every change lands together with its audit record.
//!
//! Booking lifecycle:
//!
//! ```text
//! PENDING ──cancel_by_customer──► CANCELLED
//!    │
//!    └──update_status──► CONFIRMED ──► ... ──► DELIVERED | COMPLETED | RETURNED
//! ```
//!
//! Terminal bookings reject further status updates.

use crate::base::{Actor, BookingId, CustomerId, ItemId, UserId};
use crate::error::SettlementError;
use crate::ledger::{self, ItemEdit, Modification};
use crate::money::{Currency, Money, ensure_non_negative};
use crate::status::{self, ParcelStatus};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Label recorded when a customer cancels their own booking.
pub const CANCELLED_BY_CUSTOMER: &str = "Cancelled by customer";

/// Settlement state of an item from the customer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerSettlementStatus {
    Unsettled,
    Pending,
    Settled,
}

/// One booking-level status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    #[serde(rename = "statusId")]
    pub status: ParcelStatus,
    pub label: String,
    pub timestamp: DateTime<Utc>,
    pub updated_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A single parcel within a booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelItem {
    pub id: ItemId,
    #[serde(default)]
    pub receiver_name: String,
    #[serde(default)]
    pub receiver_phone: String,
    #[serde(default)]
    pub destination_address: String,
    #[serde(default)]
    pub tracking_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub(crate) status: ParcelStatus,
    pub(crate) product_price: Decimal,
    pub(crate) cod_currency: Currency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_fee: Option<Decimal>,
    #[serde(default, rename = "deliveryFeeUSD", skip_serializing_if = "Option::is_none")]
    pub delivery_fee_usd: Option<Decimal>,
    #[serde(default, rename = "deliveryFeeKHR", skip_serializing_if = "Option::is_none")]
    pub delivery_fee_khr: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_settlement_status: Option<CustomerSettlementStatus>,
    #[serde(default)]
    pub(crate) modifications: Vec<Modification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_quantity: Option<u32>,
}

impl ParcelItem {
    /// Creates a `PENDING` item carrying a COD amount.
    pub fn new(
        id: impl Into<String>,
        tracking_code: impl Into<String>,
        product_price: Decimal,
        cod_currency: Currency,
    ) -> Result<Self, SettlementError> {
        ensure_non_negative(product_price, "product price")?;
        Ok(Self {
            id: ItemId::new(id),
            receiver_name: String::new(),
            receiver_phone: String::new(),
            destination_address: String::new(),
            tracking_code: tracking_code.into(),
            barcode: None,
            zone: None,
            status: ParcelStatus::Pending,
            product_price,
            cod_currency,
            delivery_fee: None,
            delivery_fee_usd: None,
            delivery_fee_khr: None,
            driver_id: None,
            driver_name: None,
            customer_settlement_status: None,
            modifications: Vec::new(),
            quantity: None,
            actual_quantity: None,
        })
    }

    /// Sets the initial status of a freshly built item.
    pub fn with_status(mut self, status: ParcelStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_receiver(mut self, name: impl Into<String>, phone: impl Into<String>) -> Self {
        self.receiver_name = name.into();
        self.receiver_phone = phone.into();
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn settled(mut self) -> Self {
        self.customer_settlement_status = Some(CustomerSettlementStatus::Settled);
        self
    }

    pub fn status(&self) -> ParcelStatus {
        self.status
    }

    pub fn product_price(&self) -> Decimal {
        self.product_price
    }

    pub fn cod_currency(&self) -> Currency {
        self.cod_currency
    }

    /// The COD amount as currency-tagged money.
    pub fn cod(&self) -> Money {
        Money::new(self.product_price, self.cod_currency)
    }

    pub fn modifications(&self) -> &[Modification] {
        &self.modifications
    }

    /// Checks amounts of an item that did not come through [`ParcelItem::new`],
    /// such as one decoded from a stored document.
    ///
    /// # Errors
    ///
    /// [`SettlementError::NegativeAmount`] for a negative COD amount or delivery fee.
    pub fn validate(&self) -> Result<(), SettlementError> {
        ensure_non_negative(self.product_price, "product price")?;
        for (fee, field) in [
            (self.delivery_fee, "delivery fee"),
            (self.delivery_fee_usd, "delivery fee USD"),
            (self.delivery_fee_khr, "delivery fee KHR"),
        ] {
            if let Some(fee) = fee {
                ensure_non_negative(fee, field)?;
            }
        }
        Ok(())
    }

    pub fn is_settled(&self) -> bool {
        self.customer_settlement_status == Some(CustomerSettlementStatus::Settled)
    }

    /// Difference between the counted and the booked quantity, when both are known.
    pub fn quantity_discrepancy(&self) -> Option<i64> {
        match (self.actual_quantity, self.quantity) {
            (Some(actual), Some(booked)) => Some(i64::from(actual) - i64::from(booked)),
            _ => None,
        }
    }
}

/// A customer's booking: sender details, fee, and the parcels it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelBooking {
    pub id: BookingId,
    pub sender_id: CustomerId,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_phone: String,
    pub booking_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    /// Booking-level default currency, also the currency of `total_delivery_fee`.
    pub currency: Currency,
    pub total_delivery_fee: Decimal,
    pub(crate) status: ParcelStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
    #[serde(default)]
    pub(crate) status_history: Vec<StatusHistoryEntry>,
    #[serde(default)]
    pub(crate) items: Vec<ParcelItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,
    #[serde(default, rename = "exchangeRateForCOD", skip_serializing_if = "Option::is_none")]
    pub exchange_rate_for_cod: Option<Decimal>,
}

impl ParcelBooking {
    /// Creates a `PENDING` booking with no items.
    pub fn new(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        booking_date: NaiveDate,
        created_at: DateTime<Utc>,
        currency: Currency,
        total_delivery_fee: Decimal,
    ) -> Result<Self, SettlementError> {
        ensure_non_negative(total_delivery_fee, "total delivery fee")?;
        Ok(Self {
            id: BookingId::new(id),
            sender_id: CustomerId::new(sender_id),
            sender_name: String::new(),
            sender_phone: String::new(),
            booking_date,
            created_at,
            currency,
            total_delivery_fee,
            status: ParcelStatus::Pending,
            status_id: None,
            status_history: Vec::new(),
            items: Vec::new(),
            driver_id: None,
            driver_name: None,
            exchange_rate_for_cod: None,
        })
    }

    pub fn with_sender(mut self, name: impl Into<String>, phone: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self.sender_phone = phone.into();
        self
    }

    pub fn with_item(mut self, item: ParcelItem) -> Self {
        self.items.push(item);
        self
    }

    /// Sets the initial status of a freshly built booking.
    pub fn with_status(mut self, status: ParcelStatus) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> ParcelStatus {
        self.status
    }

    /// Checks the booking fee, the COD exchange rate, and every item.
    ///
    /// Documents decoded from the store bypass the constructors, so readers
    /// call this before trusting their amounts.
    pub fn validate(&self) -> Result<(), SettlementError> {
        ensure_non_negative(self.total_delivery_fee, "total delivery fee")?;
        if self
            .exchange_rate_for_cod
            .is_some_and(|rate| rate <= Decimal::ZERO)
        {
            return Err(SettlementError::InvalidExchangeRate);
        }
        self.items.iter().try_for_each(ParcelItem::validate)
    }

    pub fn status_history(&self) -> &[StatusHistoryEntry] {
        &self.status_history
    }

    pub fn items(&self) -> &[ParcelItem] {
        &self.items
    }

    pub fn item(&self, item_id: &ItemId) -> Option<&ParcelItem> {
        self.items.iter().find(|item| &item.id == item_id)
    }

    /// Total delivery fee as currency-tagged money.
    pub fn delivery_fee(&self) -> Money {
        Money::new(self.total_delivery_fee, self.currency)
    }

    /// The one status shown for this booking on dashboards.
    pub fn effective_status(&self) -> ParcelStatus {
        status::effective_status(self.status, self.items.iter().map(ParcelItem::status))
    }

    pub fn latest_status_entry(&self) -> Option<&StatusHistoryEntry> {
        self.status_history.last()
    }

    /// Date the booking was delivered: the latest `DELIVERED` history entry,
    /// or the booking date when none was recorded.
    pub fn delivery_date(&self) -> NaiveDate {
        self.status_history
            .iter()
            .rev()
            .find(|entry| entry.status == ParcelStatus::Delivered)
            .map(|entry| entry.timestamp.date_naive())
            .unwrap_or(self.booking_date)
    }

    /// Records a staff or driver status transition at booking level.
    ///
    /// # Errors
    ///
    /// [`SettlementError::TerminalStatus`] if the booking already reached a
    /// terminal status.
    pub fn update_status(
        &mut self,
        new_status: ParcelStatus,
        actor: &Actor,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), SettlementError> {
        if self.status.is_terminal() {
            return Err(SettlementError::TerminalStatus(self.id.to_string()));
        }
        self.push_history(new_status, new_status.label().to_owned(), actor, notes, at);
        Ok(())
    }

    /// Cancels a booking on the customer's request.
    ///
    /// Only a `PENDING` booking can be cancelled. The booking and every item
    /// become `CANCELLED`, each item change is written to its modification
    /// ledger, and a "Cancelled by customer" history entry is appended.
    ///
    /// # Errors
    ///
    /// [`SettlementError::NotPending`] once the booking has left `PENDING`.
    /// Nothing is modified on error.
    pub fn cancel_by_customer(
        &mut self,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<(), SettlementError> {
        if self.status != ParcelStatus::Pending {
            return Err(SettlementError::NotPending);
        }

        let edit = ItemEdit::Status(ParcelStatus::Cancelled);
        // Validate every item before touching any of them.
        for item in &self.items {
            ledger::validate_edit(item, &edit)?;
        }
        for item in &mut self.items {
            ledger::commit_edit(item, edit, actor, at);
        }

        self.push_history(
            ParcelStatus::Cancelled,
            CANCELLED_BY_CUSTOMER.to_owned(),
            actor,
            None,
            at,
        );
        tracing::debug!(booking = %self.id, "booking cancelled by customer");
        Ok(())
    }

    /// Applies an audited edit to one item of this booking.
    ///
    /// Returns the modification record, or `None` when the value was unchanged.
    pub fn apply_item_edit(
        &mut self,
        item_id: &ItemId,
        edit: ItemEdit,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<Option<Modification>, SettlementError> {
        let item = self
            .items
            .iter_mut()
            .find(|item| &item.id == item_id)
            .ok_or_else(|| SettlementError::ItemNotFound(item_id.to_string()))?;
        ledger::apply_edit(item, edit, actor, at)
    }

    fn push_history(
        &mut self,
        new_status: ParcelStatus,
        label: String,
        actor: &Actor,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.status = new_status;
        self.status_history.push(StatusHistoryEntry {
            status: new_status,
            label,
            timestamp: at,
            updated_by: actor.user_id.clone(),
            notes,
        });
    }
}
