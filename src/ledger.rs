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

//! Append-only modification ledger for parcel items.
//!
//! Every change to an item's COD amount, COD currency, or status appends a
//! [`Modification`] holding the stringified old and new values. The record and
//! the field write happen inside the same `&mut` borrow, after validation, so
//! either both are applied or neither is.
//!
//! The ledger is also read back by aging reports: the time an item entered a
//! status is the latest matching status modification, falling back to the
//! booking's creation time.

use crate::base::{Actor, BookingId, ItemId, UserId};
use crate::booking::{ParcelBooking, ParcelItem};
use crate::error::SettlementError;
use crate::money::{Currency, ensure_non_negative};
use crate::status::ParcelStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Audited item fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModificationField {
    ProductPrice,
    CodCurrency,
    Status,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modification {
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub user_name: String,
    pub field: ModificationField,
    pub old_value: String,
    pub new_value: String,
}

/// An in-place edit to an audited item field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemEdit {
    ProductPrice(Decimal),
    CodCurrency(Currency),
    Status(ParcelStatus),
}

impl ItemEdit {
    pub fn field(&self) -> ModificationField {
        match self {
            ItemEdit::ProductPrice(_) => ModificationField::ProductPrice,
            ItemEdit::CodCurrency(_) => ModificationField::CodCurrency,
            ItemEdit::Status(_) => ModificationField::Status,
        }
    }

    fn new_value(&self) -> String {
        match self {
            ItemEdit::ProductPrice(price) => price.to_string(),
            ItemEdit::CodCurrency(currency) => currency.code().to_owned(),
            ItemEdit::Status(status) => status.as_str().to_owned(),
        }
    }
}

fn current_value(item: &ParcelItem, field: ModificationField) -> String {
    match field {
        ModificationField::ProductPrice => item.product_price.to_string(),
        ModificationField::CodCurrency => item.cod_currency.code().to_owned(),
        ModificationField::Status => item.status.as_str().to_owned(),
    }
}

fn is_unchanged(item: &ParcelItem, edit: &ItemEdit) -> bool {
    match edit {
        ItemEdit::ProductPrice(price) => item.product_price == *price,
        ItemEdit::CodCurrency(currency) => item.cod_currency == *currency,
        ItemEdit::Status(status) => item.status == *status,
    }
}

/// Checks an edit against the item without modifying it.
///
/// # Errors
///
/// - [`SettlementError::NegativeAmount`] for a negative COD amount.
/// - [`SettlementError::TerminalStatus`] if the item already reached a final status.
pub fn validate_edit(item: &ParcelItem, edit: &ItemEdit) -> Result<(), SettlementError> {
    if let ItemEdit::ProductPrice(price) = edit {
        ensure_non_negative(*price, "product price")?;
    }
    if is_unchanged(item, edit) {
        return Ok(());
    }
    if item.status.is_final_for_item() {
        return Err(SettlementError::TerminalStatus(item.id.to_string()));
    }
    Ok(())
}

/// Appends the audit record and writes the field. Callers validate first.
pub(crate) fn commit_edit(
    item: &mut ParcelItem,
    edit: ItemEdit,
    actor: &Actor,
    at: DateTime<Utc>,
) -> Option<Modification> {
    if is_unchanged(item, &edit) {
        return None;
    }

    let record = Modification {
        timestamp: at,
        user_id: actor.user_id.clone(),
        user_name: actor.user_name.clone(),
        field: edit.field(),
        old_value: current_value(item, edit.field()),
        new_value: edit.new_value(),
    };
    item.modifications.push(record.clone());

    match edit {
        ItemEdit::ProductPrice(price) => item.product_price = price,
        ItemEdit::CodCurrency(currency) => item.cod_currency = currency,
        ItemEdit::Status(status) => item.status = status,
    }

    tracing::debug!(
        item = %item.id,
        field = ?record.field,
        old = %record.old_value,
        new = %record.new_value,
        "item modified"
    );
    Some(record)
}

/// Validates and applies an edit, returning the appended record.
///
/// An edit that leaves the value unchanged writes nothing and returns `None`.
pub fn apply_edit(
    item: &mut ParcelItem,
    edit: ItemEdit,
    actor: &Actor,
    at: DateTime<Utc>,
) -> Result<Option<Modification>, SettlementError> {
    validate_edit(item, &edit)?;
    Ok(commit_edit(item, edit, actor, at))
}

/// When the item last entered `status`, or `fallback` if the ledger has no record of it.
pub fn entered_status_at(
    item: &ParcelItem,
    status: ParcelStatus,
    fallback: DateTime<Utc>,
) -> DateTime<Utc> {
    item.modifications
        .iter()
        .rev()
        .find(|m| m.field == ModificationField::Status && m.new_value == status.as_str())
        .map(|m| m.timestamp)
        .unwrap_or(fallback)
}

/// Age of one in-transit item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgingEntry {
    pub booking_id: BookingId,
    pub item_id: ItemId,
    pub tracking_code: String,
    pub entered_at: DateTime<Utc>,
    pub age_days: i64,
}

/// Lists every `IN_TRANSIT` item with how long it has been in transit, oldest first.
pub fn in_transit_aging(bookings: &[ParcelBooking], now: DateTime<Utc>) -> Vec<AgingEntry> {
    let mut entries: Vec<AgingEntry> = bookings
        .iter()
        .flat_map(|booking| {
            booking
                .items()
                .iter()
                .filter(|item| item.status == ParcelStatus::InTransit)
                .map(move |item| {
                    let entered_at =
                        entered_status_at(item, ParcelStatus::InTransit, booking.created_at);
                    AgingEntry {
                        booking_id: booking.id.clone(),
                        item_id: item.id.clone(),
                        tracking_code: item.tracking_code.clone(),
                        entered_at,
                        age_days: (now - entered_at).num_days(),
                    }
                })
        })
        .collect();
    entries.sort_by(|a, b| a.entered_at.cmp(&b.entered_at));
    entries
}
