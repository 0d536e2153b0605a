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

//! Delivery status resolution.
//!
//! Items in a booking progress independently (a booking can be partially
//! delivered), but dashboards show one status per booking. The effective
//! status is resolved as follows:
//!
//! 1. A `CANCELLED` booking is `CANCELLED`.
//! 2. A `PENDING` or `CONFIRMED` booking keeps its own status.
//! 3. Otherwise the first of [`IN_FLIGHT_PRIORITY`] held by any item wins.
//! 4. A non-empty item list that is entirely `DELIVERED` is `DELIVERED`.
//! 5. Anything else falls back to the booking-level status.
//!
//! An empty item list is never treated as "all delivered".

use crate::booking::ParcelBooking;
use crate::error::SettlementError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Booking- and item-level parcel statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum ParcelStatus {
    Pending,
    Confirmed,
    PickedUp,
    AtWarehouse,
    InTransit,
    OutForDelivery,
    Delivered,
    Cancelled,
    ReturnToSender,
    Completed,
    Returned,
}

/// Item statuses that mark a booking as "in flight", furthest along first.
pub const IN_FLIGHT_PRIORITY: [ParcelStatus; 4] = [
    ParcelStatus::OutForDelivery,
    ParcelStatus::InTransit,
    ParcelStatus::PickedUp,
    ParcelStatus::AtWarehouse,
];

impl ParcelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParcelStatus::Pending => "PENDING",
            ParcelStatus::Confirmed => "CONFIRMED",
            ParcelStatus::PickedUp => "PICKED_UP",
            ParcelStatus::AtWarehouse => "AT_WAREHOUSE",
            ParcelStatus::InTransit => "IN_TRANSIT",
            ParcelStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            ParcelStatus::Delivered => "DELIVERED",
            ParcelStatus::Cancelled => "CANCELLED",
            ParcelStatus::ReturnToSender => "RETURN_TO_SENDER",
            ParcelStatus::Completed => "COMPLETED",
            ParcelStatus::Returned => "RETURNED",
        }
    }

    /// Human-readable label recorded on status history entries.
    pub fn label(&self) -> &'static str {
        match self {
            ParcelStatus::Pending => "Pending",
            ParcelStatus::Confirmed => "Confirmed",
            ParcelStatus::PickedUp => "Picked up",
            ParcelStatus::AtWarehouse => "At warehouse",
            ParcelStatus::InTransit => "In transit",
            ParcelStatus::OutForDelivery => "Out for delivery",
            ParcelStatus::Delivered => "Delivered",
            ParcelStatus::Cancelled => "Cancelled",
            ParcelStatus::ReturnToSender => "Return to sender",
            ParcelStatus::Completed => "Completed",
            ParcelStatus::Returned => "Returned",
        }
    }

    /// Position in [`IN_FLIGHT_PRIORITY`], lower is higher priority.
    pub fn in_flight_rank(&self) -> Option<usize> {
        IN_FLIGHT_PRIORITY.iter().position(|s| s == self)
    }

    /// Statuses that move a booking into the history group.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ParcelStatus::Delivered
                | ParcelStatus::Cancelled
                | ParcelStatus::Completed
                | ParcelStatus::Returned
        )
    }

    /// Item statuses after which COD and status edits are refused.
    pub fn is_final_for_item(&self) -> bool {
        self.is_terminal() || *self == ParcelStatus::ReturnToSender
    }
}

impl fmt::Display for ParcelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParcelStatus {
    type Err = SettlementError;

    /// Accepts the canonical names plus legacy `ps-` prefixed, lowercase, or
    /// hyphenated spellings (`ps-in-transit`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let stripped = match trimmed.get(..3) {
            Some(prefix) if prefix.eq_ignore_ascii_case("ps-") => &trimmed[3..],
            _ => trimmed,
        };
        let normalized = stripped.to_ascii_uppercase().replace(['-', ' '], "_");
        let status = match normalized.as_str() {
            "PENDING" => ParcelStatus::Pending,
            "CONFIRMED" => ParcelStatus::Confirmed,
            "PICKED_UP" => ParcelStatus::PickedUp,
            "AT_WAREHOUSE" => ParcelStatus::AtWarehouse,
            "IN_TRANSIT" => ParcelStatus::InTransit,
            "OUT_FOR_DELIVERY" => ParcelStatus::OutForDelivery,
            "DELIVERED" => ParcelStatus::Delivered,
            "CANCELLED" => ParcelStatus::Cancelled,
            "RETURN_TO_SENDER" => ParcelStatus::ReturnToSender,
            "COMPLETED" => ParcelStatus::Completed,
            "RETURNED" => ParcelStatus::Returned,
            _ => return Err(SettlementError::UnknownStatus(s.to_owned())),
        };
        Ok(status)
    }
}

impl TryFrom<String> for ParcelStatus {
    type Error = SettlementError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Resolves one status for a booking from its own status and its items'.
pub fn effective_status<I>(booking_status: ParcelStatus, item_statuses: I) -> ParcelStatus
where
    I: IntoIterator<Item = ParcelStatus>,
{
    match booking_status {
        ParcelStatus::Cancelled => return ParcelStatus::Cancelled,
        ParcelStatus::Pending | ParcelStatus::Confirmed => return booking_status,
        _ => {}
    }

    let mut best_rank: Option<usize> = None;
    let mut seen_any = false;
    let mut all_delivered = true;

    for status in item_statuses {
        seen_any = true;
        all_delivered &= status == ParcelStatus::Delivered;
        if let Some(rank) = status.in_flight_rank() {
            best_rank = Some(best_rank.map_or(rank, |best| best.min(rank)));
        }
    }

    if let Some(rank) = best_rank {
        return IN_FLIGHT_PRIORITY[rank];
    }
    if seen_any && all_delivered {
        return ParcelStatus::Delivered;
    }
    booking_status
}

/// Bookings split into the active dashboard and the history view.
#[derive(Debug, Default)]
pub struct BookingGroups<'a> {
    pub active: Vec<&'a ParcelBooking>,
    pub history: Vec<&'a ParcelBooking>,
}

/// Partitions bookings by their effective status; terminal ones go to history.
pub fn partition_bookings(bookings: &[ParcelBooking]) -> BookingGroups<'_> {
    let mut groups = BookingGroups::default();
    for booking in bookings {
        if booking.effective_status().is_terminal() {
            groups.history.push(booking);
        } else {
            groups.active.push(booking);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use ParcelStatus::*;

    #[test]
    fn priority_order_is_furthest_along_first() {
        assert_eq!(OutForDelivery.in_flight_rank(), Some(0));
        assert_eq!(InTransit.in_flight_rank(), Some(1));
        assert_eq!(PickedUp.in_flight_rank(), Some(2));
        assert_eq!(AtWarehouse.in_flight_rank(), Some(3));
        assert_eq!(Delivered.in_flight_rank(), None);
    }

    #[test]
    fn parses_legacy_spellings() {
        assert_eq!("ps-in-transit".parse::<ParcelStatus>().unwrap(), InTransit);
        assert_eq!("PS-DELIVERED".parse::<ParcelStatus>().unwrap(), Delivered);
        assert_eq!("out_for_delivery".parse::<ParcelStatus>().unwrap(), OutForDelivery);
        assert!("LOST".parse::<ParcelStatus>().is_err());
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        assert_eq!(serde_json::to_string(&ReturnToSender).unwrap(), "\"RETURN_TO_SENDER\"");
        let parsed: ParcelStatus = serde_json::from_str("\"ps-picked-up\"").unwrap();
        assert_eq!(parsed, PickedUp);
    }

    #[test]
    fn cancelled_booking_overrides_items() {
        assert_eq!(effective_status(Cancelled, [OutForDelivery]), Cancelled);
    }

    #[test]
    fn empty_items_fall_back_to_booking_status() {
        assert_eq!(effective_status(InTransit, []), InTransit);
        assert_eq!(effective_status(Delivered, []), Delivered);
    }

    #[test]
    fn mixed_delivered_and_pending_items_fall_back() {
        assert_eq!(effective_status(InTransit, [Delivered, Pending]), InTransit);
    }
}
