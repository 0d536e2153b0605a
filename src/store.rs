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

//! Document store seam.
//!
//! Bookings and rules live in an external document store; the engine only
//! needs keyed reads, field updates, and change subscriptions, expressed by
//! [`DocumentStore`]. [`InMemoryStore`] implements it for tests and the CLI.
//!
//! Every stored document carries a revision that advances on each write.
//! [`BookingRepository`] performs audited writes against a store: the booking
//! is loaded with its revision, the edit is validated and applied in memory,
//! and the changed fields (value and modification ledger together) are written
//! in a single `update` conditioned on that revision. If another writer got in
//! between, the update fails with [`StoreError::Conflict`] and nothing is
//! written, so no concurrent edit or audit record is overwritten.
//!
//! Store failures, conflicts included, are returned to the caller; retries are
//! the caller's or the store's concern.

use crate::base::{Actor, BookingId, ItemId};
use crate::booking::ParcelBooking;
use crate::commission::{CommissionRuleBook, DriverCommissionRule};
use crate::error::{SettlementError, StoreError};
use crate::ledger::{ItemEdit, Modification};
use crate::referral::ReferralRule;
use crate::status::ParcelStatus;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub const BOOKINGS_COLLECTION: &str = "parcel_bookings";
pub const COMMISSION_RULES_COLLECTION: &str = "driver_commission_rules";
pub const REFERRAL_RULES_COLLECTION: &str = "referral_rules";

pub type Document = Value;
pub type DocumentFilter = Box<dyn Fn(&Document) -> bool + Send + Sync>;
pub type ChangeCallback = Box<dyn Fn(&str, &Document) + Send + Sync>;

/// Revision number of a stored document.
pub type Revision = u64;

/// A document together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub document: Document,
    pub revision: Revision,
}

/// Keyed document storage.
pub trait DocumentStore: Send + Sync {
    fn get_versioned(&self, collection: &str, id: &str) -> Result<Option<Versioned>, StoreError>;

    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self
            .get_versioned(collection, id)?
            .map(|versioned| versioned.document))
    }

    fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Merges `fields` into an existing document as one atomic write.
    ///
    /// With `expected` set, the write only happens if the document is still at
    /// that revision; otherwise [`StoreError::Conflict`] is returned.
    fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
        expected: Option<Revision>,
    ) -> Result<(), StoreError>;

    /// Calls `callback` with the id and new contents of every changed document
    /// in `collection` that passes `filter`, until the subscription is dropped.
    fn subscribe(
        &self,
        collection: &str,
        filter: Option<DocumentFilter>,
        callback: ChangeCallback,
    ) -> Subscription;
}

impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    fn get_versioned(&self, collection: &str, id: &str) -> Result<Option<Versioned>, StoreError> {
        (**self).get_versioned(collection, id)
    }

    fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        (**self).list(collection)
    }

    fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
        expected: Option<Revision>,
    ) -> Result<(), StoreError> {
        (**self).update(collection, id, fields, expected)
    }

    fn subscribe(
        &self,
        collection: &str,
        filter: Option<DocumentFilter>,
        callback: ChangeCallback,
    ) -> Subscription {
        (**self).subscribe(collection, filter, callback)
    }
}

/// Live subscription handle; dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

struct Subscriber {
    collection: String,
    filter: Option<Arc<dyn Fn(&Document) -> bool + Send + Sync>>,
    callback: Arc<dyn Fn(&str, &Document) + Send + Sync>,
}

type Subscribers = Arc<Mutex<HashMap<u64, Subscriber>>>;

/// Thread-safe in-memory document store.
#[derive(Default)]
pub struct InMemoryStore {
    documents: DashMap<(String, String), Versioned>,
    subscribers: Subscribers,
    next_subscriber: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a whole document, replacing any previous one, and notifies subscribers.
    pub fn insert(&self, collection: &str, id: &str, document: Document) {
        {
            let mut entry = self
                .documents
                .entry((collection.to_owned(), id.to_owned()))
                .or_insert_with(|| Versioned {
                    document: Value::Null,
                    revision: 0,
                });
            entry.document = document.clone();
            entry.revision += 1;
        }
        self.notify(collection, id, &document);
    }

    /// Serializes and stores a typed document.
    pub fn insert_typed<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        self.insert(collection, id, serde_json::to_value(value)?);
        Ok(())
    }

    fn notify(&self, collection: &str, id: &str, document: &Document) {
        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        let targets: Vec<_> = self
            .subscribers
            .lock()
            .values()
            .filter(|s| s.collection == collection)
            .filter(|s| s.filter.as_ref().is_none_or(|f| f(document)))
            .map(|s| Arc::clone(&s.callback))
            .collect();
        for callback in targets {
            callback(id, document);
        }
    }
}

impl DocumentStore for InMemoryStore {
    fn get_versioned(&self, collection: &str, id: &str) -> Result<Option<Versioned>, StoreError> {
        Ok(self
            .documents
            .get(&(collection.to_owned(), id.to_owned()))
            .map(|entry| entry.value().clone()))
    }

    fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let mut entries: Vec<(String, Document)> = self
            .documents
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .map(|entry| (entry.key().1.clone(), entry.value().document.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries.into_iter().map(|(_, doc)| doc).collect())
    }

    fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
        expected: Option<Revision>,
    ) -> Result<(), StoreError> {
        let updated = {
            // The entry guard holds the shard lock from the revision check to the write.
            let mut entry = self
                .documents
                .get_mut(&(collection.to_owned(), id.to_owned()))
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.to_owned(),
                    id: id.to_owned(),
                })?;
            let stored = entry.value_mut();
            if let Some(expected) = expected {
                if stored.revision != expected {
                    return Err(StoreError::Conflict {
                        collection: collection.to_owned(),
                        id: id.to_owned(),
                        expected,
                        found: stored.revision,
                    });
                }
            }
            let object = stored.document.as_object_mut().ok_or_else(|| {
                StoreError::Serialization(format!("{collection}/{id} is not an object"))
            })?;
            object.extend(fields);
            stored.revision += 1;
            stored.document.clone()
        };
        self.notify(collection, id, &updated);
        Ok(())
    }

    fn subscribe(
        &self,
        collection: &str,
        filter: Option<DocumentFilter>,
        callback: ChangeCallback,
    ) -> Subscription {
        let key = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(
            key,
            Subscriber {
                collection: collection.to_owned(),
                filter: filter.map(Arc::from),
                callback: Arc::from(callback),
            },
        );
        let subscribers = Arc::clone(&self.subscribers);
        Subscription::new(move || {
            subscribers.lock().remove(&key);
        })
    }
}

fn decode<T: DeserializeOwned>(document: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(document)?)
}

/// Decodes a booking document and checks its amounts.
fn decode_booking(document: Document) -> Result<ParcelBooking, SettlementError> {
    let booking: ParcelBooking = decode(document)?;
    booking.validate()?;
    Ok(booking)
}

/// Picks `keys` out of a serialized document for a partial update.
fn fields_of<T: Serialize>(value: &T, keys: &[&str]) -> Result<Map<String, Value>, StoreError> {
    let Value::Object(mut object) = serde_json::to_value(value)? else {
        return Err(StoreError::Serialization("expected an object".into()));
    };
    Ok(keys
        .iter()
        .filter_map(|key| object.remove(*key).map(|v| ((*key).to_owned(), v)))
        .collect())
}

/// Typed, audited access to bookings and rules in a [`DocumentStore`].
pub struct BookingRepository<S> {
    store: S,
}

impl<S: DocumentStore> BookingRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads and validates a booking.
    pub fn load(&self, id: &BookingId) -> Result<ParcelBooking, SettlementError> {
        self.load_versioned(id).map(|(booking, _)| booking)
    }

    /// Loads and validates every booking, failing on the first invalid one.
    pub fn list(&self) -> Result<Vec<ParcelBooking>, SettlementError> {
        self.store
            .list(BOOKINGS_COLLECTION)?
            .into_iter()
            .map(decode_booking)
            .collect()
    }

    fn load_versioned(&self, id: &BookingId) -> Result<(ParcelBooking, Revision), SettlementError> {
        let versioned = self
            .store
            .get_versioned(BOOKINGS_COLLECTION, id.as_str())?
            .ok_or_else(|| StoreError::NotFound {
                collection: BOOKINGS_COLLECTION.to_owned(),
                id: id.to_string(),
            })?;
        Ok((decode_booking(versioned.document)?, versioned.revision))
    }

    /// Applies an audited item edit and persists it in one update.
    pub fn apply_item_edit(
        &self,
        booking_id: &BookingId,
        item_id: &ItemId,
        edit: ItemEdit,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<Option<Modification>, SettlementError> {
        let (mut booking, revision) = self.load_versioned(booking_id)?;
        let record = booking.apply_item_edit(item_id, edit, actor, at)?;
        if record.is_some() {
            self.write(&booking, revision, &["items"])?;
        }
        Ok(record)
    }

    /// Records a booking-level status transition.
    pub fn update_status(
        &self,
        booking_id: &BookingId,
        status: ParcelStatus,
        actor: &Actor,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<ParcelBooking, SettlementError> {
        let (mut booking, revision) = self.load_versioned(booking_id)?;
        booking.update_status(status, actor, notes, at)?;
        self.write(&booking, revision, &["status", "statusHistory"])?;
        Ok(booking)
    }

    /// Cancels a pending booking on the customer's behalf.
    pub fn cancel_by_customer(
        &self,
        booking_id: &BookingId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ParcelBooking, SettlementError> {
        let (mut booking, revision) = self.load_versioned(booking_id)?;
        booking.cancel_by_customer(actor, at)?;
        self.write(&booking, revision, &["status", "statusHistory", "items"])?;
        tracing::info!(booking = %booking_id, "booking cancelled by customer");
        Ok(booking)
    }

    pub fn commission_rules(&self) -> Result<CommissionRuleBook, SettlementError> {
        let rules = self
            .store
            .list(COMMISSION_RULES_COLLECTION)?
            .into_iter()
            .map(decode::<DriverCommissionRule>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CommissionRuleBook::from_rules(rules))
    }

    pub fn referral_rules(&self) -> Result<Vec<ReferralRule>, SettlementError> {
        Ok(self
            .store
            .list(REFERRAL_RULES_COLLECTION)?
            .into_iter()
            .map(decode)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Calls `on_change` with every booking change; undecodable or invalid
    /// documents are logged and skipped.
    pub fn subscribe_bookings<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(ParcelBooking) + Send + Sync + 'static,
    {
        self.store.subscribe(
            BOOKINGS_COLLECTION,
            None,
            Box::new(move |id: &str, document: &Document| {
                match decode_booking(document.clone()) {
                    Ok(booking) => on_change(booking),
                    Err(e) => tracing::warn!(booking = %id, error = %e, "skipping invalid booking"),
                }
            }),
        )
    }

    fn write(
        &self,
        booking: &ParcelBooking,
        revision: Revision,
        keys: &[&str],
    ) -> Result<(), SettlementError> {
        let fields = fields_of(booking, keys)?;
        self.store
            .update(BOOKINGS_COLLECTION, booking.id.as_str(), fields, Some(revision))
            .inspect_err(|e| {
                if matches!(e, StoreError::Conflict { .. }) {
                    tracing::warn!(booking = %booking.id, error = %e, "concurrent booking write rejected");
                }
            })?;
        Ok(())
    }
}
