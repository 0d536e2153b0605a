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

//! Document store and booking repository integration tests.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parcel_settlement::store::{
    BOOKINGS_COLLECTION, BookingRepository, COMMISSION_RULES_COLLECTION, ChangeCallback,
    Document, DocumentFilter, DocumentStore, InMemoryStore, REFERRAL_RULES_COLLECTION, Revision,
    Subscription, Versioned,
};
use parcel_settlement::{
    Actor, BookingId, CommissionFor, Currency, ItemEdit, ItemId, ParcelBooking, ParcelItem,
    ParcelStatus, RuleId, SettlementError, StoreError,
};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::{Map, Value, json};
use std::sync::Arc;

// === Helper Functions ===

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 1, hour, 0, 0).unwrap()
}

fn staff() -> Actor {
    Actor::new("staff-1", "Chanthy")
}

fn make_booking(id: &str) -> ParcelBooking {
    ParcelBooking::new(
        id,
        "cust-1",
        NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
        at(7),
        Currency::Usd,
        dec!(2),
    )
    .unwrap()
    .with_item(ParcelItem::new("i1", "TRK1", dec!(20000), Currency::Khr).unwrap())
}

fn make_repository(bookings: &[ParcelBooking]) -> BookingRepository<InMemoryStore> {
    let store = InMemoryStore::new();
    for booking in bookings {
        store
            .insert_typed(BOOKINGS_COLLECTION, booking.id.as_str(), booking)
            .unwrap();
    }
    BookingRepository::new(store)
}

type BeforeWrite = Box<dyn FnOnce(&Arc<InMemoryStore>) + Send>;

/// Store that lets another writer commit just before the next update lands.
struct InterleavingStore {
    inner: Arc<InMemoryStore>,
    before_write: Mutex<Option<BeforeWrite>>,
}

impl InterleavingStore {
    fn new(inner: Arc<InMemoryStore>, before_write: BeforeWrite) -> Self {
        Self {
            inner,
            before_write: Mutex::new(Some(before_write)),
        }
    }
}

impl DocumentStore for InterleavingStore {
    fn get_versioned(&self, collection: &str, id: &str) -> Result<Option<Versioned>, StoreError> {
        self.inner.get_versioned(collection, id)
    }

    fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.inner.list(collection)
    }

    fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
        expected: Option<Revision>,
    ) -> Result<(), StoreError> {
        let hook = self.before_write.lock().take();
        if let Some(hook) = hook {
            hook(&self.inner);
        }
        self.inner.update(collection, id, fields, expected)
    }

    fn subscribe(
        &self,
        collection: &str,
        filter: Option<DocumentFilter>,
        callback: ChangeCallback,
    ) -> Subscription {
        self.inner.subscribe(collection, filter, callback)
    }
}

fn make_two_item_booking() -> ParcelBooking {
    make_booking("b1")
        .with_item(ParcelItem::new("i2", "TRK2", dec!(20), Currency::Usd).unwrap())
}

fn commission_rule(id: &str, is_default: bool, updated_hour: u32) -> Value {
    json!({
        "id": id,
        "zoneName": "Default",
        "commissionFor": "DELIVERY",
        "type": "PERCENTAGE",
        "value": "70",
        "isDefault": is_default,
        "updatedAt": at(updated_hour),
    })
}

// === InMemoryStore ===

#[test]
fn update_merges_fields_into_existing_document() {
    let store = InMemoryStore::new();
    store.insert("things", "a", json!({"name": "first", "count": 1}));

    let mut fields = Map::new();
    fields.insert("count".into(), json!(2));
    store.update("things", "a", fields, None).unwrap();

    let doc = store.get("things", "a").unwrap().unwrap();
    assert_eq!(doc, json!({"name": "first", "count": 2}));
}

#[test]
fn update_of_missing_document_fails() {
    let store = InMemoryStore::new();
    let result = store.update("things", "ghost", Map::new(), None);
    assert_eq!(
        result,
        Err(StoreError::NotFound {
            collection: "things".into(),
            id: "ghost".into(),
        })
    );
}

#[test]
fn stale_revision_is_rejected_without_writing() {
    let store = InMemoryStore::new();
    store.insert("things", "a", json!({"count": 1}));
    let read = store.get_versioned("things", "a").unwrap().unwrap();

    let mut first = Map::new();
    first.insert("count".into(), json!(2));
    store.update("things", "a", first, Some(read.revision)).unwrap();

    let mut second = Map::new();
    second.insert("count".into(), json!(3));
    let result = store.update("things", "a", second, Some(read.revision));

    assert_eq!(
        result,
        Err(StoreError::Conflict {
            collection: "things".into(),
            id: "a".into(),
            expected: read.revision,
            found: read.revision + 1,
        })
    );
    assert_eq!(store.get("things", "a").unwrap(), Some(json!({"count": 2})));
}

#[test]
fn list_is_scoped_to_collection_and_sorted_by_id() {
    let store = InMemoryStore::new();
    store.insert("things", "b", json!({"id": "b"}));
    store.insert("things", "a", json!({"id": "a"}));
    store.insert("other", "c", json!({"id": "c"}));

    let docs = store.list("things").unwrap();
    assert_eq!(docs, vec![json!({"id": "a"}), json!({"id": "b"})]);
}

#[test]
fn subscribers_see_filtered_changes_until_dropped() {
    let store = InMemoryStore::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let subscription = store.subscribe(
        "things",
        Some(Box::new(|doc: &Value| doc["visible"] == json!(true))),
        Box::new(move |id: &str, _doc: &Value| sink.lock().push(id.to_owned())),
    );

    store.insert("things", "a", json!({"visible": true}));
    store.insert("things", "b", json!({"visible": false}));
    store.insert("other", "c", json!({"visible": true}));
    subscription.unsubscribe();
    store.insert("things", "d", json!({"visible": true}));

    assert_eq!(*seen.lock(), vec!["a".to_owned()]);
}

// === BookingRepository ===

#[test]
fn item_edit_persists_value_and_record_together() {
    let repo = make_repository(&[make_booking("b1")]);
    let booking_id = BookingId::from("b1");

    let record = repo
        .apply_item_edit(&booking_id, &ItemId::from("i1"), ItemEdit::ProductPrice(dec!(25000)), &staff(), at(9))
        .unwrap()
        .unwrap();

    let stored = repo.load(&booking_id).unwrap();
    let item = &stored.items()[0];
    assert_eq!(item.product_price(), dec!(25000));
    assert_eq!(item.modifications(), &[record]);
}

#[test]
fn rejected_edit_leaves_document_untouched() {
    let repo = make_repository(&[make_booking("b1")]);
    let before = repo.store().get(BOOKINGS_COLLECTION, "b1").unwrap();

    let result = repo.apply_item_edit(
        &BookingId::from("b1"),
        &ItemId::from("i1"),
        ItemEdit::ProductPrice(dec!(-1)),
        &staff(),
        at(9),
    );

    assert!(matches!(result, Err(SettlementError::NegativeAmount { .. })));
    assert_eq!(repo.store().get(BOOKINGS_COLLECTION, "b1").unwrap(), before);
}

#[test]
fn concurrent_edit_is_not_overwritten() {
    let inner = Arc::new(InMemoryStore::new());
    inner
        .insert_typed(BOOKINGS_COLLECTION, "b1", &make_two_item_booking())
        .unwrap();

    let other_editor: BeforeWrite = Box::new(|store: &Arc<InMemoryStore>| {
        BookingRepository::new(Arc::clone(store))
            .apply_item_edit(
                &BookingId::from("b1"),
                &ItemId::from("i2"),
                ItemEdit::ProductPrice(dec!(99)),
                &Actor::new("staff-2", "Sreyneang"),
                at(9),
            )
            .unwrap();
    });
    let repo = BookingRepository::new(InterleavingStore::new(Arc::clone(&inner), other_editor));

    let result = repo.apply_item_edit(
        &BookingId::from("b1"),
        &ItemId::from("i1"),
        ItemEdit::ProductPrice(dec!(25000)),
        &staff(),
        at(9),
    );
    assert!(matches!(
        result,
        Err(SettlementError::Store(StoreError::Conflict { .. }))
    ));

    let stored = BookingRepository::new(inner).load(&BookingId::from("b1")).unwrap();
    let i1 = stored.item(&ItemId::from("i1")).unwrap();
    assert_eq!(i1.product_price(), dec!(20000));
    assert!(i1.modifications().is_empty());
    let i2 = stored.item(&ItemId::from("i2")).unwrap();
    assert_eq!(i2.product_price(), dec!(99));
    assert_eq!(i2.modifications().len(), 1);
}

#[test]
fn sequential_edits_each_see_the_latest_revision() {
    let repo = make_repository(&[make_two_item_booking()]);
    let booking_id = BookingId::from("b1");
    for (item, price) in [("i1", dec!(25000)), ("i2", dec!(30))] {
        repo.apply_item_edit(
            &booking_id,
            &ItemId::from(item),
            ItemEdit::ProductPrice(price),
            &staff(),
            at(9),
        )
        .unwrap();
    }
    let stored = repo.load(&booking_id).unwrap();
    assert_eq!(stored.items()[0].modifications().len(), 1);
    assert_eq!(stored.items()[1].modifications().len(), 1);
}

#[test]
fn negative_amounts_in_stored_documents_are_rejected() {
    let store = InMemoryStore::new();
    let mut document = serde_json::to_value(make_booking("b1")).unwrap();
    document["items"][0]["productPrice"] = json!("-40000");
    store.insert(BOOKINGS_COLLECTION, "b1", document);
    let repo = BookingRepository::new(store);

    let expected = SettlementError::NegativeAmount {
        field: "product price",
    };
    assert_eq!(repo.load(&BookingId::from("b1")), Err(expected.clone()));
    assert_eq!(repo.list(), Err(expected));
}

#[test]
fn repository_cancellation_is_persisted() {
    let repo = make_repository(&[make_booking("b1")]);
    let booking_id = BookingId::from("b1");

    repo.cancel_by_customer(&booking_id, &Actor::new("cust-1", "Dara"), at(10))
        .unwrap();

    let stored = repo.load(&booking_id).unwrap();
    assert_eq!(stored.status(), ParcelStatus::Cancelled);
    assert_eq!(stored.items()[0].status(), ParcelStatus::Cancelled);
    assert_eq!(stored.status_history().len(), 1);

    let again = repo.cancel_by_customer(&booking_id, &Actor::new("cust-1", "Dara"), at(11));
    assert_eq!(again, Err(SettlementError::NotPending));
}

#[test]
fn status_update_appends_history_in_store() {
    let repo = make_repository(&[make_booking("b1")]);
    let booking_id = BookingId::from("b1");

    repo.update_status(&booking_id, ParcelStatus::Confirmed, &staff(), None, at(9))
        .unwrap();
    repo.update_status(&booking_id, ParcelStatus::InTransit, &staff(), None, at(12))
        .unwrap();

    let doc = repo.store().get(BOOKINGS_COLLECTION, "b1").unwrap().unwrap();
    assert_eq!(doc["status"], "IN_TRANSIT");
    assert_eq!(doc["statusHistory"][0]["statusId"], "CONFIRMED");
    assert_eq!(doc["statusHistory"][1]["statusId"], "IN_TRANSIT");
}

#[test]
fn loading_unknown_booking_is_not_found() {
    let repo = make_repository(&[]);
    let result = repo.load(&BookingId::from("nope"));
    assert!(matches!(
        result,
        Err(SettlementError::Store(StoreError::NotFound { .. }))
    ));
}

#[test]
fn racing_defaults_in_store_resolve_to_newest() {
    let store = InMemoryStore::new();
    store.insert(COMMISSION_RULES_COLLECTION, "old", commission_rule("old", true, 8));
    store.insert(COMMISSION_RULES_COLLECTION, "new", commission_rule("new", true, 9));
    let repo = BookingRepository::new(store);

    let book = repo.commission_rules().unwrap();
    assert_eq!(
        book.default_for(CommissionFor::Delivery).map(|r| r.id.clone()),
        Some(RuleId::new("new"))
    );
    assert!(!book.get(&RuleId::new("old")).unwrap().is_default);
}

#[test]
fn referral_rules_decode_from_store() {
    let store = InMemoryStore::new();
    store.insert(
        REFERRAL_RULES_COLLECTION,
        "r1",
        json!({
            "id": "r1",
            "name": "Welcome",
            "isActive": true,
            "trigger": "FIRST_ORDER",
            "referrerAmount": "2",
            "referrerCurrency": "USD",
            "refereeAmount": "4100",
            "refereeCurrency": "KHR",
        }),
    );
    let rules = BookingRepository::new(store).referral_rules().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].name, "Welcome");
}

#[test]
fn booking_subscription_receives_decoded_changes() {
    let repo = make_repository(&[make_booking("b1")]);
    let statuses = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&statuses);
    let _subscription = repo.subscribe_bookings(move |booking| sink.lock().push(booking.status()));

    repo.update_status(&BookingId::from("b1"), ParcelStatus::Confirmed, &staff(), None, at(9))
        .unwrap();
    // Malformed documents are skipped rather than delivered.
    repo.store().insert(BOOKINGS_COLLECTION, "broken", json!({"id": 5}));

    assert_eq!(*statuses.lock(), vec![ParcelStatus::Confirmed]);
}
