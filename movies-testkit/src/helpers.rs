//! Event record builders.

use movies_domain::{EventRecord, BAGGAGE_HEADER};

/// Build a `rentals` record with a structured payload.
///
/// `movie_id` becomes the record key when given.
pub fn rental_record(
    partition: i32,
    offset: i64,
    movie_id: Option<&str>,
    email: &str,
    price: f64,
) -> EventRecord {
    let value = serde_json::json!({ "email": email, "price": price }).to_string();
    let record = EventRecord::new("rentals", partition, offset, value);

    match movie_id {
        Some(id) => record.with_key(id),
        None => record,
    }
}

/// Build a `returns` record keyed by catalog id, carrying the email as value.
pub fn return_record(partition: i32, offset: i64, catalog_id: &str, email: &str) -> EventRecord {
    EventRecord::new("returns", partition, offset, email).with_key(catalog_id)
}

/// Attach a `baggage` header.
pub fn with_baggage(record: EventRecord, baggage: &str) -> EventRecord {
    record.with_header(BAGGAGE_HEADER, baggage)
}
