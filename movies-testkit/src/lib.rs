//! Test helpers for relay tests.
//!
//! Provides event record builders and a scripted fake of the rentals
//! registry HTTP API.

mod helpers;
mod registry;

pub use helpers::{rental_record, return_record, with_baggage};
pub use registry::{FakeRegistry, ReceivedRequest};
