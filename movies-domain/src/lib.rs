//! Movies Relay Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains the event record model, command decoding, diversion rules
//! and delivery outcomes.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod baggage;
pub mod command;
pub mod error;
pub mod outcome;
pub mod record;

// Re-export commonly used types
pub use baggage::{Baggage, DivertFilter, DiversionTag, BAGGAGE_HEADER, DIVERT_KEY};
pub use command::{Command, PayloadShape, RentalCommand, ReturnCommand, UNKNOWN_EMAIL};
pub use error::DomainError;
pub use outcome::{DeliveryOutcome, DeliveryReceipt};
pub use record::{EventRecord, PartitionId, Topic};
