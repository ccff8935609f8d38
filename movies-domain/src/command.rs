//! Envelope decoding: event records into typed commands.
//!
//! Rental values come in two shapes. Current producers emit
//! `{"email": "...", "price": 9.99}`; legacy producers emitted the bare
//! price (`"9.99"`). Decoding never fails: a value that is neither is kept
//! with a zero price and flagged as [`PayloadShape::Unreadable`].

use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::error::DomainError;
use crate::record::{EventRecord, Topic};

/// Placeholder email for rentals decoded from the legacy format.
pub const UNKNOWN_EMAIL: &str = "unknown@example.com";

// =============================================================================
// Payload Shape
// =============================================================================

/// Which decoding path produced a rental command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// Structured JSON payload
    Structured,
    /// Bare numeric price from a legacy producer
    LegacyPrice,
    /// Neither shape; price defaulted to zero
    Unreadable,
}

impl PayloadShape {
    /// Whether the payload needed the fallback path.
    pub fn is_fallback(&self) -> bool {
        !matches!(self, PayloadShape::Structured)
    }
}

// =============================================================================
// Rental Command
// =============================================================================

/// Structured rental payload.
#[derive(Debug, Deserialize)]
struct RentalPayload {
    #[serde(default)]
    email: Option<String>,
    price: Decimal,
    #[serde(default)]
    catalog_id: Option<String>,
}

/// A movie was rented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RentalCommand {
    /// Catalog id of the rented movie
    pub movie_id: String,
    /// Renting user, when known
    pub email: Option<String>,
    /// Rental price
    pub price: Decimal,
    /// Decoding path taken
    pub shape: PayloadShape,
}

impl RentalCommand {
    /// Decode a rental from the record key and raw value.
    ///
    /// The key is the movie id. Unkeyed structured payloads may carry the
    /// id as `catalog_id`.
    pub fn decode(key: Option<String>, value: &[u8]) -> Self {
        match serde_json::from_slice::<RentalPayload>(value) {
            Ok(payload) => Self {
                movie_id: key.or(payload.catalog_id).unwrap_or_default(),
                email: payload.email,
                price: payload.price,
                shape: PayloadShape::Structured,
            },
            Err(_) => {
                let (price, shape) = parse_legacy_price(value);
                Self {
                    movie_id: key.unwrap_or_default(),
                    email: Some(UNKNOWN_EMAIL.to_string()),
                    price,
                    shape,
                }
            }
        }
    }

    /// Price as sent to the registry: rounded to six decimals.
    pub fn wire_price(&self) -> String {
        format!("{:.6}", self.price.round_dp(6))
    }
}

fn parse_legacy_price(value: &[u8]) -> (Decimal, PayloadShape) {
    let text = String::from_utf8_lossy(value);
    let text = text.trim();

    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map(|price| (price, PayloadShape::LegacyPrice))
        .unwrap_or((Decimal::ZERO, PayloadShape::Unreadable))
}

// =============================================================================
// Return Command
// =============================================================================

/// A rented movie was returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnCommand {
    /// Catalog id of the returned movie
    pub catalog_id: String,
    /// Returning user, in schema variants that track it
    pub email: Option<String>,
}

impl ReturnCommand {
    /// Decode a return.
    ///
    /// Keyed records carry the catalog id as key and the email as value;
    /// unkeyed records carry the catalog id as value.
    pub fn decode(key: Option<String>, value: Option<String>) -> Self {
        match key {
            Some(catalog_id) => Self {
                catalog_id,
                email: value,
            },
            None => Self {
                catalog_id: value.unwrap_or_default(),
                email: None,
            },
        }
    }
}

// =============================================================================
// Command
// =============================================================================

/// Closed set of commands the relay delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// From the `rentals` topic
    Rental(RentalCommand),
    /// From the `returns` topic
    Return(ReturnCommand),
}

impl Command {
    /// Decode a record into a command, dispatching on its topic.
    ///
    /// # Errors
    /// Returns `DomainError::UnknownTopic` for records from other topics.
    pub fn decode(record: &EventRecord) -> Result<Self, DomainError> {
        let command = match record.topic()? {
            Topic::Rentals => Command::Rental(RentalCommand::decode(
                record.key_str(),
                record.value.as_deref().unwrap_or_default(),
            )),
            Topic::Returns => {
                Command::Return(ReturnCommand::decode(record.key_str(), record.value_str()))
            }
        };
        Ok(command)
    }

    /// Topic the command was decoded from.
    pub fn topic(&self) -> Topic {
        match self {
            Command::Rental(_) => Topic::Rentals,
            Command::Return(_) => Topic::Returns,
        }
    }

    /// Catalog id the command addresses.
    pub fn catalog_id(&self) -> &str {
        match self {
            Command::Rental(rental) => &rental.movie_id,
            Command::Return(ret) => &ret.catalog_id,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
