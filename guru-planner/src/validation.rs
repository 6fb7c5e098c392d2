//! Input validation for collected trip fields.
//!
//! Each validator is a pure function over a field lookup. Every rule is
//! checked and every violation reported; nothing short-circuits. On success
//! numeric fields come back parsed and optional fields that were never
//! supplied come back as `None`.

use crate::service::ServiceKind;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Read access to raw field values by key.
pub trait FieldLookup {
    /// Raw value stored under `key`, if any.
    fn get_field(&self, key: &str) -> Option<&str>;
}

impl FieldLookup for HashMap<String, String> {
    fn get_field(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

impl FieldLookup for HashMap<&str, &str> {
    fn get_field(&self, key: &str) -> Option<&str> {
        self.get(key).copied()
    }
}

/// A rule violation tied to the field that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// All violations found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    /// User-facing messages in rule order.
    pub fn messages(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.message.as_str()).collect()
    }

    /// Keys of the fields that failed.
    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().map(|e| e.field)
    }

    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    fn into_result<T>(self, ok: impl FnOnce() -> T) -> Result<T, ValidationErrors> {
        if self.0.is_empty() {
            Ok(ok())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.messages().join(", "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Validated restaurant-finder input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestaurantData {
    pub location: String,
    pub budget: Option<u64>,
    pub theme: Option<String>,
    pub hotel_address: Option<String>,
}

/// Validated tourist-attractions input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TouristData {
    pub location: String,
    pub hotel_address: Option<String>,
    pub num_people: Option<u64>,
    pub budget: Option<u64>,
    pub max_ticket_price: Option<u64>,
}

/// Validated mystery-guide input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MysteryGuideData {
    pub city: String,
    pub people: Option<u64>,
    pub budget: Option<u64>,
    pub days: Option<u64>,
    pub public_transport: Option<String>,
    pub preferences: Option<String>,
}

/// Validated data for whichever service was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum ServiceData {
    Restaurant(RestaurantData),
    Tourist(TouristData),
    MysteryGuide(MysteryGuideData),
}

/// Run the validator that belongs to `service`.
pub fn validate<F: FieldLookup + ?Sized>(
    service: ServiceKind,
    fields: &F,
) -> Result<ServiceData, ValidationErrors> {
    match service {
        ServiceKind::RestaurantFinder => {
            validate_restaurant_finder(fields).map(ServiceData::Restaurant)
        }
        ServiceKind::TouristAttractions => {
            validate_tourist_attractions(fields).map(ServiceData::Tourist)
        }
        ServiceKind::MysteryGuide => validate_mystery_guide(fields).map(ServiceData::MysteryGuide),
    }
}

/// Validate restaurant-finder input.
pub fn validate_restaurant_finder<F: FieldLookup + ?Sized>(
    fields: &F,
) -> Result<RestaurantData, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let location = required_text(fields, "location", "Location is required.", &mut errors);
    let budget = positive_number(fields, &[("budget", "Budget")], &mut errors);
    let hotel_address = hotel_address(fields, &mut errors);
    let theme = optional_text(fields, "theme");

    errors.into_result(|| RestaurantData {
        location,
        budget,
        theme,
        hotel_address,
    })
}

/// Validate tourist-attractions input.
///
/// `budget` falls back to `total_budget`, and `number_of_people` is
/// accepted as an alias of `people`.
pub fn validate_tourist_attractions<F: FieldLookup + ?Sized>(
    fields: &F,
) -> Result<TouristData, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let location = required_text(fields, "location", "Location is required.", &mut errors);
    let hotel_address = hotel_address(fields, &mut errors);
    let num_people = positive_number(
        fields,
        &[("number_of_people", "Number of people"), ("people", "Number of people")],
        &mut errors,
    );
    let budget = positive_number(
        fields,
        &[("budget", "Budget"), ("total_budget", "Total budget")],
        &mut errors,
    );
    let max_ticket_price =
        positive_number(fields, &[("max_ticket_price", "Max ticket price")], &mut errors);

    errors.into_result(|| TouristData {
        location,
        hotel_address,
        num_people,
        budget,
        max_ticket_price,
    })
}

/// Validate mystery-guide input.
///
/// `days_spent` is accepted as an alias of `days`, and `number_of_people`
/// as an alias of `people`.
pub fn validate_mystery_guide<F: FieldLookup + ?Sized>(
    fields: &F,
) -> Result<MysteryGuideData, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let city = required_text(fields, "city", "City is required.", &mut errors);
    let people = positive_number(
        fields,
        &[("people", "Number of people"), ("number_of_people", "Number of people")],
        &mut errors,
    );
    let budget = positive_number(fields, &[("budget", "Budget")], &mut errors);
    let days = positive_number(
        fields,
        &[("days", "Days"), ("days_spent", "Days spent")],
        &mut errors,
    );

    let public_transport = optional_text(fields, "public_transport").map(|v| v.to_lowercase());
    if let Some(ref answer) = public_transport {
        if answer != "yes" && answer != "no" {
            errors.push(
                "public_transport",
                "Public transport should be 'yes' or 'no'.",
            );
        }
    }
    let preferences = optional_text(fields, "preferences");

    errors.into_result(|| MysteryGuideData {
        city,
        people,
        budget,
        days,
        public_transport,
        preferences,
    })
}

// ============================================================================
// Rules
// ============================================================================

/// Trimmed value, with empty treated as absent.
fn optional_text<F: FieldLookup + ?Sized>(fields: &F, key: &str) -> Option<String> {
    fields
        .get_field(key)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required_text<F: FieldLookup + ?Sized>(
    fields: &F,
    key: &'static str,
    message: &str,
    errors: &mut ValidationErrors,
) -> String {
    match optional_text(fields, key) {
        Some(value) => value,
        None => {
            errors.push(key, message);
            String::new()
        }
    }
}

/// First present key among `aliases` must hold a strictly positive integer.
fn positive_number<F: FieldLookup + ?Sized>(
    fields: &F,
    aliases: &[(&'static str, &str)],
    errors: &mut ValidationErrors,
) -> Option<u64> {
    let (key, label, raw) = aliases
        .iter()
        .find_map(|&(key, label)| optional_text(fields, key).map(|raw| (key, label, raw)))?;

    match parse_positive(&raw) {
        Ok(n) => Some(n),
        Err(NumberError::NotPositive) => {
            errors.push(key, format!("{label} must be a positive number."));
            None
        }
        Err(NumberError::TooLarge) => {
            errors.push(key, format!("{label} is too large."));
            None
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum NumberError {
    NotPositive,
    TooLarge,
}

/// Digits only, no sign, and greater than zero.
fn parse_positive(raw: &str) -> Result<u64, NumberError> {
    if !raw.bytes().any(|b| b != b'0') || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NumberError::NotPositive);
    }
    // Non-zero digits can only fail on overflow.
    raw.parse::<u64>().map_err(|_| NumberError::TooLarge)
}

fn hotel_address<F: FieldLookup + ?Sized>(
    fields: &F,
    errors: &mut ValidationErrors,
) -> Option<String> {
    let address = optional_text(fields, "hotel_address")?;

    if address.chars().count() < 5 {
        errors.push(
            "hotel_address",
            "Hotel address must be at least 5 characters long.",
        );
    } else if !address
        .chars()
        .all(|c| c.is_alphanumeric() || c.is_whitespace() || c == ',' || c == '.')
    {
        errors.push(
            "hotel_address",
            "Hotel address may only contain letters, digits, spaces, commas, and periods.",
        );
    }

    Some(address)
}
