//! Language-model query construction.
//!
//! A query is a system instruction picked from one of three templates plus a
//! one-sentence recap of what the user asked for. Values are substituted
//! with plain `{placeholder}` interpolation.

use crate::validation::{FieldLookup, ServiceData};

const RESTAURANT_TEMPLATE: &str = "You are a local dining expert. Recommend up to five \
restaurants in {location} serving {cuisine} food that fit a budget of {budget}. For each \
one give the name, the neighbourhood, a price hint, and a sentence on why it fits. Plain \
text only, suitable for a WhatsApp message.";

const TOURIST_TEMPLATE: &str = "You are an experienced tour guide. Suggest tourist \
attractions in {location} for a traveler who prefers {preferences}, keeping entry costs \
within a budget of {budget}. Group them by area, include opening-hour caveats when they \
matter, and keep the answer in plain text suitable for a WhatsApp message.";

const ITINERARY_TEMPLATE: &str = "You are a trip planner. Write a day-by-day itinerary \
for {people} people spending {days} days in {city} with a total budget of {budget}. Cover \
lodging area, daily highlights, food, and local transport, and end with a rough cost \
breakdown. Plain text only, suitable for a WhatsApp message.";

/// Shown wherever an optional value was never given.
const UNSPECIFIED: &str = "unspecified";

/// A composed request for the language model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripQuery {
    /// System instruction with the user's values filled in
    pub system: String,
    /// Human-readable recap sent as the user turn
    pub user: String,
}

/// Build the query for validated data. Free-text fields the validators do
/// not carry (cuisine, preferences) are read from the raw fields.
pub fn build_query<F: FieldLookup + ?Sized>(data: &ServiceData, fields: &F) -> TripQuery {
    match data {
        ServiceData::Restaurant(d) => {
            let cuisine = text_or_unspecified(fields.get_field("cuisine").or(d.theme.as_deref()));
            let values = [
                ("location", d.location.clone()),
                ("cuisine", cuisine),
                ("budget", number_or_unspecified(d.budget)),
            ];
            TripQuery {
                system: render(RESTAURANT_TEMPLATE, &values),
                user: render(
                    "The user is in {location} and needs a {cuisine} restaurant with a budget of {budget}.",
                    &values,
                ),
            }
        }
        ServiceData::Tourist(d) => {
            let values = [
                ("location", d.location.clone()),
                ("preferences", text_or_unspecified(fields.get_field("preferences"))),
                ("budget", number_or_unspecified(d.budget)),
            ];
            TripQuery {
                system: render(TOURIST_TEMPLATE, &values),
                user: render(
                    "The user is in {location} and prefers {preferences} with a budget of {budget}.",
                    &values,
                ),
            }
        }
        ServiceData::MysteryGuide(d) => {
            let values = [
                ("city", d.city.clone()),
                ("people", number_or_unspecified(d.people)),
                ("days", number_or_unspecified(d.days)),
                ("budget", number_or_unspecified(d.budget)),
            ];
            TripQuery {
                system: render(ITINERARY_TEMPLATE, &values),
                user: render(
                    "The user wants to travel to {city} for {days} days with {people} people and a budget of {budget}.",
                    &values,
                ),
            }
        }
    }
}

/// Replace every `{key}` in `template` with its value.
fn render(template: &str, values: &[(&str, String)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |acc, (key, value)| {
            acc.replace(&format!("{{{key}}}"), value)
        })
}

fn text_or_unspecified(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNSPECIFIED)
        .to_string()
}

fn number_or_unspecified(value: Option<u64>) -> String {
    value.map_or_else(|| UNSPECIFIED.to_string(), |n| n.to_string())
}
