//! The trip-planning services and their fixed field sequences.

use serde::{Deserialize, Serialize};

/// Menu sent when a conversation starts.
pub const MENU: &str = "Hey! I can help with your trip. Choose a service:\n\
                        1. Restaurant Finder\n\
                        2. Tourist Attractions\n\
                        3. Mystery Planning Guide\n\
                        Enter your choice (1/2/3):";

/// Reply to anything but `1`, `2` or `3` while the menu is open.
pub const INVALID_CHOICE: &str = "Invalid choice. Please enter 1, 2, or 3.";

/// One of the supported trip-planning use cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    RestaurantFinder,
    TouristAttractions,
    MysteryGuide,
}

impl ServiceKind {
    /// Parse a menu choice. Only the exact numerals are accepted.
    pub fn from_choice(choice: &str) -> Option<Self> {
        match choice {
            "1" => Some(Self::RestaurantFinder),
            "2" => Some(Self::TouristAttractions),
            "3" => Some(Self::MysteryGuide),
            _ => None,
        }
    }

    /// Human-readable service name as shown in the menu.
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::RestaurantFinder => "Restaurant Finder",
            Self::TouristAttractions => "Tourist Attractions",
            Self::MysteryGuide => "Mystery Planning Guide",
        }
    }

    /// Fields collected for this service, in prompt order.
    pub const fn fields(&self) -> &'static [Field] {
        match self {
            Self::RestaurantFinder => &[Field::Location, Field::Cuisine, Field::Budget],
            Self::TouristAttractions => &[Field::Location, Field::Preferences, Field::Budget],
            Self::MysteryGuide => &[Field::City, Field::People, Field::Budget, Field::Days],
        }
    }

    /// Prompt for the first field, which differs per service.
    pub const fn initial_prompt(&self) -> &'static str {
        match self {
            Self::RestaurantFinder => "Enter your location:",
            Self::TouristAttractions => "Enter the location for tourist attractions:",
            Self::MysteryGuide => "Enter the city you want to travel to:",
        }
    }

    /// Prompt for the field at `index`, or `None` past the end.
    pub fn prompt_at(&self, index: usize) -> Option<&'static str> {
        match index {
            0 => Some(self.initial_prompt()),
            i => self.fields().get(i).map(Field::prompt),
        }
    }
}

/// A collected form field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Location,
    Cuisine,
    Budget,
    Preferences,
    City,
    People,
    Days,
}

impl Field {
    /// Key under which the value is stored and validated.
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Cuisine => "cuisine",
            Self::Budget => "budget",
            Self::Preferences => "preferences",
            Self::City => "city",
            Self::People => "people",
            Self::Days => "days",
        }
    }

    /// Prompt asked when this field is not the first one.
    pub const fn prompt(&self) -> &'static str {
        match self {
            Self::Location => "Enter your location:",
            Self::Cuisine => "Preferred cuisine?",
            Self::Budget => "Enter your budget:",
            Self::Preferences => "Do you prefer monuments, parks, or viewpoints?",
            Self::City => "Enter the city you want to travel to:",
            Self::People => "How many people are traveling?",
            Self::Days => "How many days will you travel?",
        }
    }
}
