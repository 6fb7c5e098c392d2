//! Guru Planner - The trip-planning conversation engine.
//!
//! A sender walks through a short form (service menu, then one prompt per
//! field). Once every field is in, the answers are validated and turned
//! into a language-model query whose answer becomes the final reply.
//!
//! ```text
//! "help" → menu → "1" → location → cuisine → budget
//!                                               ↓
//!            reply ← TripAdvisor ← build_query ← validate
//! ```
//!
//! ## Modules
//!
//! - [`service`]: the three services, their field order and prompts
//! - [`session`]: the per-sender state machine
//! - [`store`]: the sender-keyed session store with idle eviction
//! - [`validation`]: pure validators producing typed trip data
//! - [`query`]: system templates and recap sentences
//! - [`advisor`]: the bounded language-model call
//! - [`provider`]: the chat-completion provider abstraction

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod advisor;
pub mod provider;
pub mod query;
pub mod service;
pub mod session;
pub mod store;
pub mod validation;

pub use advisor::TripAdvisor;
pub use provider::{
    ChatRequest, ChatResponse, Message, OpenAIProvider, Provider, ProviderError, TokenUsage,
};
pub use query::{build_query, TripQuery};
pub use service::{Field, ServiceKind, INVALID_CHOICE, MENU};
pub use session::{
    CollectedFields, ConversationSession, ConversationState, Transition, FALLBACK_REPLY, START_HINT,
};
pub use store::{SessionGuard, SessionStore};
pub use validation::{
    validate, FieldError, FieldLookup, MysteryGuideData, RestaurantData, ServiceData,
    TouristData, ValidationErrors,
};
