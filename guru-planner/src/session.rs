//! The per-sender conversation state machine.
//!
//! ```text
//! AwaitingStart ──"help"──▶ AwaitingServiceChoice ──"1|2|3"──▶ CollectingField(0)
//!       ▲                                                          │ one answer per field
//!       │                                                          ▼
//!       └──── answer sent ◀── Validating ◀──────────── CollectingField(n-1)
//!                                  │
//!                                  └── errors ──▶ CollectingField(first failed)
//! ```
//!
//! `Validating` only exists inside a single [`ConversationSession::handle_message`]
//! call. The session is back in `AwaitingStart` (or rewound for correction)
//! before the language model is awaited, so a dropped request never leaves a
//! session stuck mid-validation.

use crate::advisor::TripAdvisor;
use crate::query::build_query;
use crate::service::{Field, ServiceKind, INVALID_CHOICE, MENU};
use crate::validation::{self, FieldLookup, ValidationErrors};

/// Reply to text that does not start a conversation.
pub const START_HINT: &str = "Send \"help\" to start planning your trip.";

/// Reply when nothing sensible can be said.
pub const FALLBACK_REPLY: &str = "I'm sorry, I didn't understand that.";

/// Where a conversation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Waiting for the trigger keyword.
    AwaitingStart,
    /// Menu sent, waiting for `1`, `2` or `3`.
    AwaitingServiceChoice,
    /// Waiting for the answer to `service.fields()[index]`.
    CollectingField { service: ServiceKind, index: usize },
    /// Every field is in and is being checked.
    Validating { service: ServiceKind },
}

impl ConversationState {
    /// Service chosen in this state, if any.
    pub const fn service(&self) -> Option<ServiceKind> {
        match self {
            Self::CollectingField { service, .. } | Self::Validating { service } => Some(*service),
            Self::AwaitingStart | Self::AwaitingServiceChoice => None,
        }
    }
}

/// Raw answers in collection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedFields(Vec<(Field, String)>);

impl CollectedFields {
    /// Field keys in the order they were collected.
    pub fn keys(&self) -> Vec<&'static str> {
        self.0.iter().map(|(f, _)| f.key()).collect()
    }

    /// Number of collected fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(field, raw value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.0.iter().map(|(f, v)| (*f, v.as_str()))
    }

    fn push(&mut self, field: Field, value: String) {
        self.0.push((field, value));
    }

    fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

impl FieldLookup for CollectedFields {
    fn get_field(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(f, _)| f.key() == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of feeding one message to the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Reply immediately with this text.
    Reply(String),
    /// All fields are in; validate them for this service.
    Validate(ServiceKind),
}

/// One sender's conversation.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    state: ConversationState,
    fields: CollectedFields,
    trigger_keyword: String,
}

impl ConversationSession {
    /// Create a session that opens on `trigger_keyword`.
    pub fn new(trigger_keyword: impl Into<String>) -> Self {
        Self {
            state: ConversationState::AwaitingStart,
            fields: CollectedFields::default(),
            trigger_keyword: trigger_keyword.into().to_lowercase(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Fields collected so far.
    pub fn fields(&self) -> &CollectedFields {
        &self.fields
    }

    /// Drop everything and wait for the trigger keyword again.
    pub fn reset(&mut self) {
        self.state = ConversationState::AwaitingStart;
        self.fields.clear();
    }

    /// Handle one inbound message and produce the reply.
    pub async fn handle_message(&mut self, input: &str, advisor: &TripAdvisor) -> String {
        let reply = match self.advance(input) {
            Transition::Reply(text) => text,
            Transition::Validate(service) => self.finish(service, advisor).await,
        };

        if reply.trim().is_empty() {
            FALLBACK_REPLY.to_string()
        } else {
            reply
        }
    }

    /// Apply one message to the form without touching the language model.
    pub fn advance(&mut self, input: &str) -> Transition {
        match self.state {
            ConversationState::AwaitingStart => {
                if input.to_lowercase().contains(&self.trigger_keyword) {
                    self.state = ConversationState::AwaitingServiceChoice;
                    Transition::Reply(MENU.to_string())
                } else {
                    Transition::Reply(START_HINT.to_string())
                }
            }
            ConversationState::AwaitingServiceChoice => match ServiceKind::from_choice(input) {
                Some(service) => {
                    self.fields.clear();
                    self.state = ConversationState::CollectingField { service, index: 0 };
                    Transition::Reply(service.initial_prompt().to_string())
                }
                None => Transition::Reply(INVALID_CHOICE.to_string()),
            },
            ConversationState::CollectingField { service, index } => {
                let order = service.fields();
                let Some(&field) = order.get(index) else {
                    tracing::warn!(?service, index, "Field index out of range, resetting session");
                    self.reset();
                    return Transition::Reply(FALLBACK_REPLY.to_string());
                };

                self.fields.push(field, input.to_string());

                match service.prompt_at(index + 1) {
                    Some(prompt) => {
                        self.state = ConversationState::CollectingField {
                            service,
                            index: index + 1,
                        };
                        Transition::Reply(prompt.to_string())
                    }
                    None => {
                        self.state = ConversationState::Validating { service };
                        Transition::Validate(service)
                    }
                }
            }
            ConversationState::Validating { service } => {
                tracing::warn!(?service, "Message arrived mid-validation, resetting session");
                self.reset();
                Transition::Reply(FALLBACK_REPLY.to_string())
            }
        }
    }

    /// Validate, then either rewind for correction or ask the model.
    async fn finish(&mut self, service: ServiceKind, advisor: &TripAdvisor) -> String {
        match validation::validate(service, &self.fields) {
            Err(errors) => {
                let mut reply = format!("Error: {}", errors.messages().join(", "));
                // Rewound to an earlier field: say which one comes next.
                if let Some(index) = self.rewind_to_first_failure(service, &errors) {
                    if index + 1 < service.fields().len() {
                        if let Some(prompt) = service.prompt_at(index) {
                            reply.push('\n');
                            reply.push_str(prompt);
                        }
                    }
                }
                reply
            }
            Ok(data) => {
                let query = build_query(&data, &self.fields);
                tracing::info!(?service, recap = %query.user, "Trip form complete");
                self.reset();
                advisor.ask(&query).await
            }
        }
    }

    /// Keep the answers before the first failed field and ask from there.
    /// Returns the index of the field the next message answers.
    fn rewind_to_first_failure(
        &mut self,
        service: ServiceKind,
        errors: &ValidationErrors,
    ) -> Option<usize> {
        let order = service.fields();
        let first_failed = errors
            .fields()
            .filter_map(|key| order.iter().position(|f| f.key() == key))
            .min();

        match first_failed {
            Some(index) => {
                self.fields.truncate(index);
                self.state = ConversationState::CollectingField { service, index };
                Some(index)
            }
            None => {
                self.reset();
                None
            }
        }
    }
}
