//! Guru Common - Shared configuration, errors, and logging for Travel Guru.
//!
//! This crate provides:
//! - Configuration types and loading (file + environment overrides)
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup and trace id helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    Config, ConversationConfig, LlmConfig, ObservabilityConfig, OutboundConfig, PollingConfig,
    ServerConfig, TwilioConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
