//! Configuration validation for Travel Guru services.
//!
//! Each config section checks its own fields; [`Config::validate`] runs
//! them all and reports every problem at once.

use thiserror::Error;

use crate::config::{
    Config, ConversationConfig, LlmConfig, ObservabilityConfig, OutboundConfig, PollingConfig,
    TwilioConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl From<ValidationError> for crate::Error {
    fn from(err: ValidationError) -> Self {
        crate::Error::Config(err.to_string())
    }
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.twilio.validate() {
            errors.push(e);
        }
        if let Err(e) = self.llm.validate() {
            errors.push(e);
        }
        if let Err(e) = self.conversation.validate() {
            errors.push(e);
        }
        if let Err(e) = self.outbound.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }
        if let Err(e) = self.validate_polling() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Polling needs the conversation service and both addresses.
    fn validate_polling(&self) -> ValidationResult<()> {
        if !self.polling.enabled {
            return Ok(());
        }
        self.polling.validate()?;

        if self.twilio.chat_service_sid.is_none() {
            return Err(ValidationError::MissingField {
                field: "twilio.chat_service_sid".into(),
            });
        }
        if self.twilio.user_address.is_none() {
            return Err(ValidationError::MissingField {
                field: "twilio.user_address".into(),
            });
        }
        Ok(())
    }

    /// Load, apply environment overrides, and validate.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(crate::Error::from)?;
        Ok(config)
    }
}

fn required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: field.into(),
        });
    }
    Ok(())
}

fn nonzero(field: &str, value: u64) -> ValidationResult<()> {
    if value == 0 {
        return Err(ValidationError::InvalidValue {
            field: field.into(),
            reason: "must be greater than 0".into(),
        });
    }
    Ok(())
}

fn one_of(field: &str, value: &str, allowed: &[&str]) -> ValidationResult<()> {
    if !allowed.contains(&value.to_lowercase().as_str()) {
        return Err(ValidationError::InvalidValue {
            field: field.into(),
            reason: format!("must be one of: {}", allowed.join(", ")),
        });
    }
    Ok(())
}

impl Validate for TwilioConfig {
    fn validate(&self) -> ValidationResult<()> {
        nonzero("twilio.timeout_secs", self.timeout_secs)
    }
}

impl Validate for LlmConfig {
    fn validate(&self) -> ValidationResult<()> {
        required("llm.model", &self.model)?;
        nonzero("llm.max_tokens", self.max_tokens.max(0) as u64)?;
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::InvalidValue {
                field: "llm.temperature".into(),
                reason: "must be between 0.0 and 2.0".into(),
            });
        }
        nonzero("llm.timeout_secs", self.timeout_secs)
    }
}

impl Validate for ConversationConfig {
    fn validate(&self) -> ValidationResult<()> {
        required("conversation.trigger_keyword", &self.trigger_keyword)?;
        nonzero("conversation.session_ttl_secs", self.session_ttl_secs)?;
        nonzero("conversation.cleanup_interval_secs", self.cleanup_interval_secs)
    }
}

impl Validate for OutboundConfig {
    fn validate(&self) -> ValidationResult<()> {
        nonzero("outbound.max_message_len", self.max_message_len as u64)?;
        required("outbound.ack_text", &self.ack_text)
    }
}

impl Validate for PollingConfig {
    fn validate(&self) -> ValidationResult<()> {
        nonzero("polling.interval_ms", self.interval_ms)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        one_of(
            "observability.log_level",
            &self.log_level,
            &["trace", "debug", "info", "warn", "error"],
        )?;
        one_of("observability.log_format", &self.log_format, &["json", "pretty"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_message_len_rejected() {
        let mut config = Config::default();
        config.outbound.max_message_len = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "outbound.max_message_len"));
    }

    #[test]
    fn test_zero_twilio_timeout_rejected() {
        let mut config = Config::default();
        config.twilio.timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "twilio.timeout_secs"));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.llm.max_tokens = 0;
        config.observability.log_level = "loud".into();
        let err = config.validate().unwrap_err();
        match err {
            ValidationError::Multiple(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_polling_requires_conversation_service() {
        let mut config = Config::default();
        config.polling.enabled = true;
        config.twilio.user_address = Some("whatsapp:+1555".into());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { ref field } if field == "twilio.chat_service_sid"));

        config.twilio.chat_service_sid = Some("IS123".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_error_converts_to_config_error() {
        let err: crate::Error = ValidationError::MissingField {
            field: "llm.model".into(),
        }
        .into();
        assert!(matches!(err, crate::Error::Config(_)));
        assert_eq!(err.status_code(), 500);
    }
}
