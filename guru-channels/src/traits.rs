//! Channel trait for outbound delivery.

use crate::message::OutgoingMessage;
use crate::twilio::TwilioError;
use async_trait::async_trait;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error(transparent)]
    Provider(#[from] TwilioError),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Channel not ready: {0}")]
    NotReady(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Channel adapter trait.
///
/// Implement this to deliver replies through another provider, or to
/// capture them in tests.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name.
    fn name(&self) -> &'static str;

    /// Send a message. Returns the provider's message ID.
    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String>;

    /// Check if the channel can deliver messages.
    async fn health_check(&self) -> ChannelResult<()>;
}
