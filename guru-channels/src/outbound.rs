//! Outbound chunking and paced delivery.
//!
//! Long answers are cut into provider-sized chunks and sent one by one with
//! a pause before each send, so a multi-part reply does not trip the
//! provider's rate limits.

use crate::message::OutgoingMessage;
use crate::traits::{Channel, ChannelResult};
use guru_common::config::OutboundConfig;
use std::future::Future;
use std::time::Duration;

/// Split `text` into chunks of at most `max_len` characters.
///
/// Each cut happens at the last line break before the limit, or exactly at
/// the limit when there is none. The remainder is left-trimmed before the
/// next cut. Text within the limit comes back as a single chunk.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.chars().count() > max_len {
        // Byte offset of the first character past the limit.
        let limit = remaining
            .char_indices()
            .nth(max_len)
            .map_or(remaining.len(), |(i, _)| i);

        let cut = match remaining[..limit].rfind('\n') {
            Some(0) | None => limit,
            Some(pos) => pos,
        };

        chunks.push(remaining[..cut].to_string());
        remaining = remaining[cut..].trim_start();
    }

    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }

    chunks
}

/// Send `chunks` in order, sleeping `delay` before each send.
///
/// Stops at the first failed send. Returns the number of chunks delivered.
pub async fn deliver_paced<F, Fut>(
    chunks: Vec<String>,
    delay: Duration,
    mut send: F,
) -> ChannelResult<usize>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ChannelResult<String>>,
{
    let total = chunks.len();
    let mut delivered = 0;

    for chunk in chunks {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let id = send(chunk).await?;
        delivered += 1;
        tracing::debug!(message_id = %id, part = delivered, total, "Chunk delivered");
    }

    Ok(delivered)
}

/// Chunk `text` and deliver it to `recipient` over `channel`.
pub async fn deliver_chunked(
    channel: &dyn Channel,
    recipient: &str,
    text: &str,
    reply_to: Option<&str>,
    config: &OutboundConfig,
) -> ChannelResult<usize> {
    let chunks = split_message(text, config.max_message_len);
    let delay = Duration::from_millis(config.chunk_delay_ms);

    deliver_paced(chunks, delay, |chunk| {
        let mut message = OutgoingMessage::text(recipient, chunk);
        if let Some(id) = reply_to {
            message = message.in_reply_to(id);
        }
        channel.send(message)
    })
    .await
}
