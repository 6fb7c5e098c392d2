//! Conversation polling mode.
//!
//! An alternative to the webhook for a single configured user: the poller
//! reads the latest messages of a Twilio conversation at a fixed interval,
//! answers the ones the user wrote since the last-seen message, and posts
//! the reply back into the conversation as `system`.

use crate::bridge::PlannerBridge;
use crate::message::ChannelMessage;
use crate::outbound::{deliver_paced, split_message};
use crate::traits::{ChannelError, ChannelResult};
use crate::twilio::TwilioChannel;
use guru_common::config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Messages fetched per poll.
const PAGE_SIZE: u32 = 20;

/// Author used for replies posted into the conversation.
const REPLY_AUTHOR: &str = "system";

/// Polls one conversation and answers its user.
pub struct ConversationPoller {
    channel: Arc<TwilioChannel>,
    bridge: Arc<PlannerBridge>,
    conversation_sid: String,
    user_address: String,
    interval: Duration,
    last_seen: Option<String>,
}

impl ConversationPoller {
    /// Create a poller for an existing conversation.
    pub fn new(
        channel: Arc<TwilioChannel>,
        bridge: Arc<PlannerBridge>,
        conversation_sid: impl Into<String>,
        user_address: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            channel,
            bridge,
            conversation_sid: conversation_sid.into(),
            user_address: user_address.into(),
            interval,
            last_seen: None,
        }
    }

    /// Find or create the user's conversation, bind the user to it, and
    /// start reading after its latest message.
    pub async fn connect(
        channel: Arc<TwilioChannel>,
        bridge: Arc<PlannerBridge>,
        config: &Config,
    ) -> ChannelResult<Self> {
        let user = config
            .twilio
            .user_address
            .clone()
            .ok_or_else(|| ChannelError::NotReady("Polling needs a user address".into()))?;

        let name = config.polling.conversation_name_for(&user);
        let conversation = channel.ensure_conversation(&name).await?;
        channel.ensure_participant(&conversation.sid, &user).await?;

        let mut poller = Self::new(
            channel,
            bridge,
            conversation.sid,
            user,
            Duration::from_millis(config.polling.interval_ms),
        );
        poller.prime().await?;

        tracing::info!(
            conversation = %poller.conversation_sid,
            user = %poller.user_address,
            "Waiting for replies in conversation"
        );
        Ok(poller)
    }

    /// Conversation being polled.
    pub fn conversation_sid(&self) -> &str {
        &self.conversation_sid
    }

    /// SID of the last message seen.
    pub fn last_seen(&self) -> Option<&str> {
        self.last_seen.as_deref()
    }

    /// Move the cursor to the newest message so history is not answered.
    pub async fn prime(&mut self) -> ChannelResult<()> {
        let latest = self.channel.list_messages(&self.conversation_sid, 1).await?;
        self.last_seen = latest.last().map(|m| m.sid.clone());
        Ok(())
    }

    /// Answer every user message after the cursor. Returns how many were answered.
    pub async fn poll_once(&mut self) -> ChannelResult<usize> {
        let recent = self
            .channel
            .list_messages(&self.conversation_sid, PAGE_SIZE)
            .await?;

        let start = match &self.last_seen {
            Some(seen) => match recent.iter().position(|m| &m.sid == seen) {
                Some(i) => i + 1,
                // Cursor fell out of the page; only the newest message is answered.
                None => recent.len().saturating_sub(1),
            },
            None => recent.len().saturating_sub(1),
        };

        let mut answered = 0;
        for entry in recent.into_iter().skip(start) {
            self.last_seen = Some(entry.sid.clone());
            if entry.author.as_deref() != Some(self.user_address.as_str()) {
                continue;
            }

            let message = ChannelMessage::from_conversation(
                &entry.sid,
                &self.user_address,
                entry.body.as_deref().unwrap_or_default(),
            );
            tracing::info!(sid = %message.id, text = %message.preview(), "Conversation message");

            let reply = self.bridge.reply(&message).await;
            let outbound = self.bridge.outbound();
            let chunks = split_message(&reply, outbound.max_message_len);
            let delay = Duration::from_millis(outbound.chunk_delay_ms);

            let channel = &self.channel;
            let conversation = self.conversation_sid.as_str();
            deliver_paced(chunks, delay, |chunk| async move {
                channel
                    .post_conversation_message(conversation, REPLY_AUTHOR, &chunk)
                    .await
            })
            .await?;

            answered += 1;
        }

        Ok(answered)
    }

    /// Run the poller until the returned handle is stopped.
    pub fn spawn(mut self) -> PollerHandle {
        let (shutdown, mut stop) = watch::channel(false);

        let task = tokio::spawn(async move {
            tracing::info!(
                conversation = %self.conversation_sid,
                interval_ms = self.interval.as_millis() as u64,
                "Conversation poller started"
            );

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.poll_once().await {
                            tracing::warn!(error = %e, "Conversation poll failed");
                        }
                    }
                }
            }

            tracing::info!("Conversation poller stopped");
        });

        PollerHandle { shutdown, task }
    }
}

/// Handle to a running poller.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop polling and wait for the current poll to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Conversation poller task failed");
        }
    }
}
