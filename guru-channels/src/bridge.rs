//! Bridge between inbound messages and the trip planner.
//!
//! The bridge owns the session store and the advisor. Every sender gets a
//! queue served by one worker task, so a sender's messages are answered one
//! at a time and in arrival order while the webhook acknowledges at once.
//! Different senders are served concurrently.
//!
//! ```text
//! webhook → dispatch → sender queue → ack
//!                          ↓
//!              worker: lock session → handle_message → chunk → paced send
//! ```

use crate::message::ChannelMessage;
use crate::outbound::deliver_chunked;
use crate::traits::Channel;
use dashmap::DashMap;
use guru_common::config::{Config, OutboundConfig};
use guru_planner::{SessionGuard, SessionStore, TripAdvisor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// One sender's queue and the task serving it.
struct Worker {
    tx: mpsc::UnboundedSender<ChannelMessage>,
    task: Option<JoinHandle<()>>,
}

impl Worker {
    fn is_finished(&self) -> bool {
        self.tx.is_closed() && self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

/// Routes inbound messages through the planner and back out.
pub struct PlannerBridge {
    store: Arc<SessionStore>,
    advisor: TripAdvisor,
    channel: Arc<dyn Channel>,
    outbound: OutboundConfig,
    queues: DashMap<String, Worker>,
    idle_timeout: Duration,
}

impl PlannerBridge {
    /// Create a new bridge.
    pub fn new(
        store: Arc<SessionStore>,
        advisor: TripAdvisor,
        channel: Arc<dyn Channel>,
        outbound: OutboundConfig,
    ) -> Self {
        Self {
            store,
            advisor,
            channel,
            outbound,
            queues: DashMap::new(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Create a bridge with the OpenAI advisor and settings from `config`.
    pub fn from_config(config: &Config, channel: Arc<dyn Channel>) -> Self {
        Self::new(
            Arc::new(SessionStore::new(config.conversation.trigger_keyword.clone())),
            TripAdvisor::from_config(&config.llm),
            channel,
            config.outbound.clone(),
        )
        .with_idle_timeout(Duration::from_secs(config.conversation.session_ttl_secs))
    }

    /// How long a sender's worker waits for a message before exiting.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// The session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The outbound channel.
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Outbound chunking and pacing settings.
    pub fn outbound(&self) -> &OutboundConfig {
        &self.outbound
    }

    /// Number of senders with a live worker.
    pub fn active_workers(&self) -> usize {
        self.queues.iter().filter(|w| !w.value().tx.is_closed()).count()
    }

    /// Run one conversation step and return the reply without sending it.
    pub async fn reply(&self, message: &ChannelMessage) -> String {
        let mut session = self.store.acquire(&message.sender).await;
        session
            .handle_message(&message.text, &self.advisor)
            .instrument(message_span(message))
            .await
    }

    /// Queue a message for its sender's worker, starting one if needed.
    ///
    /// Returns immediately. The reply is delivered through the channel.
    pub fn dispatch(self: &Arc<Self>, message: ChannelMessage) {
        let sender = message.sender.clone();
        let mut worker = self
            .queues
            .entry(sender.clone())
            .or_insert_with(|| self.spawn_worker(&sender, None));

        // The previous worker went idle and closed its queue.
        if let Err(mpsc::error::SendError(message)) = worker.tx.send(message) {
            let previous = worker.task.take();
            let fresh = self.spawn_worker(&sender, previous);
            if fresh.tx.send(message).is_err() {
                tracing::error!(sender = %sender, "Sender worker exited before its first message");
            }
            *worker = fresh;
        }
    }

    /// Start a worker. It waits for `previous` to finish draining first, so a
    /// sender's messages are never answered out of order across workers.
    fn spawn_worker(self: &Arc<Self>, sender: &str, previous: Option<JoinHandle<()>>) -> Worker {
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = Arc::clone(self);
        tracing::debug!(sender = %sender, "Starting sender worker");
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    tracing::warn!(error = %e, "Previous sender worker failed");
                }
            }
            bridge.run_worker(rx).await
        });
        Worker {
            tx,
            task: Some(task),
        }
    }

    async fn run_worker(&self, mut rx: mpsc::UnboundedReceiver<ChannelMessage>) {
        loop {
            match tokio::time::timeout(self.idle_timeout, rx.recv()).await {
                Ok(Some(message)) => self.handle(message).await,
                Ok(None) => break,
                Err(_) => {
                    // Refuse new messages, then answer what is already queued.
                    rx.close();
                    while let Some(message) = rx.recv().await {
                        self.handle(message).await;
                    }
                    break;
                }
            }
        }
    }

    async fn handle(&self, message: ChannelMessage) {
        let span = message_span(&message);
        async {
            let session = self.store.acquire(&message.sender).await;
            self.process(session, message).await;
        }
        .instrument(span)
        .await
    }

    /// Answer with the session held until every chunk is sent.
    async fn process(&self, mut session: SessionGuard, message: ChannelMessage) {
        let reply = session.handle_message(&message.text, &self.advisor).await;
        tracing::debug!(state = ?session.state(), chars = reply.chars().count(), "Reply ready");

        match deliver_chunked(
            self.channel.as_ref(),
            &message.sender,
            &reply,
            Some(&message.id),
            &self.outbound,
        )
        .await
        {
            Ok(parts) => tracing::info!(parts, channel = self.channel.name(), "Reply delivered"),
            Err(e) => tracing::error!(error = %e, "Failed to deliver reply"),
        }
    }

    /// Evict idle sessions and forget workers that have fully exited.
    pub fn cleanup(&self, ttl: Duration) -> usize {
        self.queues.retain(|_, worker| !worker.is_finished());
        self.store.cleanup_stale(ttl)
    }

    /// Spawn the periodic cleanup task.
    pub fn spawn_cleanup(bridge: Arc<Self>, ttl: Duration, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                bridge.cleanup(ttl);
            }
        })
    }
}

fn message_span(message: &ChannelMessage) -> tracing::Span {
    tracing::info_span!(
        "message",
        trace_id = %message.trace_id,
        sender = %message.sender,
        source = message.source.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OutgoingMessage;
    use crate::traits::ChannelResult;
    use async_trait::async_trait;
    use guru_common::config::LlmConfig;
    use guru_planner::{ChatRequest, ChatResponse, Provider, ProviderError, TokenUsage, MENU};
    use std::sync::Mutex;

    struct FixedProvider(String);

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "OpenAI"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                provider: "fixed".into(),
                model: request.model,
                content: self.0.clone(),
                usage: TokenUsage::default(),
                finish_reason: Some("stop".into()),
                latency_ms: 0,
            })
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<OutgoingMessage>>,
    }

    impl RecordingChannel {
        fn texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|m| m.text.clone()).collect()
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(message);
            Ok(format!("SM{}", sent.len()))
        }

        async fn health_check(&self) -> ChannelResult<()> {
            Ok(())
        }
    }

    fn make_bridge(answer: &str, max_message_len: usize) -> (Arc<PlannerBridge>, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::default());
        let advisor = TripAdvisor::new(
            Arc::new(FixedProvider(answer.to_string())),
            &LlmConfig::default(),
        );
        let outbound = OutboundConfig {
            max_message_len,
            chunk_delay_ms: 0,
            ..OutboundConfig::default()
        };
        let bridge = Arc::new(PlannerBridge::new(
            Arc::new(SessionStore::new("help")),
            advisor,
            channel.clone(),
            outbound,
        ));
        (bridge, channel)
    }

    fn msg(sender: &str, text: &str) -> ChannelMessage {
        ChannelMessage::from_webhook(None, sender, text)
    }

    async fn wait_for_sends(channel: &RecordingChannel, count: usize) -> Vec<String> {
        for _ in 0..200 {
            if channel.sent.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        channel.texts()
    }

    #[tokio::test]
    async fn test_dispatch_delivers_reply() {
        let (bridge, channel) = make_bridge("unused", 1000);

        bridge.dispatch(msg("whatsapp:+1", "help"));

        assert_eq!(wait_for_sends(&channel, 1).await, vec![MENU.to_string()]);
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent[0].recipient, "whatsapp:+1");
        assert!(sent[0].reply_to.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_keeps_sender_order() {
        let (bridge, channel) = make_bridge("unused", 1000);

        for text in ["help", "1", "Paris"] {
            bridge.dispatch(msg("whatsapp:+1", text));
        }

        assert_eq!(
            wait_for_sends(&channel, 3).await,
            vec![
                MENU.to_string(),
                "Enter your location:".to_string(),
                "Preferred cuisine?".to_string(),
            ]
        );
        assert_eq!(bridge.active_workers(), 1);
    }

    #[tokio::test]
    async fn test_senders_get_separate_workers() {
        let (bridge, channel) = make_bridge("unused", 1000);

        bridge.dispatch(msg("whatsapp:+1", "help"));
        bridge.dispatch(msg("whatsapp:+2", "hello"));

        let texts = wait_for_sends(&channel, 2).await;
        assert_eq!(texts.len(), 2);
        assert!(texts.contains(&MENU.to_string()));
        assert!(texts.contains(&guru_planner::START_HINT.to_string()));
        assert_eq!(bridge.active_workers(), 2);
    }

    #[tokio::test]
    async fn test_final_answer_is_chunked() {
        let answer = format!("{}\n{}", "a".repeat(150), "b".repeat(150));
        let (bridge, channel) = make_bridge(&answer, 200);

        for text in ["help", "1", "Paris", "Italian", "50"] {
            bridge.dispatch(msg("whatsapp:+1", text));
        }

        let texts = wait_for_sends(&channel, 6).await;
        assert_eq!(texts.len(), 6);
        assert_eq!(texts[4..], ["a".repeat(150), "b".repeat(150)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_worker_exits_and_restarts() {
        let (bridge, channel) = make_bridge("unused", 1000);
        let bridge = Arc::new(
            Arc::try_unwrap(bridge)
                .ok()
                .unwrap()
                .with_idle_timeout(Duration::from_secs(60)),
        );

        bridge.dispatch(msg("whatsapp:+1", "help"));
        wait_for_sends(&channel, 1).await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(bridge.active_workers(), 0);
        bridge.cleanup(Duration::from_secs(3600));

        bridge.dispatch(msg("whatsapp:+1", "1"));
        let texts = wait_for_sends(&channel, 2).await;
        assert_eq!(texts[1], "Enter your location:");
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_worker_waits_for_draining_worker() {
        let (bridge, channel) = make_bridge("unused", 1000);

        // An exiting worker still answering a message it drained.
        let draining = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                bridge.handle(msg("whatsapp:+1", "help")).await;
            })
        };

        let worker = bridge.spawn_worker("whatsapp:+1", Some(draining));
        worker.tx.send(msg("whatsapp:+1", "1")).unwrap();

        assert_eq!(
            wait_for_sends(&channel, 2).await,
            vec![MENU.to_string(), "Enter your location:".to_string()]
        );
    }

    #[tokio::test]
    async fn test_reply_does_not_send() {
        let (bridge, channel) = make_bridge("unused", 1000);

        let reply = bridge.reply(&msg("whatsapp:+1", "hello")).await;
        assert_eq!(reply, guru_planner::START_HINT);
        assert!(channel.texts().is_empty());
        assert!(bridge.store().contains("whatsapp:+1"));
    }
}
