//! Sender-keyed session storage.
//!
//! Each sender gets one [`ConversationSession`] behind its own async mutex.
//! Holding a [`SessionGuard`] is what serializes a sender's messages: tokio
//! mutexes grant the lock in request order, so messages are handled in the
//! order their handlers asked for the session. Different senders never
//! contend with each other.

use crate::session::ConversationSession;
use dashmap::DashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// A session plus the time it was last handed out.
#[derive(Debug)]
pub struct SessionSlot {
    session: ConversationSession,
    last_active: Instant,
}

/// Exclusive access to one sender's session.
pub struct SessionGuard {
    sender: String,
    guard: OwnedMutexGuard<SessionSlot>,
}

impl SessionGuard {
    /// Sender this session belongs to.
    pub fn sender(&self) -> &str {
        &self.sender
    }
}

impl Deref for SessionGuard {
    type Target = ConversationSession;

    fn deref(&self) -> &Self::Target {
        &self.guard.session
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.session
    }
}

/// Process-wide map of sender → session.
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<SessionSlot>>>,
    trigger_keyword: String,
}

impl SessionStore {
    /// Create an empty store whose sessions open on `trigger_keyword`.
    pub fn new(trigger_keyword: impl Into<String>) -> Self {
        Self {
            sessions: DashMap::new(),
            trigger_keyword: trigger_keyword.into(),
        }
    }

    /// Lock the sender's session, creating it on first contact.
    pub async fn acquire(&self, sender: &str) -> SessionGuard {
        let slot = self
            .sessions
            .entry(sender.to_string())
            .or_insert_with(|| {
                tracing::debug!(sender = %sender, "Creating conversation session");
                Arc::new(Mutex::new(SessionSlot {
                    session: ConversationSession::new(self.trigger_keyword.clone()),
                    last_active: Instant::now(),
                }))
            })
            .value()
            .clone();

        let mut guard = slot.lock_owned().await;
        guard.last_active = Instant::now();

        SessionGuard {
            sender: sender.to_string(),
            guard,
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether `sender` currently has a session.
    pub fn contains(&self, sender: &str) -> bool {
        self.sessions.contains_key(sender)
    }

    /// Evict sessions idle for longer than `ttl`. Returns how many were removed.
    ///
    /// A session that is locked, or whose handle is held by a waiting
    /// handler, is never evicted.
    pub fn cleanup_stale(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();

        self.sessions.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(inner) => inner.last_active.elapsed() <= ttl,
                Err(_) => true,
            }
        });

        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            tracing::info!(removed, remaining = self.sessions.len(), "Evicted idle sessions");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConversationState;

    #[tokio::test]
    async fn test_sessions_are_created_once() {
        let store = SessionStore::new("help");
        assert!(store.is_empty());

        {
            let mut guard = store.acquire("whatsapp:+1").await;
            guard.advance("help");
        }
        let guard = store.acquire("whatsapp:+1").await;
        assert_eq!(guard.state(), ConversationState::AwaitingServiceChoice);
        assert_eq!(guard.sender(), "whatsapp:+1");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_senders_are_isolated() {
        let store = SessionStore::new("help");

        {
            let mut a = store.acquire("whatsapp:+1").await;
            a.advance("help");
            a.advance("3");
            a.advance("Lisbon");
        }

        let b = store.acquire("whatsapp:+2").await;
        assert_eq!(b.state(), ConversationState::AwaitingStart);
        assert!(b.fields().is_empty());
        drop(b);

        let a = store.acquire("whatsapp:+1").await;
        assert_eq!(a.fields().keys(), ["city"]);
    }

    #[tokio::test]
    async fn test_same_sender_is_serialized() {
        let store = Arc::new(SessionStore::new("help"));
        let first = store.acquire("whatsapp:+1").await;

        let waiting = {
            let store = store.clone();
            tokio::spawn(async move {
                let guard = store.acquire("whatsapp:+1").await;
                guard.state()
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        // Other senders are not blocked.
        let other = store.acquire("whatsapp:+2").await;
        drop(other);

        let mut first = first;
        first.advance("help");
        drop(first);

        assert_eq!(
            waiting.await.unwrap(),
            ConversationState::AwaitingServiceChoice
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_evicts_only_idle_unlocked_sessions() {
        let store = SessionStore::new("help");
        drop(store.acquire("idle").await);
        let held = store.acquire("busy").await;

        tokio::time::advance(Duration::from_secs(120)).await;
        drop(store.acquire("fresh").await);

        let removed = store.cleanup_stale(Duration::from_secs(60));
        assert_eq!(removed, 1);
        assert!(!store.contains("idle"));
        assert!(store.contains("busy"));
        assert!(store.contains("fresh"));
        drop(held);
    }
}
