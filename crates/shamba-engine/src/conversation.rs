//! In-memory per-phone conversation state.
//!
//! This is process-local cache, not a source of truth: losing it means a
//! conversation resumes cold, nothing more. Subscription state lives in the
//! store. The map is mutex-guarded because webhook handlers and the polling
//! loop touch it concurrently.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use shamba_core::message::Direction;
use shamba_core::phone::PhoneNumber;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Context idle longer than this is removed by the sweep.
const CONTEXT_TTL_MINUTES: i64 = 60;

/// How often the background sweep runs.
pub const SWEEP_INTERVAL_SECS: u64 = 3600;

/// What we remember about an ongoing exchange with one phone.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationContext {
    pub phone: PhoneNumber,
    /// Last inbound text from the farmer.
    pub last_message: Option<String>,
    /// Last reply we sent them.
    pub last_reply: Option<String>,
    pub message_count: u64,
    pub last_activity: DateTime<Utc>,
}

/// Mutex-guarded map from normalized phone to conversation context.
/// Injected explicitly (no module-level singleton) so tests get isolated
/// instances.
pub struct ConversationStore {
    inner: Mutex<HashMap<PhoneNumber, ConversationContext>>,
    ttl: Duration,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl: Duration::minutes(CONTEXT_TTL_MINUTES),
        }
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Record a message in either direction, creating the context on first
    /// touch and refreshing `last_activity`.
    pub fn touch(&self, phone: &PhoneNumber, text: &str, direction: Direction) {
        let mut map = self.inner.lock().expect("conversation map poisoned");
        let ctx = map.entry(phone.clone()).or_insert_with(|| ConversationContext {
            phone: phone.clone(),
            last_message: None,
            last_reply: None,
            message_count: 0,
            last_activity: Utc::now(),
        });
        match direction {
            Direction::Incoming => ctx.last_message = Some(text.to_string()),
            Direction::Outgoing => ctx.last_reply = Some(text.to_string()),
        }
        ctx.message_count += 1;
        ctx.last_activity = Utc::now();
    }

    pub fn get(&self, phone: &PhoneNumber) -> Option<ConversationContext> {
        self.inner
            .lock()
            .expect("conversation map poisoned")
            .get(phone)
            .cloned()
    }

    pub fn get_all(&self) -> Vec<ConversationContext> {
        let mut all: Vec<_> = self
            .inner
            .lock()
            .expect("conversation map poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        all
    }

    /// Drop the context for one phone. Returns whether it existed.
    pub fn clear(&self, phone: &PhoneNumber) -> bool {
        self.inner
            .lock()
            .expect("conversation map poisoned")
            .remove(phone)
            .is_some()
    }

    pub fn clear_all(&self) -> usize {
        let mut map = self.inner.lock().expect("conversation map poisoned");
        let n = map.len();
        map.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("conversation map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove contexts idle beyond the TTL. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let mut map = self.inner.lock().expect("conversation map poisoned");
        let before = map.len();
        map.retain(|_, ctx| ctx.last_activity > cutoff);
        let evicted = before - map.len();
        if evicted > 0 {
            debug!(evicted, "swept idle conversations");
        }
        evicted
    }

    /// Spawn the hourly eviction task.
    pub fn spawn_sweeper(store: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                store.sweep();
            }
        })
    }
}
