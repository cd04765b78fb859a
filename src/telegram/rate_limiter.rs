//! Rate limiter for outgoing Telegram messages.
//!
//! Bots may send roughly 30 messages per second overall and about one per
//! second into the same chat. Each send reserves the earliest slot that
//! respects both limits, then sleeps until that slot without holding a lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default spacing between any two outgoing messages.
const DEFAULT_GLOBAL_INTERVAL: Duration = Duration::from_millis(35);

/// Default spacing between two messages into the same chat.
const DEFAULT_PER_CHAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Slots {
    /// Last reserved slot across all chats.
    global: Option<Instant>,
    /// Last reserved slot per chat.
    per_chat: HashMap<i64, Instant>,
}

/// Rate limiter that enforces minimum intervals between sends.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum duration between any two sends.
    global_interval: Duration,

    /// Minimum duration between two sends into the same chat.
    per_chat_interval: Duration,

    /// Reserved send slots.
    slots: Mutex<Slots>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_GLOBAL_INTERVAL, DEFAULT_PER_CHAT_INTERVAL)
    }
}

impl RateLimiter {
    /// Creates a new rate limiter with the specified minimum intervals.
    #[must_use]
    pub fn new(global_interval: Duration, per_chat_interval: Duration) -> Self {
        Self {
            global_interval,
            per_chat_interval,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Reserves the next send slot for `chat_id` and waits until it arrives.
    ///
    /// Returns the duration waited (0 if no wait was needed).
    pub async fn wait_and_acquire(&self, chat_id: i64) -> Duration {
        let slot = {
            let mut slots = self.slots.lock().await;
            let now = Instant::now();

            let mut slot = now;
            if let Some(last) = slots.global {
                slot = slot.max(last + self.global_interval);
            }
            if let Some(last) = slots.per_chat.get(&chat_id) {
                slot = slot.max(*last + self.per_chat_interval);
            }

            let per_chat_interval = self.per_chat_interval;
            slots
                .per_chat
                .retain(|_, last| now.saturating_duration_since(*last) < per_chat_interval);
            slots.global = Some(slot);
            slots.per_chat.insert(chat_id, slot);
            slot
        };

        let wait_duration = slot.saturating_duration_since(Instant::now());
        if !wait_duration.is_zero() {
            debug!(
                "Rate limiter: waiting {:?} before sending to chat {}",
                wait_duration, chat_id
            );
            tokio::time::sleep(wait_duration).await;
        }

        wait_duration
    }

    /// Handles a flood wait error from Telegram by pushing every future send back.
    pub async fn handle_flood_wait(&self, wait_seconds: u32) {
        warn!(
            "Received flood wait from Telegram: {} seconds",
            wait_seconds
        );

        let mut slots = self.slots.lock().await;
        let resume_at = Instant::now() + Duration::from_secs(u64::from(wait_seconds));
        // The next reservation lands one global interval after this point.
        slots.global = Some(resume_at.checked_sub(self.global_interval).unwrap_or(resume_at));
    }
}
