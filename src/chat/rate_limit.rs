// Rolling-window rate limiter over the append-only rate-limit log.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::chat::model::RateLimitEntry;
use crate::chat::store::ChatStore;
use crate::error::{AppError, Result};

/// Default: 10 events per 60 seconds per (user, room, kind).
pub const DEFAULT_MAX_EVENTS: u32 = 10;
pub const DEFAULT_WINDOW_SECS: u64 = 60;

pub struct RateLimiter {
    store: Arc<ChatStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<ChatStore>) -> Self {
        Self { store }
    }

    /// Admit or reject one event. On admit the event is appended to the log;
    /// on breach the error carries the computed reset time derived from the
    /// oldest in-window record.
    pub fn check_rate_limit(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        event_type: &str,
        max_count: u32,
        window_seconds: u64,
    ) -> Result<()> {
        let now = Utc::now();
        let window_start = now - ChronoDuration::seconds(window_seconds as i64);

        let oldest_in_window = {
            let log = self.store.rate_limit_log.read();
            let mut in_window = log
                .iter()
                .filter(|entry| {
                    entry.user_id == user_id
                        && entry.room_id == room_id
                        && entry.event_type == event_type
                        && entry.timestamp >= window_start
                })
                .map(|entry| entry.timestamp)
                .collect::<Vec<_>>();
            in_window.sort();
            if in_window.len() as u32 >= max_count {
                in_window.first().copied()
            } else {
                None
            }
        };

        if let Some(oldest) = oldest_in_window {
            let reset_at = oldest + ChronoDuration::seconds(window_seconds as i64);
            let reset_seconds = (reset_at - now).num_seconds().max(0) as u64;
            return Err(AppError::RateLimit {
                message: format!("Rate limit exceeded for {}. Try again later.", event_type),
                limit: max_count,
                remaining: 0,
                reset_seconds,
            });
        }

        self.store.rate_limit_log.write().push(RateLimitEntry {
            user_id,
            room_id,
            event_type: event_type.to_string(),
            timestamp: now,
        });
        Ok(())
    }

    pub fn check_default(&self, user_id: Uuid, room_id: Uuid, event_type: &str) -> Result<()> {
        self.check_rate_limit(
            user_id,
            room_id,
            event_type,
            DEFAULT_MAX_EVENTS,
            DEFAULT_WINDOW_SECS,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(Arc::new(ChatStore::new()));
        let user = Uuid::new_v4();
        let room = Uuid::new_v4();

        for _ in 0..10 {
            limiter
                .check_rate_limit(user, room, "send_message", 10, 60)
                .unwrap();
        }
        let err = limiter
            .check_rate_limit(user, room, "send_message", 10, 60)
            .unwrap_err();
        match err {
            AppError::RateLimit {
                limit,
                remaining,
                reset_seconds,
                ..
            } => {
                assert_eq!(limit, 10);
                assert_eq!(remaining, 0);
                assert!(reset_seconds <= 60);
            }
            other => panic!("expected rate limit error, got {:?}", other),
        }
    }

    #[test]
    fn test_kinds_are_independent() {
        let limiter = RateLimiter::new(Arc::new(ChatStore::new()));
        let user = Uuid::new_v4();
        let room = Uuid::new_v4();

        for _ in 0..10 {
            limiter
                .check_rate_limit(user, room, "send_message", 10, 60)
                .unwrap();
        }
        // A different event kind still has headroom.
        limiter
            .check_rate_limit(user, room, "add_reaction", 10, 60)
            .unwrap();
    }

    #[test]
    fn test_users_are_independent() {
        let limiter = RateLimiter::new(Arc::new(ChatStore::new()));
        let room = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        for _ in 0..10 {
            limiter
                .check_rate_limit(first, room, "send_message", 10, 60)
                .unwrap();
        }
        limiter
            .check_rate_limit(second, room, "send_message", 10, 60)
            .unwrap();
    }
}
