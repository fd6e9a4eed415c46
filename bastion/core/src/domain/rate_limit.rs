// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Fixed-window request counter keyed by `tenant:route`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub key: String,
    pub window_start: DateTime<Utc>,
    pub count: u32,
    pub limit: u32,
}

impl RateLimitBucket {
    pub fn new(key: impl Into<String>, limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            window_start: now,
            count: 0,
            limit,
        }
    }

    /// Count one request. Resets the window first if it has elapsed; rejects
    /// once `count >= limit`.
    pub fn try_acquire(&mut self, now: DateTime<Utc>, window: Duration) -> bool {
        if now - self.window_start >= window {
            self.window_start = now;
            self.count = 0;
        }
        if self.count >= self.limit {
            return false;
        }
        self.count += 1;
        true
    }

    /// Time until the current window resets.
    pub fn retry_after(&self, now: DateTime<Utc>, window: Duration) -> Duration {
        let reset_at = self.window_start + window;
        if reset_at > now {
            reset_at - now
        } else {
            Duration::zero()
        }
    }
}
