//! Sliding-window rate limiter for outbound target calls.
//!
//! Every caller reserves an admission slot under the lock and then sleeps
//! until it. A slot is never earlier than `window` after the slot `limit`
//! positions before it, so no half-open window of `window` length ever holds
//! more than `limit` calls, bursts included. Slots are handed out in arrival
//! order, so a waiter's delay is bounded by the callers queued ahead of it.
//! Nothing is dropped.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    /// Reserved slots, oldest first. Slots may lie in the future.
    slots: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        let limit = limit.max(1) as usize;
        Self {
            limit,
            window,
            slots: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    /// At most `n` admissions in any one-second window.
    pub fn per_second(n: u32) -> Self {
        Self::new(n, Duration::from_secs(1))
    }

    /// Lock the slot log, recovering from poison if necessary.
    fn lock_slots(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.slots.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Earliest slot a new caller could take at `now`.
    fn next_slot(&self, slots: &mut VecDeque<Instant>, now: Instant) -> Instant {
        while let Some(&oldest) = slots.front() {
            if oldest + self.window <= now {
                slots.pop_front();
            } else {
                break;
            }
        }
        let earliest = match slots.len().checked_sub(self.limit) {
            Some(i) => slots[i] + self.window,
            None => now,
        };
        match slots.back() {
            Some(&last) if last > earliest => last,
            _ => earliest,
        }
    }

    /// Try to admit a call without waiting. Reserves nothing on refusal.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut slots = self.lock_slots();
        if self.next_slot(&mut slots, now) <= now {
            slots.push_back(now);
            true
        } else {
            false
        }
    }

    /// Wait until a call is admitted.
    ///
    /// The slot is taken on the first poll. Dropping the future afterwards
    /// leaves the slot unused, which only lowers the effective rate.
    pub async fn acquire(&self) {
        let now = Instant::now();
        let slot = {
            let mut slots = self.lock_slots();
            let slot = self.next_slot(&mut slots, now);
            slots.push_back(slot);
            slot
        };
        if slot > now {
            tracing::trace!(wait_ms = (slot - now).as_millis() as u64, "rate limited");
            tokio::time::sleep_until(slot).await;
        }
    }
}
