use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use relay_api::Event;

// ═══════════════════════════════════════════════════════════════
//  Message types
// ═══════════════════════════════════════════════════════════════

/// Buffer-assigned message id. Distinct from the event id: the same event
/// delivered twice by the bus becomes two messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// Identifies one lease of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub message_id: MessageId,
    /// Receive count at the time the lease was granted.
    pub lease: u32,
}

/// A leased delivery of an event.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub event: Arc<Event>,
    /// Delivery attempts so far, this one included.
    pub receive_count: u32,
    pub first_received_at: Instant,
    pub lease_expires_at: Instant,
    pub receipt: Receipt,
}

// ═══════════════════════════════════════════════════════════════
//  Internal state
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
enum Visibility {
    Visible,
    Leased { lease: u32, expires_at: Instant },
    /// Released with a delay; visible from `until`.
    Delayed { until: Instant },
}

struct Slot {
    event: Arc<Event>,
    receive_count: u32,
    first_received_at: Option<Instant>,
    visibility: Visibility,
}

#[derive(Default)]
struct BufferState {
    slots: HashMap<MessageId, Slot>,
    /// Visible messages in delivery order. May hold ids that were
    /// acknowledged or re-leased since; those are skipped on take.
    ready: VecDeque<MessageId>,
}

impl BufferState {
    /// Move expired leases and elapsed delays to `ready`.
    /// Returns the earliest instant at which another slot becomes visible.
    fn promote(&mut self, now: Instant) -> Option<Instant> {
        let mut next: Option<Instant> = None;
        let mut promoted: Vec<MessageId> = Vec::new();
        for (id, slot) in self.slots.iter_mut() {
            let at = match slot.visibility {
                Visibility::Visible => continue,
                Visibility::Leased { expires_at, .. } => expires_at,
                Visibility::Delayed { until } => until,
            };
            if at <= now {
                if let Visibility::Leased { lease, .. } = slot.visibility {
                    tracing::debug!(message_id = %id, lease, "lease expired, message visible again");
                }
                slot.visibility = Visibility::Visible;
                promoted.push(*id);
            } else {
                next = Some(next.map_or(at, |n| n.min(at)));
            }
        }
        promoted.sort();
        self.ready.extend(promoted);
        next
    }

    /// Lease up to `max` visible messages into `batch`.
    fn take(&mut self, max: usize, now: Instant, visibility_timeout: Duration, batch: &mut Vec<Message>) {
        while batch.len() < max {
            let Some(id) = self.ready.pop_front() else {
                break;
            };
            let Some(slot) = self.slots.get_mut(&id) else {
                continue;
            };
            if !matches!(slot.visibility, Visibility::Visible) {
                continue;
            }

            slot.receive_count += 1;
            let first_received_at = *slot.first_received_at.get_or_insert(now);
            let expires_at = now + visibility_timeout;
            slot.visibility = Visibility::Leased {
                lease: slot.receive_count,
                expires_at,
            };
            batch.push(Message {
                id,
                event: slot.event.clone(),
                receive_count: slot.receive_count,
                first_received_at,
                lease_expires_at: expires_at,
                receipt: Receipt {
                    message_id: id,
                    lease: slot.receive_count,
                },
            });
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  SourceBuffer
// ═══════════════════════════════════════════════════════════════

/// Counters for inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BufferCounts {
    pub visible: usize,
    pub in_flight: usize,
    pub delayed: usize,
}

/// Lease-based message buffer.
///
/// Received messages stay invisible to other consumers until acknowledged,
/// released, or until their lease expires. Safe for concurrent use by many
/// workers; the lease protocol is the only coordination between them.
pub struct SourceBuffer {
    visibility_timeout: Duration,
    state: Mutex<BufferState>,
    notify: Notify,
    next_id: AtomicU64,
}

impl SourceBuffer {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            state: Mutex::new(BufferState::default()),
            notify: Notify::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Lock the state mutex, recovering from poison if necessary.
    fn lock_state(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("source buffer state mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Accept an event. It becomes visible immediately.
    pub fn send(&self, event: Event) -> MessageId {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut state = self.lock_state();
            state.slots.insert(
                id,
                Slot {
                    event: Arc::new(event),
                    receive_count: 0,
                    first_received_at: None,
                    visibility: Visibility::Visible,
                },
            );
            state.ready.push_back(id);
        }
        self.notify.notify_waiters();
        id
    }

    /// Receive up to `max_size` messages, waiting at most `max_wait`.
    ///
    /// Returns as soon as `max_size` messages are collected; otherwise returns
    /// what was collected (possibly nothing) when `max_wait` elapses. Every
    /// returned message is leased for the visibility timeout.
    pub async fn receive_batch(&self, max_size: usize, max_wait: Duration) -> Vec<Message> {
        let mut batch = Vec::with_capacity(max_size.min(64));
        if max_size == 0 {
            return batch;
        }
        let deadline = Instant::now() + max_wait;

        loop {
            // Register interest before inspecting state so a send() between
            // the check and the wait is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Instant::now();
            let next_visible = {
                let mut state = self.lock_state();
                let next = state.promote(now);
                state.take(max_size, now, self.visibility_timeout, &mut batch);
                next
            };

            if batch.len() >= max_size || now >= deadline {
                return batch;
            }

            let wake_at = next_visible.map_or(deadline, |t| t.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Permanently remove a message.
    ///
    /// Succeeds for any receipt of a still-present message, even one whose
    /// lease already expired: a late acknowledgement means the work was done.
    /// Returns false if the message is already gone.
    pub fn acknowledge(&self, receipt: &Receipt) -> bool {
        let removed = self.lock_state().slots.remove(&receipt.message_id).is_some();
        if !removed {
            tracing::debug!(message_id = %receipt.message_id, "acknowledge of unknown message ignored");
        }
        removed
    }

    /// Make a leased message visible again immediately.
    pub fn release(&self, receipt: &Receipt) -> bool {
        let released = {
            let mut state = self.lock_state();
            let released = Self::end_lease(&mut state, receipt, Visibility::Visible);
            if released {
                state.ready.push_back(receipt.message_id);
            }
            released
        };
        if released {
            self.notify.notify_waiters();
        }
        released
    }

    /// Make a leased message visible again after `delay`.
    pub fn release_after(&self, receipt: &Receipt, delay: Duration) -> bool {
        if delay.is_zero() {
            return self.release(receipt);
        }
        let until = Instant::now() + delay;
        let released = Self::end_lease(&mut self.lock_state(), receipt, Visibility::Delayed { until });
        if released {
            // Waiters must recompute their wake-up time.
            self.notify.notify_waiters();
        }
        released
    }

    /// Replace the visibility of a message still leased under `receipt`.
    /// Stale receipts (lease expired or message redelivered) are ignored.
    fn end_lease(state: &mut BufferState, receipt: &Receipt, next: Visibility) -> bool {
        match state.slots.get_mut(&receipt.message_id) {
            Some(slot) => match slot.visibility {
                Visibility::Leased { lease, .. } if lease == receipt.lease => {
                    slot.visibility = next;
                    true
                }
                _ => {
                    tracing::debug!(message_id = %receipt.message_id, lease = receipt.lease, "release with stale receipt ignored");
                    false
                }
            },
            None => false,
        }
    }

    /// Messages not yet acknowledged, in any visibility state.
    pub fn len(&self) -> usize {
        self.lock_state().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counts(&self) -> BufferCounts {
        let state = self.lock_state();
        let mut counts = BufferCounts::default();
        for slot in state.slots.values() {
            match slot.visibility {
                Visibility::Visible => counts.visible += 1,
                Visibility::Leased { .. } => counts.in_flight += 1,
                Visibility::Delayed { .. } => counts.delayed += 1,
            }
        }
        counts
    }
}
