//! Telemetry event queue.
//!
//! Many producers (one per periodic emitter context) feed a single
//! consumer (the telemetry sink) through a bounded channel:
//!
//! ```text
//!  Emitter 0 ──┐
//!  Emitter 1 ──┼──▶ [ EventQueue<N> : FIFO ] ──▶ TelemetrySink
//!  Emitter n ──┘        (overflow policy)
//! ```
//!
//! The channel provides its own exclusion, so `enqueue` is callable from any
//! context. Events are `Copy` records moved by value: an event is owned by
//! its producer until stored, by the queue while stored, and by the sink
//! once dequeued. Nothing is heap-allocated per event.
//!
//! A full queue never halts the process. What happens instead is chosen by
//! [`OverflowPolicy`] and is visible in [`QueueStats`].

use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use serde::{Deserialize, Serialize};

/// Depth of the process-wide telemetry queue.
pub const TELEMETRY_QUEUE_DEPTH: usize = 32;

/// The process-wide telemetry queue. Created once, never destroyed.
pub static TELEMETRY_QUEUE: EventQueue<TELEMETRY_QUEUE_DEPTH> =
    EventQueue::new(OverflowPolicy::RejectAndCount);

/// One toggle report from a periodic emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    /// Which emitter produced this event.
    pub source_id: u8,
    /// That emitter's tick count at the time of the toggle.
    pub sequence: u32,
}

/// What `enqueue` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum OverflowPolicy {
    /// Wait for the consumer to make room. The producer's period slips.
    Block = 0,
    /// Discard the oldest stored event to make room for the new one.
    DropOldest = 1,
    /// Discard the new event and count it.
    #[default]
    RejectAndCount = 2,
}

impl OverflowPolicy {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Block,
            1 => Self::DropOldest,
            _ => Self::RejectAndCount,
        }
    }
}

/// Outcome of a single [`EventQueue::enqueue`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Stored without displacing anything.
    Stored,
    /// Stored after evicting the oldest event ([`OverflowPolicy::DropOldest`]).
    StoredAfterEviction,
    /// Not stored ([`OverflowPolicy::RejectAndCount`]).
    Rejected,
}

impl Enqueued {
    pub fn is_stored(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Counter snapshot. While no enqueue or dequeue is in flight,
/// `stored == delivered + evicted + len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Events that entered the queue.
    pub stored: u32,
    /// Events turned away on a full queue.
    pub rejected: u32,
    /// Stored events discarded to make room for newer ones.
    pub evicted: u32,
    /// Events handed to the consumer.
    pub delivered: u32,
}

/// Bounded MPSC event queue with blocking dequeue.
pub struct EventQueue<const N: usize> {
    channel: Channel<CriticalSectionRawMutex, Event, N>,
    policy: AtomicU8,
    stored: AtomicU32,
    rejected: AtomicU32,
    evicted: AtomicU32,
    delivered: AtomicU32,
}

impl<const N: usize> EventQueue<N> {
    pub const fn new(policy: OverflowPolicy) -> Self {
        Self {
            channel: Channel::new(),
            policy: AtomicU8::new(policy as u8),
            stored: AtomicU32::new(0),
            rejected: AtomicU32::new(0),
            evicted: AtomicU32::new(0),
            delivered: AtomicU32::new(0),
        }
    }

    /// Change the overflow policy. Call before producers start.
    pub fn set_policy(&self, policy: OverflowPolicy) {
        self.policy.store(policy as u8, Ordering::Relaxed);
    }

    pub fn policy(&self) -> OverflowPolicy {
        OverflowPolicy::from_u8(self.policy.load(Ordering::Relaxed))
    }

    /// Append `event` at the tail. Never panics; blocks only under
    /// [`OverflowPolicy::Block`].
    pub fn enqueue(&self, event: Event) -> Enqueued {
        match self.policy() {
            OverflowPolicy::Block => {
                futures_lite::future::block_on(self.channel.send(event));
                self.stored.fetch_add(1, Ordering::Relaxed);
                Enqueued::Stored
            }
            OverflowPolicy::RejectAndCount => match self.channel.try_send(event) {
                Ok(()) => {
                    self.stored.fetch_add(1, Ordering::Relaxed);
                    Enqueued::Stored
                }
                Err(TrySendError::Full(_)) => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    Enqueued::Rejected
                }
            },
            OverflowPolicy::DropOldest => {
                let mut pending = event;
                let mut evicted = false;
                loop {
                    match self.channel.try_send(pending) {
                        Ok(()) => {
                            self.stored.fetch_add(1, Ordering::Relaxed);
                            return if evicted {
                                Enqueued::StoredAfterEviction
                            } else {
                                Enqueued::Stored
                            };
                        }
                        Err(TrySendError::Full(back)) => {
                            pending = back;
                            // The consumer may have emptied a slot between the
                            // failed send and this receive; either way we retry.
                            if self.channel.try_receive().is_ok() {
                                self.evicted.fetch_add(1, Ordering::Relaxed);
                                evicted = true;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Remove and return the head, blocking until one exists.
    pub fn dequeue(&self) -> Event {
        let event = futures_lite::future::block_on(self.channel.receive());
        self.delivered.fetch_add(1, Ordering::Relaxed);
        event
    }

    /// Remove and return the head if one exists.
    pub fn try_dequeue(&self) -> Option<Event> {
        let event = self.channel.try_receive().ok()?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Some(event)
    }

    /// Async form of [`dequeue`](Self::dequeue) for executor-driven consumers.
    pub async fn dequeue_async(&self) -> Event {
        let event = self.channel.receive().await;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        event
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            stored: self.stored.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }
}
