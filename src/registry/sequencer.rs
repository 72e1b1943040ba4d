//! # Event sequencer: single-owner, lock-free FIFO firing.
//!
//! The registry mutates its snapshots from arbitrary threads and must emit
//! its notification events in a consistent order — without ever holding a
//! lock across a call into arbitrary listener code, which is where classic
//! mutex designs deadlock.
//!
//! ## State machine
//! ```text
//!             CAS ok                      pop Some
//! IDLE ────────────────► POLLING ───────────────────► FIRING
//!  ▲                        │  ▲                         │
//!  │      pop None          │  └────── dispatch done ────┘
//!  └────────────────────────┘
//! ```
//!
//! `fire_events` behavior by observed state:
//! - `IDLE` — the CAS wins and the caller becomes the owner, draining the
//!   queue one event at a time until it is empty.
//! - `POLLING` — ownership is about to resolve either way; spin briefly and
//!   retry the CAS.
//! - `FIRING` — return immediately: the owner re-polls the queue after
//!   every single dispatch and only releases once it observed the queue
//!   empty, so it is guaranteed to fire anything enqueued just now.
//!
//! ## Rules
//! - The flag is a plain atomic, never a blocking mutex: listener code may
//!   take arbitrary locks or reenter the sequencer (e.g. mutate the
//!   registry from a listener) without lock-ordering deadlock.
//! - Exactly one thread fires at a time; events fire exactly once, in FIFO
//!   order, and offered events are never dropped.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::events::{Event, EventBus};

/// Nobody owns the queue.
const IDLE: u8 = 0;
/// An owner holds the queue, between dispatches.
const POLLING: u8 = 1;
/// The owner is inside a dispatch call.
const FIRING: u8 = 2;

/// FIFO queue of pending notification events with single-owner firing.
pub(crate) struct EventSequencer {
    queue: SegQueue<Arc<dyn Event>>,
    state: AtomicU8,
}

impl EventSequencer {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            state: AtomicU8::new(IDLE),
        }
    }

    /// Enqueues an event. Non-blocking and lock-free; never fires anything.
    pub(crate) fn offer(&self, event: Arc<dyn Event>) {
        self.queue.push(event);
    }

    /// Drains and fires pending events, unless another thread already does.
    ///
    /// Returns once the queue has been observed empty by some owner; that
    /// owner is not necessarily this thread.
    pub(crate) fn fire_events(&self, bus: &EventBus) {
        loop {
            match self
                .state
                .compare_exchange(IDLE, POLLING, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                // The active owner re-polls after its current dispatch and
                // will pick up whatever we just offered.
                Err(FIRING) => return,
                Err(_) => std::hint::spin_loop(),
            }
        }

        loop {
            match self.queue.pop() {
                Some(event) => {
                    self.state.store(FIRING, Ordering::Release);
                    bus.fire_async_erased(event);
                    self.state.store(POLLING, Ordering::Release);
                }
                None => {
                    self.state.store(IDLE, Ordering::Release);
                    // An offer may have slipped in between the empty pop and
                    // the release; reclaim unless someone else already has.
                    if self.queue.is_empty() {
                        return;
                    }
                    if self
                        .state
                        .compare_exchange(IDLE, POLLING, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
    }
}
