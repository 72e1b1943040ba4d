//! # Asynchronous dispatch: parked chains and continuation controllers.
//!
//! The asynchronous firing path walks the merged listener sequence with an
//! explicit cursor instead of recursion:
//!
//! ```text
//! run(cursor):
//!   loop {
//!     past the end ───────► complete the future, stop
//!     sync entry ─────────► invoke, cursor += 1        (trampolined)
//!     async entry ────────► invoke with FireController
//!         listener already continued ──► cursor += 1, keep driving
//!         listener still pending ─────► park; whoever calls
//!                                       continue_fire() resumes from here
//!   }
//! ```
//!
//! ## Rules
//! - Exactly one thread drives a given chain at a time. The per-entry gate
//!   (`PENDING → PARKED → SPENT`) decides whether the invoking frame keeps
//!   driving or the continuing thread takes over.
//! - [`FireController::continue_fire`] must be called exactly once; the
//!   second call returns an error and advances nothing.
//! - A listener that panics before continuing is isolated: the fault is
//!   reported and the cursor still advances, so a faulty listener can never
//!   stall the chain.
//! - No lock is held while a listener runs; parking a chain blocks no
//!   thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;

use tokio::sync::oneshot;

use crate::error::EventBusError;
use crate::events::event::Event;
use crate::events::listener::{report_listener_panic, ErasedHandler, ListenerEntry};

/// The async entry has been invoked; nobody has continued or parked yet.
const PENDING: u8 = 0;
/// The invoking frame returned; the chain waits for `continue_fire`.
const PARKED: u8 = 1;
/// The continuation has been claimed; further calls are faults.
const SPENT: u8 = 2;

/// Shared state of one in-flight asynchronous dispatch.
pub(crate) struct AsyncDispatch {
    event: Arc<dyn Event>,
    entries: Arc<[ListenerEntry]>,
    /// Present for `fire_async`; `None` for the fire-and-forget path.
    /// Locked only to take the sender at completion, never around listener
    /// code.
    done: Mutex<Option<oneshot::Sender<()>>>,
}

impl AsyncDispatch {
    /// Starts a dispatch chain from the first entry.
    pub(crate) fn begin(
        event: Arc<dyn Event>,
        entries: Arc<[ListenerEntry]>,
        done: Option<oneshot::Sender<()>>,
    ) {
        let dispatch = Arc::new(Self {
            event,
            entries,
            done: Mutex::new(done),
        });
        Self::run(&dispatch, 0);
    }

    /// Drives the chain from `cursor` until it parks or completes.
    fn run(dispatch: &Arc<AsyncDispatch>, mut cursor: usize) {
        loop {
            let Some(entry) = dispatch.entries.get(cursor) else {
                dispatch.complete();
                return;
            };

            match &entry.handler {
                ErasedHandler::Sync(invoke) => {
                    let event = dispatch.event.as_ref();
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| invoke(event))) {
                        report_listener_panic(entry, payload.as_ref());
                    }
                    cursor += 1;
                }
                ErasedHandler::Async(invoke) => {
                    let gate = Arc::new(AtomicU8::new(PENDING));
                    let controller = FireController {
                        dispatch: Arc::clone(dispatch),
                        next: cursor + 1,
                        gate: Arc::clone(&gate),
                    };
                    let outcome =
                        catch_unwind(AssertUnwindSafe(|| invoke(&dispatch.event, controller)));
                    match outcome {
                        Ok(()) => {
                            if gate
                                .compare_exchange(
                                    PENDING,
                                    PARKED,
                                    Ordering::AcqRel,
                                    Ordering::Acquire,
                                )
                                .is_ok()
                            {
                                // Parked; the continuing thread resumes.
                                return;
                            }
                            // The listener continued before we could park, so
                            // this frame is still the driver.
                            cursor += 1;
                        }
                        Err(payload) => {
                            report_listener_panic(entry, payload.as_ref());
                            // Claim the continuation slot so a late
                            // continue_fire is rejected as a second call.
                            let _ = gate.compare_exchange(
                                PENDING,
                                SPENT,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            );
                            cursor += 1;
                        }
                    }
                }
            }
        }
    }

    fn complete(&self) {
        let mut guard = match self.done.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(sender) = guard.take() {
            let _ = sender.send(());
        }
    }
}

/// Per-dispatch continuation token handed to an asynchronous listener.
///
/// The listener must call [`continue_fire`](Self::continue_fire) exactly
/// once, from any thread, at any later time. The first call advances the
/// chain — inline when the invoking frame has already returned, otherwise
/// that frame keeps driving. Dropping the controller without continuing
/// parks the chain forever; a caller awaiting the event's future is
/// responsible for imposing a timeout.
pub struct FireController {
    dispatch: Arc<AsyncDispatch>,
    next: usize,
    gate: Arc<AtomicU8>,
}

impl FireController {
    /// Resumes dispatch past this listener.
    ///
    /// # Errors
    /// Returns [`EventBusError::ControllerAlreadyContinued`] on every call
    /// after the first; the chain is not advanced again.
    pub fn continue_fire(&self) -> Result<(), EventBusError> {
        match self
            .gate
            .compare_exchange(PENDING, SPENT, Ordering::AcqRel, Ordering::Acquire)
        {
            // The invoking frame is still active and will keep driving.
            Ok(_) => Ok(()),
            Err(PARKED) => {
                match self
                    .gate
                    .compare_exchange(PARKED, SPENT, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => {
                        AsyncDispatch::run(&self.dispatch, self.next);
                        Ok(())
                    }
                    Err(_) => Err(self.already_continued()),
                }
            }
            Err(_) => Err(self.already_continued()),
        }
    }

    fn already_continued(&self) -> EventBusError {
        tracing::error!(
            position = self.next,
            "continue_fire called more than once; ignoring"
        );
        EventBusError::ControllerAlreadyContinued
    }
}

impl std::fmt::Debug for FireController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FireController")
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

/// Future returned by [`EventBus::fire_async`](crate::EventBus::fire_async).
///
/// Completes with the (shared) event once every listener in the chain has
/// run. If an asynchronous listener abandons its controller the future stays
/// pending indefinitely — dispatch itself has no timeout, so the awaiting
/// caller imposes one.
pub struct EventFuture<E> {
    event: Arc<E>,
    rx: oneshot::Receiver<()>,
    state: FutureState,
}

enum FutureState {
    Waiting,
    Done,
    Stalled,
}

impl<E: Event> EventFuture<E> {
    pub(crate) fn new(event: Arc<E>, rx: oneshot::Receiver<()>) -> Self {
        Self {
            event,
            rx,
            state: FutureState::Waiting,
        }
    }

    /// The event being dispatched, without waiting for completion.
    pub fn event(&self) -> &Arc<E> {
        &self.event
    }
}

impl<E: Event> std::fmt::Debug for EventFuture<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            FutureState::Waiting => "waiting",
            FutureState::Done => "done",
            FutureState::Stalled => "stalled",
        };
        f.debug_struct("EventFuture")
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

impl<E: Event> std::future::Future for EventFuture<E> {
    type Output = Arc<E>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.state {
            FutureState::Done => Poll::Ready(Arc::clone(&this.event)),
            FutureState::Stalled => Poll::Pending,
            FutureState::Waiting => match std::pin::Pin::new(&mut this.rx).poll(cx) {
                Poll::Ready(Ok(())) => {
                    this.state = FutureState::Done;
                    Poll::Ready(Arc::clone(&this.event))
                }
                // Every controller of the chain was dropped without
                // continuing: the chain is abandoned, the future stalls.
                Poll::Ready(Err(_)) => {
                    this.state = FutureState::Stalled;
                    Poll::Pending
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
