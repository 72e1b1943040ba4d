//! # Listener entries, handles, and handler contracts.
//!
//! A listener is stored as an erased entry `{priority, seq, handler}` inside
//! the per-type index. Ordering is **ascending** by `(priority, seq)`:
//! lower priorities fire first, and equal priorities fire in registration
//! order (`seq` is a monotonic per-bus counter, so the order is reproducible
//! across runs).
//!
//! ## Registration styles
//! - **Functional**: a closure passed to
//!   [`EventBus::register_listener`](crate::EventBus::register_listener) or
//!   [`EventBus::register_async_listener`](crate::EventBus::register_async_listener).
//!   Every call creates a new independent listener, even for value-equal
//!   closures.
//! - **Registration object**: an `Arc<dyn EventHandler<E>>` (or
//!   [`AsyncEventHandler`]) passed to
//!   [`EventBus::register_handler`](crate::EventBus::register_handler).
//!   Registering the *same* `Arc` for the same event type and priority is a
//!   no-op returning the original handle.

use std::any::Any;
use std::any::TypeId;
use std::sync::Arc;

use crate::events::controller::FireController;
use crate::events::event::{AsyncEvent, Event};

/// Named listener priority constants.
///
/// Priorities are signed bytes; listeners fire in ascending order, so
/// `LOWEST` observes an event first and `HIGHEST` has the last word.
pub mod priorities {
    /// Fires before every other named priority.
    pub const LOWEST: i8 = -96;
    /// Fires after `LOWEST`, before `NORMAL`.
    pub const LOW: i8 = -48;
    /// The default priority.
    pub const NORMAL: i8 = 0;
    /// Fires after `NORMAL`, before `HIGHEST`.
    pub const HIGH: i8 = 48;
    /// Fires after every other named priority.
    pub const HIGHEST: i8 = 96;
}

/// Contract for registration-object style synchronous handlers.
///
/// Handlers must not block for long: they run inline on whichever thread
/// fires (or resumes) the event.
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    /// Handle a single event.
    fn handle(&self, event: &E);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Contract for registration-object style asynchronous handlers.
///
/// The handler receives the shared event and a [`FireController`] bound to
/// its position in the dispatch chain. It must arrange for
/// [`FireController::continue_fire`] to be called exactly once, from any
/// thread, at any later time; until then the remainder of the chain is
/// parked without blocking anyone.
pub trait AsyncEventHandler<E: AsyncEvent>: Send + Sync + 'static {
    /// Handle a single event and later continue the chain.
    fn handle(&self, event: Arc<E>, controller: FireController);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Opaque token returned by listener registration, used only for removal.
///
/// Equality is handle identity: two handles are equal exactly when they
/// refer to the same registration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    pub(crate) event_type: TypeId,
    pub(crate) id: u64,
}

/// Type-erased handler invocation.
#[derive(Clone)]
pub(crate) enum ErasedHandler {
    /// Invoked inline; the cursor advances when it returns.
    Sync(Arc<dyn Fn(&dyn Event) + Send + Sync>),
    /// Invoked with a controller; the cursor advances on `continue_fire`.
    Async(Arc<dyn Fn(&Arc<dyn Event>, FireController) + Send + Sync>),
}

/// One registered listener, immutable once published.
#[derive(Clone)]
pub(crate) struct ListenerEntry {
    pub(crate) priority: i8,
    /// Monotonic registration sequence; doubles as the handle id and the
    /// deterministic tie-break within one priority band.
    pub(crate) seq: u64,
    /// Type name of the registered event type (for fault reports).
    pub(crate) event_type_name: &'static str,
    /// Identity of a registration-object handler, for duplicate detection.
    pub(crate) identity: Option<usize>,
    pub(crate) handler: ErasedHandler,
}

impl ListenerEntry {
    pub(crate) fn sort_key(&self) -> (i8, u64) {
        (self.priority, self.seq)
    }
}

/// Best-effort extraction of a panic payload message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Reports an isolated listener fault; dispatch continues past it.
pub(crate) fn report_listener_panic(entry: &ListenerEntry, payload: &(dyn Any + Send)) {
    tracing::error!(
        listener = entry.seq,
        event_type = entry.event_type_name,
        panic = panic_message(payload),
        "event listener panicked; continuing dispatch"
    );
}
