//! # Event capability traits.
//!
//! An [`Event`] is a plain value with no required fields; firing one through
//! the [`EventBus`](crate::EventBus) invokes every listener registered
//! against any of the type identities the event dispatches under.
//!
//! Two orthogonal refinements:
//! - [`Cancellable`] — carries a one-way cancel flag that must be visible
//!   across threads (implement it with an `AtomicBool`).
//! - [`AsyncEvent`] — may be fired through the asynchronous path and may be
//!   observed by asynchronous listeners.
//!
//! ## Dispatch types
//! There is no runtime type-hierarchy walk: an event *enumerates* the
//! identities it dispatches under via [`Event::dispatch_types`]: its own
//! `TypeId` plus any [`EventFamily`] markers it belongs to. Listeners registered against a family marker are
//! merged into the same global priority order as listeners registered
//! against the concrete type — never appended as a separate group.
//!
//! `dispatch_types` must be a pure function of the event *type*: every value
//! of one type has to report the same set, because the merged dispatch order
//! is cached per runtime type.

use std::any::{Any, TypeId};

use smallvec::SmallVec;

/// Set of type identities an event dispatches under.
///
/// Small and copied per fire; inline capacity covers the common case of a
/// concrete type plus a handful of family markers.
pub type DispatchTypes = SmallVec<[TypeId; 4]>;

/// Capability tag for values that can be fired through the bus.
///
/// No methods are required; the defaults describe a synchronous-only event
/// that dispatches under its own concrete type.
///
/// # Example
/// ```
/// #[derive(Debug)]
/// struct UserJoined {
///     name: &'static str,
/// }
///
/// impl omnibus::Event for UserJoined {}
/// ```
pub trait Event: Any + Send + Sync {
    /// Whether this event may travel through the asynchronous firing path.
    ///
    /// Types implementing [`AsyncEvent`] must override this to return
    /// `true`; the firing paths verify it and reject mismatches as usage
    /// errors.
    fn async_capable(&self) -> bool {
        false
    }

    /// The type identities this event dispatches under.
    ///
    /// Defaults to the event's own concrete type. Override to add
    /// [`EventFamily`] markers:
    ///
    /// ```
    /// use omnibus::{DispatchTypes, Event, EventFamily};
    /// use std::any::TypeId;
    ///
    /// struct Lifecycle;
    /// impl EventFamily for Lifecycle {}
    ///
    /// #[derive(Debug)]
    /// struct Startup;
    ///
    /// impl Event for Startup {
    ///     fn dispatch_types(&self) -> DispatchTypes {
    ///         DispatchTypes::from_slice(&[TypeId::of::<Startup>(), TypeId::of::<Lifecycle>()])
    ///     }
    /// }
    /// ```
    fn dispatch_types(&self) -> DispatchTypes {
        DispatchTypes::from_slice(&[self.type_id()])
    }
}

/// Marker for events that may be fired asynchronously.
///
/// Asynchronous listeners can only be registered against `AsyncEvent` types,
/// so "async listener on a sync-only event" is a compile error rather than
/// a runtime check. Implementations must also override
/// [`Event::async_capable`] to return `true` — the async firing path
/// double-checks it so a forgotten override fails fast at the call site.
pub trait AsyncEvent: Event {}

/// Events carrying a one-way cancel flag.
///
/// Cancellation does not short-circuit dispatch: all listeners still run
/// unless they were registered to skip already-cancelled events, and the
/// firing caller reads the flag once dispatch has completed. The flag must
/// be visible across threads.
///
/// # Example
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use omnibus::{Cancellable, Event};
///
/// #[derive(Debug, Default)]
/// struct ChatMessage {
///     cancelled: AtomicBool,
/// }
///
/// impl Event for ChatMessage {}
///
/// impl Cancellable for ChatMessage {
///     fn cancelled(&self) -> bool {
///         self.cancelled.load(Ordering::Acquire)
///     }
///     fn cancel(&self) {
///         self.cancelled.store(true, Ordering::Release);
///     }
/// }
/// ```
pub trait Cancellable: Event {
    /// Reads the cancel flag.
    fn cancelled(&self) -> bool;

    /// Sets the cancel flag. One-way: there is no un-cancel.
    fn cancel(&self);
}

/// Marker type grouping related events for shared listeners.
///
/// A family is never fired itself; events name it in their
/// [`Event::dispatch_types`] and listeners register against it with
/// [`EventBus::register_family_listener`](crate::EventBus::register_family_listener).
pub trait EventFamily: 'static {}
