//! Error types used by the event bus and the service registry.
//!
//! This module defines two error enums:
//!
//! - [`EventBusError`] — misuse of the dispatch API (wrong firing path,
//!   continuing a dispatch chain more than once).
//! - [`RegistryError`] — conflicts raised by service registration.
//!
//! Both types provide an `as_label` helper returning a short stable
//! snake_case label for logs/metrics.
//!
//! Faults raised *inside* listener code (panics, a listener continuing its
//! chain twice) are not surfaced through these types to the firing caller:
//! they are isolated per listener, reported through `tracing`, and dispatch
//! proceeds to the next listener.

use thiserror::Error;

/// # Errors produced by misuse of the event bus.
///
/// These represent programming mistakes by the *caller* of the bus, reported
/// synchronously at the offending call site. They are never produced by
/// well-formed firing of well-formed events.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EventBusError {
    /// An async-capable event was fired through the synchronous path.
    ///
    /// Async-capable events may carry asynchronous listeners, which the
    /// synchronous path cannot drive; use `fire_async` or
    /// `fire_async_without_future` instead.
    #[error("event type {event_type} is async-capable and must be fired through the async path")]
    AsyncCapableFiredSync {
        /// Type name of the offending event.
        event_type: &'static str,
    },

    /// A non-async-capable event was fired through the asynchronous path.
    ///
    /// This usually means an [`AsyncEvent`](crate::AsyncEvent) implementation
    /// forgot to override [`Event::async_capable`](crate::Event::async_capable)
    /// to return `true`.
    #[error("event type {event_type} is not async-capable")]
    NotAsyncCapable {
        /// Type name of the offending event.
        event_type: &'static str,
    },

    /// [`FireController::continue_fire`](crate::FireController::continue_fire)
    /// was called more than once for the same dispatch position.
    ///
    /// The first call advanced the chain; subsequent calls advance nothing.
    #[error("dispatch chain already continued; continue_fire must be called exactly once")]
    ControllerAlreadyContinued,
}

impl EventBusError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use omnibus::EventBusError;
    ///
    /// let err = EventBusError::ControllerAlreadyContinued;
    /// assert_eq!(err.as_label(), "controller_already_continued");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            EventBusError::AsyncCapableFiredSync { .. } => "async_capable_fired_sync",
            EventBusError::NotAsyncCapable { .. } => "not_async_capable",
            EventBusError::ControllerAlreadyContinued => "controller_already_continued",
        }
    }
}

/// # Errors produced by service registration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The same provider instance is already registered for this service.
    ///
    /// Detection is by provider identity (the allocation behind the `Arc`),
    /// not by value equality. The registry snapshot is left untouched.
    #[error("provider already registered for service {service}")]
    DuplicateProvider {
        /// Type name of the service.
        service: &'static str,
    },
}

impl RegistryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::DuplicateProvider { .. } => "duplicate_provider",
        }
    }
}
