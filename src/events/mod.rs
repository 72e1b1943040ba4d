//! Typed events and the priority-ordered dispatch engine.
//!
//! This module groups the event **data model** and the **bus** that fires
//! events at registered listeners.
//!
//! ## Contents
//! - [`Event`], [`AsyncEvent`], [`Cancellable`], [`EventFamily`] capability
//!   traits
//! - [`EventBus`] registration and firing surface
//! - [`FireController`] / [`EventFuture`] asynchronous continuation support
//! - [`EventHandler`] / [`AsyncEventHandler`] registration-object contracts
//! - [`priorities`] named priority constants
//!
//! ## Quick reference
//! - **Fire**: `fire_event` (sync), `fire_async` (future),
//!   `fire_async_without_future` (fire-and-forget).
//! - **Listen**: `register_listener`, `register_async_listener`,
//!   `register_handler`, `register_async_handler`,
//!   `register_family_listener`, `register_listener_ignoring_cancelled`.
//!
//! See `registry` for the notification events the service registry feeds
//! through this engine.

mod bus;
mod controller;
mod event;
mod index;
mod listener;

pub use bus::EventBus;
pub use controller::{EventFuture, FireController};
pub use event::{AsyncEvent, Cancellable, DispatchTypes, Event, EventFamily};
pub use listener::{priorities, AsyncEventHandler, EventHandler, ListenerHandle};
