//! # omnibus
//!
//! **Omnibus** is an in-process event bus and priority service registry.
//!
//! It provides typed events with priority-ordered listeners, an async
//! dispatch mode where each listener explicitly continues the chain, and a
//! service registry that publishes prioritized providers and announces
//! every change as an event. The crate is designed as a plugin/extension
//! backbone for larger applications.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   register_listener / register_async_listener        fire_event /
//!   register_handler / register_family_listener         fire_async
//!                  │                                        │
//!                  ▼                                        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  EventBus                                                         │
//! │  - ListenerIndex (ArcSwap COW map: TypeId -> sorted entry array)  │
//! │  - baked dispatch cache (merged per-event order, generation-keyed)│
//! └──────┬───────────────────────────────────────────────┬────────────┘
//!        │ sync path                                     │ async path
//!        ▼                                               ▼
//!   in-place loop over entries,             AsyncDispatch + FireController
//!   panics isolated per listener            (each listener parks the chain
//!                                            and continues it exactly once)
//!                                                        │
//!                                                        ▼
//!                                            EventFuture<E> resolves when
//!                                            the chain passes the last entry
//!
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ServiceRegistry (ArcSwap COW snapshots, winner-last arrays)      │
//! │  - register / unregister / get_provider / get_all_registrations   │
//! │  - emits RegistrationAdded / RegistrationRemoved /                │
//! │    ServiceChangeEvent through the EventSequencer                  │
//! └──────────────────────────────┬────────────────────────────────────┘
//!                                ▼
//!                  EventSequencer (lock-free FIFO,
//!                  single owner fires at a time) ──► EventBus
//! ```
//!
//! ### Dispatch order
//! ```text
//! fire_event(E) / fire_async(E)
//!   ├─► collect entries for every TypeId in E::dispatch_types()
//!   │     (the event's own type plus any EventFamily markers)
//!   ├─► merge-sort by (priority, registration seq) ascending
//!   └─► invoke in order
//!         ├─ sync listener panic ─► logged, next listener still runs
//!         ├─ async listener      ─► chain parks until continue_fire()
//!         └─ Cancellable events  ─► only opted-in listeners re-check
//!                                   the cancelled flag before running
//! ```
//!
//! ## Features
//! | Area            | Description                                                   | Key types / traits                          |
//! |-----------------|---------------------------------------------------------------|---------------------------------------------|
//! | **Events**      | Define typed events, families, and cancellation.              | [`Event`], [`AsyncEvent`], [`Cancellable`]  |
//! | **Listeners**   | Closure or object listeners at explicit priorities.           | [`EventHandler`], [`priorities`]            |
//! | **Dispatch**    | Sync firing plus parked async chains with continuation.       | [`EventBus`], [`FireController`]            |
//! | **Registry**    | Prioritized providers with copy-on-write snapshots.           | [`ServiceRegistry`], [`Registration`]       |
//! | **Notifications**| Observe registry changes as ordinary events.                 | [`ServiceChangeEvent`], [`RegistryEvents`]  |
//! | **Errors**      | Typed misuse errors with stable log labels.                   | [`EventBusError`], [`RegistryError`]        |
//!
//! ## Example
//! ```rust
//! use omnibus::{EventBus, Event, priorities};
//!
//! struct UserJoined {
//!     name: String,
//! }
//! impl Event for UserJoined {}
//!
//! let bus = EventBus::new();
//!
//! bus.register_listener::<UserJoined, _>(priorities::NORMAL, |event: &UserJoined| {
//!     println!("welcome, {}", event.name);
//! });
//! bus.register_listener::<UserJoined, _>(priorities::HIGHEST, |event: &UserJoined| {
//!     println!("{} joined (audit)", event.name);
//! });
//!
//! // NORMAL runs before HIGHEST; the event comes back to the caller.
//! let event = bus.fire_event(UserJoined { name: "ada".into() })?;
//! assert_eq!(event.name, "ada");
//! # Ok::<(), omnibus::EventBusError>(())
//! ```

mod error;
mod events;
mod omnibus;
mod registry;

// ---- Public re-exports ----

pub use error::{EventBusError, RegistryError};
pub use events::{
    priorities, AsyncEvent, AsyncEventHandler, Cancellable, DispatchTypes, Event, EventBus,
    EventFamily, EventFuture, EventHandler, FireController, ListenerHandle,
};
pub use omnibus::Omnibus;
pub use registry::{
    Registration, RegistrationAdded, RegistrationRemoved, RegistryEvents, ServiceChangeEvent,
    ServiceRegistry,
};
