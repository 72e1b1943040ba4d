//! # EventBus: priority-ordered listener dispatch.
//!
//! [`EventBus`] owns the listener index and drives both firing paths:
//!
//! ```text
//! fire_event(e)                 fire_async(e) ─► EventFuture
//!      │                              │
//!      ▼                              ▼
//!  merged order ◄── bake cache ── merged order
//!      │                              │
//!  plain call loop              cursor loop (controller.rs)
//!      │                              │
//!  panics isolated,             sync entries trampolined,
//!  every listener runs          async entries park the chain
//! ```
//!
//! ## Rules
//! - The dispatch order for a fired event is the **merged** union of the
//!   listeners of every type in the event's
//!   [`dispatch_types`](crate::Event::dispatch_types), ordered globally by
//!   `(priority, registration)` — never grouped per type.
//! - The merged order is cached per runtime type and revalidated against the
//!   index generation, so any registration touching an involved type
//!   invalidates it.
//! - Listener panics are caught, reported, and never skip, reorder, or
//!   re-run the remaining listeners.
//! - Cancellation does not short-circuit: listeners registered with
//!   [`register_listener_ignoring_cancelled`](EventBus::register_listener_ignoring_cancelled)
//!   re-check the flag immediately before their own invocation; everyone
//!   else runs regardless.
//!
//! The bus is cheap to clone (an `Arc` handle) and fully thread-safe; it
//! owns no threads and runs listeners on whichever thread fires or resumes.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::oneshot;

use crate::error::EventBusError;
use crate::events::controller::{AsyncDispatch, EventFuture, FireController};
use crate::events::event::{AsyncEvent, Cancellable, Event, EventFamily};
use crate::events::index::ListenerIndex;
use crate::events::listener::{
    report_listener_panic, AsyncEventHandler, ErasedHandler, EventHandler, ListenerEntry,
    ListenerHandle,
};

/// Merged dispatch order for one runtime event type, tagged with the index
/// generation it was computed from.
struct Baked {
    generation: u64,
    entries: Arc<[ListenerEntry]>,
}

struct BusInner {
    index: ListenerIndex,
    baked: ArcSwap<HashMap<TypeId, Arc<Baked>>>,
}

/// Priority-ordered event dispatcher.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                index: ListenerIndex::new(),
                baked: ArcSwap::from_pointee(HashMap::new()),
            }),
        }
    }

    // ---------------------------
    // Firing
    // ---------------------------

    /// Fires an event synchronously through every applicable listener.
    ///
    /// Listeners run inline on the calling thread in merged priority order.
    /// The event is returned afterwards so the caller can inspect it (for
    /// [`Cancellable`] events, typically `!event.cancelled()`).
    ///
    /// # Errors
    /// [`EventBusError::AsyncCapableFiredSync`] if the event is
    /// async-capable; such events must go through [`fire_async`]
    /// (or [`fire_async_without_future`]).
    ///
    /// [`fire_async`]: EventBus::fire_async
    /// [`fire_async_without_future`]: EventBus::fire_async_without_future
    pub fn fire_event<E: Event>(&self, event: E) -> Result<E, EventBusError> {
        if event.async_capable() {
            return Err(EventBusError::AsyncCapableFiredSync {
                event_type: std::any::type_name::<E>(),
            });
        }
        let entries = self.baked_for(&event);
        for entry in entries.iter() {
            match &entry.handler {
                ErasedHandler::Sync(invoke) => {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| invoke(&event))) {
                        report_listener_panic(entry, payload.as_ref());
                    }
                }
                // Unreachable through the typed API; an inconsistent
                // async_capable override is the only way here.
                ErasedHandler::Async(_) => {
                    tracing::error!(
                        listener = entry.seq,
                        event_type = entry.event_type_name,
                        "async listener present in synchronous dispatch; skipping"
                    );
                }
            }
        }
        Ok(event)
    }

    /// Fires an async-capable event and returns a future completing with it
    /// once the whole listener chain has run.
    ///
    /// Synchronous listeners run inline (trampolined, no stack growth);
    /// asynchronous listeners park the chain until they continue it through
    /// their [`FireController`]. The returned future may already be complete
    /// when this returns.
    ///
    /// # Errors
    /// [`EventBusError::NotAsyncCapable`] if
    /// [`async_capable`](Event::async_capable) returns `false`.
    pub fn fire_async<E: AsyncEvent>(&self, event: E) -> Result<EventFuture<E>, EventBusError> {
        let event = self.check_async(event)?;
        let erased: Arc<dyn Event> = event.clone();
        let entries = self.baked_for(erased.as_ref());
        let (tx, rx) = oneshot::channel();
        AsyncDispatch::begin(erased, entries, Some(tx));
        Ok(EventFuture::new(event, rx))
    }

    /// Like [`fire_async`](EventBus::fire_async) but skips constructing the
    /// completion future entirely.
    ///
    /// # Errors
    /// [`EventBusError::NotAsyncCapable`] if
    /// [`async_capable`](Event::async_capable) returns `false`.
    pub fn fire_async_without_future<E: AsyncEvent>(&self, event: E) -> Result<(), EventBusError> {
        let event = self.check_async(event)?;
        let erased: Arc<dyn Event> = event;
        let entries = self.baked_for(erased.as_ref());
        AsyncDispatch::begin(erased, entries, None);
        Ok(())
    }

    /// Fires an already-erased async-capable event (sequencer path).
    pub(crate) fn fire_async_erased(&self, event: Arc<dyn Event>) {
        let entries = self.baked_for(event.as_ref());
        AsyncDispatch::begin(event, entries, None);
    }

    fn check_async<E: AsyncEvent>(&self, event: E) -> Result<Arc<E>, EventBusError> {
        if !event.async_capable() {
            return Err(EventBusError::NotAsyncCapable {
                event_type: std::any::type_name::<E>(),
            });
        }
        Ok(Arc::new(event))
    }

    // ---------------------------
    // Registration
    // ---------------------------

    /// Registers a synchronous functional listener.
    ///
    /// Every call creates a new independent listener, even for value-equal
    /// closures. Equal priorities fire in registration order.
    pub fn register_listener<E, F>(&self, priority: i8, listener: F) -> ListenerHandle
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let invoke = move |ev: &dyn Event| {
            let any: &dyn Any = ev;
            if let Some(event) = any.downcast_ref::<E>() {
                listener(event);
            }
        };
        self.register_erased::<E>(None, ErasedHandler::Sync(Arc::new(invoke)), priority)
    }

    /// Registers a synchronous listener that skips already-cancelled events.
    ///
    /// The cancel flag is re-checked immediately before *this* listener is
    /// invoked, because an earlier listener in the same dispatch may have
    /// cancelled the event.
    pub fn register_listener_ignoring_cancelled<E, F>(
        &self,
        priority: i8,
        listener: F,
    ) -> ListenerHandle
    where
        E: Event + Cancellable,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register_listener::<E, _>(priority, move |event| {
            if !event.cancelled() {
                listener(event);
            }
        })
    }

    /// Registers an asynchronous functional listener.
    ///
    /// The listener receives the shared event and a [`FireController`]; it
    /// must continue the chain exactly once, from any thread.
    pub fn register_async_listener<E, F>(&self, priority: i8, listener: F) -> ListenerHandle
    where
        E: AsyncEvent,
        F: Fn(Arc<E>, FireController) + Send + Sync + 'static,
    {
        let invoke = move |ev: &Arc<dyn Event>, controller: FireController| {
            let any: Arc<dyn Any + Send + Sync> = ev.clone();
            match any.downcast::<E>() {
                Ok(event) => listener(event, controller),
                // Type mismatch cannot happen for typed registrations; keep
                // the chain moving if it somehow does.
                Err(_) => {
                    let _ = controller.continue_fire();
                }
            }
        };
        self.register_erased::<E>(None, ErasedHandler::Async(Arc::new(invoke)), priority)
    }

    /// Registers a registration-object style synchronous handler.
    ///
    /// Registering the *same* handler `Arc` at the same priority for the
    /// same event type is a no-op returning the original handle; a different
    /// priority (or a different `Arc`) creates a distinct listener.
    pub fn register_handler<E>(
        &self,
        priority: i8,
        handler: Arc<dyn EventHandler<E>>,
    ) -> ListenerHandle
    where
        E: Event,
    {
        let identity = Arc::as_ptr(&handler) as *const () as usize;
        let invoke = move |ev: &dyn Event| {
            let any: &dyn Any = ev;
            if let Some(event) = any.downcast_ref::<E>() {
                handler.handle(event);
            }
        };
        self.register_erased::<E>(
            Some(identity),
            ErasedHandler::Sync(Arc::new(invoke)),
            priority,
        )
    }

    /// Registers a registration-object style asynchronous handler, with the
    /// same duplicate semantics as [`register_handler`](EventBus::register_handler).
    pub fn register_async_handler<E>(
        &self,
        priority: i8,
        handler: Arc<dyn AsyncEventHandler<E>>,
    ) -> ListenerHandle
    where
        E: AsyncEvent,
    {
        let identity = Arc::as_ptr(&handler) as *const () as usize;
        let invoke = move |ev: &Arc<dyn Event>, controller: FireController| {
            let any: Arc<dyn Any + Send + Sync> = ev.clone();
            match any.downcast::<E>() {
                Ok(event) => handler.handle(event, controller),
                Err(_) => {
                    let _ = controller.continue_fire();
                }
            }
        };
        self.register_erased::<E>(
            Some(identity),
            ErasedHandler::Async(Arc::new(invoke)),
            priority,
        )
    }

    /// Registers a synchronous listener against an [`EventFamily`] marker.
    ///
    /// The listener observes every event whose
    /// [`dispatch_types`](Event::dispatch_types) names the family, merged
    /// into the same global priority order as type-specific listeners.
    pub fn register_family_listener<M, F>(&self, priority: i8, listener: F) -> ListenerHandle
    where
        M: EventFamily,
        F: Fn(&dyn Event) + Send + Sync + 'static,
    {
        let id = self.inner.index.add(
            TypeId::of::<M>(),
            std::any::type_name::<M>(),
            priority,
            None,
            ErasedHandler::Sync(Arc::new(listener)),
        );
        ListenerHandle {
            event_type: TypeId::of::<M>(),
            id,
        }
    }

    /// Removes a previously registered listener. Idempotent.
    pub fn unregister_listener(&self, handle: &ListenerHandle) {
        self.inner.index.remove(handle.event_type, handle.id);
    }

    fn register_erased<E: Event>(
        &self,
        identity: Option<usize>,
        handler: ErasedHandler,
        priority: i8,
    ) -> ListenerHandle {
        let event_type = TypeId::of::<E>();
        let id = self.inner.index.add(
            event_type,
            std::any::type_name::<E>(),
            priority,
            identity,
            handler,
        );
        ListenerHandle { event_type, id }
    }

    // ---------------------------
    // Merged-order cache
    // ---------------------------

    /// Returns the merged dispatch order for the event's runtime type,
    /// recomputing it when the listener index has mutated since it was
    /// baked.
    fn baked_for(&self, event: &dyn Event) -> Arc<[ListenerEntry]> {
        let key = event.type_id();
        let generation = self.inner.index.generation();

        if let Some(baked) = self.inner.baked.load().get(&key) {
            if baked.generation == generation {
                return Arc::clone(&baked.entries);
            }
        }

        let entries: Arc<[ListenerEntry]> =
            self.inner.index.merged(&event.dispatch_types()).into();

        // Cache only if the index did not move underneath the merge;
        // otherwise serve the (correct) freshly merged order uncached.
        if self.inner.index.generation() == generation {
            let baked = Arc::new(Baked {
                generation,
                entries: Arc::clone(&entries),
            });
            self.inner.baked.rcu(|cache| {
                let mut next = HashMap::clone(cache);
                next.insert(key, Arc::clone(&baked));
                next
            });
        }
        entries
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::DispatchTypes;
    use crate::events::listener::priorities;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Ping;
    impl Event for Ping {}

    struct Lifecycle;
    impl EventFamily for Lifecycle {}

    #[derive(Debug)]
    struct Startup;
    impl Event for Startup {
        fn dispatch_types(&self) -> DispatchTypes {
            DispatchTypes::from_slice(&[TypeId::of::<Startup>(), TypeId::of::<Lifecycle>()])
        }
    }

    #[derive(Debug)]
    struct Submission;
    impl Event for Submission {
        fn async_capable(&self) -> bool {
            true
        }
    }
    impl AsyncEvent for Submission {}

    #[derive(Debug, Default)]
    struct Veto {
        cancelled: AtomicBool,
    }
    impl Event for Veto {}
    impl Cancellable for Veto {
        fn cancelled(&self) -> bool {
            self.cancelled.load(Ordering::Acquire)
        }
        fn cancel(&self) {
            self.cancelled.store(true, Ordering::Release);
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<i8>>>, impl Fn(i8) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let log = Arc::clone(&log);
            move |tag: i8| log.lock().expect("log lock").push(tag)
        };
        (log, sink)
    }

    #[test]
    fn test_listeners_fire_in_priority_order_regardless_of_registration() {
        let bus = EventBus::new();
        let (log, sink) = recorder();

        for priority in [priorities::HIGHEST, priorities::LOWEST, priorities::NORMAL] {
            let sink = sink.clone();
            bus.register_listener::<Ping, _>(priority, move |_| sink(priority));
        }

        bus.fire_event(Ping).expect("sync fire");
        assert_eq!(
            *log.lock().expect("log lock"),
            vec![priorities::LOWEST, priorities::NORMAL, priorities::HIGHEST]
        );
    }

    #[test]
    fn test_family_and_type_listeners_merge_into_one_order() {
        let bus = EventBus::new();
        let (log, sink) = recorder();

        let s1 = sink.clone();
        bus.register_family_listener::<Lifecycle, _>(-10, move |_| s1(-10));
        let s2 = sink.clone();
        bus.register_listener::<Startup, _>(0, move |_| s2(0));
        let s3 = sink.clone();
        bus.register_family_listener::<Lifecycle, _>(10, move |_| s3(10));
        let s4 = sink;
        bus.register_listener::<Startup, _>(-20, move |_| s4(-20));

        bus.fire_event(Startup).expect("sync fire");
        assert_eq!(*log.lock().expect("log lock"), vec![-20, -10, 0, 10]);
    }

    #[test]
    fn test_panicking_listeners_do_not_disturb_neighbors() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        // Throwing listeners in leading, middle, and trailing positions.
        bus.register_listener::<Ping, _>(-50, |_| panic!("leading"));
        {
            let calls = Arc::clone(&calls);
            bus.register_listener::<Ping, _>(-10, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.register_listener::<Ping, _>(0, |_| panic!("middle"));
        {
            let calls = Arc::clone(&calls);
            bus.register_listener::<Ping, _>(10, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.register_listener::<Ping, _>(50, |_| panic!("trailing"));

        bus.fire_event(Ping).expect("sync fire");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancellation_skips_only_opted_in_listeners() {
        let bus = EventBus::new();
        let (log, sink) = recorder();

        let s1 = sink.clone();
        bus.register_listener::<Veto, _>(-10, move |event: &Veto| {
            event.cancel();
            s1(1);
        });
        let s2 = sink.clone();
        bus.register_listener_ignoring_cancelled::<Veto, _>(0, move |_| s2(2));
        let s3 = sink;
        bus.register_listener::<Veto, _>(10, move |_| s3(3));

        let event = bus.fire_event(Veto::default()).expect("sync fire");
        assert!(event.cancelled());
        // The opted-in listener was skipped; the ordinary one still ran.
        assert_eq!(*log.lock().expect("log lock"), vec![1, 3]);
    }

    #[test]
    fn test_async_capable_event_rejected_on_sync_path() {
        let bus = EventBus::new();
        let err = bus.fire_event(Submission).expect_err("usage error");
        assert_eq!(err.as_label(), "async_capable_fired_sync");
    }

    #[test]
    fn test_duplicate_handler_object_returns_same_handle() {
        struct Counter(AtomicUsize);
        impl EventHandler<Ping> for Counter {
            fn handle(&self, _event: &Ping) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let bus = EventBus::new();
        let handler: Arc<dyn EventHandler<Ping>> = Arc::new(Counter(AtomicUsize::new(0)));

        let first = bus.register_handler(0, Arc::clone(&handler));
        let second = bus.register_handler(0, Arc::clone(&handler));
        assert_eq!(first, second);

        // A different priority is a distinct registration.
        let third = bus.register_handler(1, Arc::clone(&handler));
        assert_ne!(first, third);
    }

    #[test]
    fn test_functional_listeners_never_deduplicate() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            bus.register_listener::<Ping, _>(0, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.fire_event(Ping).expect("sync fire");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = {
            let calls = Arc::clone(&calls);
            bus.register_listener::<Ping, _>(0, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        bus.unregister_listener(&handle);
        bus.unregister_listener(&handle);
        bus.fire_event(Ping).expect("sync fire");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_bake_cache_tracks_registration_changes() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        bus.fire_event(Ping).expect("warm the empty cache");

        let handle = {
            let calls = Arc::clone(&calls);
            bus.register_listener::<Ping, _>(0, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        bus.fire_event(Ping).expect("sync fire");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        bus.unregister_listener(&handle);
        bus.fire_event(Ping).expect("sync fire");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
