//! # Priority service registry over copy-on-write snapshots.
//!
//! ```text
//!                 ┌─────────────────────────────────────────────┐
//!                 │               ServiceRegistry               │
//!                 │                                             │
//!  register ────► │  ArcSwap<HashMap<TypeId, slot>>             │
//!  unregister ──► │     slot = Arc<Vec<Registration<S>>>        │
//!                 │     sorted ascending (priority, seq),       │
//!                 │     winner LAST                             │
//!                 └──────────────┬──────────────────────────────┘
//!                                │ notification events
//!                                ▼
//!                       EventSequencer ──► EventBus
//! ```
//!
//! Each service type `S` owns one immutable, sorted registration array.
//! Mutations clone the map, splice the affected array, and publish the new
//! snapshot atomically; readers only ever load a complete snapshot. A short
//! internal guard serializes each mutation's snapshot publish together with
//! its event enqueue, so the sequencer's FIFO matches the commit order per
//! service; the guard is released before any event fires.
//!
//! ## Rules
//! - Within one service, arrays sort ascending by `(priority, registration
//!   order)`; the last element is the winner. An equal-priority later
//!   registration sorts after an earlier one and wins.
//! - Registering the same provider instance twice for one service aborts
//!   with [`RegistryError::DuplicateProvider`] and publishes nothing.
//! - Every mutation enqueues its events to the sequencer *before*
//!   returning, then drains it. Listeners run without any registry lock
//!   held, so they may freely mutate the registry themselves.
//! - Per service, events arrive in the order the mutations committed: a
//!   winner change is never announced before the registration it names.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;

use crate::error::RegistryError;
use crate::events::EventBus;
use crate::registry::events::{RegistrationAdded, RegistrationRemoved, ServiceChangeEvent};
use crate::registry::registration::Registration;
use crate::registry::sequencer::EventSequencer;

/// One erased slot per service type, downcast to `Arc<Vec<Registration<S>>>`.
type SlotMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Priority-ordered provider registry with lock-free snapshot reads.
///
/// Cheaply cloneable; clones share state.
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    bus: EventBus,
    slots: ArcSwap<SlotMap>,
    sequencer: EventSequencer,
    /// Monotonic registration counter, tie-break for equal priorities.
    seq: AtomicU64,
    /// Serializes snapshot commit and event enqueue of one mutation, so the
    /// sequencer receives events in commit order. Never held across
    /// `fire_events` (and therefore never across listener code).
    mutation: Mutex<()>,
}

impl RegistryInner {
    fn mutation_guard(&self) -> MutexGuard<'_, ()> {
        match self.mutation.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ServiceRegistry {
    /// Creates a registry that emits its notification events on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                bus,
                slots: ArcSwap::from_pointee(SlotMap::new()),
                sequencer: EventSequencer::new(),
                seq: AtomicU64::new(0),
                mutation: Mutex::new(()),
            }),
        }
    }

    /// The bus this registry emits on.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Registers `provider` for service `S` at `priority`.
    ///
    /// Emits [`RegistrationAdded`] and, if the winning registration changed,
    /// [`ServiceChangeEvent`]. Returns the new registration.
    ///
    /// # Errors
    /// [`RegistryError::DuplicateProvider`] if this exact provider instance
    /// (by allocation identity) is already registered for `S`; the snapshot
    /// is left untouched and nothing is emitted.
    pub fn register<S>(
        &self,
        priority: i8,
        provider: Arc<S>,
        name: impl Into<Arc<str>>,
    ) -> Result<Registration<S>, RegistryError>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        let (registration, _) = self.register_inner(priority, provider, name.into())?;
        Ok(registration)
    }

    /// Registers `provider`, then returns the *winning registration* for `S`.
    ///
    /// The winner is taken from the snapshot this registration committed, so
    /// it may be a different, higher-priority registration than the one just
    /// inserted; its provider is reachable through
    /// [`Registration::provider`].
    ///
    /// # Errors
    /// Same as [`register`](Self::register).
    pub fn register_and_get<S>(
        &self,
        priority: i8,
        provider: Arc<S>,
        name: impl Into<Arc<str>>,
    ) -> Result<Registration<S>, RegistryError>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        let (_, winner) = self.register_inner(priority, provider, name.into())?;
        Ok(winner)
    }

    fn register_inner<S>(
        &self,
        priority: i8,
        provider: Arc<S>,
        name: Arc<str>,
    ) -> Result<(Registration<S>, Registration<S>), RegistryError>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        let identity = Arc::as_ptr(&provider) as *const () as usize;
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let registration = Registration::new(priority, provider, name, seq);

        let winner_after = {
            // Holds snapshot commit and event enqueue together so the
            // sequencer receives events in commit order. Released before
            // fire_events: no listener ever runs under this guard.
            let _mutation = self.inner.mutation_guard();

            let current = self.inner.slots.load_full();
            let existing = slot::<S>(&current);

            if let Some(list) = &existing {
                if list.iter().any(|r| r.provider_identity() == identity) {
                    return Err(RegistryError::DuplicateProvider {
                        service: std::any::type_name::<S>(),
                    });
                }
            }

            let winner_before = existing.as_ref().and_then(|l| l.last().cloned());
            let mut list: Vec<Registration<S>> =
                existing.map(|l| l.as_ref().clone()).unwrap_or_default();
            let at = list.partition_point(|r| r.sort_key() < registration.sort_key());
            list.insert(at, registration.clone());
            // Non-empty by construction.
            let winner_after = list
                .last()
                .cloned()
                .unwrap_or_else(|| registration.clone());

            let mut next: SlotMap = (*current).clone();
            let erased: Arc<dyn Any + Send + Sync> = Arc::new(list);
            next.insert(TypeId::of::<S>(), erased);
            self.inner.slots.store(Arc::new(next));

            self.inner
                .sequencer
                .offer(Arc::new(RegistrationAdded::new(registration.clone())));
            let winner_changed =
                winner_before.as_ref().map(Registration::seq) != Some(winner_after.seq());
            if winner_changed {
                self.inner.sequencer.offer(Arc::new(ServiceChangeEvent::new(
                    winner_before,
                    Some(winner_after.clone()),
                )));
            }
            winner_after
        };
        self.inner.sequencer.fire_events(&self.inner.bus);

        Ok((registration, winner_after))
    }

    /// Removes `registration` from service `S`. Idempotent.
    ///
    /// Matching is by value equality (priority plus provider identity). If
    /// nothing matches, the snapshot is untouched and nothing is emitted.
    /// Returns the winning registration after the call, if any remains.
    pub fn unregister<S>(&self, registration: &Registration<S>) -> Option<Registration<S>>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        let winner_after = {
            let _mutation = self.inner.mutation_guard();

            let current = self.inner.slots.load_full();
            let existing = slot::<S>(&current)?;
            let Some(at) = existing.iter().position(|r| r == registration) else {
                return existing.last().cloned();
            };

            let winner_before = existing.last().cloned();
            let mut list = existing.as_ref().clone();
            let removed = list.remove(at);
            let winner_after = list.last().cloned();

            let mut next: SlotMap = (*current).clone();
            if list.is_empty() {
                next.remove(&TypeId::of::<S>());
            } else {
                let erased: Arc<dyn Any + Send + Sync> = Arc::new(list);
                next.insert(TypeId::of::<S>(), erased);
            }
            self.inner.slots.store(Arc::new(next));

            self.inner
                .sequencer
                .offer(Arc::new(RegistrationRemoved::new(removed)));
            let winner_changed = winner_before.as_ref().map(Registration::seq)
                != winner_after.as_ref().map(Registration::seq);
            if winner_changed {
                self.inner.sequencer.offer(Arc::new(ServiceChangeEvent::new(
                    winner_before,
                    winner_after.clone(),
                )));
            }
            winner_after
        };
        self.inner.sequencer.fire_events(&self.inner.bus);

        winner_after
    }

    /// The winning provider for service `S`, if any is registered.
    pub fn get_provider<S>(&self) -> Option<Arc<S>>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.get_registration::<S>()
            .map(|r| Arc::clone(r.provider()))
    }

    /// The winning registration for service `S`, if any.
    pub fn get_registration<S>(&self) -> Option<Registration<S>>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        slot::<S>(&self.inner.slots.load()).and_then(|l| l.last().cloned())
    }

    /// All registrations for service `S`, ascending priority, winner last.
    pub fn get_all_registrations<S>(&self) -> Vec<Registration<S>>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        slot::<S>(&self.inner.slots.load())
            .map(|l| l.as_ref().clone())
            .unwrap_or_default()
    }
}

fn slot<S>(map: &SlotMap) -> Option<Arc<Vec<Registration<S>>>>
where
    S: ?Sized + Send + Sync + 'static,
{
    map.get(&TypeId::of::<S>())
        .and_then(|slot| Arc::clone(slot).downcast::<Vec<Registration<S>>>().ok())
}

impl Clone for ServiceRegistry {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.inner.slots.load().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::priorities;
    use crate::registry::events::RegistryEvents;
    use std::sync::Mutex;

    trait Greeter: Send + Sync {
        fn greet(&self) -> &'static str;
    }

    struct English;
    impl Greeter for English {
        fn greet(&self) -> &'static str {
            "hello"
        }
    }

    struct French;
    impl Greeter for French {
        fn greet(&self) -> &'static str {
            "bonjour"
        }
    }

    struct Spanish;
    impl Greeter for Spanish {
        fn greet(&self) -> &'static str {
            "hola"
        }
    }

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(EventBus::new())
    }

    #[test]
    fn test_highest_priority_provider_wins() {
        let reg = registry();

        let low: Arc<dyn Greeter> = Arc::new(English);
        let high: Arc<dyn Greeter> = Arc::new(French);
        let highest: Arc<dyn Greeter> = Arc::new(Spanish);

        reg.register::<dyn Greeter>(priorities::LOW, low, "english")
            .expect("register low");
        assert_eq!(reg.get_provider::<dyn Greeter>().map(|p| p.greet()), Some("hello"));

        reg.register::<dyn Greeter>(priorities::HIGH, high, "french")
            .expect("register high");
        assert_eq!(reg.get_provider::<dyn Greeter>().map(|p| p.greet()), Some("bonjour"));

        reg.register::<dyn Greeter>(priorities::HIGHEST, highest, "spanish")
            .expect("register highest");
        assert_eq!(reg.get_provider::<dyn Greeter>().map(|p| p.greet()), Some("hola"));
    }

    #[test]
    fn test_get_all_is_ascending_with_winner_last() {
        let reg = registry();
        for (priority, name) in [(priorities::HIGH, "b"), (priorities::LOW, "a"), (priorities::HIGHEST, "c")] {
            let provider: Arc<dyn Greeter> = Arc::new(English);
            reg.register::<dyn Greeter>(priority, provider, name)
                .expect("register");
        }

        let all = reg.get_all_registrations::<dyn Greeter>();
        let order: Vec<&str> = all.iter().map(|r| r.name()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(all.last().map(|r| r.priority()), Some(priorities::HIGHEST));
    }

    #[test]
    fn test_equal_priority_later_registration_wins() {
        let reg = registry();
        let first: Arc<dyn Greeter> = Arc::new(English);
        let second: Arc<dyn Greeter> = Arc::new(French);

        reg.register::<dyn Greeter>(priorities::NORMAL, first, "first")
            .expect("register first");
        reg.register::<dyn Greeter>(priorities::NORMAL, second, "second")
            .expect("register second");

        assert_eq!(
            reg.get_registration::<dyn Greeter>().map(|r| r.name().to_owned()),
            Some("second".to_owned())
        );
    }

    #[test]
    fn test_duplicate_provider_is_rejected_and_snapshot_untouched() {
        let reg = registry();
        let provider: Arc<dyn Greeter> = Arc::new(English);

        reg.register::<dyn Greeter>(priorities::NORMAL, Arc::clone(&provider), "one")
            .expect("first register");
        let err = reg
            .register::<dyn Greeter>(priorities::HIGH, provider, "again")
            .expect_err("duplicate must be rejected");
        assert_eq!(err.as_label(), "duplicate_provider");

        let all = reg.get_all_registrations::<dyn Greeter>();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name(), "one");
    }

    #[test]
    fn test_unregister_is_idempotent_and_returns_new_winner() {
        let reg = registry();
        let low: Arc<dyn Greeter> = Arc::new(English);
        let high: Arc<dyn Greeter> = Arc::new(French);

        let low_reg = reg
            .register::<dyn Greeter>(priorities::LOW, low, "english")
            .expect("register low");
        let high_reg = reg
            .register::<dyn Greeter>(priorities::HIGH, high, "french")
            .expect("register high");

        let winner = reg.unregister(&high_reg);
        assert_eq!(winner.as_ref().map(|r| r.name()), Some("english"));

        // Second removal is a no-op and still reports the current winner.
        let winner = reg.unregister(&high_reg);
        assert_eq!(winner.as_ref().map(|r| r.name()), Some("english"));

        assert!(reg.unregister(&low_reg).is_none());
        assert!(reg.get_provider::<dyn Greeter>().is_none());
        assert!(reg.get_all_registrations::<dyn Greeter>().is_empty());
    }

    #[test]
    fn test_mutations_emit_notification_events() {
        let reg = registry();
        let log = Arc::new(Mutex::new(Vec::new()));

        {
            let log = Arc::clone(&log);
            reg.bus().register_listener::<RegistrationAdded<dyn Greeter>, _>(
                0,
                move |event: &RegistrationAdded<dyn Greeter>| {
                    log.lock()
                        .expect("log lock")
                        .push(format!("added:{}", event.registration().name()));
                },
            );
        }
        {
            let log = Arc::clone(&log);
            reg.bus().register_listener::<ServiceChangeEvent<dyn Greeter>, _>(
                0,
                move |event: &ServiceChangeEvent<dyn Greeter>| {
                    log.lock().expect("log lock").push(format!(
                        "change:{}->{}",
                        event.previous().map(|r| r.name()).unwrap_or("-"),
                        event.updated().map(|r| r.name()).unwrap_or("-"),
                    ));
                },
            );
        }
        {
            let log = Arc::clone(&log);
            reg.bus().register_listener::<RegistrationRemoved<dyn Greeter>, _>(
                0,
                move |event: &RegistrationRemoved<dyn Greeter>| {
                    log.lock()
                        .expect("log lock")
                        .push(format!("removed:{}", event.registration().name()));
                },
            );
        }

        let low: Arc<dyn Greeter> = Arc::new(English);
        let high: Arc<dyn Greeter> = Arc::new(French);

        let low_reg = reg
            .register::<dyn Greeter>(priorities::LOW, low, "english")
            .expect("register low");
        reg.register::<dyn Greeter>(priorities::HIGH, high, "french")
            .expect("register high");
        // Losing registration removed: no winner change.
        reg.unregister(&low_reg);

        assert_eq!(
            *log.lock().expect("log lock"),
            vec![
                "added:english",
                "change:-->english",
                "added:french",
                "change:english->french",
                "removed:english",
            ]
        );
    }

    #[test]
    fn test_family_listener_observes_all_registry_traffic() {
        let reg = registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            reg.bus()
                .register_family_listener::<RegistryEvents, _>(0, move |_| {
                    seen.lock().expect("seen lock").push(());
                });
        }

        let greeter: Arc<dyn Greeter> = Arc::new(English);
        reg.register::<dyn Greeter>(priorities::NORMAL, greeter, "english")
            .expect("register greeter");
        let counter = Arc::new(7_u32);
        reg.register::<u32>(priorities::NORMAL, counter, "counter")
            .expect("register counter");

        // Two Added + two ServiceChange, across both service types.
        assert_eq!(seen.lock().expect("seen lock").len(), 4);
    }

    #[test]
    fn test_listener_may_mutate_registry_without_deadlock() {
        let reg = registry();
        {
            let reg2 = reg.clone();
            reg.bus().register_listener::<ServiceChangeEvent<dyn Greeter>, _>(
                0,
                move |event: &ServiceChangeEvent<dyn Greeter>| {
                    // Register a fallback the first time a greeter appears.
                    if event.previous().is_none() {
                        let fallback: Arc<dyn Greeter> = Arc::new(French);
                        reg2.register::<dyn Greeter>(priorities::LOWEST, fallback, "fallback")
                            .expect("nested register");
                    }
                },
            );
        }

        let greeter: Arc<dyn Greeter> = Arc::new(English);
        reg.register::<dyn Greeter>(priorities::NORMAL, greeter, "english")
            .expect("register");

        let all = reg.get_all_registrations::<dyn Greeter>();
        let got: Vec<&str> = all.iter().map(|r| r.name()).collect();
        assert_eq!(got, vec!["fallback", "english"]);
    }

    #[test]
    fn test_register_and_get_returns_existing_higher_winner() {
        let reg = registry();
        let high: Arc<dyn Greeter> = Arc::new(French);
        reg.register::<dyn Greeter>(priorities::HIGH, high, "loud")
            .expect("register high");

        let low: Arc<dyn Greeter> = Arc::new(English);
        let winner = reg
            .register_and_get::<dyn Greeter>(priorities::LOW, low, "quiet")
            .expect("register low");

        // The pre-existing higher registration wins, not the inserted one.
        assert_eq!(winner.name(), "loud");
        assert_eq!(winner.provider().greet(), "bonjour");
        assert_eq!(reg.get_all_registrations::<dyn Greeter>().len(), 2);
    }

    #[test]
    fn test_concurrent_mutations_keep_per_service_event_order() {
        const PER_THREAD: usize = 50;

        let reg = registry();
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let log = Arc::clone(&log);
            reg.bus().register_listener::<RegistrationAdded<dyn Greeter>, _>(
                0,
                move |event: &RegistrationAdded<dyn Greeter>| {
                    log.lock()
                        .expect("log lock")
                        .push(("added", Some(event.registration().seq())));
                },
            );
        }
        {
            let log = Arc::clone(&log);
            reg.bus().register_listener::<ServiceChangeEvent<dyn Greeter>, _>(
                0,
                move |event: &ServiceChangeEvent<dyn Greeter>| {
                    log.lock()
                        .expect("log lock")
                        .push(("change", event.updated().map(|r| r.seq())));
                },
            );
        }

        let mut workers = Vec::new();
        for thread in 0..2_usize {
            let reg = reg.clone();
            workers.push(std::thread::spawn(move || {
                for n in 0..PER_THREAD {
                    let provider: Arc<dyn Greeter> = Arc::new(English);
                    let priority = (thread * PER_THREAD + n) as i8;
                    reg.register::<dyn Greeter>(priority, provider, "racer")
                        .expect("register");
                }
            }));
        }
        for worker in workers {
            worker.join().expect("worker join");
        }

        // A winner change must never be announced before the registration
        // event of the winner it names.
        let log = log.lock().expect("log lock");
        let mut announced = std::collections::HashSet::new();
        for (kind, seq) in log.iter() {
            match *kind {
                "added" => {
                    announced.insert(seq.expect("added carries a seq"));
                }
                _ => {
                    if let Some(seq) = seq {
                        assert!(announced.contains(seq), "winner announced before its add");
                    }
                }
            }
        }
        assert_eq!(announced.len(), 2 * PER_THREAD);
    }
}
