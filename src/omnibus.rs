//! # Facade bundling one event bus with one service registry.
//!
//! Most applications want exactly one bus/registry pair. [`Omnibus`] wires
//! them together (the registry emits on the bus), and [`Omnibus::global`]
//! offers an opt-in process-wide instance for code without an injection
//! path. Libraries should take an `&Omnibus` (or the parts) explicitly and
//! leave the global to the application.

use std::sync::OnceLock;

use crate::events::EventBus;
use crate::registry::ServiceRegistry;

static GLOBAL: OnceLock<Omnibus> = OnceLock::new();

/// An [`EventBus`] and the [`ServiceRegistry`] that emits on it.
///
/// Cheaply cloneable; clones share both halves.
#[derive(Clone, Debug)]
pub struct Omnibus {
    bus: EventBus,
    registry: ServiceRegistry,
}

impl Omnibus {
    /// Creates an independent bus/registry pair.
    pub fn new() -> Self {
        let bus = EventBus::new();
        let registry = ServiceRegistry::new(bus.clone());
        Self { bus, registry }
    }

    /// The event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// The service registry. Its notifications fire on [`event_bus`](Self::event_bus).
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// The process-wide instance, created lazily on first access.
    ///
    /// Call [`try_init_global`](Self::try_init_global) first to supply your
    /// own instance (e.g. one shared with a test harness).
    pub fn global() -> &'static Omnibus {
        GLOBAL.get_or_init(Omnibus::new)
    }

    /// Installs `instance` as the process-wide one.
    ///
    /// Fails (returning the rejected instance) if the global was already
    /// initialized, whether explicitly or by a prior [`global`](Self::global)
    /// call.
    pub fn try_init_global(instance: Omnibus) -> Result<(), Omnibus> {
        GLOBAL.set(instance)
    }
}

impl Default for Omnibus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    trait Clock: Send + Sync {
        fn now(&self) -> u64;
    }

    struct FixedClock(u64);
    impl Clock for FixedClock {
        fn now(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn test_registry_emits_on_the_paired_bus() {
        let omni = Omnibus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = Arc::clone(&seen);
            omni.event_bus()
                .register_family_listener::<crate::registry::RegistryEvents, _>(0, move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                });
        }

        let clock: Arc<dyn Clock> = Arc::new(FixedClock(42));
        omni.registry()
            .register::<dyn Clock>(0, clock, "fixed")
            .expect("register clock");

        // RegistrationAdded plus the first-winner ServiceChangeEvent.
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(
            omni.registry().get_provider::<dyn Clock>().map(|c| c.now()),
            Some(42)
        );
    }

    #[test]
    fn test_clones_share_state() {
        let omni = Omnibus::new();
        let other = omni.clone();

        let clock: Arc<dyn Clock> = Arc::new(FixedClock(7));
        other
            .registry()
            .register::<dyn Clock>(0, clock, "fixed")
            .expect("register clock");

        assert!(omni.registry().get_provider::<dyn Clock>().is_some());
    }
}
