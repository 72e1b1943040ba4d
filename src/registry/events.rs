//! # Registry notification events.
//!
//! Every registry mutation emits typed, always-async-capable events through
//! the sequencer:
//!
//! - [`RegistrationAdded`] — after every successful `register`.
//! - [`RegistrationRemoved`] — after every effective `unregister`.
//! - [`ServiceChangeEvent`] — only when the *winning* (highest-priority)
//!   registration changed, carrying the previous and updated winners.
//!
//! All three also dispatch under the [`RegistryEvents`] family marker, so a
//! single family listener can observe all registry traffic for all
//! services, merged into the usual global priority order.
//!
//! Callers must not assume synchronous delivery: events are enqueued before
//! the mutating call returns but fired by whichever thread owns (or next
//! claims) the sequencer.

use std::any::TypeId;

use crate::events::{AsyncEvent, DispatchTypes, Event, EventFamily};
use crate::registry::registration::Registration;

/// Family marker carried by every registry notification event.
pub struct RegistryEvents;

impl EventFamily for RegistryEvents {}

/// A registration was added for service `S`.
pub struct RegistrationAdded<S: ?Sized + Send + Sync + 'static> {
    registration: Registration<S>,
}

impl<S: ?Sized + Send + Sync + 'static> RegistrationAdded<S> {
    pub(crate) fn new(registration: Registration<S>) -> Self {
        Self { registration }
    }

    /// The registration that was added.
    pub fn registration(&self) -> &Registration<S> {
        &self.registration
    }

    /// The affected service type.
    pub fn service_type(&self) -> TypeId {
        TypeId::of::<S>()
    }
}

impl<S: ?Sized + Send + Sync + 'static> Event for RegistrationAdded<S> {
    fn async_capable(&self) -> bool {
        true
    }

    fn dispatch_types(&self) -> DispatchTypes {
        DispatchTypes::from_slice(&[TypeId::of::<Self>(), TypeId::of::<RegistryEvents>()])
    }
}

impl<S: ?Sized + Send + Sync + 'static> AsyncEvent for RegistrationAdded<S> {}

/// A registration was removed for service `S`.
pub struct RegistrationRemoved<S: ?Sized + Send + Sync + 'static> {
    registration: Registration<S>,
}

impl<S: ?Sized + Send + Sync + 'static> RegistrationRemoved<S> {
    pub(crate) fn new(registration: Registration<S>) -> Self {
        Self { registration }
    }

    /// The registration that was removed.
    pub fn registration(&self) -> &Registration<S> {
        &self.registration
    }

    /// The affected service type.
    pub fn service_type(&self) -> TypeId {
        TypeId::of::<S>()
    }
}

impl<S: ?Sized + Send + Sync + 'static> Event for RegistrationRemoved<S> {
    fn async_capable(&self) -> bool {
        true
    }

    fn dispatch_types(&self) -> DispatchTypes {
        DispatchTypes::from_slice(&[TypeId::of::<Self>(), TypeId::of::<RegistryEvents>()])
    }
}

impl<S: ?Sized + Send + Sync + 'static> AsyncEvent for RegistrationRemoved<S> {}

/// The winning registration for service `S` changed.
///
/// `previous` is `None` when the service gained its first registration;
/// `updated` is `None` when the last registration was removed.
pub struct ServiceChangeEvent<S: ?Sized + Send + Sync + 'static> {
    previous: Option<Registration<S>>,
    updated: Option<Registration<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> ServiceChangeEvent<S> {
    pub(crate) fn new(previous: Option<Registration<S>>, updated: Option<Registration<S>>) -> Self {
        Self { previous, updated }
    }

    /// The winner before the change, if any.
    pub fn previous(&self) -> Option<&Registration<S>> {
        self.previous.as_ref()
    }

    /// The winner after the change, if any.
    pub fn updated(&self) -> Option<&Registration<S>> {
        self.updated.as_ref()
    }

    /// The affected service type.
    pub fn service_type(&self) -> TypeId {
        TypeId::of::<S>()
    }
}

impl<S: ?Sized + Send + Sync + 'static> Event for ServiceChangeEvent<S> {
    fn async_capable(&self) -> bool {
        true
    }

    fn dispatch_types(&self) -> DispatchTypes {
        DispatchTypes::from_slice(&[TypeId::of::<Self>(), TypeId::of::<RegistryEvents>()])
    }
}

impl<S: ?Sized + Send + Sync + 'static> AsyncEvent for ServiceChangeEvent<S> {}

impl<S: ?Sized + Send + Sync + 'static> std::fmt::Debug for RegistrationAdded<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationAdded")
            .field("registration", &self.registration)
            .finish()
    }
}

impl<S: ?Sized + Send + Sync + 'static> std::fmt::Debug for RegistrationRemoved<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationRemoved")
            .field("registration", &self.registration)
            .finish()
    }
}

impl<S: ?Sized + Send + Sync + 'static> std::fmt::Debug for ServiceChangeEvent<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceChangeEvent")
            .field("previous", &self.previous)
            .field("updated", &self.updated)
            .finish()
    }
}
