//! Prioritized service registrations.

use std::any::TypeId;
use std::sync::Arc;

/// A prioritized provider bound to a service type `S`.
///
/// Registrations are immutable value objects created by
/// [`ServiceRegistry::register`](crate::ServiceRegistry::register). Within
/// one service, arrays are kept sorted ascending by `(priority,
/// registration order)` with the winner — the preferred provider — last;
/// an equal-priority later registration sorts after an earlier one and
/// therefore wins.
///
/// Equality is value equality in the sense used for unregistration:
/// priority plus provider *identity* (the allocation behind the `Arc`),
/// never provider value equality.
pub struct Registration<S: ?Sized + Send + Sync + 'static> {
    priority: i8,
    provider: Arc<S>,
    name: Arc<str>,
    /// Monotonic per-registry sequence; deterministic tie-break.
    seq: u64,
}

impl<S: ?Sized + Send + Sync + 'static> Registration<S> {
    pub(crate) fn new(priority: i8, provider: Arc<S>, name: Arc<str>, seq: u64) -> Self {
        Self {
            priority,
            provider,
            name,
            seq,
        }
    }

    /// The registration's priority; higher priorities are preferred.
    pub fn priority(&self) -> i8 {
        self.priority
    }

    /// The registered provider.
    pub fn provider(&self) -> &Arc<S> {
        &self.provider
    }

    /// Human-readable provider name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The service type this registration belongs to.
    pub fn service_type(&self) -> TypeId {
        TypeId::of::<S>()
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn sort_key(&self) -> (i8, u64) {
        (self.priority, self.seq)
    }

    /// Identity of the provider allocation, for duplicate detection.
    pub(crate) fn provider_identity(&self) -> usize {
        Arc::as_ptr(&self.provider) as *const () as usize
    }
}

impl<S: ?Sized + Send + Sync + 'static> Clone for Registration<S> {
    fn clone(&self) -> Self {
        Self {
            priority: self.priority,
            provider: Arc::clone(&self.provider),
            name: Arc::clone(&self.name),
            seq: self.seq,
        }
    }
}

impl<S: ?Sized + Send + Sync + 'static> PartialEq for Registration<S> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.provider_identity() == other.provider_identity()
    }
}

impl<S: ?Sized + Send + Sync + 'static> Eq for Registration<S> {}

impl<S: ?Sized + Send + Sync + 'static> std::fmt::Debug for Registration<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .field("provider", &format_args!("{:#x}", self.provider_identity()))
            .finish()
    }
}
