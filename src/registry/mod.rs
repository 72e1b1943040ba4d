//! # Service registry: prioritized providers with change notifications.
//!
//! - [`Registration`] — immutable prioritized provider binding.
//! - [`RegistrationAdded`], [`RegistrationRemoved`], [`ServiceChangeEvent`]
//!   — notification events, all under the [`RegistryEvents`] family.
//! - [`ServiceRegistry`] — copy-on-write registry; mutations emit their
//!   events through an internal lock-free sequencer.

mod events;
mod registration;
mod registry;
mod sequencer;

pub use events::{RegistrationAdded, RegistrationRemoved, RegistryEvents, ServiceChangeEvent};
pub use registration::Registration;
pub use registry::ServiceRegistry;
