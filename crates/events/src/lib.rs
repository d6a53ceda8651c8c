//! Domain event plumbing: the `Event` trait, organization-scoped envelopes,
//! and the pub/sub bus abstraction projections consume.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod scope;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use scope::OrganizationScoped;
