//! Resource-resolution scopes.
//!
//! A [`Scope`] hands each projection the connection it needs for the duration of
//! one dispatch batch, records what it resolved, and tears everything down
//! exactly once. Containers plug in through [`Container`]/[`ResourceScope`];
//! lifecycle events are observed through [`ScopeObserver`].

pub mod bus;
pub mod connection;
pub mod container;
pub mod disposal;
pub mod error;
pub mod observer;
pub mod scope;

pub use bus::{LifecycleBus, Subscription};
pub use connection::{Connection, ConnectionType};
pub use container::{Container, ResourceScope, ServiceRegistry};
pub use disposal::DisposalCallbacks;
pub use error::{ResolveError, ScopeError};
pub use observer::{ConnectionResolved, ScopeEnding, ScopeEvent, ScopeObserver};
pub use scope::{LifetimeScopeFactory, Scope, ScopeFactory};
