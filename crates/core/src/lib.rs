//! `projector-core`: building blocks shared by the dispatch engine.
//!
//! This crate contains **pure** primitives (no IO, no async): the message
//! envelope, projection priorities, identifiers and the configuration error
//! model.

pub mod envelope;
pub mod error;
pub mod id;
pub mod key;
pub mod priority;

pub use envelope::{MessageEnvelope, Metadata};
pub use error::{ConfigError, EnvelopeError, IdError};
pub use id::{ProjectionId, ScopeId};
pub use key::ProjectionKey;
pub use priority::Priority;
