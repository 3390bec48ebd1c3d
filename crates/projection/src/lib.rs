//! `projector-projection`: projections and their handler tables.
//!
//! A projection is an independently-checkpointed consumer of the message
//! stream. The dispatch engine only sees the object-safe [`Projection`] trait;
//! [`TypedProjection`] is the configurable implementation most hosts use.

pub mod error;
pub mod projection;
pub mod typed;

pub use error::HandleError;
pub use projection::Projection;
pub use typed::TypedProjection;
