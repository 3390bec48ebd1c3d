//! Projection key bound.

/// Unique, comparable identifier of a projection.
///
/// Anything hashable works: `&'static str`, `String`, integers, [`crate::ProjectionId`].
/// Keys must be unique across all projections registered with one projector.
pub trait ProjectionKey: Clone + Eq + core::hash::Hash + core::fmt::Debug + Send + Sync + 'static {}

impl<T> ProjectionKey for T where T: Clone + Eq + core::hash::Hash + core::fmt::Debug + Send + Sync + 'static {}
