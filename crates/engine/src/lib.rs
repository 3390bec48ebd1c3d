//! `projector-engine`: the ordered dispatch engine.
//!
//! A [`Projector`] delivers a strictly increasing stream of sequence-numbered
//! envelopes to a set of projections, each with its own checkpoint:
//!
//! - one resolution scope per batch, closed on every exit path
//! - projections due for a message run in priority order (stable on ties)
//! - cursors are persisted after every batch, including failed ones
//!
//! Cursor storage plugs in through [`SequenceCursorRepository`].

pub mod builder;
pub mod error;
pub mod in_memory;
pub mod projector;
pub mod repository;

pub use builder::ProjectorBuilder;
pub use error::ProjectError;
pub use in_memory::InMemoryCursorRepository;
pub use projector::{ProjectOutcome, Projector};
pub use repository::{RepositoryError, SequenceCursorRepository};
