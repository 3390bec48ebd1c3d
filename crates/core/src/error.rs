//! Error model for configuration and envelope construction.

use thiserror::Error;

/// Fatal wiring error raised while assembling a projector.
///
/// Configuration errors are raised synchronously at build time and are never
/// retried: an engine that fails validation is never constructed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Two registered projections share the same key.
    #[error("duplicate projection key: {0}")]
    DuplicateProjectionKey(String),

    /// A projection registered two handlers for one payload type.
    #[error("projection {projection} registers more than one handler for {message_type}")]
    DuplicateHandler {
        projection: String,
        message_type: &'static str,
    },

    /// A disposal callback was registered twice for one connection type.
    #[error("disposal callback for {0} already registered")]
    DuplicateDisposalCallback(&'static str),

    #[error("no scope factory configured")]
    MissingScopeFactory,

    #[error("no sequence cursor repository configured")]
    MissingRepository,

    #[error("no projections registered")]
    NoProjections,
}

/// Envelope construction error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Sequence numbers start at 1.
    #[error("invalid sequence number {0}: sequence numbers start at 1")]
    InvalidSequenceNumber(u64),
}

/// Identifier parse failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid identifier: {0}")]
pub struct IdError(pub String);
