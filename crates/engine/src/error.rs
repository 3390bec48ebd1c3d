//! Error model for batch dispatch.
//!
//! Every variant is fatal to the batch that raised it. Cursor progress made
//! before the failure has already been persisted when the caller sees the error,
//! so redelivering the same envelopes resumes where the batch stopped.

use thiserror::Error;

use projector_core::{ConfigError, MessageEnvelope};
use projector_projection::HandleError;
use projector_scope::{ResolveError, ScopeError};

use crate::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error("projection {projection} could not resolve its connection: {source}")]
    Resolve {
        projection: String,
        #[source]
        source: ResolveError,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Rejected before any handler ran.
    #[error("message {found} ({message_type}) is out of range: expected sequence number {expected}")]
    SequenceMismatch {
        expected: u64,
        found: u64,
        message_type: &'static str,
    },

    /// A projection's `advance` did not move its cursor to the next sequence number.
    #[error("projection {projection} did not advance its cursor past message {sequence_number} ({message_type})")]
    CursorNotAdvanced {
        projection: String,
        sequence_number: u64,
        message_type: &'static str,
    },

    /// Stored or fetched cursor is 0, or `u64::MAX` and can never advance.
    #[error("cursor {value} for projection {projection} is invalid: cursors run from 1 to u64::MAX - 1")]
    InvalidCursor { projection: String, value: u64 },

    /// The batch runs past the last representable sequence number.
    #[error("message {found} ({message_type}) follows the last representable sequence number")]
    SequenceExhausted { found: u64, message_type: &'static str },

    #[error("projection {projection} failed to fetch its cursor: {source}")]
    CursorFetch {
        projection: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("projection {projection} failed on message {sequence_number} ({message_type}): {source}")]
    Handler {
        projection: String,
        sequence_number: u64,
        message_type: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ProjectError {
    pub(crate) fn from_handle(projection: String, envelope: &MessageEnvelope, err: HandleError) -> Self {
        match err {
            HandleError::Resolve(source) => ProjectError::Resolve { projection, source },
            HandleError::Handler(source) => ProjectError::Handler {
                projection,
                sequence_number: envelope.sequence_number(),
                message_type: envelope.message_type(),
                source,
            },
            HandleError::CursorFetch(source) => ProjectError::CursorFetch { projection, source },
        }
    }

    pub(crate) fn from_cursor_fetch(projection: String, err: HandleError) -> Self {
        match err {
            HandleError::Resolve(source) => ProjectError::Resolve { projection, source },
            HandleError::Handler(source) | HandleError::CursorFetch(source) => {
                ProjectError::CursorFetch { projection, source }
            }
        }
    }

    /// Sequence number of the envelope that failed, when the failure is tied to one.
    pub fn sequence_number(&self) -> Option<u64> {
        match self {
            ProjectError::SequenceMismatch { found, .. } | ProjectError::SequenceExhausted { found, .. } => {
                Some(*found)
            }
            ProjectError::CursorNotAdvanced { sequence_number, .. }
            | ProjectError::Handler { sequence_number, .. } => Some(*sequence_number),
            _ => None,
        }
    }
}
