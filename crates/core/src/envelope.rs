use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::EnvelopeError;

/// Out-of-band information carried alongside a message (correlation ids,
/// tenant, causation, ...). The engine never inspects it.
pub type Metadata = BTreeMap<String, JsonValue>;

/// Envelope for one message in the totally ordered stream.
///
/// This is the unit handed to projections.
///
/// Notes:
/// - `sequence_number` starts at 1 and is strictly increasing across the stream.
/// - The payload is type-erased; handlers are looked up by its `TypeId`,
///   never by reflection over its shape.
/// - Immutable once constructed. Cloning is cheap (payload and metadata are shared).
#[derive(Clone)]
pub struct MessageEnvelope {
    sequence_number: u64,

    message: Arc<dyn Any + Send + Sync>,
    message_type_id: TypeId,
    message_type: &'static str,

    metadata: Arc<Metadata>,
}

impl MessageEnvelope {
    pub fn new<M>(sequence_number: u64, message: M) -> Result<Self, EnvelopeError>
    where
        M: Any + Send + Sync,
    {
        if sequence_number == 0 {
            return Err(EnvelopeError::InvalidSequenceNumber(sequence_number));
        }

        Ok(Self {
            sequence_number,
            message: Arc::new(message),
            message_type_id: TypeId::of::<M>(),
            message_type: std::any::type_name::<M>(),
            metadata: Arc::new(Metadata::new()),
        })
    }

    /// Attach one metadata entry (builder style).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Arc::make_mut(&mut self.metadata).insert(key.into(), value.into());
        self
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Stable identifier of the payload type (handler lookup key).
    pub fn message_type_id(&self) -> TypeId {
        self.message_type_id
    }

    /// Human-readable payload type name, for diagnostics only.
    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    pub fn is<M: Any>(&self) -> bool {
        self.message_type_id == TypeId::of::<M>()
    }

    /// Borrow the payload as `M`, if that is its type.
    pub fn message<M: Any>(&self) -> Option<&M> {
        self.message.downcast_ref::<M>()
    }

    /// Shared handle to the payload as `M`, if that is its type.
    pub fn message_arc<M>(&self) -> Option<Arc<M>>
    where
        M: Any + Send + Sync,
    {
        Arc::clone(&self.message).downcast::<M>().ok()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&JsonValue> {
        self.metadata.get(key)
    }
}

impl core::fmt::Debug for MessageEnvelope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageEnvelope")
            .field("sequence_number", &self.sequence_number)
            .field("message_type", &self.message_type)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
