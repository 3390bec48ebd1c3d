use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use projector_core::ConfigError;

use crate::connection::{Connection, ConnectionType};

type DisposalFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type ErasedCallback = Arc<dyn Fn(Connection) -> DisposalFuture + Send + Sync>;

/// Per-connection-type hooks run just before a scope is disposed.
///
/// Each callback runs once for every distinct `(type, instance)` resolved during
/// the scope, however many times the instance was resolved. Typical use: commit
/// the batch transaction held by a read-model connection.
#[derive(Clone, Default)]
pub struct DisposalCallbacks {
    callbacks: HashMap<ConnectionType, ErasedCallback>,
}

impl DisposalCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the callback for connections of type `T`.
    ///
    /// At most one callback per type; a second registration is a configuration error.
    pub fn before_disposal_of<T, F, Fut>(mut self, callback: F) -> Result<Self, ConfigError>
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let connection_type = ConnectionType::of::<T>();
        if self.callbacks.contains_key(&connection_type) {
            return Err(ConfigError::DuplicateDisposalCallback(connection_type.name()));
        }

        let erased: ErasedCallback = Arc::new(move |connection: Connection| match connection.downcast::<T>() {
            Ok(typed) => Box::pin(callback(typed)) as DisposalFuture,
            Err(_) => Box::pin(async move {
                Err(anyhow::anyhow!("connection is not a {}", std::any::type_name::<T>()))
            }) as DisposalFuture,
        });
        self.callbacks.insert(connection_type, erased);
        Ok(self)
    }

    pub fn contains(&self, connection_type: ConnectionType) -> bool {
        self.callbacks.contains_key(&connection_type)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Run the callback registered for `connection_type`, if any.
    ///
    /// Returns `Ok(false)` when no callback is registered for that type.
    pub async fn run(&self, connection_type: ConnectionType, connection: Connection) -> anyhow::Result<bool> {
        let Some(callback) = self.callbacks.get(&connection_type) else {
            return Ok(false);
        };
        callback(connection).await?;
        Ok(true)
    }
}

impl core::fmt::Debug for DisposalCallbacks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let names: Vec<&'static str> = self.callbacks.keys().map(|t| t.name()).collect();
        f.debug_struct("DisposalCallbacks").field("callbacks", &names).finish()
    }
}
