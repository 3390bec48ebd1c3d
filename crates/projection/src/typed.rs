//! Configurable projection keyed by payload type.
//!
//! [`TypedProjection`] replaces a family of projection base types with one
//! value parameterised by key, handle connection and cursor connection:
//!
//! ```ignore
//! let orders = TypedProjection::<&str, ReadDb>::new("orders")
//!     .with_priority(Priority::High)
//!     .when::<OrderPlaced, _, _>(|db, _env, placed| async move {
//!         db.insert_order(&placed).await
//!     })
//!     .with_cursor_fetch(|db| async move { db.next_sequence_number().await });
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use projector_core::{ConfigError, MessageEnvelope, Priority, ProjectionKey};
use projector_scope::{ConnectionType, Scope};

use crate::error::HandleError;
use crate::projection::Projection;

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type ErasedHandler<C> = Box<dyn Fn(Arc<C>, MessageEnvelope, CancellationToken) -> HandlerFuture + Send + Sync>;

type CursorFuture = Pin<Box<dyn Future<Output = anyhow::Result<u64>> + Send>>;
type CursorFetch<CC> = Box<dyn Fn(Arc<CC>) -> CursorFuture + Send + Sync>;

/// Projection with an explicit payload-type → handler table.
///
/// - `C`: connection resolved for message handlers
/// - `CC`: connection resolved for the cursor bootstrap (defaults to `C`)
///
/// The handle connection is resolved lazily, only for envelopes with a
/// registered handler. The cursor bootstrap runs at most once per instance.
pub struct TypedProjection<K, C, CC = C> {
    key: K,
    priority: Priority,
    handlers: HashMap<TypeId, ErasedHandler<C>>,
    duplicate_handlers: Vec<&'static str>,
    cursor_fetch: Option<CursorFetch<CC>>,
    fetched: OnceCell<u64>,
    _connections: PhantomData<fn() -> (C, CC)>,
}

impl<K, C, CC> TypedProjection<K, C, CC>
where
    K: ProjectionKey,
    C: Any + Send + Sync,
    CC: Any + Send + Sync,
{
    pub fn new(key: K) -> Self {
        Self {
            key,
            priority: Priority::Normal,
            handlers: HashMap::new(),
            duplicate_handlers: Vec::new(),
            cursor_fetch: None,
            fetched: OnceCell::new(),
            _connections: PhantomData,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Register the handler for payloads of type `M`.
    pub fn when<M, F, Fut>(self, handler: F) -> Self
    where
        M: Any + Send + Sync,
        F: Fn(Arc<C>, MessageEnvelope, Arc<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.when_cancellable::<M, _, _>(move |connection, envelope, message, _cancel| {
            handler(connection, envelope, message)
        })
    }

    /// Register the handler for payloads of type `M`; the handler also receives
    /// the batch cancellation token.
    ///
    /// A second handler for the same payload type is not installed; it is
    /// reported by [`Projection::configuration_errors`] instead.
    pub fn when_cancellable<M, F, Fut>(mut self, handler: F) -> Self
    where
        M: Any + Send + Sync,
        F: Fn(Arc<C>, MessageEnvelope, Arc<M>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let message_type = TypeId::of::<M>();
        if self.handlers.contains_key(&message_type) {
            self.duplicate_handlers.push(std::any::type_name::<M>());
            return self;
        }

        let erased: ErasedHandler<C> = Box::new(move |connection: Arc<C>, envelope: MessageEnvelope, cancel: CancellationToken| {
            let message = envelope.message_arc::<M>();
            match message {
                Some(message) => Box::pin(handler(connection, envelope, message, cancel)) as HandlerFuture,
                None => Box::pin(async move {
                    Err(anyhow::anyhow!(
                        "envelope {} does not carry a {}",
                        envelope.sequence_number(),
                        std::any::type_name::<M>()
                    ))
                }) as HandlerFuture,
            }
        });
        self.handlers.insert(message_type, erased);
        self
    }

    /// Bootstrap the cursor from the read model's own storage.
    pub fn with_cursor_fetch<F, Fut>(mut self, fetch: F) -> Self
    where
        F: Fn(Arc<CC>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<u64>> + Send + 'static,
    {
        self.cursor_fetch = Some(Box::new(move |connection: Arc<CC>| Box::pin(fetch(connection)) as CursorFuture));
        self
    }

    pub fn handles<M: Any>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<M>())
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait]
impl<K, C, CC> Projection<K> for TypedProjection<K, C, CC>
where
    K: ProjectionKey,
    C: Any + Send + Sync,
    CC: Any + Send + Sync,
{
    fn key(&self) -> &K {
        &self.key
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::of::<C>()
    }

    fn configuration_errors(&self) -> Vec<ConfigError> {
        self.duplicate_handlers
            .iter()
            .map(|message_type| ConfigError::DuplicateHandler {
                projection: format!("{:?}", self.key),
                message_type: *message_type,
            })
            .collect()
    }

    async fn fetch_next_sequence_number(&self, scope: &Scope) -> Result<u64, HandleError> {
        let value = self
            .fetched
            .get_or_try_init(|| async {
                let Some(fetch) = &self.cursor_fetch else {
                    return Ok::<u64, HandleError>(1);
                };
                let connection = scope.resolve::<CC>()?;
                fetch(connection).await.map_err(HandleError::CursorFetch)
            })
            .await?;
        Ok(*value)
    }

    async fn handle(
        &self,
        scope: &Scope,
        envelope: &MessageEnvelope,
        cancel: &CancellationToken,
    ) -> Result<bool, HandleError> {
        let Some(handler) = self.handlers.get(&envelope.message_type_id()) else {
            trace!(
                projection = ?self.key,
                message_type = envelope.message_type(),
                "no handler registered"
            );
            return Ok(false);
        };

        let connection = scope.resolve::<C>()?;
        handler(connection, envelope.clone(), cancel.clone())
            .await
            .map_err(HandleError::Handler)?;
        Ok(true)
    }
}

impl<K, C, CC> core::fmt::Debug for TypedProjection<K, C, CC>
where
    K: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TypedProjection")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("handlers", &self.handlers.len())
            .field("connection", &std::any::type_name::<C>())
            .field("cursor_connection", &std::any::type_name::<CC>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use projector_scope::{LifetimeScopeFactory, ScopeFactory, ServiceRegistry};

    #[derive(Default)]
    struct ReadDb {
        rows: Mutex<Vec<String>>,
    }

    struct CursorDb {
        stored: u64,
    }

    struct OrderPlaced {
        id: &'static str,
    }

    struct OrderShipped;

    fn scope() -> Scope {
        let registry = ServiceRegistry::new()
            .register_scoped(ReadDb::default)
            .register_scoped(|| CursorDb { stored: 42 });
        LifetimeScopeFactory::new(registry).begin_scope().unwrap()
    }

    fn orders() -> TypedProjection<&'static str, ReadDb> {
        TypedProjection::<&'static str, ReadDb>::new("orders").when::<OrderPlaced, _, _>(|db, _env, placed| async move {
            db.rows.lock().unwrap().push(placed.id.to_string());
            Ok(())
        })
    }

    #[tokio::test]
    async fn matching_handler_receives_the_scoped_connection() {
        let scope = scope();
        let envelope = MessageEnvelope::new(1, OrderPlaced { id: "o-1" }).unwrap();

        let handled = orders()
            .handle(&scope, &envelope, &CancellationToken::new())
            .await
            .unwrap();

        assert!(handled);
        assert_eq!(*scope.resolve::<ReadDb>().unwrap().rows.lock().unwrap(), vec!["o-1"]);
    }

    #[tokio::test]
    async fn unknown_payload_is_skipped_without_resolving() {
        let scope = scope();
        let envelope = MessageEnvelope::new(1, OrderShipped).unwrap();

        let handled = orders()
            .handle(&scope, &envelope, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!handled);
        assert_eq!(scope.resolved_count(), 0);
    }

    #[tokio::test]
    async fn unregistered_connection_surfaces_as_resolve_error() {
        struct Search;
        let projection = TypedProjection::<&'static str, Search>::new("search")
            .when::<OrderShipped, _, _>(|_search, _env, _msg| async { Ok(()) });
        let envelope = MessageEnvelope::new(1, OrderShipped).unwrap();

        let err = projection
            .handle(&scope(), &envelope, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, HandleError::Resolve(_)));
    }

    #[tokio::test]
    async fn handler_failure_is_reported() {
        let projection = TypedProjection::<&'static str, ReadDb>::new("failing")
            .when::<OrderShipped, _, _>(|_db, _env, _msg| async { Err(anyhow::anyhow!("constraint violated")) });
        let envelope = MessageEnvelope::new(1, OrderShipped).unwrap();

        let err = projection
            .handle(&scope(), &envelope, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, HandleError::Handler(_)));
    }

    #[tokio::test]
    async fn cancellable_handler_observes_the_batch_token() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let projection = TypedProjection::<&'static str, ReadDb>::new("watcher").when_cancellable::<OrderShipped, _, _>(
            move |_db, _env, _msg, cancel| {
                let counter = counter.clone();
                async move {
                    if cancel.is_cancelled() {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(())
                }
            },
        );
        let token = CancellationToken::new();
        token.cancel();

        projection
            .handle(&scope(), &MessageEnvelope::new(1, OrderShipped).unwrap(), &token)
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_handler_is_a_configuration_error() {
        let projection = orders().when::<OrderPlaced, _, _>(|_db, _env, _msg| async { Ok(()) });

        assert_eq!(projection.handler_count(), 1);
        assert_eq!(
            projection.configuration_errors(),
            vec![ConfigError::DuplicateHandler {
                projection: "\"orders\"".to_string(),
                message_type: std::any::type_name::<OrderPlaced>(),
            }]
        );
    }

    #[tokio::test]
    async fn cursor_defaults_to_one() {
        assert_eq!(orders().fetch_next_sequence_number(&scope()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cursor_fetch_uses_its_own_connection_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let projection = TypedProjection::<&'static str, ReadDb, CursorDb>::new("orders").with_cursor_fetch(move |db| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(db.stored) }
        });
        let scope = scope();

        let first = projection.fetch_next_sequence_number(&scope).await.unwrap();
        let second = projection.fetch_next_sequence_number(&scope).await.unwrap();

        assert_eq!((first, second), (42, 42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
