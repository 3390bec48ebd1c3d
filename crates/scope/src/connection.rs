use std::any::{Any, TypeId};
use std::sync::Arc;

/// A resolved, type-erased connection instance.
pub type Connection = Arc<dyn Any + Send + Sync>;

/// Identifies the type of a connection a projection needs.
///
/// Equality and hashing use the `TypeId` only; the name is for diagnostics.
#[derive(Debug, Copy, Clone)]
pub struct ConnectionType {
    id: TypeId,
    name: &'static str,
}

impl ConnectionType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ConnectionType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionType {}

impl core::hash::Hash for ConnectionType {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl core::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name)
    }
}

/// Identity of one connection instance (pointer address of its allocation).
pub(crate) fn instance_address(connection: &Connection) -> *const () {
    Arc::as_ptr(connection) as *const ()
}
