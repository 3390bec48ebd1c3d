//! Postgres-backed sequence cursor repository.
//!
//! One row per projection key:
//!
//! ```sql
//! CREATE TABLE projection_cursors (
//!     projection_key       TEXT PRIMARY KEY,
//!     next_sequence_number BIGINT NOT NULL CHECK (next_sequence_number >= 1),
//!     updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! Keys are stored through their `Display` form and read back with `FromStr`.
//!
//! ## Error Mapping
//!
//! | Condition | RepositoryError |
//! |-----------|-----------------|
//! | Any SQLx error | `Backend` (operation and cause in the message) |
//! | Stored key does not parse as `K` | `Corrupt` |
//! | Stored value negative / value above `i64::MAX` | `Corrupt` |

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use projector_core::ProjectionKey;
use projector_engine::{RepositoryError, SequenceCursorRepository};

pub const DEFAULT_CURSOR_TABLE: &str = "projection_cursors";

/// Whether `name` is usable as an unquoted Postgres table name.
///
/// Table names are interpolated into SQL, so only `[A-Za-z_][A-Za-z0-9_]*`
/// (at most 63 bytes) is accepted.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 63
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Checkpoint storage in a Postgres table.
///
/// `store` writes every cursor of a batch in one transaction, so a crash never
/// leaves half a batch's checkpoints behind.
pub struct PostgresCursorRepository<K> {
    pool: Arc<PgPool>,
    table: String,
    _key: PhantomData<fn() -> K>,
}

impl<K> Clone for PostgresCursorRepository<K> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            table: self.table.clone(),
            _key: PhantomData,
        }
    }
}

impl<K> core::fmt::Debug for PostgresCursorRepository<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresCursorRepository")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl<K> PostgresCursorRepository<K>
where
    K: ProjectionKey + Display + FromStr,
{
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            table: DEFAULT_CURSOR_TABLE.to_string(),
            _key: PhantomData,
        }
    }

    /// Connect a new pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Store cursors in `table` instead of [`DEFAULT_CURSOR_TABLE`].
    pub fn with_table(mut self, table: impl Into<String>) -> Result<Self, RepositoryError> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(RepositoryError::Backend(format!("invalid cursor table name {table:?}")));
        }
        self.table = table;
        Ok(self)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the cursor table if it does not exist.
    #[instrument(skip(self), fields(table = %self.table), err)]
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                projection_key       TEXT PRIMARY KEY,
                next_sequence_number BIGINT NOT NULL CHECK (next_sequence_number >= 1),
                updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            table = self.table
        );
        sqlx::query(&sql)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl<K> SequenceCursorRepository<K> for PostgresCursorRepository<K>
where
    K: ProjectionKey + Display + FromStr,
{
    #[instrument(skip(self, keys), fields(table = %self.table, keys = keys.len()), err)]
    async fn fetch(&self, keys: &HashSet<K>) -> Result<HashMap<K, u64>, RepositoryError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let wanted: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let sql = format!(
            "SELECT projection_key, next_sequence_number FROM {} WHERE projection_key = ANY($1)",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(&wanted)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch", e))?;

        let mut cursors = HashMap::with_capacity(rows.len());
        for row in rows {
            let raw_key: String = row
                .try_get("projection_key")
                .map_err(|e| map_sqlx_error("fetch", e))?;
            let raw_value: i64 = row
                .try_get("next_sequence_number")
                .map_err(|e| map_sqlx_error("fetch", e))?;

            let key = K::from_str(&raw_key).map_err(|_| RepositoryError::Corrupt {
                key: raw_key.clone(),
                reason: "stored key does not parse".to_string(),
            })?;
            let value = u64::try_from(raw_value).map_err(|_| RepositoryError::Corrupt {
                key: raw_key.clone(),
                reason: format!("negative sequence number {raw_value}"),
            })?;
            cursors.insert(key, value);
        }

        debug!(found = cursors.len(), "cursors fetched");
        Ok(cursors)
    }

    #[instrument(skip(self, cursors), fields(table = %self.table, cursors = cursors.len()), err)]
    async fn store(&self, cursors: &HashMap<K, u64>) -> Result<(), RepositoryError> {
        if cursors.is_empty() {
            return Ok(());
        }

        let sql = format!(
            r#"
            INSERT INTO {} (projection_key, next_sequence_number)
            VALUES ($1, $2)
            ON CONFLICT (projection_key)
            DO UPDATE SET
                next_sequence_number = EXCLUDED.next_sequence_number,
                updated_at = NOW()
            "#,
            self.table
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("store", e))?;

        for (key, value) in cursors {
            let key = key.to_string();
            let value = i64::try_from(*value).map_err(|_| RepositoryError::Corrupt {
                key: key.clone(),
                reason: format!("sequence number {value} exceeds BIGINT"),
            })?;
            sqlx::query(&sql)
                .bind(&key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("store", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("store", e))?;
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            RepositoryError::Backend(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => RepositoryError::Backend(format!("connection pool closed in {operation}")),
        other => RepositoryError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
