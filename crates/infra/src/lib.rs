//! `projector-infra`: infrastructure around the dispatch engine.
//!
//! - `postgres`: Postgres-backed checkpoint storage (SQLx)
//! - `worker`: long-running batch loop feeding a projector from a channel
//! - `config`: environment-driven worker configuration

pub mod config;
pub mod postgres;
pub mod worker;

pub use config::{ConfigLoadError, WorkerConfig};
pub use postgres::{DEFAULT_CURSOR_TABLE, PostgresCursorRepository};
pub use worker::{ProjectionWorker, WorkerError, WorkerHandle};
