//! # Meridian Database Crate
//!
//! The persistence layer of the platform. The services only ever see the
//! [`Store`] and [`UnitOfWork`] traits; this crate provides the PostgreSQL
//! implementation used in production and an in-memory one with the same
//! transactional behaviour.
//!
//! ## Public API
//!
//! - `connect`: Establishes the database connection pool.
//! - `run_migrations`: Applies the embedded migrations.
//! - `Store` / `UnitOfWork`: The data access contract. A unit of work is a
//!   transaction with exclusive row locks on users and portfolios.
//! - `PgStore`: `sqlx`-backed implementation over a `PgPool`.
//! - `MemoryStore`: In-process implementation.
//! - `DbError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{Store, UnitOfWork};
