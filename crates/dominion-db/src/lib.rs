//! Persistence for the Dominion territory engine.
//!
//! The engine keeps all state in memory and treats the repository as a
//! write target. At startup it calls [`Repository::load_all`] once; after
//! every operation it pushes the changed records; on shutdown it calls
//! [`Repository::flush`].
//!
//! # Backends
//!
//! ```text
//! DominionState
//!     |
//!     +-- Repository (sync, inline with each mutation)
//!         |-- MemoryRepository   (tests)
//!         |-- JsonFileRepository (single JSON document, atomic rename)
//!         +-- PgRepository       (write-behind queue -> PostgreSQL)
//! ```
//!
//! # Modules
//!
//! - [`repository`] -- The [`Repository`] contract, [`Snapshot`], and the
//!   in-memory backend
//! - [`json_store`] -- JSON file backend
//! - [`postgres`] -- `PostgreSQL` connection pool and migrations
//! - [`pg_store`] -- `PostgreSQL` snapshot loading and write-behind backend
//! - [`error`] -- Shared error types

pub mod error;
pub mod json_store;
pub mod pg_store;
pub mod postgres;
pub mod repository;

pub use error::DbError;
pub use json_store::JsonFileRepository;
pub use pg_store::PgRepository;
pub use postgres::PostgresPool;
pub use repository::{MemoryRepository, Repository, Snapshot};
