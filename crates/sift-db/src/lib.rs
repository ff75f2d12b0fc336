//! Sift persistence collaborators
//!
//! Implementations of [`sift_core::QuotaStore`]: an in-memory store for tests and
//! single-node setups, and a PostgreSQL repository.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod quota;

pub use memory::InMemoryQuotaStore;
#[cfg(feature = "postgres")]
pub use quota::{setup_database, PgQuotaRepository};
