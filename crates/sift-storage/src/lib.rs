//! Sift Storage Library
//!
//! Long-term placement of verified artifacts and quarantine of infected ones.
//!
//! # Layout
//!
//! - **Stored artifacts**: `{storage_dir}/YYYY/MM/DD/{upload_id}{ext}`; the storage key
//!   is the path relative to `storage_dir`.
//! - **Quarantined artifacts**: `{quarantine_dir}/{upload_id}{ext}`.
//!
//! Artifacts are moved with a rename, never copied, so a failed placement leaves the
//! artifact only where it was.

pub(crate) mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod traits;

// Re-export commonly used types
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use traits::{Storage, StorageError, StorageResult};
