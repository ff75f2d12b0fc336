//! Sift Services Library
//!
//! Adapters for external engines used by the ingestion pipeline.

pub mod services;

#[cfg(feature = "clamav")]
pub use services::clamav::ClamAVService;
