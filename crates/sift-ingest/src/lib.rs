//! Sift ingestion service
//!
//! Accepts files in fixed-size chunks, enforces per-user rate and quota limits, and
//! runs every completed upload exactly once through the finalize pipeline:
//! integrity, malware scan, metadata strip, content-type check, storage placement,
//! quota commit and cleanup.
//!
//! [`IngestService`] is the entry point. Transports (HTTP, RPC) sit outside this crate
//! and call its three operations: [`IngestService::initiate_upload`],
//! [`IngestService::submit_chunk`] and [`IngestService::get_status`].

pub mod chunk_writer;
pub mod integrity;
pub mod pipeline;
pub mod quota;
pub mod registry;
pub mod service;
pub mod sweeper;

pub use chunk_writer::ChunkWriter;
pub use pipeline::FinalizePipeline;
pub use quota::QuotaManager;
pub use registry::{SessionEntry, UploadRegistry};
pub use service::{Collaborators, IngestService};
pub use sweeper::{SweepStats, Sweeper};
