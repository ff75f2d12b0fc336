//! Sift Processing Library
//!
//! File inspection used around the finalize pipeline: declared file-info validation,
//! magic-number content sniffing, metadata stripping with structural re-verification,
//! and the malware scanner contract.

pub mod sanitize;
pub mod sniff;
pub mod traits;
pub mod validator;

// Re-export commonly used types
pub use sanitize::{verify_structure, MetadataStripper, StagedArtifact, StructureError};
#[cfg(feature = "image")]
pub use sanitize::ExifStripper;
pub use sniff::{read_head, sniff, verify_content_type, ContentTypeError};
pub use traits::{MalwareScanner, ScanReport};
pub use validator::{FileInfoValidator, ValidationError};
