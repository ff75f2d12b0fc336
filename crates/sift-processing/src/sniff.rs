//! Magic-number content sniffing.
//!
//! The declared MIME type of an upload is never trusted. The leading bytes of the
//! artifact are compared against the signature table and must identify the same type.

use sift_core::types::{self, AllowedType, SIGNATURE_TABLE};
use std::path::Path;
use tokio::io::AsyncReadExt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("declared {declared}, detected {}", detected.as_deref().unwrap_or("unknown"))]
pub struct ContentTypeError {
    pub declared: String,
    pub detected: Option<String>,
}

/// Read up to `len` leading bytes of a file.
pub async fn read_head(path: &Path, len: usize) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut head).await?;
    Ok(head)
}

/// Identify the true type of a file from its leading bytes.
pub fn sniff(head: &[u8]) -> Option<&'static AllowedType> {
    SIGNATURE_TABLE.iter().find(|t| t.matches(head))
}

/// Require the sniffed type to equal the declared one and to be allowed.
pub fn verify_content_type(
    declared: &str,
    allowed: &[AllowedType],
    head: &[u8],
) -> Result<&'static AllowedType, ContentTypeError> {
    let declared_mime = declared.trim().to_lowercase();
    let detected = sniff(head);

    match detected {
        Some(t) if t.mime == declared_mime && allowed.iter().any(|a| a.mime == t.mime) => Ok(t),
        _ => Err(ContentTypeError {
            declared: declared.to_string(),
            detected: detected.map(|t| t.mime.to_string()),
        }),
    }
}

/// Bytes needed to sniff any known type.
pub fn head_len() -> usize {
    types::max_sniff_len()
}
