//! Storage key generation.

use chrono::NaiveDate;
use sift_core::UploadId;

use crate::traits::{StorageError, StorageResult};

/// Check an artifact extension such as `.jpg`.
pub fn validate_extension(extension: &str) -> StorageResult<()> {
    let valid = extension.is_empty()
        || (extension.starts_with('.')
            && extension.len() > 1
            && extension[1..].chars().all(|c| c.is_ascii_alphanumeric()));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(format!(
            "Invalid artifact extension: {:?}",
            extension
        )))
    }
}

/// `YYYY/MM/DD/{upload_id}{ext}`
pub fn dated_key(upload_id: UploadId, extension: &str, date: NaiveDate) -> StorageResult<String> {
    validate_extension(extension)?;
    Ok(format!(
        "{}/{}{}",
        date.format("%Y/%m/%d"),
        upload_id,
        extension
    ))
}

/// `{upload_id}{ext}`
pub fn quarantine_file_name(upload_id: UploadId, extension: &str) -> StorageResult<String> {
    validate_extension(extension)?;
    Ok(format!("{}{}", upload_id, extension))
}
