use sift_core::{AllowedType, FileInfo, IngestConfig};
use std::path::Path;

const MAX_FILENAME_LEN: usize = 255;
const SHA256_HEX_LEN: usize = 64;

/// Reasons a declared file description is rejected
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Invalid file extension: {extension} (allowed for {content_type}: {allowed:?})")]
    InvalidExtension {
        extension: String,
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("Invalid content type: {content_type} (allowed: {allowed:?})")]
    InvalidContentType {
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Invalid sha256 digest: {0}")]
    InvalidHash(String),

    #[error("Empty file")]
    EmptyFile,
}

/// Validator for client-declared file information
///
/// Everything checked here is taken from the caller's declaration; nothing has been
/// read from disk yet. The finalize pipeline re-checks the declared type against the
/// real bytes.
#[derive(Clone, Debug)]
pub struct FileInfoValidator {
    max_file_size: u64,
    allowed_types: Vec<AllowedType>,
}

impl FileInfoValidator {
    pub fn new(max_file_size: u64, allowed_types: Vec<AllowedType>) -> Self {
        Self {
            max_file_size,
            allowed_types,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.max_file_size, config.allowed_types.clone())
    }

    /// Validate the file name
    ///
    /// Names are limited to ASCII letters, digits, space, `.`, `-` and `_`, must not
    /// start with a dot or contain `..`, and must carry an extension.
    pub fn validate_name(&self, name: &str) -> Result<(), ValidationError> {
        if name.is_empty() || name.len() > MAX_FILENAME_LEN {
            return Err(ValidationError::InvalidFilename(format!(
                "name must be 1-{} characters",
                MAX_FILENAME_LEN
            )));
        }

        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ')))
        {
            return Err(ValidationError::InvalidFilename(format!(
                "character {:?} is not allowed",
                bad
            )));
        }

        if name.starts_with('.') || name.contains("..") {
            return Err(ValidationError::InvalidFilename(name.to_string()));
        }

        if name.trim() != name {
            return Err(ValidationError::InvalidFilename(
                "leading or trailing whitespace".to_string(),
            ));
        }

        extension_of(name).map(|_| ())
    }

    /// Validate file size
    pub fn validate_size(&self, size: u64) -> Result<(), ValidationError> {
        if size == 0 {
            return Err(ValidationError::EmptyFile);
        }

        if size > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        Ok(())
    }

    /// Validate content type against the allow-list
    pub fn validate_content_type(
        &self,
        content_type: &str,
    ) -> Result<&AllowedType, ValidationError> {
        let normalized = content_type.trim().to_lowercase();

        self.allowed_types
            .iter()
            .find(|t| t.mime == normalized)
            .ok_or_else(|| ValidationError::InvalidContentType {
                content_type: content_type.to_string(),
                allowed: self.allowed_types.iter().map(|t| t.mime.to_string()).collect(),
            })
    }

    /// Validate that the file extension is registered for the declared content type
    pub fn validate_extension_matches(
        &self,
        name: &str,
        allowed: &AllowedType,
    ) -> Result<(), ValidationError> {
        let extension = extension_of(name)?;

        if !allowed.has_extension(&extension) {
            return Err(ValidationError::InvalidExtension {
                extension,
                content_type: allowed.mime.to_string(),
                allowed: allowed.extensions.iter().map(|e| e.to_string()).collect(),
            });
        }

        Ok(())
    }

    /// Validate the declared digest: 64 hex characters, either case
    pub fn validate_hash(&self, sha256: &str) -> Result<(), ValidationError> {
        if sha256.len() != SHA256_HEX_LEN || !sha256.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidHash(format!(
                "expected {} hex characters",
                SHA256_HEX_LEN
            )));
        }
        Ok(())
    }

    /// Validate all aspects of a declared file and return its allowed type
    pub fn validate(&self, info: &FileInfo) -> Result<&AllowedType, ValidationError> {
        self.validate_name(&info.name)?;
        self.validate_size(info.size)?;
        let allowed = self.validate_content_type(&info.mime_type)?;
        self.validate_extension_matches(&info.name, allowed)?;
        self.validate_hash(&info.sha256)?;
        Ok(allowed)
    }
}

fn extension_of(name: &str) -> Result<String, ValidationError> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| ValidationError::InvalidFilename(format!("{} has no extension", name)))
}
