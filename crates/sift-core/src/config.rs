//! Configuration module
//!
//! Ingestion settings are read from the environment (optionally seeded from a `.env`
//! file). Every option has a default so a bare environment yields a usable development
//! configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{self, AllowedType};

const TEMP_DIR: &str = "./data/tmp";
const QUARANTINE_DIR: &str = "./data/quarantine";
const STORAGE_DIR: &str = "./data/storage";
const MAX_FILE_SIZE_MB: u64 = 100;
const CHUNK_SIZE_BYTES: u64 = 2 * 1024 * 1024;
const ALLOWED_TYPES: &str = "image/jpeg,image/png,image/gif,image/webp,application/pdf";
const QUOTA_PER_USER_MB: u64 = 1024;
const RATE_LIMIT_WINDOW_MS: u64 = 60_000;
const RATE_LIMIT_MAX_REQUESTS: u32 = 10;
const SCAN_TIMEOUT_SECS: u64 = 30;
const STRIP_TIMEOUT_SECS: u64 = 30;
const MAX_CONCURRENT_UPLOADS: usize = 100;
const STALENESS_DEADLINE_SECS: u64 = 24 * 60 * 60;
const SWEEP_INTERVAL_SECS: u64 = 15 * 60;
const CLAMAV_PORT: u16 = 3310;

const MB: u64 = 1024 * 1024;

/// Ingestion pipeline configuration
#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// Directory holding in-flight upload artifacts
    pub temp_dir: PathBuf,
    /// Directory holding artifacts that failed the malware scan
    pub quarantine_dir: PathBuf,
    /// Root of long-term storage (dated layout)
    pub storage_dir: PathBuf,
    pub max_file_size: u64,
    pub chunk_size: u64,
    pub allowed_types: Vec<AllowedType>,
    pub quota_per_user: u64,
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: u32,
    pub scan_timeout: Duration,
    pub strip_timeout: Duration,
    pub max_concurrent_uploads: usize,
    pub staleness_deadline: Duration,
    pub sweep_interval: Duration,
    pub clamav_host: String,
    pub clamav_port: u16,
    /// Emit logs as JSON lines
    pub log_json: bool,
    /// When set, user quotas are persisted in PostgreSQL
    pub database_url: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from(TEMP_DIR),
            quarantine_dir: PathBuf::from(QUARANTINE_DIR),
            storage_dir: PathBuf::from(STORAGE_DIR),
            max_file_size: MAX_FILE_SIZE_MB * MB,
            chunk_size: CHUNK_SIZE_BYTES,
            allowed_types: allowed_types_from_list(ALLOWED_TYPES),
            quota_per_user: QUOTA_PER_USER_MB * MB,
            rate_limit_window: Duration::from_millis(RATE_LIMIT_WINDOW_MS),
            rate_limit_max_requests: RATE_LIMIT_MAX_REQUESTS,
            scan_timeout: Duration::from_secs(SCAN_TIMEOUT_SECS),
            strip_timeout: Duration::from_secs(STRIP_TIMEOUT_SECS),
            max_concurrent_uploads: MAX_CONCURRENT_UPLOADS,
            staleness_deadline: Duration::from_secs(STALENESS_DEADLINE_SECS),
            sweep_interval: Duration::from_secs(SWEEP_INTERVAL_SECS),
            clamav_host: "localhost".to_string(),
            clamav_port: CLAMAV_PORT,
            log_json: false,
            database_url: None,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let allowed_types = allowed_types_from_list(
            &env::var("SIFT_ALLOWED_TYPES").unwrap_or_else(|_| ALLOWED_TYPES.to_string()),
        );

        let log_json = env::var("SIFT_LOG_JSON")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            temp_dir: env::var("SIFT_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            quarantine_dir: env::var("SIFT_QUARANTINE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.quarantine_dir),
            storage_dir: env::var("SIFT_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            max_file_size: megabytes(
                "SIFT_MAX_FILE_SIZE_MB",
                env_parse("SIFT_MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB),
            )?,
            chunk_size: env_parse("SIFT_CHUNK_SIZE_BYTES", CHUNK_SIZE_BYTES),
            allowed_types,
            quota_per_user: megabytes(
                "SIFT_QUOTA_PER_USER_MB",
                env_parse("SIFT_QUOTA_PER_USER_MB", QUOTA_PER_USER_MB),
            )?,
            rate_limit_window: Duration::from_millis(env_parse(
                "SIFT_RATE_LIMIT_WINDOW_MS",
                RATE_LIMIT_WINDOW_MS,
            )),
            rate_limit_max_requests: env_parse(
                "SIFT_RATE_LIMIT_MAX_REQUESTS",
                RATE_LIMIT_MAX_REQUESTS,
            ),
            scan_timeout: Duration::from_secs(env_parse(
                "SIFT_SCAN_TIMEOUT_SECS",
                SCAN_TIMEOUT_SECS,
            )),
            strip_timeout: Duration::from_secs(env_parse(
                "SIFT_STRIP_TIMEOUT_SECS",
                STRIP_TIMEOUT_SECS,
            )),
            max_concurrent_uploads: env_parse(
                "SIFT_MAX_CONCURRENT_UPLOADS",
                MAX_CONCURRENT_UPLOADS,
            ),
            staleness_deadline: Duration::from_secs(env_parse(
                "SIFT_STALENESS_DEADLINE_SECS",
                STALENESS_DEADLINE_SECS,
            )),
            sweep_interval: Duration::from_secs(env_parse(
                "SIFT_SWEEP_INTERVAL_SECS",
                SWEEP_INTERVAL_SECS,
            )),
            clamav_host: env::var("CLAMAV_HOST").unwrap_or(defaults.clamav_host),
            clamav_port: env_parse("CLAMAV_PORT", CLAMAV_PORT),
            log_json,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.chunk_size == 0 {
            return Err(anyhow::anyhow!("SIFT_CHUNK_SIZE_BYTES must be greater than 0"));
        }

        if self.max_file_size == 0 {
            return Err(anyhow::anyhow!("SIFT_MAX_FILE_SIZE_MB must be greater than 0"));
        }

        if self.max_file_size.div_ceil(self.chunk_size) > u64::from(u32::MAX) {
            return Err(anyhow::anyhow!(
                "SIFT_CHUNK_SIZE_BYTES is too small for SIFT_MAX_FILE_SIZE_MB"
            ));
        }

        if self.allowed_types.is_empty() {
            return Err(anyhow::anyhow!(
                "SIFT_ALLOWED_TYPES must name at least one supported type (supported: {})",
                types::SIGNATURE_TABLE
                    .iter()
                    .map(|t| t.mime)
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        if self.rate_limit_max_requests == 0 || self.rate_limit_window.is_zero() {
            return Err(anyhow::anyhow!(
                "SIFT_RATE_LIMIT_MAX_REQUESTS and SIFT_RATE_LIMIT_WINDOW_MS must be greater than 0"
            ));
        }

        if self.max_concurrent_uploads == 0 {
            return Err(anyhow::anyhow!(
                "SIFT_MAX_CONCURRENT_UPLOADS must be greater than 0"
            ));
        }

        if self.scan_timeout.is_zero() {
            return Err(anyhow::anyhow!("SIFT_SCAN_TIMEOUT_SECS must be greater than 0"));
        }

        if self.sweep_interval.is_zero() {
            return Err(anyhow::anyhow!("SIFT_SWEEP_INTERVAL_SECS must be greater than 0"));
        }

        if self.temp_dir == self.storage_dir || self.quarantine_dir == self.storage_dir {
            return Err(anyhow::anyhow!(
                "SIFT_STORAGE_DIR must differ from SIFT_TEMP_DIR and SIFT_QUARANTINE_DIR"
            ));
        }

        Ok(())
    }

    /// The allowed entry for a declared MIME type, if any.
    pub fn allowed_type(&self, mime: &str) -> Option<&AllowedType> {
        let mime = mime.trim().to_lowercase();
        self.allowed_types.iter().find(|t| t.mime == mime)
    }

    /// Point temp, quarantine and storage directories under `root`.
    pub fn with_root_dir(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.temp_dir = root.join("tmp");
        self.quarantine_dir = root.join("quarantine");
        self.storage_dir = root.join("storage");
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_quota_per_user(mut self, quota_per_user: u64) -> Self {
        self.quota_per_user = quota_per_user;
        self
    }

    pub fn with_rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.rate_limit_max_requests = max_requests;
        self.rate_limit_window = window;
        self
    }

    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    pub fn with_strip_timeout(mut self, strip_timeout: Duration) -> Self {
        self.strip_timeout = strip_timeout;
        self
    }

    pub fn with_max_concurrent_uploads(mut self, max_concurrent_uploads: usize) -> Self {
        self.max_concurrent_uploads = max_concurrent_uploads;
        self
    }

    pub fn with_staleness_deadline(mut self, staleness_deadline: Duration) -> Self {
        self.staleness_deadline = staleness_deadline;
        self
    }
}

/// Resolve a comma-separated MIME list against the built-in signature table.
/// Unknown names are skipped.
pub fn allowed_types_from_list(list: &str) -> Vec<AllowedType> {
    let mut resolved: Vec<AllowedType> = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if let Some(t) = types::lookup(name) {
            if !resolved.iter().any(|r| r.mime == t.mime) {
                resolved.push(*t);
            }
        }
    }
    resolved
}

/// `value` MiB in bytes, rejecting settings that do not fit a u64.
fn megabytes(key: &str, value: u64) -> Result<u64, anyhow::Error> {
    value
        .checked_mul(MB)
        .ok_or_else(|| anyhow::anyhow!("{} is too large: {} MB", key, value))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
