use async_trait::async_trait;
use clamav_client::{clean, Tcp};
use sift_processing::{MalwareScanner, ScanReport};
use std::path::Path;
use std::str;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// ClamAV daemon (`clamd`) scanner over TCP.
///
/// Scans are always fail-closed: an unreachable daemon or an unparsable reply is an
/// error, never a clean verdict. The deadline is owned by the caller.
#[derive(Clone, Debug)]
pub struct ClamAVService {
    host: String,
    port: u16,
}

impl ClamAVService {
    /// Create a new ClamAVService.
    ///
    /// # Arguments
    /// * `host` - ClamAV daemon hostname
    /// * `port` - ClamAV daemon port (typically 3310)
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check that the daemon answers `PING`.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let address = self.address();
        let response = tokio::task::spawn_blocking(move || {
            clamav_client::ping(Tcp {
                host_address: address.as_str(),
            })
        })
        .await??;

        if response == clamav_client::PONG {
            Ok(())
        } else {
            anyhow::bail!(
                "Unexpected ClamAV ping response: {}",
                String::from_utf8_lossy(&response).trim()
            )
        }
    }
}

/// Extract threat names from a `clamd` reply such as `/path/file: Eicar-Signature FOUND`.
pub fn parse_threats(response: &[u8]) -> Vec<String> {
    let text = match str::from_utf8(response) {
        Ok(s) => s,
        Err(_) => return vec!["unknown".to_string()],
    };

    let threats: Vec<String> = text
        .split(['\n', '\0'])
        .map(str::trim)
        .filter_map(|line| line.strip_suffix("FOUND"))
        .map(|line| {
            line.rsplit_once(": ")
                .map(|(_, name)| name)
                .unwrap_or(line)
                .trim()
                .to_string()
        })
        .filter(|name| !name.is_empty())
        .collect();

    if threats.is_empty() {
        vec!["unknown".to_string()]
    } else {
        threats
    }
}

#[async_trait]
impl MalwareScanner for ClamAVService {
    #[tracing::instrument(skip(self, cancel), fields(clamav.host = %self.host, clamav.port = self.port))]
    async fn scan(&self, path: &Path, cancel: CancellationToken) -> anyhow::Result<ScanReport> {
        let start = Instant::now();
        let address = self.address();
        let file_path = path.to_path_buf();

        // The blocking call cannot be interrupted; on cancellation its result is discarded
        let scan = tokio::task::spawn_blocking(move || {
            clamav_client::scan_file(
                &file_path,
                Tcp {
                    host_address: address.as_str(),
                },
                None,
            )
        });

        let response_bytes = tokio::select! {
            joined = scan => joined??,
            _ = cancel.cancelled() => {
                tracing::warn!(
                    duration_ms = start.elapsed().as_millis() as u64,
                    "ClamAV scan abandoned after cancellation"
                );
                anyhow::bail!("ClamAV scan cancelled");
            }
        };

        let is_clean = clean(&response_bytes)
            .map_err(|e| anyhow::anyhow!("Failed to parse ClamAV response: {}", e))?;

        if is_clean {
            tracing::info!(
                duration_ms = start.elapsed().as_millis() as u64,
                "File scan completed: clean"
            );
            return Ok(ScanReport::clean());
        }

        let reply = String::from_utf8_lossy(&response_bytes);
        if !reply.contains("FOUND") {
            anyhow::bail!("ClamAV scan error: {}", reply.trim_matches(['\0', '\n', ' ']));
        }

        let threats = parse_threats(&response_bytes);
        tracing::warn!(
            duration_ms = start.elapsed().as_millis() as u64,
            threats = ?threats,
            "File scan detected malware"
        );
        Ok(ScanReport::infected(threats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_threats_from_file_reply() {
        let reply = b"/srv/tmp/a b:c.part: Eicar-Test-Signature FOUND\0";
        assert_eq!(parse_threats(reply), vec!["Eicar-Test-Signature"]);
    }

    #[test]
    fn test_parse_threats_multiple_lines() {
        let reply = b"stream: Win.Trojan.A FOUND\nstream: Win.Trojan.B FOUND\n";
        assert_eq!(parse_threats(reply), vec!["Win.Trojan.A", "Win.Trojan.B"]);
    }

    #[test]
    fn test_parse_threats_unrecognised_reply() {
        assert_eq!(parse_threats(b"garbage"), vec!["unknown"]);
        assert_eq!(parse_threats(&[0xFF, 0xFE]), vec!["unknown"]);
    }

    #[tokio::test]
    async fn test_unreachable_daemon_fails_closed() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"harmless").unwrap();

        // Port 1 on localhost is not a clamd
        let service = ClamAVService::new("127.0.0.1".to_string(), 1);
        let result = service.scan(file.path(), CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_scan_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let service = ClamAVService::new("127.0.0.1".to_string(), 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(service.scan(file.path(), cancel).await.is_err());
    }
}
