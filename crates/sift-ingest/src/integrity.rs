//! End-to-end integrity verification.

use sha2::{Digest, Sha256};
use std::path::Path;
use subtle::ConstantTimeEq;
use tokio::io::AsyncReadExt;

const READ_BUFFER: usize = 64 * 1024;

/// Lowercase hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lowercase hex SHA-256 of a file, streamed.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compare a declared digest (either case) with a computed one in constant time.
pub fn digests_match(declared: &str, actual: &str) -> bool {
    let declared = declared.to_ascii_lowercase();
    let actual = actual.to_ascii_lowercase();
    declared.len() == actual.len() && bool::from(declared.as_bytes().ct_eq(actual.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("test")
    const TEST_DIGEST: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(sha256_hex(b"test"), TEST_DIGEST);
    }

    #[tokio::test]
    async fn test_file_digest_matches_slice_digest() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(file.path(), &data).unwrap();

        assert_eq!(sha256_file(file.path()).await.unwrap(), sha256_hex(&data));
    }

    #[test]
    fn test_digests_match_ignores_case() {
        assert!(digests_match(&TEST_DIGEST.to_uppercase(), TEST_DIGEST));
        assert!(!digests_match(&"0".repeat(64), TEST_DIGEST));
        assert!(!digests_match("9f86", TEST_DIGEST));
    }
}
