//! Content hashing for file-level duplicate detection

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::database::{DatabaseError, DatabaseResult};

/// Produces the identity of a file's raw bytes
pub trait FileHasher: Send + Sync {
    fn hash(&self, content: &[u8]) -> String;
}

/// SHA-256 as lowercase hex
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl FileHasher for Sha256Hasher {
    fn hash(&self, content: &[u8]) -> String {
        compute_hash(content)
    }
}

/// Compute SHA256 hash of content
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Compute SHA256 hash of a file on disk
pub fn compute_file_hash(path: &Path) -> DatabaseResult<String> {
    let content = std::fs::read(path)
        .map_err(|e| DatabaseError::IoError(format!("Failed to read file: {}", e)))?;
    Ok(compute_hash(&content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            Sha256Hasher.hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_file_hash_matches_content_hash() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"email\na@x.com\n").unwrap();
        assert_eq!(
            compute_file_hash(file.path()).unwrap(),
            compute_hash(b"email\na@x.com\n")
        );
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = compute_file_hash(Path::new("/definitely/not/here.csv"));
        assert!(matches!(result, Err(DatabaseError::IoError(_))));
    }
}
