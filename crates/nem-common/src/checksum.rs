//! Content hashing for raw objects and artifacts
//!
//! Files hash to the SHA-256 of their bytes. Directories hash to a single
//! cumulative SHA-256 over `(relative_path, file_digest, file_size)` triples
//! taken in lexicographic relative-path order, so the digest only depends on
//! what the tree contains and never on walk order or creation time.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

/// Digest reported for a directory with no regular files.
///
/// All zeros is not a digest any real byte stream is expected to produce.
pub const EMPTY_DIR_DIGEST: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Hex SHA-256 digest plus the number of bytes it covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    pub sha256: String,
    pub size_bytes: u64,
}

/// Hash any readable source, counting the bytes consumed
pub fn hash_reader<R: Read>(reader: &mut R) -> Result<ContentDigest> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut size_bytes = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        size_bytes += bytes_read as u64;
    }

    Ok(ContentDigest {
        sha256: hex::encode(hasher.finalize()),
        size_bytes,
    })
}

/// Hash a single regular file
pub fn hash_file(path: impl AsRef<Path>) -> Result<ContentDigest> {
    let mut file = File::open(path.as_ref())?;
    hash_reader(&mut file)
}

/// Hash a directory tree (regular files only, symlinks are not followed)
pub fn hash_dir(path: impl AsRef<Path>) -> Result<ContentDigest> {
    let base = path.as_ref();

    let mut files = Vec::new();
    for entry in WalkDir::new(base).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(base)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, entry.into_path()));
    }

    if files.is_empty() {
        return Ok(ContentDigest {
            sha256: EMPTY_DIR_DIGEST.to_string(),
            size_bytes: 0,
        });
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    let mut total_size = 0u64;

    for (relative, full_path) in &files {
        let file_digest = hash_file(full_path)?;
        total_size += file_digest.size_bytes;

        hasher.update(relative.as_bytes());
        hasher.update(b"\0");
        hasher.update(file_digest.sha256.as_bytes());
        hasher.update(b"\0");
        hasher.update(file_digest.size_bytes.to_string().as_bytes());
        hasher.update(b"\0");
    }

    Ok(ContentDigest {
        sha256: hex::encode(hasher.finalize()),
        size_bytes: total_size,
    })
}

/// Hash a file or a directory, whichever the path points at
pub fn hash_path(path: impl AsRef<Path>) -> Result<ContentDigest> {
    let path = path.as_ref();
    if path.is_dir() {
        hash_dir(path)
    } else {
        hash_file(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_hash_reader_known_digest() {
        let mut cursor = Cursor::new(b"hello world".to_vec());
        let digest = hash_reader(&mut cursor).unwrap();
        assert_eq!(
            digest.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(digest.size_bytes, 11);
    }

    #[test]
    fn test_hash_file_matches_reader() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        fs::write(&path, b"test data").unwrap();

        let digest = hash_file(&path).unwrap();
        assert_eq!(
            digest.sha256,
            "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9"
        );
        assert_eq!(digest.size_bytes, 9);
    }

    #[test]
    fn test_empty_dir_uses_sentinel() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let digest = hash_dir(dir.path()).unwrap();
        assert_eq!(digest.sha256, EMPTY_DIR_DIGEST);
        assert_eq!(digest.size_bytes, 0);
    }

    #[test]
    fn test_dir_hash_ignores_creation_order() {
        let first = TempDir::new().unwrap();
        fs::create_dir_all(first.path().join("b")).unwrap();
        fs::write(first.path().join("a.txt"), b"alpha").unwrap();
        fs::write(first.path().join("b/c.txt"), b"charlie").unwrap();

        let second = TempDir::new().unwrap();
        fs::create_dir_all(second.path().join("b")).unwrap();
        fs::write(second.path().join("b/c.txt"), b"charlie").unwrap();
        fs::write(second.path().join("a.txt"), b"alpha").unwrap();

        let a = hash_dir(first.path()).unwrap();
        let b = hash_dir(second.path()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.size_bytes, 12);
    }

    #[test]
    fn test_dir_hash_sees_renames_and_edits() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        let before = hash_dir(dir.path()).unwrap();

        fs::rename(dir.path().join("a.txt"), dir.path().join("z.txt")).unwrap();
        let renamed = hash_dir(dir.path()).unwrap();
        assert_ne!(before.sha256, renamed.sha256);

        fs::write(dir.path().join("z.txt"), b"alphb").unwrap();
        let edited = hash_dir(dir.path()).unwrap();
        assert_ne!(renamed.sha256, edited.sha256);
    }

    #[test]
    fn test_hash_path_dispatches() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("one.bin");
        fs::write(&file, b"x").unwrap();

        assert_eq!(hash_path(&file).unwrap(), hash_file(&file).unwrap());
        assert_eq!(hash_path(dir.path()).unwrap(), hash_dir(dir.path()).unwrap());
    }
}
