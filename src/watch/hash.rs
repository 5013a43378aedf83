use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Blake3 hex digest of the file at `path`.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("opening {} for hashing", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    hasher
        .update_reader(file)
        .with_context(|| format!("reading {} for hashing", path.display()))?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Hash a file on the blocking pool.
///
/// Returns `None` when the file cannot be read (deleted, permission denied,
/// a directory, ...). Such a change is never suppressed.
pub async fn hash_file(path: PathBuf) -> Option<String> {
    let result = tokio::task::spawn_blocking(move || {
        let hash = compute_file_hash(&path);
        if let Err(err) = &hash {
            debug!(path = %path.display(), error = %err, "content hash unavailable");
        }
        hash.ok()
    })
    .await;

    result.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("data.bin");
        let content = vec![7u8; 70_000];
        std::fs::write(&file, &content).expect("write");

        let digest = compute_file_hash(&file).expect("hash");
        assert_eq!(digest, blake3::hash(&content).to_hex().to_string());
    }

    #[tokio::test]
    async fn missing_file_has_no_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(hash_file(dir.path().join("gone.txt")).await, None);
    }
}
