//! Stable pipeline identity derived from the input location.

use std::path::Path;

use sha2::{Digest, Sha256};

/// First 16 hex characters of the SHA-256 of the canonical input path.
///
/// Paths that cannot be canonicalized (e.g. missing directories) are hashed
/// as given.
pub fn pipeline_id(input_dir: &Path) -> String {
    let canonical = input_dir
        .canonicalize()
        .unwrap_or_else(|_| input_dir.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(16);
    id
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn same_directory_same_id() {
        let dir = tempdir().unwrap();
        let direct = pipeline_id(dir.path());
        let dotted = pipeline_id(&dir.path().join("."));
        assert_eq!(direct.len(), 16);
        assert!(direct.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(direct, dotted);
        assert_ne!(direct, pipeline_id(&dir.path().join("missing")));
    }
}
