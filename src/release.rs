//! Release identity: deterministic directory traversal and the
//! content-addressed version hash.
//!
//! The version string must be a pure function of the ordered list of
//! `(relative path, content bytes)` pairs, and must agree across hosts,
//! so the walk order is pinned to lexicographic pre-order rather than
//! whatever the platform readdir happens to return.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Number of hex characters kept from the SHA-256 digest.
const HASH_PREFIX_LEN: usize = 12;

/// Collect every non-directory entry under `dir` in lexicographic
/// pre-order. Symlinks are reported as the OS presents them.
pub fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("failed to walk directory {}", dir.display()))?;
        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Forward-slash path of `full` relative to `base`; falls back to the
/// file name when `full` is not under `base` (the single-file upload
/// case).
pub fn relative_slash_path(base: &Path, full: &Path) -> String {
    let base_name = || {
        full.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    match full.strip_prefix(base) {
        Ok(rel) if rel.as_os_str().is_empty() => base_name(),
        Ok(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => base_name(),
    }
}

/// Hash the ordered file set: for each file, the relative path, a null
/// byte, the raw contents, a null byte. Returns the first 12 lowercase
/// hex characters of the SHA-256 digest.
pub fn compute_release_hash(base: &Path, files: &[PathBuf]) -> Result<String> {
    let mut hasher = Sha256::new();
    for full in files {
        let rel = relative_slash_path(base, full);
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);

        let mut f =
            File::open(full).with_context(|| format!("failed to open {}", full.display()))?;
        std::io::copy(&mut f, &mut hasher)
            .with_context(|| format!("failed to read {}", full.display()))?;
        hasher.update([0u8]);
    }
    Ok(hex::encode(hasher.finalize())[..HASH_PREFIX_LEN].to_string())
}

/// Walk `dir` and derive its release version (`v-` + 12 hex chars).
/// Returns the version together with the ordered file list so the
/// uploader sends exactly what was hashed.
pub fn version_for_dir(dir: &Path) -> Result<(String, Vec<PathBuf>)> {
    let files = walk_files(dir)?;
    let digest = compute_release_hash(dir, &files)?;
    Ok((format!("v-{digest}"), files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn fixture() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.txt"), "world").unwrap();
        dir
    }

    #[test]
    fn walk_is_lexicographic_preorder_of_files_only() {
        let dir = fixture();
        let files = walk_files(dir.path()).unwrap();
        let rels: Vec<String> = files
            .iter()
            .map(|f| relative_slash_path(dir.path(), f))
            .collect();
        assert_eq!(rels, vec!["a.txt", "sub/b.txt"]);
    }

    #[test]
    fn version_has_fixed_shape_and_is_stable() {
        let dir = fixture();
        let (v1, files) = version_for_dir(dir.path()).unwrap();
        let (v2, _) = version_for_dir(dir.path()).unwrap();

        assert_eq!(v1, v2);
        assert_eq!(v1.len(), 14);
        assert!(v1.starts_with("v-"));
        assert!(v1[2..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn renaming_a_file_changes_the_version() {
        let dir = fixture();
        let (before, _) = version_for_dir(dir.path()).unwrap();

        fs::rename(dir.path().join("a.txt"), dir.path().join("c.txt")).unwrap();
        let (after, _) = version_for_dir(dir.path()).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn changing_content_changes_the_version() {
        let dir = fixture();
        let (before, _) = version_for_dir(dir.path()).unwrap();

        fs::write(dir.path().join("a.txt"), "hello!").unwrap();
        let (after, _) = version_for_dir(dir.path()).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn hash_depends_on_file_order() {
        let dir = fixture();
        let mut files = walk_files(dir.path()).unwrap();
        let forward = compute_release_hash(dir.path(), &files).unwrap();
        files.reverse();
        let backward = compute_release_hash(dir.path(), &files).unwrap();
        assert_ne!(forward, backward);
    }

    #[test]
    fn relative_path_of_outside_file_is_its_base_name() {
        let rel = relative_slash_path(Path::new("/srv/www"), Path::new("/tmp/index.html"));
        assert_eq!(rel, "index.html");
    }
}
