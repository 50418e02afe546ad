//! Resolution of configured gallery locations to on-disk directories.

use std::path::{Path, PathBuf};

use crate::error::{GalleryError, Result};

/// Resolves a configured gallery location against the cache root.
///
/// Absolute locations are taken as-is; relative locations are joined onto
/// `root`. No filesystem access happens here, so the result may name a
/// directory that does not exist yet.
pub fn resolve_location(root: &Path, location: &Path) -> PathBuf {
    if location.is_absolute() {
        location.to_path_buf()
    } else {
        root.join(location)
    }
}

/// Creates `path` and any missing parents.
///
/// Succeeds when the directory already exists.
pub async fn ensure_directory(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| GalleryError::DirectoryCreate {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_locations_pass_through() {
        let root = Path::new("/srv/galleries");
        let resolved = resolve_location(root, Path::new("/mnt/pictures/cats"));
        assert_eq!(resolved, PathBuf::from("/mnt/pictures/cats"));
    }

    #[test]
    fn relative_locations_join_the_root() {
        let root = Path::new("/srv/galleries");
        let resolved = resolve_location(root, Path::new("cats"));
        assert_eq!(resolved, PathBuf::from("/srv/galleries/cats"));
    }

    #[tokio::test]
    async fn ensure_directory_creates_nested_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let target = temp.path().join("deep").join("nested").join("gallery");

        ensure_directory(&target).await.expect("create");
        assert!(target.is_dir());

        // Second call is a no-op on an existing directory.
        ensure_directory(&target).await.expect("recreate");
    }

    #[tokio::test]
    async fn ensure_directory_reports_the_failed_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("occupied");
        std::fs::write(&blocker, b"not a directory").expect("write blocker");

        let target = blocker.join("child");
        let err = ensure_directory(&target).await.expect_err("must fail");
        match err {
            GalleryError::DirectoryCreate { path, .. } => assert_eq!(path, target),
            other => panic!("unexpected error: {other}"),
        }
    }
}
