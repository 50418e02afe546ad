//! Directory scanning for gallery images.
//!
//! The scanner walks a directory tree collecting image files and every
//! directory it enters. It never fails outright: unreadable directories and
//! entries are logged and skipped, and the directory is still reported so a
//! watch can be installed on it. A shared `seen` set of canonicalized paths
//! keeps symlink cycles and overlapping trees from being walked twice.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

/// File extensions treated as images, matched case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "avif"];

/// Everything a single walk discovered.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Image files found, deduplicated by path.
    pub files: HashSet<PathBuf>,
    /// Every directory the walk entered, including unreadable ones.
    pub directories: HashSet<PathBuf>,
}

impl ScanOutcome {
    /// Folds another walk's results into this one.
    pub fn merge(&mut self, other: ScanOutcome) {
        self.files.extend(other.files);
        self.directories.extend(other.directories);
    }
}

/// Returns true when the path carries a recognized image extension.
pub fn is_image_file(path: &Path) -> bool {
    if let Some(extension) = path.extension() {
        if let Some(ext_str) = extension.to_str() {
            let ext_lower = ext_str.to_lowercase();
            return IMAGE_EXTENSIONS.contains(&ext_lower.as_str());
        }
    }
    false
}

/// Walks `dir` collecting image files and visited directories.
///
/// `seen` holds canonicalized paths of directories already visited; sharing
/// one set across several calls deduplicates overlapping trees within a
/// single refresh. When `recursive` is false only the top level of `dir` is
/// read. Returns an empty outcome if `dir` was already covered by an earlier
/// walk against the same `seen` set.
pub async fn scan_directory(
    dir: &Path,
    recursive: bool,
    seen: &mut HashSet<PathBuf>,
) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();
    if !seen.insert(canonical_key(dir).await) {
        return outcome;
    }

    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        // Recorded before the read attempt so a watch still lands on
        // directories we cannot list yet.
        outcome.directories.insert(current.clone());

        let mut entries = match fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(path = %current.display(), %error, "failed to read gallery directory");
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    warn!(path = %current.display(), %error, "failed to read directory entry");
                    break;
                }
            };

            let path = entry.path();
            // Follows symlinks, so a link to an image counts as an image and
            // a link to a directory is walked like one.
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(error) => {
                    debug!(path = %path.display(), %error, "skipping unreadable entry");
                    continue;
                }
            };

            if metadata.is_dir() {
                if !recursive {
                    continue;
                }
                if seen.insert(canonical_key(&path).await) {
                    pending.push(path);
                }
            } else if metadata.is_file() && is_image_file(&path) {
                outcome.files.insert(path);
            }
        }
    }

    outcome
}

/// Cycle-detection key for a directory.
///
/// Canonicalization resolves symlinks so two names for the same directory
/// collide in the `seen` set. Paths that cannot be canonicalized fall back
/// to their literal form.
async fn canonical_key(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::write(path, b"x").expect("write file");
    }

    #[test]
    fn recognizes_image_extensions_case_insensitively() {
        assert!(is_image_file(Path::new("a.png")));
        assert!(is_image_file(Path::new("b.JPG")));
        assert!(is_image_file(Path::new("c.JpEg")));
        assert!(is_image_file(Path::new("d.avif")));
        assert!(!is_image_file(Path::new("notes.txt")));
        assert!(!is_image_file(Path::new("no_extension")));
        assert!(!is_image_file(Path::new(".png")));
    }

    #[tokio::test]
    async fn collects_images_and_directories_recursively() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("gallery");
        let sub = root.join("more");
        std::fs::create_dir_all(&sub).expect("mkdirs");
        touch(&root.join("a.png"));
        touch(&root.join("b.GIF"));
        touch(&root.join("notes.txt"));
        touch(&sub.join("c.webp"));

        let mut seen = HashSet::new();
        let outcome = scan_directory(&root, true, &mut seen).await;

        assert_eq!(outcome.files.len(), 3);
        assert!(outcome.files.contains(&root.join("a.png")));
        assert!(outcome.files.contains(&root.join("b.GIF")));
        assert!(outcome.files.contains(&sub.join("c.webp")));
        assert_eq!(outcome.directories.len(), 2);
        assert!(outcome.directories.contains(&root));
        assert!(outcome.directories.contains(&sub));
    }

    #[tokio::test]
    async fn non_recursive_scan_stays_at_the_top_level() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("gallery");
        let sub = root.join("more");
        std::fs::create_dir_all(&sub).expect("mkdirs");
        touch(&root.join("a.png"));
        touch(&sub.join("c.webp"));

        let mut seen = HashSet::new();
        let outcome = scan_directory(&root, false, &mut seen).await;

        assert_eq!(outcome.files.len(), 1);
        assert!(outcome.files.contains(&root.join("a.png")));
        assert_eq!(outcome.directories.len(), 1);
        assert!(outcome.directories.contains(&root));
    }

    #[tokio::test]
    async fn unreadable_directory_is_still_recorded() {
        let temp = tempfile::tempdir().expect("tempdir");
        // A plain file where a directory is expected makes read_dir fail on
        // every platform, even when running as root.
        let bogus = temp.path().join("not-a-dir");
        touch(&bogus);

        let mut seen = HashSet::new();
        let outcome = scan_directory(&bogus, true, &mut seen).await;

        assert!(outcome.files.is_empty());
        assert_eq!(outcome.directories.len(), 1);
        assert!(outcome.directories.contains(&bogus));
    }

    #[tokio::test]
    async fn shared_seen_set_skips_already_walked_roots() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("gallery");
        let sub = root.join("more");
        std::fs::create_dir_all(&sub).expect("mkdirs");
        touch(&sub.join("c.webp"));

        let mut seen = HashSet::new();
        let first = scan_directory(&root, true, &mut seen).await;
        assert_eq!(first.files.len(), 1);

        // `sub` was covered by the first walk, so a second scan rooted there
        // yields nothing new.
        let second = scan_directory(&sub, true, &mut seen).await;
        assert!(second.files.is_empty());
        assert!(second.directories.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_cycles_terminate() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("gallery");
        let sub = root.join("nested");
        std::fs::create_dir_all(&sub).expect("mkdirs");
        touch(&root.join("a.png"));
        std::os::unix::fs::symlink(&root, sub.join("loop")).expect("symlink");

        let mut seen = HashSet::new();
        let outcome = scan_directory(&root, true, &mut seen).await;

        assert_eq!(outcome.files.len(), 1);
        assert!(outcome.files.contains(&root.join("a.png")));
        assert_eq!(outcome.directories.len(), 2);
    }
}
