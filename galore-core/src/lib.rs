//! Core library for Galore.
//!
//! Galore keeps per-command image galleries cached for a chat bot: it scans
//! configured directories for image files, keeps the results fresh through
//! debounced filesystem watches, and serves random samples without
//! replacement. The [`gallery::GalleryCache`] type ties the pieces together;
//! the submodules hold the scanner, watch plumbing, and sampler it builds on.

pub mod error;
pub mod gallery;
pub mod paths;
pub mod sample;
pub mod scan;
pub mod watch;

pub use error::{GalleryError, Result};
pub use gallery::{GalleryCache, GalleryCommand, GalleryDefaults, RefreshSummary};
pub use paths::resolve_location;
pub use sample::pick_random;
pub use scan::{IMAGE_EXTENSIONS, ScanOutcome, is_image_file, scan_directory};
pub use watch::WatchSettings;
