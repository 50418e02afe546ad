//! Per-command gallery cache with watch-driven refresh.
//!
//! Each configured chat command owns a cache entry: an immutable snapshot of
//! its image files, the set of directories its watcher covers, the watcher
//! handle itself, and a debounce loop that turns filesystem noise into a
//! single rescan. Snapshots are published atomically behind an `Arc`, so
//! readers sampling mid-refresh keep a consistent view and a refresh never
//! leaves the cache partially updated.

use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use notify::RecommendedWatcher;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{GalleryError, Result};
use crate::paths::{ensure_directory, resolve_location};
use crate::sample::pick_random;
use crate::scan::{ScanOutcome, scan_directory};
use crate::watch::{TriggerMessage, WatchSettings, install_watchers, spawn_debounce};

/// One chat command's gallery definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryCommand {
    /// Gallery locations, absolute or relative to the cache root.
    pub paths: Vec<PathBuf>,
    /// Per-command cap on how many images one invocation may return.
    /// Falls back to the global maximum when unset.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Whether subdirectories are scanned.
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// Human-readable blurb for help output.
    #[serde(default)]
    pub description: String,
}

fn default_recursive() -> bool {
    true
}

impl Default for GalleryCommand {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            limit: None,
            recursive: true,
            description: String::new(),
        }
    }
}

/// Process-wide sampling defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryDefaults {
    /// Images returned when an invocation names no count.
    pub default_count: usize,
    /// Upper bound for commands without their own limit.
    pub max_count: usize,
}

impl Default for GalleryDefaults {
    fn default() -> Self {
        Self {
            default_count: 1,
            max_count: 10,
        }
    }
}

/// What one refresh accomplished.
#[derive(Debug, Clone)]
pub struct RefreshSummary {
    /// Image files in the published snapshot.
    pub files: usize,
    /// Directories the new watcher covers.
    pub watched_directories: usize,
    /// Wall-clock time the refresh took.
    pub elapsed: Duration,
}

struct DebounceHandle {
    tx: mpsc::Sender<TriggerMessage>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct CacheEntry {
    files: Arc<Vec<PathBuf>>,
    watched: HashSet<PathBuf>,
    watcher: Option<RecommendedWatcher>,
    trigger: Option<DebounceHandle>,
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("files", &self.files.len())
            .field("watched", &self.watched.len())
            .field("watcher_installed", &self.watcher.is_some())
            .field(
                "debounce_running",
                &self.trigger.as_ref().map(|handle| !handle.task.is_finished()),
            )
            .finish()
    }
}

struct CacheInner {
    root: PathBuf,
    commands: HashMap<String, GalleryCommand>,
    defaults: GalleryDefaults,
    watch: WatchSettings,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

/// Gallery cache shared between the chat frontend and refresh tasks.
///
/// Cloning is cheap and every clone observes the same cache.
#[derive(Clone)]
pub struct GalleryCache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for GalleryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("GalleryCache");
        debug
            .field("root", &self.inner.root)
            .field("commands", &self.inner.commands.len());

        match self.inner.entries.try_read() {
            Ok(guard) => {
                let cached_files: usize = guard.values().map(|entry| entry.files.len()).sum();
                let active_watchers = guard
                    .values()
                    .filter(|entry| entry.watcher.is_some())
                    .count();
                debug
                    .field("cached_files", &cached_files)
                    .field("active_watchers", &active_watchers);
            }
            Err(_) => {
                debug.field("entries", &"<locked>");
            }
        }

        debug.finish()
    }
}

impl GalleryCache {
    /// Builds a cache for `commands` rooted at `root`.
    ///
    /// A relative root is resolved against the current working directory so
    /// refreshes and watches agree on one absolute base. Nothing is scanned
    /// until [`GalleryCache::ready`] or the first sample.
    pub fn new(
        root: impl Into<PathBuf>,
        commands: HashMap<String, GalleryCommand>,
        defaults: GalleryDefaults,
        watch: WatchSettings,
    ) -> Self {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(root)
        };
        Self {
            inner: Arc::new(CacheInner {
                root,
                commands,
                defaults,
                watch,
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Root directory gallery locations resolve against.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Sampling defaults the cache was built with.
    pub fn defaults(&self) -> &GalleryDefaults {
        &self.inner.defaults
    }

    /// Configured command names, sorted for stable iteration.
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Looks up one command's configuration.
    pub fn command(&self, name: &str) -> Option<&GalleryCommand> {
        self.inner.commands.get(name)
    }

    /// Warms the cache by refreshing every configured command.
    ///
    /// Failures are logged and do not stop the remaining commands from
    /// warming; sampling falls back to on-demand refreshes for any command
    /// that failed here.
    pub async fn ready(&self) {
        for name in self.command_names() {
            if let Err(error) = self.refresh(&name).await {
                warn!(command = %name, %error, "initial gallery refresh failed");
            }
        }
    }

    /// Rescans one command's galleries and publishes a fresh snapshot.
    ///
    /// Missing gallery directories are created on the way. If some cannot
    /// be created the survivors are still scanned and published before the
    /// first failure is returned.
    pub async fn refresh(&self, name: &str) -> Result<RefreshSummary> {
        self.inner.refresh(name).await
    }

    /// Current snapshot of a command's image files, sorted by path.
    ///
    /// The snapshot is shared, not copied, and never mutates after
    /// publication. Unknown commands yield an empty snapshot.
    pub async fn files(&self, name: &str) -> Arc<Vec<PathBuf>> {
        self.inner
            .entries
            .read()
            .await
            .get(name)
            .map(|entry| Arc::clone(&entry.files))
            .unwrap_or_default()
    }

    /// Directories currently covered by a command's watcher.
    pub async fn watched_directories(&self, name: &str) -> HashSet<PathBuf> {
        self.inner
            .entries
            .read()
            .await
            .get(name)
            .map(|entry| entry.watched.clone())
            .unwrap_or_default()
    }

    /// Refreshes `name` if its snapshot is empty.
    pub async fn ensure_fresh(&self, name: &str) -> Result<()> {
        if self.files(name).await.is_empty() {
            self.inner.refresh(name).await?;
        }
        Ok(())
    }

    /// Samples up to `requested` distinct images from the current snapshot.
    ///
    /// The count is clamped to the command's limit, or the global maximum
    /// when it has none, and then to the number of cached images. An empty
    /// snapshot yields an empty sample.
    pub async fn sample(&self, name: &str, requested: usize) -> Result<Vec<PathBuf>> {
        let command = self
            .inner
            .commands
            .get(name)
            .ok_or_else(|| GalleryError::UnknownCommand(name.to_string()))?;
        let cap = command.limit.unwrap_or(self.inner.defaults.max_count);
        let files = self.files(name).await;
        Ok(pick_random(&files, requested.min(cap)))
    }

    /// Sampling entry point for chat invocations.
    ///
    /// A missing `requested` falls back to the configured default count. An
    /// empty snapshot is refreshed before sampling; a refresh failure at
    /// that point is logged and sampling proceeds against whatever snapshot
    /// survived, so a half-broken gallery still serves its healthy half.
    pub async fn pick(&self, name: &str, requested: Option<usize>) -> Result<Vec<PathBuf>> {
        let requested = requested.unwrap_or(self.inner.defaults.default_count);
        if let Err(error) = self.ensure_fresh(name).await {
            match error {
                GalleryError::UnknownCommand(_) => return Err(error),
                other => {
                    warn!(command = %name, error = %other, "refresh before sampling failed");
                }
            }
        }
        self.sample(name, requested).await
    }

    /// Tears down every watcher and debounce loop and clears all snapshots.
    ///
    /// The cache stays usable afterwards: the next refresh rebuilds its
    /// entry from scratch.
    pub async fn dispose(&self) {
        let drained: Vec<(String, CacheEntry)> = {
            let mut entries = self.inner.entries.write().await;
            entries.drain().collect()
        };
        let count = drained.len();
        for (name, entry) in drained {
            if let Some(handle) = entry.trigger {
                handle.task.abort();
            }
            // Dropping the entry stops its notify stream.
            debug!(command = %name, "gallery watches closed");
        }
        info!(commands = count, "gallery cache disposed");
    }
}

impl CacheInner {
    /// Boxed rather than an `async fn`: the debounce closure spawned by
    /// [`CacheInner::trigger_sender`] recurses into `refresh`, and the
    /// indirection breaks the resulting `Send` auto-trait cycle.
    fn refresh<'a>(
        self: &'a Arc<Self>,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RefreshSummary>> + Send + 'a>> {
        Box::pin(async move {
            let started = Instant::now();
            let command = self
                .commands
                .get(name)
                .ok_or_else(|| GalleryError::UnknownCommand(name.to_string()))?
                .clone();

            let tx = self.trigger_sender(name).await;

            let resolved: Vec<PathBuf> = command
                .paths
                .iter()
                .map(|location| resolve_location(&self.root, location))
                .collect();

            let mut outcome = ScanOutcome::default();
            let mut seen = HashSet::new();
            let mut create_failure: Option<GalleryError> = None;
            for dir in &resolved {
                if let Err(error) = ensure_directory(dir).await {
                    warn!(command = %name, path = %dir.display(), %error, "gallery directory unavailable");
                    if create_failure.is_none() {
                        create_failure = Some(error);
                    }
                    continue;
                }
                outcome.merge(scan_directory(dir, command.recursive, &mut seen).await);
            }

            // Configured directories join the watch set even when they could not
            // be created or scanned, so recovery is noticed without waiting for
            // the next manual refresh.
            let mut watch_dirs = outcome.directories;
            watch_dirs.extend(resolved);

            let (watcher, watched) = install_watchers(name, watch_dirs, tx).await;

            let mut files: Vec<PathBuf> = outcome.files.into_iter().collect();
            files.sort();
            let summary = RefreshSummary {
                files: files.len(),
                watched_directories: watched.len(),
                elapsed: started.elapsed(),
            };

            let stale = {
                let mut entries = self.entries.write().await;
                let entry = entries.entry(name.to_string()).or_default();
                entry.files = Arc::new(files);
                entry.watched = watched;
                std::mem::replace(&mut entry.watcher, watcher)
            };
            // The previous watcher is released only after its replacement is
            // live, so changes keep landing throughout the swap.
            drop(stale);

            info!(
                command = %name,
                files = summary.files,
                watched = summary.watched_directories,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "gallery refreshed"
            );

            match create_failure {
                Some(error) => Err(error),
                None => Ok(summary),
            }
        })
    }

    /// Returns the trigger channel for `name`, spawning its debounce loop on
    /// first use. The loop holds only a weak reference back to the cache so
    /// dropping the cache tears the loop down instead of leaking it.
    async fn trigger_sender(self: &Arc<Self>, name: &str) -> mpsc::Sender<TriggerMessage> {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(name.to_string()).or_default();
        if let Some(handle) = &entry.trigger {
            return handle.tx.clone();
        }

        let (tx, rx) = mpsc::channel(self.watch.event_buffer.max(1));
        let weak = Arc::downgrade(self);
        let command = name.to_string();
        let task = spawn_debounce(
            command.clone(),
            self.watch.debounce_window,
            rx,
            move || {
                let weak = Weak::clone(&weak);
                let command = command.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if let Err(error) = inner.refresh(&command).await {
                        warn!(command = %command, %error, "watch-triggered refresh failed");
                    }
                }
            },
        );
        entry.trigger = Some(DebounceHandle {
            tx: tx.clone(),
            task,
        });
        tx
    }
}
