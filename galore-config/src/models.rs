use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use galore_core::{GalleryCache, GalleryCommand, GalleryDefaults, WatchSettings};
use serde::{Deserialize, Serialize};

/// Source that produced the loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// How sampled images are handed to the chat frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Send every sampled image at once.
    #[default]
    Immediate,
    /// Send sampled images one at a time with a short pause between them.
    Queued,
}

/// Filesystem watch tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period (ms) after the last filesystem event before a gallery is
    /// rescanned. Shorter windows refresh faster; longer windows coalesce
    /// more of a bulk copy into one rescan.
    pub debounce_window_ms: u64,
    /// Capacity of the trigger queue between watcher callbacks and the
    /// debounce loop. Overflow is harmless, a rescan is already pending.
    pub event_buffer: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: 200,
            event_buffer: 64,
        }
    }
}

impl From<WatchConfig> for WatchSettings {
    fn from(cfg: WatchConfig) -> Self {
        Self {
            debounce_window: Duration::from_millis(cfg.debounce_window_ms.max(1)),
            event_buffer: cfg.event_buffer.max(1),
        }
    }
}

/// Top-level Galore settings: where galleries live, which chat commands
/// serve them, and how sampling and watching behave.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GaloreConfig {
    /// Base directory that relative gallery paths resolve against.
    pub root_dir: PathBuf,
    /// Delivery behaviour for sampled images.
    pub delivery: DeliveryMode,
    /// Sampling defaults shared by commands without their own limit.
    pub defaults: GalleryDefaults,
    /// Filesystem watch debouncing.
    pub watch: WatchConfig,
    /// Gallery commands by chat name. Each needs at least one path; the
    /// other fields carry defaults.
    pub commands: HashMap<String, GalleryCommand>,
}

impl Default for GaloreConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("galleries"),
            delivery: DeliveryMode::default(),
            defaults: GalleryDefaults::default(),
            watch: WatchConfig::default(),
            commands: HashMap::new(),
        }
    }
}

impl GaloreConfig {
    /// Load configuration using environment variables. Evaluation order:
    /// 1) `$GALORE_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$GALORE_CONFIG_JSON` (inline JSON),
    /// 3) the first existing candidate file,
    /// 4) defaults if none of the above is set.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        if let Ok(path_str) = env::var("GALORE_CONFIG_PATH")
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Ok(raw) = env::var("GALORE_CONFIG_JSON")
            && !raw.trim().is_empty()
        {
            let parsed = Self::parse_json(&raw).context("failed to parse GALORE_CONFIG_JSON")?;
            return Ok((parsed, ConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file() {
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read galore config from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid galore config {}", path.display())),
            Some("toml") | Some("tml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid galore config {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        // Try TOML first, then JSON for convenience.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse galore config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid galore config json: {err}"))
    }

    /// Builds the gallery cache this configuration describes.
    pub fn build_cache(&self) -> GalleryCache {
        GalleryCache::new(
            self.root_dir.clone(),
            self.commands.clone(),
            self.defaults.clone(),
            self.watch.clone().into(),
        )
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &[
            "galore.toml",
            "galore.json",
            "config/galore.toml",
            "config/galore.json",
        ];

        CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| path.to_path_buf())
    }
}
