//! Configuration loading for Galore.
//!
//! The [`models::GaloreConfig`] type holds everything the gallery cache and
//! its host need: the cache root, per-command gallery definitions, sampling
//! defaults, watch tuning, and the delivery mode. Configuration is read from
//! an environment-selected file, inline JSON, or well-known candidate paths,
//! falling back to built-in defaults.

pub mod models;

pub use models::{ConfigSource, DeliveryMode, GaloreConfig, WatchConfig};
