//! Error-report configuration with hot reload.
//!
//! The file is TOML with the keys the reporting pipeline has always used:
//!
//! ```toml
//! IsLogEnabled = true
//! IsLogPushEnabledToRemote = false
//! LogPath = "/var/log/app/panic-"
//! RemoteUrl = "https://errors.example.com/ingest"
//! Agent = "orders-api"
//! ```
//!
//! [`SharedConfig`] holds the current snapshot behind an `ArcSwap`. Readers
//! take an `Arc` to an immutable [`ReportConfig`]; a reload builds a whole new
//! snapshot and swaps it in, so no reader ever sees half an update.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::Error;

/// Where [`SharedConfig::watch_default`] looks.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Switches and destinations for panic reports.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct ReportConfig {
    /// Append reports to daily files under `log_path`.
    pub is_log_enabled: bool,
    /// POST reports to `remote_url`.
    pub is_log_push_enabled_to_remote: bool,
    /// Prefix of the daily file; the date and `.txt` are appended to it.
    pub log_path: String,
    pub remote_url: String,
    /// Copied into every report, to tell services apart.
    pub agent: String,
}

impl ReportConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// The current [`ReportConfig`], optionally kept in sync with its file.
#[derive(Clone)]
pub struct SharedConfig {
    current: Arc<ArcSwap<ReportConfig>>,
    path: Option<PathBuf>,
    // Dropping the watcher stops the reloads; it lives as long as any clone.
    _watcher: Option<Arc<RecommendedWatcher>>,
}

impl SharedConfig {
    /// A fixed configuration, never reloaded.
    pub fn fixed(config: ReportConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            path: None,
            _watcher: None,
        }
    }

    /// Loads `path` once, without watching it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let config = ReportConfig::load(&path)?;
        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            path: Some(path),
            _watcher: None,
        })
    }

    /// Loads `path` and reloads it whenever it changes on disk.
    ///
    /// A missing or invalid file is an error here: a service should not start
    /// with reporting silently misconfigured. Once running, a bad edit is
    /// logged and the previous snapshot stays in effect.
    pub fn watch(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut shared = Self::load(path)?;
        let path = shared.path.clone().unwrap_or_default();

        // Watch the directory, not the file: editors that save by renaming
        // would otherwise leave us watching a deleted inode.
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(ToOwned::to_owned);
        let current = Arc::clone(&shared.current);
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(ToOwned::to_owned) == file_name);
                    if ours && matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        reload_into(&current, &watched);
                    }
                }
                Err(e) => warn!("config watch error: {e}"),
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        shared._watcher = Some(Arc::new(watcher));
        Ok(shared)
    }

    /// [`watch`](Self::watch) on `config.toml` in the working directory.
    pub fn watch_default() -> Result<Self, Error> {
        Self::watch(DEFAULT_CONFIG_PATH)
    }

    /// The snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<ReportConfig> {
        self.current.load_full()
    }

    /// Re-reads the file now. On error the current snapshot is kept.
    pub fn reload(&self) -> Result<(), Error> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let config = ReportConfig::load(path)?;
        self.current.store(Arc::new(config));
        Ok(())
    }

    /// Replaces the snapshot directly.
    pub fn store(&self, config: ReportConfig) {
        self.current.store(Arc::new(config));
    }
}

fn reload_into(current: &ArcSwap<ReportConfig>, path: &Path) {
    match ReportConfig::load(path) {
        Ok(config) => {
            info!(path = %path.display(), "report config reloaded");
            current.store(Arc::new(config));
        }
        Err(e) => warn!("keeping previous report config: {e}"),
    }
}
