//! XDG directory helpers for config/data locations.

use std::path::PathBuf;

/// Base directory for persistent data (station files, daemon metadata).
///
/// Uses `STATIOND_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/stationd` or
/// `~/.local/share/stationd`.
pub(crate) fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STATIOND_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("stationd")
}

/// Directory holding one durable unit per station identity.
pub fn stations_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("stations")
}

/// Daemon metadata path (meta.json) under a data dir.
pub fn meta_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("meta.json")
}

/// Base directory for configuration files.
///
/// Uses `STATIOND_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/stationd`
/// or `~/.config/stationd`.
pub(crate) fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("STATIOND_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("stationd")
}
