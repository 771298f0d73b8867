//! Filesystem layout for persisted daemon state.
//!
//! Everything leta persists lives under one cache directory:
//!
//! ```text
//! <cache>/leta/
//!   endpoint            socket path (or pipe name) + daemon PID
//!   hover-cache.jsonl   hover cache snapshot
//!   log/daemon.log
//!   log/<server>.log
//! ```

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Root cache directory, honoring `LETA_CACHE_DIR` for tests.
pub fn cache_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("LETA_CACHE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::cache_dir()
        .map(|d| d.join("leta"))
        .ok_or_else(|| Error::Usage("cannot determine user cache directory".to_string()))
}

/// User config file location, honoring `LETA_CONFIG` for tests.
pub fn config_file() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("LETA_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|d| d.join("leta").join("config.toml"))
        .ok_or_else(|| Error::Usage("cannot determine user config directory".to_string()))
}

/// The endpoint discovery file.
pub fn endpoint_file() -> Result<PathBuf> {
    Ok(cache_dir()?.join("endpoint"))
}

/// Directory for the daemon log and per-server logs.
pub fn log_dir() -> Result<PathBuf> {
    Ok(cache_dir()?.join("log"))
}

/// On-disk hover cache snapshot.
pub fn hover_cache_file() -> Result<PathBuf> {
    Ok(cache_dir()?.join("hover-cache.jsonl"))
}

/// Log file for one language server's stderr, named after its executable.
pub fn server_log_file(server: &str) -> Result<PathBuf> {
    let stem = server
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect::<String>();
    Ok(log_dir()?.join(format!("{stem}.log")))
}

/// Creates the cache and log directories if missing.
pub fn ensure_dirs() -> Result<()> {
    std::fs::create_dir_all(log_dir()?)?;
    Ok(())
}
