//! Platform-specific config and data directory helpers.
//!
//! Uses the `dirs` crate to resolve platform-appropriate directories:
//! - Linux:   `~/.config/webdavfs/` (config), `~/.local/share/webdavfs/` (data)
//! - Windows: `%APPDATA%\webdavfs\` (config), `%APPDATA%\webdavfs\` (data)
//! - macOS:   `~/Library/Application Support/webdavfs/` (both)

use std::path::PathBuf;

use crate::error::DavError;

/// Get the webdavfs config directory, creating it if needed.
///
/// If the `WEBDAVFS_CONFIG_DIR` environment variable is set, it overrides
/// the default location, enabling test isolation and custom deployments.
pub fn webdavfs_config_dir() -> Result<PathBuf, DavError> {
    if let Ok(override_dir) = std::env::var("WEBDAVFS_CONFIG_DIR") {
        let dir = PathBuf::from(override_dir);
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        return Ok(dir);
    }
    let base = dirs::config_dir()
        .ok_or_else(|| DavError::Config("could not determine config directory".into()))?;
    let dir = base.join("webdavfs");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).ok();
        }
    }
    Ok(dir)
}

/// Get the webdavfs data directory (cache root, queue state), creating it
/// if needed. Same `WEBDAVFS_DATA_DIR` override convention as the config
/// directory.
pub fn webdavfs_data_dir() -> Result<PathBuf, DavError> {
    if let Ok(override_dir) = std::env::var("WEBDAVFS_DATA_DIR") {
        let dir = PathBuf::from(override_dir);
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        return Ok(dir);
    }
    let base = dirs::data_dir()
        .ok_or_else(|| DavError::Config("could not determine data directory".into()))?;
    let dir = base.join("webdavfs");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}
