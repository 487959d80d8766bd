//! Directory configuration loaded from environment variables.
//!
//! All settings have defaults so a directory can be opened with zero
//! configuration.

use std::path::PathBuf;

use directories::ProjectDirs;
use sigil_shared::constants::DEFAULT_USER_DATA_REFRESH_DAYS;

use crate::error::{DirectoryError, Result};

/// Directory configuration.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// SQLite database file.
    /// Env: `SIGIL_DATABASE_PATH`
    /// Default: `<platform data dir>/sigil.db`
    pub database_path: PathBuf,

    /// Managed directory holding every photo file.
    /// Env: `SIGIL_PHOTOS_DIR`
    /// Default: `<platform data dir>/photos`
    pub photos_dir: PathBuf,

    /// Days between two refreshes of a server-hosted asset.
    /// Env: `SIGIL_USER_DATA_REFRESH_DAYS`
    /// Default: `7`
    pub user_data_refresh_days: i64,

    /// Buffer size of the broadcast notification channel.
    /// Env: `SIGIL_NOTIFICATION_CAPACITY`
    /// Default: `256`
    pub notification_capacity: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        let data_dir = default_data_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            database_path: data_dir.join("sigil.db"),
            photos_dir: data_dir.join("photos"),
            user_data_refresh_days: DEFAULT_USER_DATA_REFRESH_DAYS,
            notification_capacity: 256,
        }
    }
}

impl DirectoryConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SIGIL_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("SIGIL_PHOTOS_DIR") {
            config.photos_dir = PathBuf::from(path);
        }

        if let Ok(raw) = std::env::var("SIGIL_USER_DATA_REFRESH_DAYS") {
            match raw.parse::<i64>() {
                Ok(days) if days > 0 => config.user_data_refresh_days = days,
                _ => {
                    tracing::warn!(
                        value = %raw,
                        "Invalid SIGIL_USER_DATA_REFRESH_DAYS, using default"
                    );
                }
            }
        }

        if let Ok(raw) = std::env::var("SIGIL_NOTIFICATION_CAPACITY") {
            match raw.parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.notification_capacity = capacity,
                _ => {
                    tracing::warn!(
                        value = %raw,
                        "Invalid SIGIL_NOTIFICATION_CAPACITY, using default"
                    );
                }
            }
        }

        config
    }

    /// Interval added to "now" when a server asset is refreshed.
    pub fn refresh_interval(&self) -> chrono::Duration {
        chrono::Duration::days(self.user_data_refresh_days)
    }
}

/// Platform data directory:
/// - Linux:   `~/.local/share/sigil`
/// - macOS:   `~/Library/Application Support/org.sigil.sigil`
/// - Windows: `{FOLDERID_RoamingAppData}\sigil\sigil\data`
pub fn default_data_dir() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("org", "sigil", "sigil").ok_or(DirectoryError::NoDataDir)?;
    Ok(project_dirs.data_dir().to_path_buf())
}
