use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// On-disk settings. Every key is optional; unset keys fall back to the
/// defaults in [`crate::core::constants`].
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Backend base URL, e.g. `http://127.0.0.1:8000`
    pub base_url: Option<String>,
    /// Milliseconds between revealed units
    pub reveal_interval_ms: Option<u64>,
    /// Context tag sent with every prompt
    pub context: Option<String>,
    /// Title for conversations created without one
    pub default_title: Option<String>,
    /// Seed message for new conversations; `{title}` is substituted
    pub greeting: Option<String>,
    /// Timeout for non-streaming backend calls
    pub request_timeout_secs: Option<u64>,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
///
/// # Examples
/// - Unix: `/home/user/.config/iris/config.toml` → `~/.config/iris/config.toml`
/// - Windows: paths are shown unchanged
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
