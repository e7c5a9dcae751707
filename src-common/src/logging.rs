//! Platform-specific logging directory resolution.

use std::path::PathBuf;

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "framecap")
}

/// Fallback when no home directory can be determined (containers, CI).
fn fallback_log_dir() -> PathBuf {
    std::env::temp_dir().join("framecap").join("logs")
}

/// Returns the platform-appropriate directory for log files.
///
/// | Platform | Directory |
/// |----------|-----------|
/// | Linux | `$XDG_STATE_HOME/framecap/logs` or `~/.local/state/framecap/logs` |
/// | macOS | `~/Library/Logs/framecap` |
/// | Windows | `%LOCALAPPDATA%\framecap\framecap\logs` |
pub fn log_dir() -> PathBuf {
    let Some(base) = project_dirs() else {
        return fallback_log_dir();
    };

    #[cfg(target_os = "linux")]
    {
        base.state_dir()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base.data_local_dir().join("state"))
            .join("logs")
    }

    #[cfg(target_os = "macos")]
    {
        // data_local_dir is ~/Library/Application Support/framecap; logs live
        // in ~/Library/Logs/framecap.
        let library = base
            .data_local_dir()
            .parent()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| base.data_local_dir().to_path_buf());
        library.join("Logs").join("framecap")
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        base.data_local_dir().join("logs")
    }
}

/// Ensures the log directory exists, creating it if necessary.
pub fn ensure_log_dir() -> Result<PathBuf, std::io::Error> {
    let dir = log_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// File name prefix for the CLI's rolling log files
/// (e.g. `framecap.log.2026-10-19`).
pub const CLI_LOG_PREFIX: &str = "framecap.log";
