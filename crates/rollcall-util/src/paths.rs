//! Default paths for rollcall components
//!
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/rollcalld/rollcalld.sock` or `/tmp/rollcalld-$USER/rollcalld.sock`
//! - Data: `$XDG_DATA_HOME/rollcalld` or `~/.local/share/rollcalld`
//! - Config: `$XDG_CONFIG_HOME/rollcall/config.toml` or `~/.config/rollcall/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const ROLLCALL_SOCKET_ENV: &str = "ROLLCALL_SOCKET";

/// Environment variable for overriding the data directory
pub const ROLLCALL_DATA_DIR_ENV: &str = "ROLLCALL_DATA_DIR";

/// Environment variable for overriding the config file
pub const ROLLCALL_CONFIG_ENV: &str = "ROLLCALL_CONFIG";

const SOCKET_FILENAME: &str = "rollcalld.sock";

const APP_DIR: &str = "rollcalld";

const CONFIG_DIR: &str = "rollcall";

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$ROLLCALL_SOCKET` environment variable (if set)
/// 2. `$XDG_RUNTIME_DIR/rollcalld/rollcalld.sock` (if XDG_RUNTIME_DIR is set)
/// 3. `/tmp/rollcalld-$USER/rollcalld.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(ROLLCALL_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Get the socket path without checking the ROLLCALL_SOCKET env var.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$ROLLCALL_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/rollcalld` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/rollcalld` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(ROLLCALL_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking the ROLLCALL_DATA_DIR env var.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Get the default configuration file path.
///
/// Order of precedence:
/// 1. `$ROLLCALL_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/rollcall/config.toml`
/// 3. `~/.config/rollcall/config.toml`
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(ROLLCALL_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(CONFIG_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR)
            .join("config.toml");
    }

    PathBuf::from("/etc").join(CONFIG_DIR).join("config.toml")
}
