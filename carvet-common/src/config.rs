//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Database file name inside the root folder, shared by all carvet services
pub const DATABASE_FILE_NAME: &str = "carvet.db";

/// Optional TOML configuration file contents
///
/// Lowest-priority configuration source. Lives at
/// `~/.config/carvet/config.toml` (or `/etc/carvet/config.toml` system-wide).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the shared database and uploaded media
    pub root_folder: Option<String>,
    /// Vision API key for the verification service
    pub vision_api_key: Option<String>,
    /// Vision model name override
    pub vision_model: Option<String>,
    /// Vision API base URL override
    pub vision_base_url: Option<String>,
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return PathBuf::from(path);
    }

    // Priority 3: TOML config file
    if let Ok(config) = load_toml_config() {
        if let Some(root_folder) = config.root_folder {
            return PathBuf::from(root_folder);
        }
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Load the TOML config file, if one exists
pub fn load_toml_config() -> Result<TomlConfig> {
    let path = config_file_path()?;
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Get the configuration file path for the platform
fn config_file_path() -> Result<PathBuf> {
    if let Some(user_config) = dirs::config_dir().map(|d| d.join("carvet").join("config.toml")) {
        if user_config.exists() {
            return Ok(user_config);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/carvet/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("carvet"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/carvet"))
}

/// Ensure the root folder directory exists, creating it if missing
pub fn ensure_root_folder(root_folder: &Path) -> Result<()> {
    if !root_folder.exists() {
        std::fs::create_dir_all(root_folder)?;
        tracing::info!("Created root folder: {}", root_folder.display());
    }
    Ok(())
}

/// Path of the shared database inside the root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_argument_takes_priority() {
        let resolved = resolve_root_folder(Some("/tmp/carvet-cli"), "CARVET_TEST_UNSET_VAR");
        assert_eq!(resolved, PathBuf::from("/tmp/carvet-cli"));
    }

    #[test]
    fn env_var_used_when_no_cli_arg() {
        std::env::set_var("CARVET_TEST_ROOT_VAR", "/tmp/carvet-env");
        let resolved = resolve_root_folder(None, "CARVET_TEST_ROOT_VAR");
        std::env::remove_var("CARVET_TEST_ROOT_VAR");
        assert_eq!(resolved, PathBuf::from("/tmp/carvet-env"));
    }

    #[test]
    fn database_path_appends_file_name() {
        let path = database_path(Path::new("/data/carvet"));
        assert_eq!(path, PathBuf::from("/data/carvet/carvet.db"));
    }
}
