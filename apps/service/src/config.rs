use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(path::PathBuf, #[source] std::io::Error),

    #[error("failed to write config file {0}: {1}")]
    Write(path::PathBuf, #[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    PathUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: Engine,
    pub logging: Logging,
    pub notifications: Notifications,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Engine {
    /// libsql database file
    pub database_path: path::PathBuf,
    pub tick_millis: u64,
    /// How long shutdown waits for in-flight checks
    pub shutdown_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    /// `compact` or `json`
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notifications {
    pub telegram_api_base: String,
    /// Environment variable holding the credential passphrase
    pub secret_key_env: String,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

fn config_home() -> Result<path::PathBuf, ConfigError> {
    if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        Ok(path::PathBuf::from(config_home))
    } else if let Some(home_dir) = env::home_dir() {
        Ok(home_dir.join(".config"))
    } else {
        Err(ConfigError::PathUnavailable)
    }
}

/// Get default config path ($XDG_CONFIG_HOME/uppe/engine.toml or
/// $HOME/.config/...)
pub fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    Ok(config_home()?.join("uppe/engine.toml"))
}

fn default_database_path() -> path::PathBuf {
    env::var("XDG_DATA_HOME")
        .map(path::PathBuf::from)
        .ok()
        .or_else(|| env::home_dir().map(|home| home.join(".local/share")))
        .map(|dir| dir.join("uppe/engine.db"))
        .unwrap_or_else(|| path::PathBuf::from("uppe-engine.db"))
}

impl Default for Engine {
    fn default() -> Self {
        Self { database_path: default_database_path(), tick_millis: 1000, shutdown_timeout_seconds: 30 }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into() }
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self {
            telegram_api_base: crate::notifications::telegram::DEFAULT_API_BASE.into(),
            secret_key_env: "UPPE_SECRET_KEY".into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self { engine: Engine::default(), logging: Logging::default(), notifications: Notifications::default() }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Engine Configuration:")?;
        write_title_1(f, "Engine")?;
        write_1(f, "Database", &self.engine.database_path.display())?;
        write_1(f, "Tick (ms)", &self.engine.tick_millis)?;
        write_1(f, "Shutdown Timeout (s)", &self.engine.shutdown_timeout_seconds)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format)?;
        write_title_1(f, "Notifications")?;
        write_1(f, "Telegram API", &self.notifications.telegram_api_base)?;
        write_1(f, "Secret Key Variable", &self.notifications.secret_key_env)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uppe/engine.toml
    ///  or the specified path if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string =
                fs::read_to_string(&config_path).map_err(|err| ConfigError::Read(config_path.clone(), err))?;
            toml::from_str(raw_string.as_str()).map_err(|err| ConfigError::Parse(err.to_string()))
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String =
            toml::to_string_pretty(self).map_err(|err| ConfigError::Parse(err.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| ConfigError::Write(parent.to_path_buf(), err))?;
        }

        fs::write(path, config_str).map_err(|err| ConfigError::Write(path.to_path_buf(), err))
    }

    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.engine.tick_millis.max(10))
    }

    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.engine.shutdown_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/engine");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.logging, Logging::default());
        assert!(dir.path().join("nested/engine.toml").exists());

        let reread = Config::from_config(Some(&path)).unwrap();
        assert_eq!(reread, config);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        fs::write(&path, "[logging]\nformat = \"json\"\n").unwrap();

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.engine.tick_millis, 1000);
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        fs::write(&path, "[engine\n").unwrap();

        assert!(matches!(Config::from_config(Some(&path)), Err(ConfigError::Parse(_))));
    }
}
