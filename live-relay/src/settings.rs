//! Application settings.
//!
//! Settings are read from a TOML file. Every key has a default, so a missing
//! file or a partial one is valid:
//!
//! ```toml
//! [datasource]
//! kind = "json"
//! json_path = "datasource.json"
//!
//! [plugin]
//! auto_download_dependency = false
//!
//! [sender.qq]
//! name = "QQ"
//! url = "http://127.0.0.1:5700/push"
//! token = "secret"
//! delay_ms = 1500
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::delivery::SenderEndpoint;
use crate::{Error, Result};

/// Default settings file name.
pub const DEFAULT_SETTINGS_FILE: &str = "live-relay.toml";

/// Environment variable overriding `datasource.database_url`.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub datasource: DatasourceSettings,
    pub plugin: PluginSettings,
    pub router: RouterSettings,
    /// Push platform endpoints, keyed by platform.
    pub sender: HashMap<String, SenderEndpoint>,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = match std::fs::read_to_string(path) {
            Ok(raw) => {
                info!(path = %path.display(), "Loading settings");
                Self::parse(&raw)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Settings file not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        settings.apply_env();
        Ok(settings)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::config(format!("Invalid settings: {}", e)))
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(DATABASE_URL_ENV)
            && !url.trim().is_empty()
        {
            debug!("Database URL taken from {}", DATABASE_URL_ENV);
            self.datasource.database_url = url;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasourceKind {
    #[default]
    Json,
    Sqlite,
    Empty,
}

impl DatasourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Sqlite => "sqlite",
            Self::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasourceSettings {
    pub kind: DatasourceKind,
    pub json_path: PathBuf,
    /// Reload the JSON file when it changes.
    pub json_auto_reload: bool,
    pub database_url: String,
    /// Quiet period before a burst of file changes triggers a reload.
    pub reload_debounce_ms: u64,
}

impl Default for DatasourceSettings {
    fn default() -> Self {
        Self {
            kind: DatasourceKind::Json,
            json_path: PathBuf::from("datasource.json"),
            json_auto_reload: true,
            database_url: "sqlite:live-relay.db?mode=rwc".to_string(),
            reload_debounce_ms: 1000,
        }
    }
}

impl DatasourceSettings {
    pub fn reload_debounce(&self) -> Duration {
        Duration::from_millis(self.reload_debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    pub dir: PathBuf,
    /// Directories searched for already-resolved dependencies.
    pub lib_dirs: Vec<PathBuf>,
    /// Where downloaded dependencies are written.
    pub download_dir: PathBuf,
    pub auto_download_dependency: bool,
    /// Maven-layout mirrors, tried in order.
    pub mirror_urls: Vec<String>,
    pub download_timeout_secs: u64,
    pub restart_delay_ms: u64,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("plugins"),
            lib_dirs: vec![PathBuf::from("lib"), PathBuf::from("plugins-lib")],
            download_dir: PathBuf::from("plugins-lib"),
            auto_download_dependency: true,
            mirror_urls: vec![
                "https://maven.aliyun.com/repository/public".to_string(),
                "https://repo1.maven.org/maven2".to_string(),
            ],
            download_timeout_secs: 60,
            restart_delay_ms: 3000,
        }
    }
}

impl PluginSettings {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    pub max_workers: usize,
    /// Timeout of outbound HTTP calls.
    pub send_timeout_secs: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_workers: 100,
            send_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub dir: PathBuf,
    /// `EnvFilter` directive. `RUST_LOG` takes precedence.
    pub filter: Option<String>,
    /// Write the log file as JSON lines.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            filter: None,
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.datasource.kind, DatasourceKind::Json);
        assert!(settings.plugin.auto_download_dependency);
        assert_eq!(settings.plugin.mirror_urls.len(), 2);
        assert_eq!(settings.plugin.restart_delay(), Duration::from_secs(3));
        assert_eq!(settings.router.max_workers, 100);
        assert!(settings.sender.is_empty());
    }

    #[test]
    fn test_partial_file() {
        let settings = Settings::parse(
            r#"
            [datasource]
            kind = "sqlite"

            [plugin]
            auto_download_dependency = false
            mirror_urls = ["https://mirror.example"]

            [sender.qq]
            name = "QQ"
            url = "http://127.0.0.1:5700/push"
            token = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(settings.datasource.kind, DatasourceKind::Sqlite);
        assert_eq!(settings.datasource.json_path, PathBuf::from("datasource.json"));
        assert!(!settings.plugin.auto_download_dependency);
        assert_eq!(settings.plugin.mirror_urls, vec!["https://mirror.example"]);
        assert_eq!(settings.plugin.dir, PathBuf::from("plugins"));

        let qq = &settings.sender["qq"];
        assert_eq!(qq.name, "QQ");
        assert_eq!(qq.token.as_deref(), Some("secret"));
        assert_eq!(qq.delay_ms, 1000);
    }

    #[test]
    fn test_invalid_file() {
        let err = Settings::parse("[datasource]\nkind = \"redis\"").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.plugin, PluginSettings::default());
    }
}
