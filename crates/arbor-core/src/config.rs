//! Configuration for the arbor daemon, CLI and web server.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/arbor.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config at {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ArborConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:9850".to_string(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub sqlite_path: PathBuf,
    /// When set, every published event is also appended to this JSONL file.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from(".arbor/state.sqlite"),
            event_log: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub command_timeout_secs: u64,
    pub default_base_branch: String,
    pub remote: String,
    #[serde(default = "default_pr_limit")]
    pub pr_limit: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 20,
            default_base_branch: "main".to_string(),
            remote: "origin".to_string(),
            pr_limit: default_pr_limit(),
        }
    }
}

impl ScanConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub git_binary: PathBuf,
    pub gh_binary: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            git_binary: PathBuf::from("git"),
            gh_binary: PathBuf::from("gh"),
        }
    }
}

/// Project branch naming convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Empty means any prefix is accepted.
    #[serde(default)]
    pub allowed_prefixes: Vec<String>,
    pub max_length: usize,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            allowed_prefixes: Vec::new(),
            max_length: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_event_buffer() -> usize {
    1024
}

fn default_pr_limit() -> u32 {
    200
}

pub fn parse_config(contents: &str) -> Result<ArborConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<ArborConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

/// Loads the config when the file exists, otherwise returns defaults.
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<ArborConfig, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Ok(ArborConfig::default());
    }
    load_config(path_ref)
}

pub fn save_config(path: impl AsRef<Path>, config: &ArborConfig) -> Result<(), ConfigError> {
    let path_ref = path.as_ref();
    let parent = path_ref.parent().map(Path::to_path_buf);
    if let Some(parent_dir) = parent.filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(&parent_dir).map_err(|source| ConfigError::CreateDir {
            path: parent_dir,
            source,
        })?;
    }

    let body = toml::to_string_pretty(config).map_err(|source| ConfigError::Serialize {
        path: path_ref.to_path_buf(),
        source,
    })?;
    fs::write(path_ref, body).map_err(|source| ConfigError::Write {
        path: path_ref.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_temp_path(file_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "{file_name}-{}.toml",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[test]
    fn parse_config_applies_defaults_for_missing_sections() {
        let config = parse_config(
            r#"
[scan]
command_timeout_secs = 5
default_base_branch = "develop"
remote = "upstream"
"#,
        )
        .expect("parse config");

        assert_eq!(config.scan.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.scan.default_base_branch, "develop");
        assert_eq!(config.scan.pr_limit, 200);
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.tools.git_binary, PathBuf::from("git"));
    }

    #[test]
    fn parse_config_reads_naming_rules() {
        let config = parse_config(
            r#"
[naming]
allowed_prefixes = ["feature/", "fix/"]
max_length = 60
"#,
        )
        .expect("parse config");
        assert_eq!(config.naming.allowed_prefixes, vec!["feature/", "fix/"]);
        assert_eq!(config.naming.max_length, 60);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let path = unique_temp_path("arbor-config");
        let mut config = ArborConfig::default();
        config.server.bind = "0.0.0.0:9000".to_string();
        config.logging.level = "debug".to_string();

        save_config(&path, &config).expect("save");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, config);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn load_config_or_default_tolerates_missing_file() {
        let path = unique_temp_path("arbor-missing");
        let config = load_config_or_default(&path).expect("defaults");
        assert_eq!(config, ArborConfig::default());

        let err = load_config(&path).expect_err("missing file");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn bundled_sample_config_matches_defaults() {
        let config = parse_config(include_str!("../../../config/arbor.toml")).expect("sample");
        assert_eq!(config, ArborConfig::default());
    }
}
