//! Client configuration loaded from `trust-debug.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::controller::ControllerOptions;
use crate::source_id::IdentityFormat;

pub const CONFIG_FILE: &str = "trust-debug.toml";

const DEFAULT_CLIENT_ID: &str = "trust-debug-client";
const DEFAULT_ADAPTER_ID: &str = "python";
const DEFAULT_ADAPTER_COMMAND: &str = "trust-debug";

/// Errors raised while reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Config file path (if one was read).
    pub config_path: Option<PathBuf>,
    pub client: ClientSettings,
    pub adapter: AdapterConfig,
    /// Text wrapped around content hashes to form source identities.
    pub sources: IdentityFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub client_id: String,
    pub adapter_id: String,
    /// No timeout when unset.
    pub request_timeout: Option<Duration>,
    /// Thread used for run control until the engine reports one.
    pub default_thread_id: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            adapter_id: DEFAULT_ADAPTER_ID.to_string(),
            request_timeout: None,
            default_thread_id: 1,
        }
    }
}

/// Engine process spawned by [`crate::transport::ProcessConnector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_ADAPTER_COMMAND.to_string(),
            args: Vec::new(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            client: ClientSettings::default(),
            adapter: AdapterConfig::default(),
            sources: IdentityFormat::default(),
        }
    }
}

impl ClientConfig {
    /// Load `path`, falling back to defaults when it is missing or invalid.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::from_path(path) {
            Ok(config) => config,
            Err(err) => {
                warn!("{err}; using default trust-debug config");
                Self::default()
            }
        }
    }

    /// Load `path`, surfacing read and parse failures.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_contents(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_contents(contents: &str) -> Result<Self, toml::de::Error> {
        let parsed: ConfigFile = toml::from_str(contents)?;
        let defaults = ClientSettings::default();
        let adapter_defaults = AdapterConfig::default();
        Ok(Self {
            config_path: None,
            client: ClientSettings {
                client_id: parsed.client.client_id.unwrap_or(defaults.client_id),
                adapter_id: parsed.client.adapter_id.unwrap_or(defaults.adapter_id),
                request_timeout: parsed
                    .client
                    .request_timeout_ms
                    .filter(|ms| *ms > 0)
                    .map(Duration::from_millis),
                default_thread_id: parsed
                    .client
                    .default_thread_id
                    .unwrap_or(defaults.default_thread_id),
            },
            adapter: AdapterConfig {
                command: parsed.adapter.command.unwrap_or(adapter_defaults.command),
                args: parsed.adapter.args,
            },
            sources: IdentityFormat {
                prefix: parsed.sources.prefix.unwrap_or_default(),
                suffix: parsed.sources.suffix.unwrap_or_default(),
            },
        })
    }

    #[must_use]
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            client_id: self.client.client_id.clone(),
            adapter_id: self.client.adapter_id.clone(),
            default_thread_id: self.client.default_thread_id,
            identity: self.sources.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    client: ClientSection,
    #[serde(default)]
    adapter: AdapterSection,
    #[serde(default)]
    sources: SourcesSection,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSection {
    client_id: Option<String>,
    adapter_id: Option<String>,
    request_timeout_ms: Option<u64>,
    default_thread_id: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AdapterSection {
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SourcesSection {
    prefix: Option<String>,
    suffix: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("{prefix}-{stamp}"));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn parses_all_sections() {
        let config = ClientConfig::from_contents(
            r#"
[client]
client_id = "notebook"
adapter_id = "python"
request_timeout_ms = 2500
default_thread_id = 3

[adapter]
command = "python"
args = ["-m", "debugpy.adapter"]

[sources]
prefix = "/tmp/ipykernel_42/"
suffix = ".py"
"#,
        )
        .expect("parse config");

        assert_eq!(config.client.client_id, "notebook");
        assert_eq!(config.client.request_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.adapter.args, vec!["-m", "debugpy.adapter"]);
        let options = config.controller_options();
        assert_eq!(options.default_thread_id, 3);
        assert_eq!(options.identity.suffix, ".py");
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config = ClientConfig::from_contents("[adapter]\ncommand = \"engine\"\n")
            .expect("parse config");
        assert_eq!(config.client, ClientSettings::default());
        assert_eq!(config.adapter.command, "engine");
        assert!(config.adapter.args.is_empty());
        assert_eq!(config.sources, IdentityFormat::default());
    }

    #[test]
    fn load_falls_back_while_from_path_reports() {
        let root = temp_dir("trust-debug-config");
        let path = root.join(CONFIG_FILE);
        fs::write(&path, "[client\nclient_id = 1").expect("write config");

        assert_eq!(ClientConfig::load(&path), ClientConfig::default());
        assert!(matches!(
            ClientConfig::from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            ClientConfig::from_path(&root.join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
        assert_eq!(
            ClientConfig::load(&root.join("missing.toml")),
            ClientConfig::default()
        );

        fs::write(&path, "[client]\ndefault_thread_id = 9\n").expect("write config");
        let loaded = ClientConfig::load(&path);
        assert_eq!(loaded.client.default_thread_id, 9);
        assert_eq!(loaded.config_path.as_deref(), Some(path.as_path()));
        let _ = fs::remove_dir_all(root);
    }
}
