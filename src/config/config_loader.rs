/// Configuration loader for tty_relay
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File, FileFormat};
use tracing::{debug, info};

use crate::config::{ConfigError, RelayConfig};

/// Prefix of environment variable overrides, e.g. `TTY_RELAY__TERMINAL__ROWS=40`.
pub const ENV_PREFIX: &str = "TTY_RELAY";

/// Configuration loader responsible for merging defaults, file and environment
#[derive(Debug, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self
    }

    /// Load configuration: built-in defaults, then the TOML file, then environment.
    ///
    /// An explicit `config_path` must exist; the default `config.toml` is optional.
    pub fn load_config(&self, config_path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from {:?}", path);
        }

        let file = match config_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound(path.display().to_string()));
                }
                info!("Loading configuration from file: {:?}", path);
                Some(File::from(path).format(FileFormat::Toml).required(true))
            }
            None => default_config_path().map(|path| {
                info!("Using default configuration file path: {:?}", path);
                File::from(path).format(FileFormat::Toml).required(false)
            }),
        };

        let mut builder = Config::builder().add_source(Config::try_from(&RelayConfig::default())?);
        if let Some(file) = file {
            builder = builder.add_source(file);
        }
        builder = builder.add_source(self.environment());

        let config: RelayConfig = builder.build()?.try_deserialize()?;
        self.validate(&config)?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Parse configuration from TOML text. Missing fields take their defaults.
    pub fn parse_config(&self, content: &str) -> Result<RelayConfig, ConfigError> {
        let config = toml::from_str::<RelayConfig>(content)?;
        self.validate(&config)?;
        Ok(config)
    }

    /// Reject values the server can not run with.
    pub fn validate(&self, config: &RelayConfig) -> Result<(), ConfigError> {
        if config.command.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue("command.name is empty".to_string()));
        }
        if config.terminal.columns == 0 || config.terminal.rows == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "terminal size {}x{} has a zero dimension",
                config.terminal.columns, config.terminal.rows
            )));
        }
        if config.web_address.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "web_address {:?} is not a socket address",
                config.web_address
            )));
        }
        if let Some(entry) = config.command.environment.iter().find(|e| !e.contains('=')) {
            return Err(ConfigError::InvalidValue(format!(
                "environment entry {:?} is not KEY=VALUE",
                entry
            )));
        }
        Ok(())
    }

    fn environment(&self) -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(" ")
            .with_list_parse_key("command.args")
            .with_list_parse_key("command.environment")
    }
}

/// Default configuration path
pub fn default_config_path() -> Option<PathBuf> {
    // 使用当前工作目录作为默认配置文件目录
    std::env::current_dir().ok().map(|dir| dir.join("config.toml"))
}
