use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ExchangeError, Result};

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub contracts: ContractsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
    pub acquire_timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ContractsConfig {
    pub endpoint: String,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            contracts: ContractsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8010,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://exchange.db".to_string(),
            max_connections: Some(10),
            acquire_timeout_seconds: Some(30),
        }
    }
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8011".to_string(),
            timeout_seconds: Some(10),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Some("pretty".to_string()),
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| ExchangeError::Config(format!("failed to read config file: {e}")))?;

        let config: AppConfig = toml::from_str(&config_str)
            .map_err(|e| ExchangeError::Config(format!("failed to parse config file: {e}")))?;

        Ok(config)
    }

    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(endpoint) = std::env::var("CONTRACT_SERVICE_URL") {
            self.contracts.endpoint = endpoint;
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(ExchangeError::Config("server port cannot be 0".to_string()));
        }
        if self.database.url.is_empty() {
            return Err(ExchangeError::Config("database URL cannot be empty".to_string()));
        }
        if self.contracts.endpoint.is_empty() {
            return Err(ExchangeError::Config(
                "contract service endpoint cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn get_server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.get_server_address(), "127.0.0.1:8010");
    }

    #[test]
    fn loads_from_toml() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [database]
            url = "sqlite://test.db"

            [contracts]
            endpoint = "http://contracts.internal:8080"
            timeout_seconds = 5

            [logging]
            level = "debug"
            "#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.contracts.endpoint, "http://contracts.internal:8080");
        assert_eq!(config.contracts.timeout_seconds, Some(5));
        assert_eq!(config.logging.level, "debug");
        config.validate().unwrap();
    }

    #[test]
    fn rejects_port_zero() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }
}
