use std::fs;
use std::net::SocketAddr;

use crate::{
    docker::docker_models::SandboxLanguage,
    models::{
        config_models::{Config, HeartbeatBackend},
        error_models::ConfigError,
    },
};

pub const CONFIG_FILE: &str = "config.toml";
pub const CONFIG_ENV: &str = "LAB_SANDBOX_CONFIG";

impl Config {
    /// Reads `config.toml`, or the file named by `LAB_SANDBOX_CONFIG`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| CONFIG_FILE.to_string());
        Self::from_file(&path)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat.backend == HeartbeatBackend::Redis && self.heartbeat.redis_url.is_none()
        {
            return Err(ConfigError::Invalid(
                "heartbeat.redis_url is required for the redis backend".to_string(),
            ));
        }
        for language in SandboxLanguage::ALL {
            if self.image_for(language).trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "sandbox.images.{language} must not be empty"
                )));
            }
        }
        self.grpc_address()?;
        Ok(())
    }

    pub fn image_for(&self, language: SandboxLanguage) -> &str {
        let images = &self.sandbox.images;
        match language {
            SandboxLanguage::Python3 => &images.python3,
            SandboxLanguage::Cpp => &images.cpp,
            SandboxLanguage::Java => &images.java,
        }
    }

    pub fn grpc_address(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("server address: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        host = "127.0.0.1"
        port = 50051

        [sandbox.images]
        python3 = "py:3"
        cpp = "gcc:13"
        java = "openjdk:21"

        [heartbeat]
        backend = "memory"

        [database]
        url = "sqlite::memory:"

        [sweeper]
    "#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.sandbox.docker_bin, "docker");
        assert_eq!(config.image_for(SandboxLanguage::Cpp), "gcc:13");
        assert_eq!(config.heartbeat.backend, HeartbeatBackend::Memory);
        assert!(config.sweeper.enabled);
        assert_eq!(config.logging.filter, "info");
        assert_eq!(config.grpc_address().unwrap().port(), 50051);
    }

    #[test]
    fn redis_backend_needs_url() {
        let content = SAMPLE.replace("backend = \"memory\"", "backend = \"redis\"");
        assert!(matches!(
            Config::from_toml(&content),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            Config::from_file("/nonexistent/lab-sandbox.toml"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn repository_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml");
        Config::from_file(path).unwrap();
    }
}
