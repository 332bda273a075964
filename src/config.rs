use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::services::registry::ConsulGatewayConfig;
use crate::services::watch::PendingLookupPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "DISCOVERY_CONFIG";
pub const ENV_PREFIX: &str = "DISCOVERY_";

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid environment override: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub registry: RegistryConfig,
    pub discovery: DiscoveryConfig,
}

/// 本服务的注册信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub health_check_path: String,
    pub metadata: HashMap<String, String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "SayHello".to_string(),
            host: "127.0.0.1".to_string(),
            port: 10086,
            health_check_path: "/health".to_string(),
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    Consul,
    Memory,
}

/// 注册中心连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub kind: RegistryKind,
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub watch_wait_secs: u64,
    pub watch_retry_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: RegistryKind::Consul,
            host: "127.0.0.1".to_string(),
            port: 8500,
            request_timeout_secs: 10,
            watch_wait_secs: 300,
            watch_retry_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingLookup {
    Wait,
    FailFast,
}

/// 服务发现缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub pending_lookup: PendingLookup,
    pub pending_wait_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            pending_lookup: PendingLookup::Wait,
            pending_wait_ms: 3000,
        }
    }
}

/// 环境变量覆盖项（前缀 DISCOVERY_）
#[derive(Debug, Default, Deserialize)]
pub struct EnvOverrides {
    pub service_name: Option<String>,
    pub service_host: Option<String>,
    pub service_port: Option<u16>,
    pub registry_kind: Option<RegistryKind>,
    pub registry_host: Option<String>,
    pub registry_port: Option<u16>,
    pub pending_lookup: Option<PendingLookup>,
}

impl Config {
    /// 加载配置：.env -> 配置文件 -> 环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;

        let overrides: EnvOverrides = envy::prefixed(ENV_PREFIX).from_env()?;
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    /// 读取配置文件，文件不存在时使用默认配置
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply(&mut self, overrides: EnvOverrides) {
        if let Some(name) = overrides.service_name {
            self.service.name = name;
        }
        if let Some(host) = overrides.service_host {
            self.service.host = host;
        }
        if let Some(port) = overrides.service_port {
            self.service.port = port;
        }
        if let Some(kind) = overrides.registry_kind {
            self.registry.kind = kind;
        }
        if let Some(host) = overrides.registry_host {
            self.registry.host = host;
        }
        if let Some(port) = overrides.registry_port {
            self.registry.port = port;
        }
        if let Some(pending_lookup) = overrides.pending_lookup {
            self.discovery.pending_lookup = pending_lookup;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::Invalid("service.name must not be empty".into()));
        }
        if self.service.port == 0 {
            return Err(ConfigError::Invalid("service.port must not be 0".into()));
        }
        if self.registry.kind == RegistryKind::Consul && self.registry.port == 0 {
            return Err(ConfigError::Invalid("registry.port must not be 0".into()));
        }
        if self.registry.request_timeout_secs == 0
            || self.registry.watch_wait_secs == 0
            || self.registry.watch_retry_secs == 0
        {
            return Err(ConfigError::Invalid(
                "registry timeouts must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn registry_address(&self) -> String {
        format!("http://{}:{}", self.registry.host, self.registry.port)
    }

    pub fn consul_gateway_config(&self) -> ConsulGatewayConfig {
        ConsulGatewayConfig {
            address: self.registry_address(),
            request_timeout: Duration::from_secs(self.registry.request_timeout_secs),
            watch_wait: Duration::from_secs(self.registry.watch_wait_secs),
            watch_retry: Duration::from_secs(self.registry.watch_retry_secs),
        }
    }

    pub fn pending_lookup_policy(&self) -> PendingLookupPolicy {
        match self.discovery.pending_lookup {
            PendingLookup::Wait => {
                PendingLookupPolicy::Wait(Duration::from_millis(self.discovery.pending_wait_ms))
            }
            PendingLookup::FailFast => PendingLookupPolicy::FailFast,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_file() {
        let config = Config::default();
        assert_eq!(config.service.name, "SayHello");
        assert_eq!(config.service.port, 10086);
        assert_eq!(config.registry_address(), "http://127.0.0.1:8500");
        assert_eq!(
            config.pending_lookup_policy(),
            PendingLookupPolicy::Wait(Duration::from_millis(3000))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [service]
            name = "orders"

            [registry]
            kind = "memory"

            [discovery]
            pending_lookup = "fail_fast"
            "#,
        )
        .unwrap();
        assert_eq!(config.service.name, "orders");
        assert_eq!(config.service.port, 10086);
        assert_eq!(config.registry.kind, RegistryKind::Memory);
        assert_eq!(config.pending_lookup_policy(), PendingLookupPolicy::FailFast);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let mut config = Config::default();
        let overrides: EnvOverrides = envy::prefixed(ENV_PREFIX)
            .from_iter(vec![
                ("DISCOVERY_SERVICE_PORT".to_string(), "9000".to_string()),
                ("DISCOVERY_REGISTRY_HOST".to_string(), "consul".to_string()),
                ("DISCOVERY_REGISTRY_KIND".to_string(), "memory".to_string()),
                ("UNRELATED".to_string(), "x".to_string()),
            ])
            .unwrap();
        config.apply(overrides);

        assert_eq!(config.service.port, 9000);
        assert_eq!(config.registry.host, "consul");
        assert_eq!(config.registry.kind, RegistryKind::Memory);
        assert_eq!(config.service.name, "SayHello");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.service.name = " ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.registry.watch_wait_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::from_file(Path::new("definitely/not/here.toml")).unwrap();
        assert_eq!(config.service.name, "SayHello");
    }
}
