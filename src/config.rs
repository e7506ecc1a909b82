//! Agent options loaded from TOML
//!
//! Holds everything the session needs to reach the broker: node identity,
//! broker address, optional DCCS credential service, and where the durable
//! files live. Structural problems are reported at load time; incomplete
//! broker options are only checked when a connection is attempted.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main agent configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub agent: AgentSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    /// DCCS credential service, required when `connect_type = "dccs"`
    pub dccs: Option<DccsSection>,
    #[serde(default)]
    pub storage: StorageSection,
}

/// Node identity and session behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    /// Node identifier used in every topic
    pub node_id: String,
    /// Device identifier, only meaningful for `edge_type = "device"`
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub edge_type: EdgeType,
    #[serde(default)]
    pub connect_type: ConnectType,
    /// Fetch TLS credentials from DCCS instead of plain MQTT ones
    #[serde(default)]
    pub use_secure: bool,
    /// Heartbeat period in seconds, 0 disables the heartbeat
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
    /// Buffer undeliverable data in the offline queue
    #[serde(default = "default_true")]
    pub data_recover: bool,
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,
}

/// Whether the agent reports as a whole node or as a single device
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    #[default]
    Gateway,
    Device,
}

/// How broker credentials are obtained
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectType {
    /// Credentials exchanged for a service key before every (re)connect
    #[default]
    Dccs,
    /// Credentials taken directly from `[mqtt]`
    Mqtt,
}

/// Broker transport protocol
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Websocket,
    Tls,
}

impl Protocol {
    /// URL scheme used when the broker address is rendered as a URL
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Websocket => "ws",
            Protocol::Tls => "tls",
        }
    }
}

/// MQTT broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    #[serde(default)]
    pub host_name: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Environment variable overriding `username`
    pub username_env: Option<String>,
    /// Environment variable overriding `password`
    pub password_env: Option<String>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host_name: String::new(),
            port: default_mqtt_port(),
            username: String::new(),
            password: String::new(),
            username_env: None,
            password_env: None,
            protocol: Protocol::default(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

impl MqttSection {
    /// Broker options are usable only with a host and a non-zero port
    pub fn is_valid(&self) -> bool {
        !self.host_name.is_empty() && self.port != 0
    }

    /// Username with the environment override applied
    pub fn resolved_username(&self) -> String {
        AgentConfig::get_env_var_optional(self.username_env.as_ref())
            .unwrap_or_else(|| self.username.clone())
    }

    /// Password with the environment override applied
    pub fn resolved_password(&self) -> String {
        AgentConfig::get_env_var_optional(self.password_env.as_ref())
            .unwrap_or_else(|| self.password.clone())
    }
}

/// DCCS credential service section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DccsSection {
    pub url: String,
    pub key: String,
}

impl DccsSection {
    pub fn is_valid(&self) -> bool {
        !self.url.is_empty() && !self.key.is_empty()
    }
}

/// Local files and the recovery cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    #[serde(default = "default_recover_db_path")]
    pub recover_db_path: PathBuf,
    #[serde(default = "default_config_cache_path")]
    pub config_cache_path: PathBuf,
    #[serde(default = "default_recover_interval")]
    pub recover_interval_secs: u64,
    #[serde(default = "default_recover_batch_size")]
    pub recover_batch_size: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            recover_db_path: default_recover_db_path(),
            config_cache_path: default_config_cache_path(),
            recover_interval_secs: default_recover_interval(),
            recover_batch_size: default_recover_batch_size(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_reconnect_interval() -> u64 {
    1
}

fn default_publish_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_recover_db_path() -> PathBuf {
    PathBuf::from("_recover.sqlite")
}

fn default_config_cache_path() -> PathBuf {
    PathBuf::from("_config.json")
}

fn default_recover_interval() -> u64 {
    3
}

fn default_recover_batch_size() -> usize {
    10
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid node ID: {0}")]
    InvalidNodeId(String),
    #[error("MQTT options are incomplete: host_name and port are required")]
    InvalidMqttOptions,
    #[error("DCCS options are missing or incomplete: url and key are required")]
    InvalidDccsOptions,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation performed at load time
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_node_id(&self.agent.node_id)?;
        if self.agent.edge_type == EdgeType::Device {
            validate_node_id(&self.agent.device_id)
                .map_err(|_| ConfigError::InvalidConfig(format!(
                    "device edge type requires a valid device_id, got '{}'",
                    self.agent.device_id
                )))?;
        }
        if self.storage.recover_batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "recover_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.storage.recover_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "recover_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// DCCS section, checked for completeness
    pub fn dccs_options(&self) -> Result<&DccsSection, ConfigError> {
        self.dccs
            .as_ref()
            .filter(|dccs| dccs.is_valid())
            .ok_or(ConfigError::InvalidDccsOptions)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        match self.agent.heartbeat_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.agent.reconnect_interval_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.publish_timeout_secs.max(1))
    }

    pub fn recover_interval(&self) -> Duration {
        Duration::from_secs(self.storage.recover_interval_secs.max(1))
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[agent]
node_id = "test-node"
connect_type = "mqtt"

[mqtt]
host_name = "localhost"
port = 1883
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Node and device IDs end up inside topic names, so MQTT separators and
/// wildcards are rejected.
fn validate_node_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::InvalidNodeId("ID cannot be empty".to_string()));
    }
    if let Some(ch) = id.chars().find(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace()) {
        return Err(ConfigError::InvalidNodeId(format!(
            "'{id}' contains invalid character '{ch}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = AgentConfig::test_config();
        assert_eq!(config.agent.edge_type, EdgeType::Gateway);
        assert_eq!(config.agent.connect_type, ConnectType::Mqtt);
        assert_eq!(config.agent.heartbeat_interval_secs, 60);
        assert_eq!(config.agent.reconnect_interval_secs, 1);
        assert!(config.agent.data_recover);
        assert_eq!(config.mqtt.protocol, Protocol::Tcp);
        assert_eq!(config.storage.recover_interval_secs, 3);
        assert_eq!(config.storage.recover_batch_size, 10);
        assert_eq!(
            config.storage.recover_db_path,
            PathBuf::from("_recover.sqlite")
        );
    }

    #[test]
    fn test_connect_type_defaults_to_dccs() {
        let config = AgentConfig::from_toml_str("[agent]\nnode_id = \"n1\"\n").unwrap();
        assert_eq!(config.agent.connect_type, ConnectType::Dccs);
        assert!(matches!(
            config.dccs_options(),
            Err(ConfigError::InvalidDccsOptions)
        ));
    }

    #[test]
    fn test_node_id_validation() {
        assert!(validate_node_id("node-1").is_ok());
        assert!(validate_node_id("").is_err());
        assert!(validate_node_id("a/b").is_err());
        assert!(validate_node_id("a+b").is_err());
        assert!(validate_node_id("a#").is_err());
        assert!(validate_node_id("a b").is_err());
    }

    #[test]
    fn test_device_type_requires_device_id() {
        let result = AgentConfig::from_toml_str(
            "[agent]\nnode_id = \"n1\"\nedge_type = \"device\"\n",
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_mqtt_section_validity() {
        let mut mqtt = MqttSection::default();
        assert!(!mqtt.is_valid());
        mqtt.host_name = "broker".to_string();
        assert!(mqtt.is_valid());
        mqtt.port = 0;
        assert!(!mqtt.is_valid());
    }

    #[test]
    fn test_heartbeat_zero_disables() {
        let mut config = AgentConfig::test_config();
        config.agent.heartbeat_interval_secs = 0;
        assert_eq!(config.heartbeat_interval(), None);
        config.agent.heartbeat_interval_secs = 5;
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_env_override_for_credentials() {
        std::env::set_var("EDGE_AGENT_TEST_MQTT_USER", "from-env");
        let mqtt = MqttSection {
            username: "from-file".to_string(),
            username_env: Some("EDGE_AGENT_TEST_MQTT_USER".to_string()),
            password: "secret".to_string(),
            password_env: Some("EDGE_AGENT_TEST_UNSET_VAR".to_string()),
            ..MqttSection::default()
        };
        assert_eq!(mqtt.resolved_username(), "from-env");
        assert_eq!(mqtt.resolved_password(), "secret");
    }

    #[test]
    fn test_protocol_scheme() {
        assert_eq!(Protocol::Tcp.scheme(), "tcp");
        assert_eq!(Protocol::Websocket.scheme(), "ws");
        assert_eq!(Protocol::Tls.scheme(), "tls");
    }
}
