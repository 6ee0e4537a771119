use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use streamui_components::Leniency;
use streamui_core::TransportOptions;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Client settings, usually read from a YAML file.
///
/// ```yaml
/// transport:
///   type: auto
///   wsUrl: ws://localhost:8080/ws
///   sse:
///     streamURL: http://localhost:8080/stream
///     sendURL: http://localhost:8080/send
/// history_dir: ./history
/// stream_leniency: strict
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportOptions>,
    #[serde(default = "default_clear_on_init")]
    pub clear_on_init: bool,
    #[serde(default = "default_exit_timeout_ms")]
    pub exit_timeout_ms: u64,
    #[serde(default = "default_send_queue_limit")]
    pub send_queue_limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_dir: Option<PathBuf>,
    #[serde(default)]
    pub stream_leniency: Leniency,
}

fn default_clear_on_init() -> bool {
    true
}

fn default_exit_timeout_ms() -> u64 {
    400
}

fn default_send_queue_limit() -> usize {
    64
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: None,
            clear_on_init: default_clear_on_init(),
            exit_timeout_ms: default_exit_timeout_ms(),
            send_queue_limit: default_send_queue_limit(),
            history_dir: None,
            stream_leniency: Leniency::default(),
        }
    }
}

impl ClientConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(&path).await?;
        let config = Self::from_yaml(&content)?;
        tracing::info!("Loaded client config from {:?}", path.as_ref());
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(transport) = &self.transport {
            transport
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.exit_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "exit_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }
}
