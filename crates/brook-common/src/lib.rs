use serde::{Deserialize, Serialize};

mod status;

pub use status::{GenerationStatus, MessageRole};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged global configuration used by the running process.
///
/// Merge order: CLI > ENV > built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Database DSN used for this process.
    pub dsn: String,
    /// Base URL of the OpenAI-compatible reasoning engine.
    pub engine_base_url: String,
    pub engine_api_key: Option<String>,
    pub engine_model: String,
    /// Trailing-edge coalescing window for durable content writes.
    pub flush_interval_ms: u64,
    pub keepalive_secs: u64,
    /// Bound on a single client-facing write before the connection is
    /// treated as stalled.
    pub write_timeout_ms: u64,
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dsn: Option<String>,
    pub engine_base_url: Option<String>,
    pub engine_api_key: Option<String>,
    pub engine_model: Option<String>,
    pub flush_interval_ms: Option<u64>,
    pub keepalive_secs: Option<u64>,
    pub write_timeout_ms: Option<u64>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.engine_base_url.is_some() {
            self.engine_base_url = other.engine_base_url;
        }
        if other.engine_api_key.is_some() {
            self.engine_api_key = other.engine_api_key;
        }
        if other.engine_model.is_some() {
            self.engine_model = other.engine_model;
        }
        if other.flush_interval_ms.is_some() {
            self.flush_interval_ms = other.flush_interval_ms;
        }
        if other.keepalive_secs.is_some() {
            self.keepalive_secs = other.keepalive_secs;
        }
        if other.write_timeout_ms.is_some() {
            self.write_timeout_ms = other.write_timeout_ms;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: self.port.unwrap_or(8900),
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            engine_base_url: self
                .engine_base_url
                .ok_or(GlobalConfigError::MissingField("engine_base_url"))?,
            engine_api_key: self.engine_api_key,
            engine_model: self
                .engine_model
                .ok_or(GlobalConfigError::MissingField("engine_model"))?,
            flush_interval_ms: self.flush_interval_ms.unwrap_or(300),
            keepalive_secs: self.keepalive_secs.unwrap_or(15),
            write_timeout_ms: self.write_timeout_ms.unwrap_or(5000),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            dsn: Some(value.dsn),
            engine_base_url: Some(value.engine_base_url),
            engine_api_key: value.engine_api_key,
            engine_model: Some(value.engine_model),
            flush_interval_ms: Some(value.flush_interval_ms),
            keepalive_secs: Some(value.keepalive_secs),
            write_timeout_ms: Some(value.write_timeout_ms),
        }
    }
}
