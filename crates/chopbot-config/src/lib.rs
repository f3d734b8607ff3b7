use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub store: Store,
    pub model: Model,
    #[serde(default)]
    pub session: SessionCfg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub endpoint: String,
    pub model: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCfg {
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

fn default_protocol() -> String {
    "directive".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_ttl_seconds() -> u64 {
    86_400
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.store.kind != "memory" && cfg.store.kind != "sqlite" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.type={} is not implemented; supported: memory, sqlite",
            cfg.store.kind
        )));
    }
    if cfg.store.kind == "memory" && cfg.store.sqlite_path.is_some() {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is not supported when store.type=memory".to_string(),
        ));
    }
    if cfg.store.kind == "sqlite"
        && cfg
            .store
            .sqlite_path
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is required when store.type=sqlite".to_string(),
        ));
    }
    if cfg.model.protocol != "directive" && cfg.model.protocol != "structured" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "model.protocol={} is not implemented; supported: directive, structured",
            cfg.model.protocol
        )));
    }
    if cfg.model.endpoint.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "model.endpoint must not be empty".to_string(),
        ));
    }
    if cfg.model.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "model.timeout_ms must be >= 1".to_string(),
        ));
    }
    if cfg.session.ttl_seconds == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "session.ttl_seconds must be >= 1".to_string(),
        ));
    }
    Ok(())
}
