//! Configuration loading from the environment

use std::path::PathBuf;

use crate::model::ModelConfig;
use crate::server::{Endpoint, EndpointError};

const DEFAULT_MODEL: &str = "rnnt";
const DEFAULT_DEVICE: &str = "cpu";
const DEFAULT_WORKER: &str = "gigaam-worker";

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Where to accept connections (`GIGAAM_URI`)
    pub endpoint: Endpoint,

    /// Model variant selector (`GIGAAM_MODEL`)
    pub model: String,

    /// Inference device (`GIGAAM_DEVICE`)
    pub device: String,

    /// Directory with downloaded checkpoints (`GIGAAM_DATA_DIR`)
    pub data_dir: PathBuf,

    /// Worker program hosting the model (`GIGAAM_WORKER`)
    pub worker_command: String,

    /// Default to debug logging (`GIGAAM_DEBUG`)
    pub debug: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid GIGAAM_URI: {0}")]
    Endpoint(#[from] EndpointError),
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` to resolve variable names
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let endpoint: Endpoint = require("GIGAAM_URI")?.parse()?;
        let data_dir = PathBuf::from(require("GIGAAM_DATA_DIR")?);

        Ok(Self {
            endpoint,
            model: get("GIGAAM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            device: get("GIGAAM_DEVICE").unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            data_dir,
            worker_command: get("GIGAAM_WORKER").unwrap_or_else(|| DEFAULT_WORKER.to_string()),
            debug: get("GIGAAM_DEBUG").is_some_and(|value| is_truthy(&value)),
        })
    }

    /// Settings for bringing up the model
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            selector: self.model.clone(),
            device: self.device.clone(),
            data_dir: self.data_dir.clone(),
            worker_command: self.worker_command.clone(),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
