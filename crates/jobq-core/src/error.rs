use crate::JobState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Unknown job state: {0}")]
    UnknownState(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Unknown config key '{key}' (valid keys: {valid})")]
    UnknownConfigKey { key: String, valid: String },

    #[error("Invalid value '{value}' for config key '{key}'")]
    InvalidConfigValue { key: String, value: String },

    #[error("Config serialization error: {0}")]
    ConfigSerialization(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JobError>;
