//! Error types for bind/unbind and discovery operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TeleoError>;

#[derive(Error, Debug)]
pub enum TeleoError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Device already bound: {0}")]
    Exclusivity(String),

    #[error("Stale discovery generation: requested {requested}, current {current}")]
    StaleGeneration { requested: u64, current: u64 },

    #[error("Unknown driver: {0}")]
    Driver(String),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tokio task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
